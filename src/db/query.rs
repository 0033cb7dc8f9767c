//! Composite predicates for availability queries.
//!
//! A staff member is free over `[start, end]` when they have no leave day on
//! any calendar date the window touches and are not bound to a `wait` or
//! `ongoing` booking whose reservation window intersects it.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    sea_query::{SelectStatement, SimpleExpr},
    ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, Select,
};
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus};
use crate::entities::leaveday::{self, StaffType};
use crate::entities::{caretaker, caretaker_service, medical_service};

/// `booking.start <= end AND booking.end >= start`
pub fn range_overlaps(start: DateTime<Utc>, end: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(booking::Column::ReserveDateStart.lte(end))
        .add(booking::Column::ReserveDateEnd.gte(start))
}

pub fn is_blocking() -> SimpleExpr {
    booking::Column::Status.is_in(BookingStatus::BLOCKING)
}

/// Ids of staff of `staff_type` with a leave day in `[first_day, last_day]`.
pub fn staff_on_leave(staff_type: StaffType, first_day: NaiveDate, last_day: NaiveDate) -> SelectStatement {
    leaveday::Entity::find()
        .select_only()
        .column(leaveday::Column::StaffId)
        .filter(leaveday::Column::StaffType.eq(staff_type))
        .filter(leaveday::Column::Day.between(first_day, last_day))
        .into_query()
}

pub fn no_leaveday_in(first_day: NaiveDate, last_day: NaiveDate) -> SimpleExpr {
    caretaker::Column::UserId.not_in_subquery(staff_on_leave(
        StaffType::Caretaker,
        first_day,
        last_day,
    ))
}

/// Ids of caretakers bound to a blocking booking overlapping the window.
/// `exclude` leaves one booking out, so a booking being rescheduled does not
/// collide with itself.
pub fn busy_caretakers(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> SelectStatement {
    caretaker_service::Entity::find()
        .select_only()
        .column(caretaker_service::Column::CaretakerId)
        .inner_join(booking::Entity)
        .filter(is_blocking())
        .filter(range_overlaps(start, end))
        .apply_if(exclude, |q, id| q.filter(booking::Column::Id.ne(id)))
        .into_query()
}

/// Same as [`busy_caretakers`] for doctors.
pub fn busy_doctors(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> SelectStatement {
    medical_service::Entity::find()
        .select_only()
        .column(medical_service::Column::DoctorId)
        .inner_join(booking::Entity)
        .filter(is_blocking())
        .filter(range_overlaps(start, end))
        .apply_if(exclude, |q, id| q.filter(booking::Column::Id.ne(id)))
        .into_query()
}

/// Lowest rating first, caretaker id as tie-break.
pub fn order_by_rating(select: Select<caretaker::Entity>) -> Select<caretaker::Entity> {
    select
        .order_by_asc(caretaker::Column::Rating)
        .order_by_asc(caretaker::Column::UserId)
}

pub fn available_caretakers(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Select<caretaker::Entity> {
    let select = caretaker::Entity::find()
        .filter(no_leaveday_in(start.date_naive(), end.date_naive()))
        .filter(caretaker::Column::UserId.not_in_subquery(busy_caretakers(start, end, exclude)));

    order_by_rating(select)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::sea_query::QueryStatementWriter;
    use sea_orm::DbBackend;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 11, h, 0, 0).unwrap()
    }

    #[test]
    fn test_available_caretakers_query_shape() {
        let sql = available_caretakers(at(9), at(17), None)
            .build(DbBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#""caretaker"."user_id" NOT IN (SELECT "leaveday"."staff_id""#));
        assert!(sql.contains(r#"BETWEEN '2025-06-11' AND '2025-06-11'"#));
        assert!(sql.contains(r#"INNER JOIN "service""#));
        assert!(sql.contains(r#"ORDER BY "caretaker"."rating" ASC, "caretaker"."user_id" ASC"#));
    }

    #[test]
    fn test_busy_caretakers_uses_closed_interval_overlap() {
        let sql = busy_caretakers(at(9), at(17), None)
            .to_string(sea_orm::sea_query::PostgresQueryBuilder);

        assert!(sql.contains(r#""service"."reserve_date_start" <= '2025-06-11 17:00:00"#));
        assert!(sql.contains(r#""service"."reserve_date_end" >= '2025-06-11 09:00:00"#));
        assert!(sql.contains("'wait'"));
        assert!(sql.contains("'ongoing'"));
        assert!(!sql.contains("'finish'"));
    }

    #[test]
    fn test_busy_caretakers_can_exclude_a_booking() {
        let id = Uuid::nil();
        let sql = busy_caretakers(at(9), at(17), Some(id))
            .to_string(sea_orm::sea_query::PostgresQueryBuilder);

        assert!(sql.contains(r#""service"."id" <> '00000000-0000-0000-0000-000000000000'"#));
    }
}
