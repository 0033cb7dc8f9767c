use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{self, query};
use crate::entities::leaveday::{self, StaffType};
use crate::entities::{caretaker, doctor};
use crate::error::{AppError, AppResult};

/// Closed reservation window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Self> {
        if end < start {
            return Err(AppError::Unprocessable(
                "reserve_date_end must not be before reserve_date_start".to_string(),
            ));
        }

        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn first_day(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.end.date_naive()
    }

    pub fn touches_day(&self, day: NaiveDate) -> bool {
        self.first_day() <= day && day <= self.last_day()
    }
}

/// Caretakers free over `range`, lowest rating first.
pub async fn available_caretakers<C: ConnectionTrait>(
    db: &C,
    range: DateRange,
    exclude_booking: Option<Uuid>,
) -> AppResult<Vec<caretaker::Model>> {
    Ok(query::available_caretakers(range.start, range.end, exclude_booking)
        .all(db)
        .await?)
}

/// Picks the requested caretaker if it is in the availability set, otherwise
/// the first (lowest rated) one.
pub fn pick_caretaker(
    available: Vec<caretaker::Model>,
    requested: Option<Uuid>,
) -> AppResult<caretaker::Model> {
    match requested {
        Some(id) => available
            .into_iter()
            .find(|c| c.user_id == id)
            .ok_or_else(|| {
                AppError::Conflict("Caretaker is not available for the requested dates".to_string())
            }),
        None => available.into_iter().next().ok_or_else(|| {
            AppError::Conflict("No caretaker is available for the requested dates".to_string())
        }),
    }
}

/// Evaluates availability and claims the chosen caretaker row. Must run on
/// the same REPEATABLE READ transaction that inserts the assignment: the row
/// is locked and touched so a concurrent claim of the same caretaker fails.
pub async fn reserve_caretaker<C: ConnectionTrait>(
    db: &C,
    range: DateRange,
    requested: Option<Uuid>,
    exclude_booking: Option<Uuid>,
    now: DateTime<Utc>,
) -> AppResult<caretaker::Model> {
    let available = available_caretakers(db, range, exclude_booking).await?;
    let chosen = pick_caretaker(available, requested)?;

    let locked = db::find_or_lock::<caretaker::Entity, _>(db, chosen.user_id, "Caretaker").await?;
    let mut active: caretaker::ActiveModel = locked.into();
    active.updated_at = Set(now.into());

    Ok(active.update(db).await?)
}

pub async fn has_leave_in<C: ConnectionTrait>(
    db: &C,
    staff_type: StaffType,
    staff_id: Uuid,
    range: DateRange,
) -> AppResult<bool> {
    let count = leaveday::Entity::find()
        .filter(leaveday::Column::StaffType.eq(staff_type))
        .filter(leaveday::Column::StaffId.eq(staff_id))
        .filter(leaveday::Column::Day.between(range.first_day(), range.last_day()))
        .count(db)
        .await?;

    Ok(count > 0)
}

/// Whether the staff member is bound to a `wait` or `ongoing` booking that
/// touches `day` (UTC).
pub async fn has_booking_on<C: ConnectionTrait>(
    db: &C,
    staff_type: StaffType,
    staff_id: Uuid,
    day: NaiveDate,
) -> AppResult<bool> {
    let (Some(start), Some(end)) = (
        day.and_hms_opt(0, 0, 0).map(|d| d.and_utc()),
        day.and_hms_micro_opt(23, 59, 59, 999_999).map(|d| d.and_utc()),
    ) else {
        return Err(AppError::Unprocessable("day: out of range".to_string()));
    };

    let count = match staff_type {
        StaffType::Caretaker => {
            caretaker::Entity::find_by_id(staff_id)
                .filter(caretaker::Column::UserId.in_subquery(query::busy_caretakers(start, end, None)))
                .count(db)
                .await?
        }
        StaffType::Doctor => {
            doctor::Entity::find_by_id(staff_id)
                .filter(doctor::Column::UserId.in_subquery(query::busy_doctors(start, end, None)))
                .count(db)
                .await?
        }
    };

    Ok(count > 0)
}

/// Doctors are named explicitly; they only need to be off leave.
pub async fn reserve_doctor<C: ConnectionTrait>(
    db: &C,
    doctor_id: Uuid,
    range: DateRange,
    now: DateTime<Utc>,
) -> AppResult<doctor::Model> {
    let locked = db::find_or_lock::<doctor::Entity, _>(db, doctor_id, "Doctor").await?;

    if has_leave_in(db, StaffType::Doctor, doctor_id, range).await? {
        return Err(AppError::Conflict(
            "Doctor is on leave during the requested dates".to_string(),
        ));
    }

    let mut active: doctor::ActiveModel = locked.into();
    active.updated_at = Set(now.into());

    Ok(active.update(db).await?)
}

/// Locks and touches the staff row, the same row a booking transaction
/// claims, so leave changes and assignments for one person serialise.
async fn claim_staff<C: ConnectionTrait>(
    db: &C,
    staff_type: StaffType,
    staff_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<()> {
    match staff_type {
        StaffType::Caretaker => {
            let locked = db::find_or_lock::<caretaker::Entity, _>(db, staff_id, "Caretaker").await?;
            let mut active: caretaker::ActiveModel = locked.into();
            active.updated_at = Set(now.into());
            active.update(db).await?;
        }
        StaffType::Doctor => {
            let locked = db::find_or_lock::<doctor::Entity, _>(db, staff_id, "Doctor").await?;
            let mut active: doctor::ActiveModel = locked.into();
            active.updated_at = Set(now.into());
            active.update(db).await?;
        }
    }

    Ok(())
}

/// Records a leave day unless a `wait` or `ongoing` booking of the staff
/// member touches it.
pub async fn add_leave_day(
    db: &DatabaseConnection,
    staff_type: StaffType,
    staff_id: Uuid,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> AppResult<leaveday::Model> {
    let txn = db::begin_repeatable_read(db).await?;
    claim_staff(&txn, staff_type, staff_id, now).await?;

    if has_booking_on(&txn, staff_type, staff_id, day).await? {
        return Err(AppError::Conflict(
            "You have a waiting or ongoing service on that day".to_string(),
        ));
    }

    let leave = leaveday::ActiveModel {
        id: Set(Uuid::new_v4()),
        staff_type: Set(staff_type),
        staff_id: Set(staff_id),
        day: Set(day),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    tracing::info!(staff_id = %staff_id, day = %day, "Leave day added");
    Ok(leave)
}

/// Removes a leave day. Refused while a `wait` or `ongoing` booking of the
/// staff member touches that day.
pub async fn remove_leave_day(
    db: &DatabaseConnection,
    staff_type: StaffType,
    staff_id: Uuid,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let txn = db::begin_repeatable_read(db).await?;
    claim_staff(&txn, staff_type, staff_id, now).await?;

    if has_booking_on(&txn, staff_type, staff_id, day).await? {
        return Err(AppError::Conflict(
            "You have a waiting or ongoing service on that day".to_string(),
        ));
    }

    let result = leaveday::Entity::delete_many()
        .filter(leaveday::Column::StaffType.eq(staff_type))
        .filter(leaveday::Column::StaffId.eq(staff_id))
        .filter(leaveday::Column::Day.eq(day))
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Leave day not found".to_string()));
    }

    txn.commit().await?;

    tracing::info!(staff_id = %staff_id, day = %day, "Leave day removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use rust_decimal::Decimal;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn count_row(n: i64) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([("num_items", Value::BigInt(Some(n)))])
    }

    fn june(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    fn caretaker(id: u128, rating: i64) -> caretaker::Model {
        caretaker::Model {
            user_id: Uuid::from_u128(id),
            specialization: "grooming".to_string(),
            start_work_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_work_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            rating: Decimal::new(rating, 1),
            updated_at: at(1, 0).into(),
        }
    }

    #[test]
    fn test_range_rejects_end_before_start() {
        assert!(matches!(
            DateRange::new(at(11, 17), at(11, 9)),
            Err(AppError::Unprocessable(_))
        ));
    }

    #[test]
    fn test_instant_range_is_valid_and_touches_its_day() {
        let range = DateRange::new(at(11, 9), at(11, 9)).unwrap();

        assert!(range.touches_day(NaiveDate::from_ymd_opt(2025, 6, 11).unwrap()));
        assert!(!range.touches_day(NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()));
    }

    #[test]
    fn test_overlap_is_closed_on_both_ends() {
        let morning = DateRange::new(at(11, 9), at(11, 12)).unwrap();
        let afternoon = DateRange::new(at(11, 12), at(11, 17)).unwrap();
        let next_day = DateRange::new(at(12, 9), at(12, 17)).unwrap();

        assert!(morning.overlaps(&afternoon));
        assert!(afternoon.overlaps(&morning));
        assert!(!morning.overlaps(&next_day));
    }

    #[test]
    fn test_pick_first_when_nothing_requested() {
        let picked = pick_caretaker(vec![caretaker(2, 10), caretaker(1, 45)], None).unwrap();
        assert_eq!(picked.user_id, Uuid::from_u128(2));
    }

    #[test]
    fn test_pick_requested_caretaker_only_if_available() {
        let available = vec![caretaker(1, 10), caretaker(2, 20)];

        let picked = pick_caretaker(available.clone(), Some(Uuid::from_u128(2))).unwrap();
        assert_eq!(picked.user_id, Uuid::from_u128(2));

        assert!(matches!(
            pick_caretaker(available, Some(Uuid::from_u128(3))),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_pick_from_empty_set_conflicts() {
        assert!(matches!(pick_caretaker(vec![], None), Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reserve_caretaker_locks_and_touches_chosen_row() {
        let chosen = caretaker(7, 5);
        let mut touched = chosen.clone();
        touched.updated_at = at(11, 8).into();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![chosen.clone(), caretaker(8, 30)]])
            .append_query_results([vec![chosen.clone()]])
            .append_query_results([vec![touched.clone()]])
            .into_connection();

        let range = DateRange::new(at(11, 9), at(11, 17)).unwrap();
        let reserved = reserve_caretaker(&db, range, None, None, at(11, 8))
            .await
            .unwrap();

        assert_eq!(reserved.user_id, chosen.user_id);

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("FOR UPDATE"));
        assert!(log.contains("UPDATE \\\"caretaker\\\""));
    }

    #[tokio::test]
    async fn test_reserve_caretaker_fails_when_nobody_is_free() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<caretaker::Model>::new()])
            .into_connection();

        let range = DateRange::new(at(10, 9), at(10, 17)).unwrap();
        let err = reserve_caretaker(&db, range, Some(Uuid::from_u128(1)), None, at(9, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_leave_day_on_booked_day_conflicts() {
        let staff = caretaker(7, 5);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![count_row(1)]])
            .into_connection();

        let err = add_leave_day(&db, StaffType::Caretaker, staff.user_id, june(11), at(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("FOR UPDATE"));
        assert!(!log.contains("INSERT INTO"));
    }

    #[tokio::test]
    async fn test_leave_day_added_inside_locked_transaction() {
        let staff = caretaker(7, 5);
        let leave = leaveday::Model {
            id: Uuid::from_u128(99),
            staff_type: StaffType::Caretaker,
            staff_id: staff.user_id,
            day: june(11),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![count_row(0)]])
            .append_query_results([vec![leave.clone()]])
            .into_connection();

        let added = add_leave_day(&db, StaffType::Caretaker, staff.user_id, june(11), at(1, 0))
            .await
            .unwrap();
        assert_eq!(added.day, june(11));

        let log = db.into_transaction_log();
        assert_eq!(log.len(), 1);
        let statements = format!("{:?}", log[0]);
        assert!(statements.contains("FOR UPDATE"));
        assert!(statements.contains("INSERT INTO"));
    }

    #[tokio::test]
    async fn test_leave_day_under_a_booking_cannot_be_removed() {
        let staff = caretaker(7, 5);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![count_row(1)]])
            .into_connection();

        let err = remove_leave_day(&db, StaffType::Caretaker, staff.user_id, june(11), at(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let log = format!("{:?}", db.into_transaction_log());
        assert!(!log.contains("DELETE FROM"));
    }

    #[tokio::test]
    async fn test_removing_unknown_leave_day_is_not_found() {
        let staff = caretaker(7, 5);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![staff.clone()]])
            .append_query_results([vec![count_row(0)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let err = remove_leave_day(&db, StaffType::Caretaker, staff.user_id, june(11), at(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
