use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::entities::booking::{self, BookingStatus};
use crate::entities::payment::{self, PaymentStatus};
use crate::entities::user::UserRole;
use crate::entities::{owner, webhook_event};
use crate::error::{AppError, AppResult};
use crate::services::availability::DateRange;
use crate::utils::jwt::Claims;
use crate::webhook::{PaymentEvent, ProviderStatus};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 5;
pub const MAX_LIMIT: u64 = 100;
pub const WEBHOOK_EVENT_TTL_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub owner_id: Option<Uuid>,
    pub reserve_date_start: DateTime<Utc>,
    pub reserve_date_end: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPaymentsQuery {
    pub month: Option<u32>,
    pub year: Option<i32>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePaymentRequest {
    pub status: Option<PaymentStatus>,
    #[serde(rename = "type")]
    pub pay_type: Option<String>,
    pub pay_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PaymentPage {
    pub items: Vec<payment::Model>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSession {
    pub pay_id: Uuid,
    pub status: PaymentStatus,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    Ignored {
        payment_id: Uuid,
    },
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(DEFAULT_PAGE);
        let limit = limit
            .filter(|l| *l >= 1)
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);

        Self { page, limit }
    }

    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.limit)
            .min(i64::MAX as u64)
    }
}

/// `[first instant of the month, first instant of the next month)` for the
/// requested period. A year alone means January of that year; a month alone
/// means that month of the current year.
pub fn month_window(
    month: Option<u32>,
    year: Option<i32>,
    today: NaiveDate,
) -> AppResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    if month.is_none() && year.is_none() {
        return Ok(None);
    }

    let month = month.unwrap_or(1);
    let year = year.unwrap_or(today.year());

    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::Unprocessable("month: must be between 1 and 12".to_string()))?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or_else(|| AppError::Unprocessable("year: out of range".to_string()))?;

    let start = first.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    let end = next.and_hms_opt(0, 0, 0).map(|d| d.and_utc());

    match (start, end) {
        (Some(start), Some(end)) => Ok(Some((start, end))),
        _ => Err(AppError::Unprocessable("year: out of range".to_string())),
    }
}

/// Adds `delta` to the owner's running total, never going below zero. A
/// missing owner row (deleted account) is left alone.
pub async fn adjust_spending<C: ConnectionTrait>(
    db: &C,
    owner_id: Uuid,
    delta: Decimal,
) -> AppResult<()> {
    let Some(row) = owner::Entity::find_by_id(owner_id)
        .lock_exclusive()
        .one(db)
        .await?
    else {
        return Ok(());
    };

    let total = (row.total_spending + delta).max(Decimal::ZERO);
    let mut active: owner::ActiveModel = row.into();
    active.total_spending = Set(total);
    active.update(db).await?;

    Ok(())
}

/// Refunds an already locked payment if it is paid; other statuses are kept
/// as they are.
pub async fn refund_locked<C: ConnectionTrait>(
    db: &C,
    payment: payment::Model,
    owner_id: Uuid,
    price: i32,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if payment.status != PaymentStatus::Paid {
        return Ok(());
    }

    let payment_id = payment.id;
    let mut active: payment::ActiveModel = payment.into();
    active.status = Set(PaymentStatus::Refunded);
    active.pay_date = Set(None);
    active.updated_at = Set(now.into());
    active.update(db).await?;

    adjust_spending(db, owner_id, -Decimal::from(price)).await?;

    tracing::info!(payment_id = %payment_id, "Payment refunded");
    Ok(())
}

/// Side effects of a payment becoming paid: the linked booking starts if it
/// is due and its price counts towards the owner's spending. A cancelled
/// booking is left alone and adds nothing.
async fn on_paid<C: ConnectionTrait>(
    db: &C,
    payment_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let Some(service) = booking::Entity::find()
        .filter(booking::Column::PaymentId.eq(payment_id))
        .lock_exclusive()
        .one(db)
        .await?
    else {
        return Ok(());
    };

    if service.status == BookingStatus::Cancelled {
        tracing::info!(service_id = %service.id, "Payment settled for a cancelled service");
        return Ok(());
    }

    let owner_id = service.owner_id;
    let price = service.price;

    if service.status == BookingStatus::Wait && service.reserve_date_start.with_timezone(&Utc) <= now {
        let service_id = service.id;
        let mut active: booking::ActiveModel = service.into();
        active.status = Set(BookingStatus::Ongoing);
        active.updated_at = Set(now.into());
        active.update(db).await?;

        tracing::info!(service_id = %service_id, "Service started on payment");
    }

    adjust_spending(db, owner_id, Decimal::from(price)).await
}

async fn on_refunded<C: ConnectionTrait>(db: &C, payment_id: Uuid) -> AppResult<()> {
    let service = booking::Entity::find()
        .filter(booking::Column::PaymentId.eq(payment_id))
        .one(db)
        .await?;

    match service {
        Some(service) => adjust_spending(db, service.owner_id, -Decimal::from(service.price)).await,
        None => Ok(()),
    }
}

pub async fn create_payment(
    db: &DatabaseConnection,
    claims: &Claims,
    req: CreatePaymentRequest,
    now: DateTime<Utc>,
) -> AppResult<payment::Model> {
    claims.require(&[UserRole::Owner, UserRole::Admin])?;
    let owner_id = req.owner_id.unwrap_or(claims.sub);
    claims.require_self_or_admin(owner_id)?;

    let range = DateRange::new(req.reserve_date_start, req.reserve_date_end)?;

    owner::Entity::find_by_id(owner_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Owner not found".to_string()))?;

    let id = Uuid::new_v4();
    let payment = payment::ActiveModel {
        id: Set(id),
        owner_id: Set(owner_id),
        status: Set(PaymentStatus::Unpaid),
        pay_type: Set(None),
        pay_date: Set(None),
        metadata: Set(json!({
            "pay_id": id,
            "reserve_date_start": range.start,
            "reserve_date_end": range.end,
        })),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(db)
    .await?;

    tracing::info!(payment_id = %payment.id, owner_id = %owner_id, "Payment created");
    Ok(payment)
}

pub async fn list_payments(
    db: &DatabaseConnection,
    claims: &Claims,
    query: ListPaymentsQuery,
    now: DateTime<Utc>,
) -> AppResult<PaymentPage> {
    let scope = match claims.role {
        UserRole::Admin => None,
        UserRole::Owner => Some(claims.sub),
        _ => {
            return Err(AppError::Forbidden(
                "Only owners and administrators have payments".to_string(),
            ))
        }
    };

    let pagination = Pagination::new(query.page, query.limit);
    let window = month_window(query.month, query.year, now.date_naive())?;

    let select = payment::Entity::find()
        .apply_if(scope, |q, owner_id| q.filter(payment::Column::OwnerId.eq(owner_id)))
        .apply_if(window, |q, (start, end)| {
            q.filter(payment::Column::CreatedAt.gte(start))
                .filter(payment::Column::CreatedAt.lt(end))
        });

    let total = select.clone().count(db).await?;
    let items = select
        .order_by_desc(payment::Column::CreatedAt)
        .order_by_desc(payment::Column::Id)
        .offset(pagination.offset())
        .limit(pagination.limit)
        .all(db)
        .await?;

    Ok(PaymentPage {
        items,
        page: pagination.page,
        limit: pagination.limit,
        total,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub status: PaymentStatus,
    pub pay_type: Option<String>,
    pub pay_date: Option<DateTime<Utc>>,
}

/// Validates an admin patch against the payment lifecycle. `pay_date` only
/// lives on paid payments and is required to enter `paid`.
pub fn plan_update(current: &payment::Model, req: &UpdatePaymentRequest) -> AppResult<PlannedUpdate> {
    let next = req.status.unwrap_or(current.status);

    if next != current.status && !current.status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "Cannot move payment from {:?} to {:?}",
            current.status, next
        )));
    }

    let pay_date = if next == PaymentStatus::Paid {
        let existing = current.pay_date.map(|d| d.with_timezone(&Utc));
        Some(req.pay_date.or(existing).ok_or_else(|| {
            AppError::Unprocessable("pay_date: required when status is paid".to_string())
        })?)
    } else {
        if req.pay_date.is_some() {
            return Err(AppError::Unprocessable(
                "pay_date: only allowed when status is paid".to_string(),
            ));
        }
        None
    };

    Ok(PlannedUpdate {
        status: next,
        pay_type: req.pay_type.clone().or_else(|| current.pay_type.clone()),
        pay_date,
    })
}

pub async fn update_payment(
    db: &DatabaseConnection,
    claims: &Claims,
    payment_id: Uuid,
    req: UpdatePaymentRequest,
    now: DateTime<Utc>,
) -> AppResult<payment::Model> {
    claims.require(&[UserRole::Admin])?;

    let txn = db.begin().await?;

    let current = db::find_or_lock::<payment::Entity, _>(&txn, payment_id, "Payment").await?;
    let previous = current.status;
    let plan = plan_update(&current, &req)?;

    let mut active: payment::ActiveModel = current.into();
    active.status = Set(plan.status);
    active.pay_type = Set(plan.pay_type);
    active.pay_date = Set(plan.pay_date.map(Into::into));
    active.updated_at = Set(now.into());
    let updated = active.update(&txn).await?;

    if previous != PaymentStatus::Paid && updated.status == PaymentStatus::Paid {
        on_paid(&txn, payment_id, now).await?;
    }
    if previous == PaymentStatus::Paid && updated.status == PaymentStatus::Refunded {
        on_refunded(&txn, payment_id).await?;
    }

    txn.commit().await?;

    if previous != updated.status {
        tracing::info!(payment_id = %payment_id, from = ?previous, to = ?updated.status, "Payment status changed");
    }

    Ok(updated)
}

/// Moves an unpaid or failed payment to pending and hands back the data the
/// client forwards to the payment provider.
pub async fn checkout(
    db: &DatabaseConnection,
    claims: &Claims,
    payment_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<CheckoutSession> {
    claims.require(&[UserRole::Owner, UserRole::Admin])?;

    let txn = db.begin().await?;

    let current = db::find_or_lock::<payment::Entity, _>(&txn, payment_id, "Payment").await?;
    claims.require_self_or_admin(current.owner_id)?;

    if !current.status.can_transition_to(PaymentStatus::Pending) {
        return Err(AppError::Conflict(format!(
            "Payment in status {:?} cannot be checked out",
            current.status
        )));
    }

    let mut active: payment::ActiveModel = current.into();
    active.status = Set(PaymentStatus::Pending);
    active.updated_at = Set(now.into());
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(payment_id = %payment_id, "Checkout started");

    Ok(CheckoutSession {
        pay_id: updated.id,
        status: updated.status,
        metadata: updated.metadata,
    })
}

/// Status a provider report moves the payment to, if any.
pub fn webhook_target(current: PaymentStatus, reported: ProviderStatus) -> Option<PaymentStatus> {
    let target = match reported {
        ProviderStatus::Paid => PaymentStatus::Paid,
        ProviderStatus::Failed | ProviderStatus::Expired => PaymentStatus::Failed,
        ProviderStatus::Other => return None,
    };

    current.can_transition_to(target).then_some(target)
}

/// Applies a verified provider event. The event id is recorded in the same
/// transaction as the status change, so a replay is a no-op.
pub async fn apply_webhook(
    db: &DatabaseConnection,
    event: PaymentEvent,
    now: DateTime<Utc>,
) -> AppResult<WebhookOutcome> {
    if webhook_event::Entity::find_by_id(event.provider_event_id.clone())
        .one(db)
        .await?
        .is_some()
    {
        tracing::info!(event_id = %event.provider_event_id, "Duplicate webhook event ignored");
        return Ok(WebhookOutcome::Duplicate);
    }

    let txn = db.begin().await?;

    let current = db::find_or_lock::<payment::Entity, _>(&txn, event.pay_id, "Payment").await?;

    let recorded = webhook_event::ActiveModel {
        id: Set(event.provider_event_id.clone()),
        payment_id: Set(event.pay_id),
        received_at: Set(now.into()),
    }
    .insert(&txn)
    .await;

    if let Err(err) = recorded {
        if matches!(err.sql_err(), Some(sea_orm::SqlErr::UniqueConstraintViolation(_))) {
            tracing::info!(event_id = %event.provider_event_id, "Duplicate webhook event ignored");
            return Ok(WebhookOutcome::Duplicate);
        }
        return Err(err.into());
    }

    let Some(target) = webhook_target(current.status, event.provider_status) else {
        txn.commit().await?;
        tracing::info!(
            payment_id = %event.pay_id,
            status = ?current.status,
            reported = ?event.provider_status,
            "Webhook event did not change payment"
        );
        return Ok(WebhookOutcome::Ignored {
            payment_id: event.pay_id,
        });
    };

    let mut active: payment::ActiveModel = current.into();
    active.status = Set(target);
    active.updated_at = Set(now.into());
    if target == PaymentStatus::Paid {
        active.pay_type = Set(event.method.clone());
        active.pay_date = Set(Some(event.pay_date.unwrap_or(now).into()));
    }
    active.update(&txn).await?;

    if target == PaymentStatus::Paid {
        on_paid(&txn, event.pay_id, now).await?;
    }

    txn.commit().await?;

    tracing::info!(payment_id = %event.pay_id, status = ?target, event_id = %event.provider_event_id, "Webhook applied");

    Ok(WebhookOutcome::Applied {
        payment_id: event.pay_id,
        status: target,
    })
}

/// Drops replay-protection rows past their retention.
pub async fn purge_webhook_events(db: &DatabaseConnection, now: DateTime<Utc>) -> AppResult<u64> {
    let cutoff = now - Duration::days(WEBHOOK_EVENT_TTL_DAYS);

    let result = webhook_event::Entity::delete_many()
        .filter(webhook_event::Column::ReceivedAt.lt(cutoff))
        .exec(db)
        .await?;

    if result.rows_affected > 0 {
        tracing::info!(purged = result.rows_affected, "Purged old webhook events");
    }

    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn payment(status: PaymentStatus) -> payment::Model {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        payment::Model {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            status,
            pay_type: None,
            pay_date: None,
            metadata: json!({}),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn service(payment_id: Uuid, status: BookingStatus, start_day: u32) -> booking::Model {
        let start = Utc.with_ymd_and_hms(2025, 6, start_day, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, start_day, 17, 0, 0).unwrap();
        booking::Model {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            pet_id: Uuid::new_v4(),
            payment_id,
            price: 250,
            status,
            reserve_date_start: start.into(),
            reserve_date_end: end.into(),
            created_at: start.into(),
            updated_at: start.into(),
        }
    }

    fn recorded(pay_id: Uuid) -> webhook_event::Model {
        webhook_event::Model {
            id: "evt_1".to_string(),
            payment_id: pay_id,
            received_at: Utc::now().into(),
        }
    }

    fn statements(db: DatabaseConnection) -> Vec<String> {
        db.into_transaction_log()
            .iter()
            .flat_map(|txn| txn.statements().iter().map(|stmt| stmt.sql.clone()))
            .collect()
    }

    fn updates(statements: &[String], table: &str) -> usize {
        let prefix = format!("UPDATE \"{}\"", table);
        statements.iter().filter(|sql| sql.starts_with(&prefix)).count()
    }

    fn event(pay_id: Uuid, status: ProviderStatus) -> PaymentEvent {
        PaymentEvent {
            provider_event_id: "evt_1".to_string(),
            pay_id,
            provider_status: status,
            method: Some("card".to_string()),
            pay_date: None,
        }
    }

    #[test]
    fn test_pagination_defaults_and_clamps() {
        assert_eq!(Pagination::new(None, None), Pagination { page: 1, limit: 5 });
        assert_eq!(Pagination::new(Some(0), Some(0)), Pagination { page: 1, limit: 5 });
        assert_eq!(Pagination::new(Some(3), Some(500)).limit, MAX_LIMIT);
        assert_eq!(Pagination::new(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn test_pagination_offset_saturates_on_huge_page() {
        let pagination = Pagination::new(Some(u64::MAX), Some(MAX_LIMIT));
        assert_eq!(pagination.offset(), i64::MAX as u64);
        assert_eq!(Pagination { page: 0, limit: 10 }.offset(), 0);
    }

    #[test]
    fn test_month_window_defaults() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();

        assert_eq!(month_window(None, None, today).unwrap(), None);

        let (start, end) = month_window(None, Some(2024), today).unwrap().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());

        let (start, end) = month_window(Some(12), None, today).unwrap().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

        assert!(matches!(
            month_window(Some(13), Some(2025), today),
            Err(AppError::Unprocessable(_))
        ));
    }

    #[test]
    fn test_paid_requires_pay_date() {
        let current = payment(PaymentStatus::Unpaid);
        let req = UpdatePaymentRequest {
            status: Some(PaymentStatus::Paid),
            ..Default::default()
        };

        assert!(matches!(plan_update(&current, &req), Err(AppError::Unprocessable(_))));

        let pay_date = Utc::now();
        let req = UpdatePaymentRequest {
            status: Some(PaymentStatus::Paid),
            pay_type: Some("card".to_string()),
            pay_date: Some(pay_date),
        };
        let plan = plan_update(&current, &req).unwrap();
        assert_eq!(plan.status, PaymentStatus::Paid);
        assert_eq!(plan.pay_date, Some(pay_date));
    }

    #[test]
    fn test_refund_clears_pay_date_and_refunded_is_final() {
        let mut current = payment(PaymentStatus::Paid);
        current.pay_date = Some(Utc::now().into());

        let plan = plan_update(
            &current,
            &UpdatePaymentRequest {
                status: Some(PaymentStatus::Refunded),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.pay_date, None);

        let refunded = payment(PaymentStatus::Refunded);
        assert!(matches!(
            plan_update(
                &refunded,
                &UpdatePaymentRequest {
                    status: Some(PaymentStatus::Unpaid),
                    ..Default::default()
                }
            ),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_webhook_target() {
        assert_eq!(
            webhook_target(PaymentStatus::Pending, ProviderStatus::Paid),
            Some(PaymentStatus::Paid)
        );
        assert_eq!(
            webhook_target(PaymentStatus::Pending, ProviderStatus::Expired),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(webhook_target(PaymentStatus::Paid, ProviderStatus::Paid), None);
        assert_eq!(webhook_target(PaymentStatus::Paid, ProviderStatus::Failed), None);
        assert_eq!(webhook_target(PaymentStatus::Unpaid, ProviderStatus::Other), None);
    }

    #[tokio::test]
    async fn test_replayed_event_is_a_no_op() {
        let current = payment(PaymentStatus::Paid);
        let seen = webhook_event::Model {
            id: "evt_1".to_string(),
            payment_id: current.id,
            received_at: Utc::now().into(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![seen]])
            .into_connection();

        let outcome = apply_webhook(&db, event(current.id, ProviderStatus::Paid), Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::Duplicate);
        assert_eq!(db.into_transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_payment_in_webhook_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<webhook_event::Model>::new()])
            .append_query_results([Vec::<payment::Model>::new()])
            .into_connection();

        let err = apply_webhook(&db, event(Uuid::new_v4(), ProviderStatus::Paid), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_staff_cannot_list_payments() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let claims = Claims {
            sub: Uuid::new_v4(),
            role: UserRole::Doctor,
            purpose: crate::utils::jwt::TokenPurpose::Access,
            iat: 0,
            nbf: 0,
            exp: 0,
            nonce: None,
        };

        let err = list_payments(&db, &claims, ListPaymentsQuery::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    /// Mock rows for a `paid` report on a pending payment, up to the linked
    /// booking lookup.
    fn paid_report(current: &payment::Model) -> MockDatabase {
        let mut paid = current.clone();
        paid.status = PaymentStatus::Paid;
        paid.pay_date = Some(Utc::now().into());

        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<webhook_event::Model>::new()])
            .append_query_results([vec![current.clone()]])
            .append_query_results([vec![recorded(current.id)]])
            .append_query_results([vec![paid]])
    }

    #[tokio::test]
    async fn test_paid_before_start_keeps_service_waiting() {
        let current = payment(PaymentStatus::Pending);
        let waiting = service(current.id, BookingStatus::Wait, 11);
        let owner_row = owner::Model {
            user_id: waiting.owner_id,
            total_spending: Decimal::ZERO,
        };
        let db = paid_report(&current)
            .append_query_results([vec![waiting.clone()]])
            .append_query_results([vec![owner_row.clone()]])
            .append_query_results([vec![owner::Model {
                total_spending: Decimal::from(250),
                ..owner_row
            }]])
            .into_connection();
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();

        let outcome = apply_webhook(&db, event(current.id, ProviderStatus::Paid), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                payment_id: current.id,
                status: PaymentStatus::Paid,
            }
        );

        let sql = statements(db);
        assert_eq!(updates(&sql, "payment"), 1);
        assert_eq!(updates(&sql, "service"), 0);
        assert_eq!(updates(&sql, "owner"), 1);
    }

    #[tokio::test]
    async fn test_paid_after_start_moves_service_to_ongoing() {
        let current = payment(PaymentStatus::Pending);
        let waiting = service(current.id, BookingStatus::Wait, 11);
        let started = booking::Model {
            status: BookingStatus::Ongoing,
            ..waiting.clone()
        };
        let owner_row = owner::Model {
            user_id: waiting.owner_id,
            total_spending: Decimal::ZERO,
        };
        let db = paid_report(&current)
            .append_query_results([vec![waiting]])
            .append_query_results([vec![started]])
            .append_query_results([vec![owner_row.clone()]])
            .append_query_results([vec![owner::Model {
                total_spending: Decimal::from(250),
                ..owner_row
            }]])
            .into_connection();
        let now = Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap();

        apply_webhook(&db, event(current.id, ProviderStatus::Paid), now)
            .await
            .unwrap();

        let sql = statements(db);
        assert_eq!(updates(&sql, "service"), 1);
        assert_eq!(updates(&sql, "owner"), 1);
    }

    #[tokio::test]
    async fn test_paid_for_cancelled_service_adds_no_spending() {
        let current = payment(PaymentStatus::Pending);
        let cancelled = service(current.id, BookingStatus::Cancelled, 11);
        let db = paid_report(&current)
            .append_query_results([vec![cancelled]])
            .into_connection();
        let now = Utc.with_ymd_and_hms(2025, 6, 11, 10, 0, 0).unwrap();

        apply_webhook(&db, event(current.id, ProviderStatus::Paid), now)
            .await
            .unwrap();

        let sql = statements(db);
        assert_eq!(updates(&sql, "service"), 0);
        assert_eq!(updates(&sql, "owner"), 0);
        assert!(!sql.iter().any(|s| s.contains("FROM \"owner\"")));
    }

    #[tokio::test]
    async fn test_expired_and_failed_reports_fail_the_payment() {
        for reported in [ProviderStatus::Expired, ProviderStatus::Failed] {
            let current = payment(PaymentStatus::Pending);
            let failed = payment::Model {
                status: PaymentStatus::Failed,
                ..current.clone()
            };
            let db = MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<webhook_event::Model>::new()])
                .append_query_results([vec![current.clone()]])
                .append_query_results([vec![recorded(current.id)]])
                .append_query_results([vec![failed]])
                .into_connection();

            let outcome = apply_webhook(&db, event(current.id, reported), Utc::now())
                .await
                .unwrap();
            assert_eq!(
                outcome,
                WebhookOutcome::Applied {
                    payment_id: current.id,
                    status: PaymentStatus::Failed,
                }
            );

            let sql = statements(db);
            assert_eq!(updates(&sql, "payment"), 1);
            assert!(!sql.iter().any(|s| s.contains("FROM \"service\"")));
        }
    }

    #[tokio::test]
    async fn test_ignored_report_changes_nothing() {
        let current = payment(PaymentStatus::Paid);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<webhook_event::Model>::new()])
            .append_query_results([vec![current.clone()]])
            .append_query_results([vec![recorded(current.id)]])
            .into_connection();

        let outcome = apply_webhook(&db, event(current.id, ProviderStatus::Paid), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                payment_id: current.id,
            }
        );

        let sql = statements(db);
        assert!(sql.iter().any(|s| s.starts_with("INSERT INTO \"webhook_event\"")));
        assert!(!sql.iter().any(|s| s.starts_with("UPDATE")));
    }
}
