//! Bookings ("services" on the wire) and their lifecycle.
//!
//! ```text
//!  cancelled <- wait --paid & now >= start--> ongoing --now >= end--> finish
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, JoinType,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::db;
use crate::entities::booking::{self, BookingStatus};
use crate::entities::payment::{self, PaymentStatus};
use crate::entities::user::UserRole;
use crate::entities::{caretaker, caretaker_service, medical_service, owner, pet};
use crate::error::{AppError, AppResult};
use crate::services::availability::{self, DateRange};
use crate::services::payment::{adjust_spending, refund_locked};
use crate::utils::jwt::Claims;

#[derive(Debug, Deserialize)]
pub struct CaretakerRequest {
    /// Lowest-rated available caretaker when absent.
    pub caretaker_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MedicalRequest {
    pub doctor_id: Uuid,
    pub disease: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateServiceRequest {
    pub owner_id: Option<Uuid>,
    pub pet_id: Uuid,
    pub payment_id: Uuid,
    #[validate(range(min = 0, message = "must not be negative"))]
    pub price: i32,
    pub status: Option<BookingStatus>,
    pub reserve_date_start: DateTime<Utc>,
    pub reserve_date_end: DateTime<Utc>,
    pub caretaker: Option<CaretakerRequest>,
    pub medical: Option<MedicalRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateServiceRequest {
    pub pet_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub reserve_date_start: Option<DateTime<Utc>>,
    pub reserve_date_end: Option<DateTime<Utc>>,
    pub status: Option<BookingStatus>,
    pub price: Option<i32>,
}

impl UpdateServiceRequest {
    fn reschedules(&self) -> bool {
        self.pet_id.is_some()
            || self.payment_id.is_some()
            || self.reserve_date_start.is_some()
            || self.reserve_date_end.is_some()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    #[validate(range(min = 1, max = 5, message = "must be between 1 and 5"))]
    pub score: i32,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceDetails {
    #[serde(flatten)]
    pub service: booking::Model,
    pub caretaker_service: Option<caretaker_service::Model>,
    pub medical_service: Option<medical_service::Model>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdvanceReport {
    pub started: u64,
    pub finished: u64,
    pub skipped: u64,
}

/// Rejects any move the state machine does not allow. Staying put is fine.
/// A booking starts no earlier than its reservation start and finishes no
/// earlier than its reservation end.
pub fn ensure_transition(
    from: BookingStatus,
    to: BookingStatus,
    payment: PaymentStatus,
    range: DateRange,
    now: DateTime<Utc>,
) -> AppResult<()> {
    use BookingStatus::*;

    match (from, to) {
        (a, b) if a == b => Ok(()),
        (Wait, Ongoing) if payment != PaymentStatus::Paid => Err(AppError::Conflict(
            "Payment must be paid before the service can start".to_string(),
        )),
        (Wait, Ongoing) if now < range.start => Err(AppError::Conflict(
            "Service cannot start before its reservation begins".to_string(),
        )),
        (Ongoing, Finish) if now < range.end => Err(AppError::Conflict(
            "Service cannot finish before its reservation ends".to_string(),
        )),
        (Wait, Ongoing) | (Wait, Cancelled) | (Ongoing, Finish) => Ok(()),
        _ => Err(AppError::Conflict(format!(
            "Cannot move service from {:?} to {:?}",
            from, to
        ))),
    }
}

/// Status the tick moves a booking to at `now`. Applying it twice gives the
/// same result as applying it once.
pub fn advanced_status(
    status: BookingStatus,
    payment: PaymentStatus,
    range: DateRange,
    now: DateTime<Utc>,
) -> BookingStatus {
    let mut status = status;

    if status == BookingStatus::Wait && payment == PaymentStatus::Paid && now >= range.start {
        status = BookingStatus::Ongoing;
    }
    if status == BookingStatus::Ongoing && now >= range.end {
        status = BookingStatus::Finish;
    }

    status
}

fn range_of(service: &booking::Model) -> DateRange {
    DateRange {
        start: service.reserve_date_start.with_timezone(&Utc),
        end: service.reserve_date_end.with_timezone(&Utc),
    }
}

pub fn validate_create(req: &CreateServiceRequest) -> AppResult<DateRange> {
    req.validate()?;

    if req.status.is_some_and(|s| s != BookingStatus::Wait) {
        return Err(AppError::Unprocessable(
            "status: new services must start in wait".to_string(),
        ));
    }

    let range = DateRange::new(req.reserve_date_start, req.reserve_date_end)?;

    if req.caretaker.is_none() && req.medical.is_none() {
        return Err(AppError::Unprocessable(
            "A service needs a caretaker or a medical sub-service".to_string(),
        ));
    }

    if req
        .medical
        .as_ref()
        .is_some_and(|m| m.disease.trim().is_empty())
    {
        return Err(AppError::Unprocessable(
            "medical.disease: must not be empty".to_string(),
        ));
    }

    Ok(range)
}

async fn pet_of_owner<C: ConnectionTrait>(db: &C, pet_id: Uuid, owner_id: Uuid) -> AppResult<pet::Model> {
    let pet = pet::Entity::find_by_id(pet_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Pet not found".to_string()))?;

    if pet.owner_id != owner_id {
        return Err(AppError::Forbidden(
            "Pet does not belong to this owner".to_string(),
        ));
    }

    Ok(pet)
}

/// Locks a payment that is about to be attached to a booking.
async fn claim_payment<C: ConnectionTrait>(
    db: &C,
    payment_id: Uuid,
    owner_id: Uuid,
) -> AppResult<payment::Model> {
    let payment = db::find_or_lock::<payment::Entity, _>(db, payment_id, "Payment").await?;

    if payment.owner_id != owner_id {
        return Err(AppError::Forbidden(
            "Payment does not belong to this owner".to_string(),
        ));
    }

    if !matches!(payment.status, PaymentStatus::Unpaid | PaymentStatus::Paid) {
        return Err(AppError::Conflict(format!(
            "Payment in status {:?} cannot be used for a service",
            payment.status
        )));
    }

    let linked = booking::Entity::find()
        .filter(booking::Column::PaymentId.eq(payment_id))
        .one(db)
        .await?;
    if linked.is_some() {
        return Err(AppError::Conflict(
            "Payment is already linked to a service".to_string(),
        ));
    }

    Ok(payment)
}

pub async fn load_details<C: ConnectionTrait>(
    db: &C,
    services: Vec<booking::Model>,
) -> AppResult<Vec<ServiceDetails>> {
    let ids: Vec<Uuid> = services.iter().map(|s| s.id).collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut caretakers: HashMap<Uuid, caretaker_service::Model> = caretaker_service::Entity::find()
        .filter(caretaker_service::Column::ServiceId.is_in(ids.clone()))
        .all(db)
        .await?
        .into_iter()
        .map(|cs| (cs.service_id, cs))
        .collect();

    let mut medicals: HashMap<Uuid, medical_service::Model> = medical_service::Entity::find()
        .filter(medical_service::Column::ServiceId.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|ms| (ms.service_id, ms))
        .collect();

    Ok(services
        .into_iter()
        .map(|service| ServiceDetails {
            caretaker_service: caretakers.remove(&service.id),
            medical_service: medicals.remove(&service.id),
            service,
        })
        .collect())
}

async fn details_of<C: ConnectionTrait>(db: &C, service: booking::Model) -> AppResult<ServiceDetails> {
    load_details(db, vec![service])
        .await?
        .pop()
        .ok_or_else(|| AppError::Internal("Service details vanished".to_string()))
}

pub async fn create_service(
    db: &DatabaseConnection,
    claims: &Claims,
    req: CreateServiceRequest,
    now: DateTime<Utc>,
) -> AppResult<ServiceDetails> {
    claims.require(&[UserRole::Owner, UserRole::Admin])?;
    let owner_id = req.owner_id.unwrap_or(claims.sub);
    claims.require_self_or_admin(owner_id)?;

    let range = validate_create(&req)?;

    let txn = db::begin_repeatable_read(db).await?;

    owner::Entity::find_by_id(owner_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Owner not found".to_string()))?;
    pet_of_owner(&txn, req.pet_id, owner_id).await?;
    let payment = claim_payment(&txn, req.payment_id, owner_id).await?;

    let service = booking::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        pet_id: Set(req.pet_id),
        payment_id: Set(req.payment_id),
        price: Set(req.price),
        status: Set(BookingStatus::Wait),
        reserve_date_start: Set(range.start.into()),
        reserve_date_end: Set(range.end.into()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    if let Some(request) = &req.caretaker {
        let caretaker =
            availability::reserve_caretaker(&txn, range, request.caretaker_id, None, now).await?;

        caretaker_service::ActiveModel {
            service_id: Set(service.id),
            caretaker_id: Set(caretaker.user_id),
            score: Set(0),
            comment: Set(None),
        }
        .insert(&txn)
        .await?;
    }

    if let Some(request) = &req.medical {
        let doctor = availability::reserve_doctor(&txn, request.doctor_id, range, now).await?;

        medical_service::ActiveModel {
            service_id: Set(service.id),
            doctor_id: Set(doctor.user_id),
            disease: Set(request.disease.trim().to_string()),
        }
        .insert(&txn)
        .await?;
    }

    if payment.status == PaymentStatus::Paid {
        adjust_spending(&txn, owner_id, Decimal::from(service.price)).await?;
    }

    let details = details_of(&txn, service).await?;
    txn.commit().await?;

    tracing::info!(
        service_id = %details.service.id,
        owner_id = %owner_id,
        caretaker_id = ?details.caretaker_service.as_ref().map(|c| c.caretaker_id),
        doctor_id = ?details.medical_service.as_ref().map(|m| m.doctor_id),
        "Service created"
    );

    Ok(details)
}

/// Owner edits are limited to a waiting booking; admins may also move the
/// status and change the price.
pub fn check_update_allowed(
    claims: &Claims,
    current: &booking::Model,
    req: &UpdateServiceRequest,
) -> AppResult<()> {
    claims.require(&[UserRole::Owner, UserRole::Admin])?;
    claims.require_self_or_admin(current.owner_id)?;

    if !claims.is_admin() && (req.status.is_some() || req.price.is_some()) {
        return Err(AppError::Forbidden(
            "Only administrators can change status or price".to_string(),
        ));
    }

    if req.reschedules() && current.status != BookingStatus::Wait {
        return Err(AppError::Conflict(
            "Only waiting services can be changed".to_string(),
        ));
    }

    if req.price.is_some_and(|p| p < 0) {
        return Err(AppError::Unprocessable("price: must not be negative".to_string()));
    }

    Ok(())
}

pub async fn update_service(
    db: &DatabaseConnection,
    claims: &Claims,
    service_id: Uuid,
    req: UpdateServiceRequest,
    now: DateTime<Utc>,
) -> AppResult<ServiceDetails> {
    let txn = db::begin_repeatable_read(db).await?;

    let current = db::find_or_lock::<booking::Entity, _>(&txn, service_id, "Service").await?;
    check_update_allowed(claims, &current, &req)?;

    let mut active: booking::ActiveModel = current.clone().into();

    if let Some(pet_id) = req.pet_id {
        pet_of_owner(&txn, pet_id, current.owner_id).await?;
        active.pet_id = Set(pet_id);
    }

    let payment = match req.payment_id {
        Some(payment_id) if payment_id != current.payment_id => {
            let payment = claim_payment(&txn, payment_id, current.owner_id).await?;
            active.payment_id = Set(payment_id);
            payment
        }
        _ => db::find_or_lock::<payment::Entity, _>(&txn, current.payment_id, "Payment").await?,
    };

    let mut range = range_of(&current);

    if req.reserve_date_start.is_some() || req.reserve_date_end.is_some() {
        let old = range;
        range = DateRange::new(
            req.reserve_date_start.unwrap_or(old.start),
            req.reserve_date_end.unwrap_or(old.end),
        )?;

        if range != old {
            if let Some(cs) = caretaker_service::Entity::find_by_id(current.id).one(&txn).await? {
                availability::reserve_caretaker(
                    &txn,
                    range,
                    Some(cs.caretaker_id),
                    Some(current.id),
                    now,
                )
                .await?;
            }
            if let Some(ms) = medical_service::Entity::find_by_id(current.id).one(&txn).await? {
                availability::reserve_doctor(&txn, ms.doctor_id, range, now).await?;
            }

            active.reserve_date_start = Set(range.start.into());
            active.reserve_date_end = Set(range.end.into());
        }
    }

    if let Some(price) = req.price {
        active.price = Set(price);
    }

    if let Some(next) = req.status {
        ensure_transition(current.status, next, payment.status, range, now)?;
        if next == BookingStatus::Cancelled && current.status != next {
            refund_locked(&txn, payment.clone(), current.owner_id, current.price, now).await?;
        }
        active.status = Set(next);
    }

    active.updated_at = Set(now.into());
    let updated = active.update(&txn).await?;

    let details = details_of(&txn, updated).await?;
    txn.commit().await?;

    tracing::info!(service_id = %service_id, status = ?details.service.status, "Service updated");
    Ok(details)
}

/// Cancels a waiting booking. A paid payment is refunded only when an admin
/// cancels; otherwise it stays as it is for auditing.
pub async fn cancel_service(
    db: &DatabaseConnection,
    claims: &Claims,
    service_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<ServiceDetails> {
    claims.require(&[UserRole::Owner, UserRole::Admin])?;

    let txn = db.begin().await?;

    let current = db::find_or_lock::<booking::Entity, _>(&txn, service_id, "Service").await?;
    claims.require_self_or_admin(current.owner_id)?;

    if current.status != BookingStatus::Wait {
        return Err(AppError::Conflict(
            "Only waiting services can be cancelled".to_string(),
        ));
    }

    if claims.is_admin() {
        let payment =
            db::find_or_lock::<payment::Entity, _>(&txn, current.payment_id, "Payment").await?;
        refund_locked(&txn, payment, current.owner_id, current.price, now).await?;
    }

    let mut active: booking::ActiveModel = current.into();
    active.status = Set(BookingStatus::Cancelled);
    active.updated_at = Set(now.into());
    let cancelled = active.update(&txn).await?;

    let details = details_of(&txn, cancelled).await?;
    txn.commit().await?;

    tracing::info!(service_id = %service_id, by = %claims.sub, "Service cancelled");
    Ok(details)
}

pub async fn get_service(
    db: &DatabaseConnection,
    claims: &Claims,
    service_id: Uuid,
) -> AppResult<ServiceDetails> {
    let service = booking::Entity::find_by_id(service_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Service not found".to_string()))?;
    let details = details_of(db, service).await?;

    let allowed = match claims.role {
        UserRole::Admin => true,
        UserRole::Owner => details.service.owner_id == claims.sub,
        UserRole::Caretaker => details
            .caretaker_service
            .as_ref()
            .is_some_and(|cs| cs.caretaker_id == claims.sub),
        UserRole::Doctor => details
            .medical_service
            .as_ref()
            .is_some_and(|ms| ms.doctor_id == claims.sub),
    };

    if !allowed {
        return Err(AppError::Forbidden(
            "You can only access your own services".to_string(),
        ));
    }

    Ok(details)
}

/// Owners see their bookings, staff the bookings they are bound to, admins
/// everything. Newest reservation first.
pub async fn list_services(
    db: &DatabaseConnection,
    claims: &Claims,
) -> AppResult<Vec<ServiceDetails>> {
    let query = booking::Entity::find().order_by_desc(booking::Column::ReserveDateStart);

    let query = match claims.role {
        UserRole::Admin => query,
        UserRole::Owner => query.filter(booking::Column::OwnerId.eq(claims.sub)),
        UserRole::Caretaker => query
            .join(JoinType::InnerJoin, booking::Relation::CaretakerService.def())
            .filter(caretaker_service::Column::CaretakerId.eq(claims.sub)),
        UserRole::Doctor => query
            .join(JoinType::InnerJoin, booking::Relation::MedicalService.def())
            .filter(medical_service::Column::DoctorId.eq(claims.sub)),
    };

    let services = query.all(db).await?;
    load_details(db, services).await
}

/// Mean of the scored sub-services, two decimals.
pub fn mean_rating(scores: &[i32]) -> Decimal {
    let scored: Vec<Decimal> = scores
        .iter()
        .filter(|s| **s > 0)
        .map(|s| Decimal::from(*s))
        .collect();

    if scored.is_empty() {
        return Decimal::ZERO;
    }

    let total: Decimal = scored.iter().sum();
    (total / Decimal::from(scored.len())).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub async fn review_service(
    db: &DatabaseConnection,
    claims: &Claims,
    service_id: Uuid,
    req: ReviewRequest,
) -> AppResult<caretaker_service::Model> {
    claims.require(&[UserRole::Owner])?;
    req.validate()?;

    let txn = db.begin().await?;

    let service = booking::Entity::find_by_id(service_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Service not found".to_string()))?;
    claims.require_self_or_admin(service.owner_id)?;

    if service.status != BookingStatus::Finish {
        return Err(AppError::Conflict(
            "Only finished services can be reviewed".to_string(),
        ));
    }

    let assignment = caretaker_service::Entity::find_by_id(service_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Service has no caretaker to review".to_string()))?;
    let caretaker_id = assignment.caretaker_id;

    let mut active: caretaker_service::ActiveModel = assignment.into();
    active.score = Set(req.score);
    active.comment = Set(req.comment.map(|c| c.trim().to_string()));
    let reviewed = active.update(&txn).await?;

    let scores: Vec<i32> = caretaker_service::Entity::find()
        .filter(caretaker_service::Column::CaretakerId.eq(caretaker_id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|cs| cs.score)
        .collect();

    let caretaker = db::find_or_lock::<caretaker::Entity, _>(&txn, caretaker_id, "Caretaker").await?;
    let mut caretaker: caretaker::ActiveModel = caretaker.into();
    caretaker.rating = Set(mean_rating(&scores));
    caretaker.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(service_id = %service_id, caretaker_id = %caretaker_id, score = req.score, "Service reviewed");
    Ok(reviewed)
}

/// Moves due bookings along the state machine. Each booking is handled in
/// its own transaction; rows locked by another worker are skipped and picked
/// up on the next tick.
pub async fn advance(db: &DatabaseConnection, now: DateTime<Utc>) -> AppResult<AdvanceReport> {
    let candidates: Vec<Uuid> = booking::Entity::find()
        .select_only()
        .column(booking::Column::Id)
        .filter(booking::Column::Status.is_in(BookingStatus::BLOCKING))
        .filter(booking::Column::ReserveDateStart.lte(now))
        .into_tuple()
        .all(db)
        .await?;

    let mut report = AdvanceReport::default();

    for id in candidates {
        let txn = db.begin().await?;

        let Some(service) = db::try_lock::<booking::Entity, _>(&txn, id).await? else {
            report.skipped += 1;
            continue;
        };

        let payment = payment::Entity::find_by_id(service.payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Service {} has no payment", id)))?;

        let next = advanced_status(service.status, payment.status, range_of(&service), now);
        if next == service.status {
            txn.commit().await?;
            continue;
        }

        let previous = service.status;
        let mut active: booking::ActiveModel = service.into();
        active.status = Set(next);
        active.updated_at = Set(now.into());
        active.update(&txn).await?;
        txn.commit().await?;

        if previous == BookingStatus::Wait {
            report.started += 1;
        }
        if next == BookingStatus::Finish {
            report.finished += 1;
        }
    }

    if report != AdvanceReport::default() {
        tracing::info!(
            started = report.started,
            finished = report.finished,
            skipped = report.skipped,
            "Advanced services"
        );
    }

    Ok(report)
}
