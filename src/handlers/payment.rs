use axum::{extract::State, Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use crate::entities::payment as payment_entity;
use crate::error::AppResult;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::services::payment::{
    self, CheckoutSession, CreatePaymentRequest, ListPaymentsQuery, PaymentPage,
    UpdatePaymentRequest,
};
use crate::utils::jwt::Claims;
use crate::AppState;

/// Open a payment for a reservation window
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(payload): AppJson<CreatePaymentRequest>,
) -> AppResult<Json<payment_entity::Model>> {
    let created = payment::create_payment(state.db.as_ref(), &claims, payload, Utc::now()).await?;
    Ok(Json(created))
}

/// List payments (own, or all for admins)
pub async fn list_payments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppQuery(query): AppQuery<ListPaymentsQuery>,
) -> AppResult<Json<PaymentPage>> {
    let page = payment::list_payments(state.db.as_ref(), &claims, query, Utc::now()).await?;
    Ok(Json(page))
}

/// Update a payment's status manually (admin only)
pub async fn update_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdatePaymentRequest>,
) -> AppResult<Json<payment_entity::Model>> {
    let updated = payment::update_payment(state.db.as_ref(), &claims, id, payload, Utc::now()).await?;
    Ok(Json(updated))
}

/// Start checkout for an unpaid or failed payment
pub async fn checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<CheckoutSession>> {
    let session = payment::checkout(state.db.as_ref(), &claims, id, Utc::now()).await?;
    Ok(Json(session))
}
