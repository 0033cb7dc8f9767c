use axum::{extract::State, Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use crate::entities::caretaker_service;
use crate::error::AppResult;
use crate::extract::{AppJson, AppPath};
use crate::services::booking::{
    self, CreateServiceRequest, ReviewRequest, ServiceDetails, UpdateServiceRequest,
};
use crate::utils::jwt::Claims;
use crate::AppState;

/// Book a service for a pet
pub async fn create_service(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(payload): AppJson<CreateServiceRequest>,
) -> AppResult<Json<ServiceDetails>> {
    let details = booking::create_service(state.db.as_ref(), &claims, payload, Utc::now()).await?;
    Ok(Json(details))
}

/// List services visible to the caller
pub async fn list_services(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<ServiceDetails>>> {
    Ok(Json(booking::list_services(state.db.as_ref(), &claims).await?))
}

pub async fn get_service(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<ServiceDetails>> {
    Ok(Json(booking::get_service(state.db.as_ref(), &claims, id).await?))
}

pub async fn update_service(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateServiceRequest>,
) -> AppResult<Json<ServiceDetails>> {
    let details = booking::update_service(state.db.as_ref(), &claims, id, payload, Utc::now()).await?;
    Ok(Json(details))
}

/// Cancel a waiting service
pub async fn cancel_service(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<ServiceDetails>> {
    let details = booking::cancel_service(state.db.as_ref(), &claims, id, Utc::now()).await?;
    Ok(Json(details))
}

/// Review the caretaker of a finished service
pub async fn review_service(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<ReviewRequest>,
) -> AppResult<Json<caretaker_service::Model>> {
    Ok(Json(booking::review_service(state.db.as_ref(), &claims, id, payload).await?))
}
