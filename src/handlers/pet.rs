use axum::{extract::State, Extension, Json};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::db::{self, query};
use crate::entities::booking;
use crate::entities::owner;
use crate::entities::pet::{self, PetSex};
use crate::entities::user::UserRole;
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePetRequest {
    #[validate(length(min = 1, max = 50, message = "must be between 1 and 50 characters"))]
    pub kind: String,
    #[validate(length(max = 50, message = "must be at most 50 characters"))]
    pub breed: Option<String>,
    #[validate(length(max = 50, message = "must be at most 50 characters"))]
    pub name: Option<String>,
    pub birth_date: NaiveDate,
    pub weight: Decimal,
    pub sex: PetSex,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePetRequest {
    #[validate(length(min = 1, max = 50, message = "must be between 1 and 50 characters"))]
    pub kind: Option<String>,
    #[validate(length(max = 50, message = "must be at most 50 characters"))]
    pub breed: Option<String>,
    #[validate(length(max = 50, message = "must be at most 50 characters"))]
    pub name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub weight: Option<Decimal>,
    pub sex: Option<PetSex>,
}

fn check_weight(weight: Decimal) -> AppResult<()> {
    if weight <= Decimal::ZERO {
        return Err(AppError::Unprocessable("weight: must be positive".to_string()));
    }
    Ok(())
}

fn check_birth_date(birth_date: NaiveDate) -> AppResult<()> {
    if birth_date > Utc::now().date_naive() {
        return Err(AppError::Unprocessable(
            "birth_date: must not be in the future".to_string(),
        ));
    }
    Ok(())
}

/// Create a pet for the calling owner
pub async fn create_pet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(payload): AppJson<CreatePetRequest>,
) -> AppResult<Json<pet::Model>> {
    claims.require(&[UserRole::Owner])?;
    let owner_id = claims.sub;

    payload.validate()?;
    check_weight(payload.weight)?;
    check_birth_date(payload.birth_date)?;

    owner::Entity::find_by_id(owner_id)
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| AppError::NotFound("Owner not found".to_string()))?;

    let pet = pet::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        kind: Set(payload.kind.trim().to_string()),
        breed: Set(payload.breed),
        name: Set(payload.name),
        birth_date: Set(payload.birth_date),
        weight: Set(payload.weight),
        sex: Set(payload.sex),
        created_at: Set(Utc::now().into()),
    }
    .insert(state.db.as_ref())
    .await?;

    tracing::info!(pet_id = %pet.id, owner_id = %owner_id, "Pet created");
    Ok(Json(pet))
}

/// List every pet (admin only)
pub async fn list_pets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<pet::Model>>> {
    claims.require(&[UserRole::Admin])?;

    let pets = pet::Entity::find()
        .order_by_asc(pet::Column::CreatedAt)
        .all(state.db.as_ref())
        .await?;

    Ok(Json(pets))
}

/// List the caller's pets
pub async fn list_my_pets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<pet::Model>>> {
    let pets = pet::Entity::find()
        .filter(pet::Column::OwnerId.eq(claims.sub))
        .order_by_asc(pet::Column::CreatedAt)
        .all(state.db.as_ref())
        .await?;

    Ok(Json(pets))
}

pub async fn update_pet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdatePetRequest>,
) -> AppResult<Json<pet::Model>> {
    let existing = pet::Entity::find_by_id(id)
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| AppError::NotFound("Pet not found".to_string()))?;
    claims.require_self_or_admin(existing.owner_id)?;

    payload.validate()?;
    if let Some(weight) = payload.weight {
        check_weight(weight)?;
    }
    if let Some(birth_date) = payload.birth_date {
        check_birth_date(birth_date)?;
    }

    let mut active: pet::ActiveModel = existing.into();
    if let Some(kind) = payload.kind {
        active.kind = Set(kind.trim().to_string());
    }
    if let Some(breed) = payload.breed {
        active.breed = Set(Some(breed));
    }
    if let Some(name) = payload.name {
        active.name = Set(Some(name));
    }
    if let Some(birth_date) = payload.birth_date {
        active.birth_date = Set(birth_date);
    }
    if let Some(weight) = payload.weight {
        active.weight = Set(weight);
    }
    if let Some(sex) = payload.sex {
        active.sex = Set(sex);
    }

    Ok(Json(active.update(state.db.as_ref()).await?))
}

/// Delete a pet unless it has a waiting or ongoing service
pub async fn delete_pet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let txn = state.db.begin().await?;

    let existing = db::find_or_lock::<pet::Entity, _>(&txn, id, "Pet").await?;
    claims.require_self_or_admin(existing.owner_id)?;

    let active_services = booking::Entity::find()
        .filter(booking::Column::PetId.eq(id))
        .filter(query::is_blocking())
        .count(&txn)
        .await?;

    if active_services > 0 {
        return Err(AppError::Conflict(
            "Pet has waiting or ongoing services".to_string(),
        ));
    }

    pet::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!(pet_id = %id, by = %claims.sub, "Pet deleted");
    Ok(Json(serde_json::json!({ "message": "Pet deleted" })))
}
