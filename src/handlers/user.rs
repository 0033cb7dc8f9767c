use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::db::query;
use crate::entities::booking;
use crate::entities::payment::{self, PaymentStatus};
use crate::entities::user::{self, UserRole};
use crate::entities::{caretaker, caretaker_service, doctor, medical_service, owner};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::services::auth::is_adult;
use crate::utils::jwt::Claims;
use crate::AppState;

pub const MAX_PROFILE_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100, message = "must be between 1 and 100 characters"))]
    pub name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    #[validate(length(min = 3, max = 32, message = "must be between 3 and 32 characters"))]
    pub telephone: Option<String>,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: user::Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<owner::Model>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caretaker: Option<caretaker::Model>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor: Option<doctor::Model>,
}

async fn load_profile(db: &DatabaseConnection, user_id: Uuid) -> AppResult<UserProfile> {
    let user = user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let mut profile = UserProfile {
        owner: None,
        caretaker: None,
        doctor: None,
        user,
    };

    match profile.user.role {
        UserRole::Owner => profile.owner = owner::Entity::find_by_id(user_id).one(db).await?,
        UserRole::Caretaker => {
            profile.caretaker = caretaker::Entity::find_by_id(user_id).one(db).await?
        }
        UserRole::Doctor => profile.doctor = doctor::Entity::find_by_id(user_id).one(db).await?,
        UserRole::Admin => {}
    }

    Ok(profile)
}

async fn update_account(
    db: &DatabaseConnection,
    user_id: Uuid,
    payload: UpdateUserRequest,
) -> AppResult<UserProfile> {
    payload.validate()?;

    let now = Utc::now();
    if payload.birth_date.is_some_and(|d| !is_adult(d, now.date_naive())) {
        return Err(AppError::Unprocessable(
            "birth_date: must be at least 18 years old".to_string(),
        ));
    }

    let user = user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let mut active: user::ActiveModel = user.into();
    if let Some(name) = payload.name {
        active.name = Set(name.trim().to_string());
    }
    if let Some(birth_date) = payload.birth_date {
        active.birth_date = Set(birth_date);
    }
    if let Some(telephone) = payload.telephone {
        active.telephone = Set(telephone);
    }
    if let Some(address) = payload.address {
        active.address = Set(address);
    }
    active.updated_at = Set(now.into());
    active.update(db).await?;

    load_profile(db, user_id).await
}

/// Removes an account. Payments outlive their owner for auditing and are
/// closed out as refunded; staff with pending work cannot be removed.
async fn delete_account(db: &DatabaseConnection, user_id: Uuid) -> AppResult<()> {
    let txn = db.begin().await?;

    let user = user::Entity::find_by_id(user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let pending_work = match user.role {
        UserRole::Caretaker => {
            booking::Entity::find()
                .inner_join(caretaker_service::Entity)
                .filter(caretaker_service::Column::CaretakerId.eq(user_id))
                .filter(query::is_blocking())
                .count(&txn)
                .await?
        }
        UserRole::Doctor => {
            booking::Entity::find()
                .inner_join(medical_service::Entity)
                .filter(medical_service::Column::DoctorId.eq(user_id))
                .filter(query::is_blocking())
                .count(&txn)
                .await?
        }
        UserRole::Owner | UserRole::Admin => 0,
    };

    if pending_work > 0 {
        return Err(AppError::Conflict(
            "Staff member still has waiting or ongoing services".to_string(),
        ));
    }

    if user.role == UserRole::Owner {
        let open_payments: Vec<payment::Model> = payment::Entity::find()
            .filter(payment::Column::OwnerId.eq(user_id))
            .all(&txn)
            .await?
            .into_iter()
            .filter(|p| !p.status.is_terminal())
            .collect();
        let closed = open_payments.len();

        for p in open_payments {
            let mut active: payment::ActiveModel = p.into();
            active.status = Set(PaymentStatus::Refunded);
            active.pay_date = Set(None);
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?;
        }

        tracing::info!(owner_id = %user_id, payments = closed, "Closed payments of deleted owner");
    }

    // role rows, pets, bookings and leave days cascade
    user::Entity::delete_by_id(user_id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!(user_id = %user_id, role = ?user.role, "User deleted");
    Ok(())
}

/// Get own profile
pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(load_profile(state.db.as_ref(), claims.sub).await?))
}

/// Update own profile
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(update_account(state.db.as_ref(), claims.sub, payload).await?))
}

/// Delete own account
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<serde_json::Value>> {
    delete_account(state.db.as_ref(), claims.sub).await?;
    Ok(Json(serde_json::json!({ "message": "User deleted" })))
}

fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Upload a profile image (raw body)
pub async fn upload_profile_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UserProfile>> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .unwrap_or_default();

    let extension = image_extension(&content_type).ok_or_else(|| {
        AppError::Unprocessable("Profile image must be png, jpeg or webp".to_string())
    })?;

    if body.is_empty() {
        return Err(AppError::BadRequest("Profile image is empty".to_string()));
    }
    if body.len() > MAX_PROFILE_IMAGE_BYTES {
        return Err(AppError::Unprocessable(
            "Profile image must be at most 5 MiB".to_string(),
        ));
    }

    let path = format!("{}/{}.{}", claims.sub, Uuid::new_v4(), extension);
    let url = state.storage.upload(&path, &content_type, body).await?;

    let user = user::Entity::find_by_id(claims.sub)
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let mut active: user::ActiveModel = user.into();
    active.profile_image_url = Set(Some(url));
    active.updated_at = Set(Utc::now().into());
    active.update(state.db.as_ref()).await?;

    tracing::info!(user_id = %claims.sub, "Profile image updated");
    Ok(Json(load_profile(state.db.as_ref(), claims.sub).await?))
}

/// List all users (admin only)
pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<user::Model>>> {
    let users = user::Entity::find()
        .order_by_asc(user::Column::CreatedAt)
        .all(state.db.as_ref())
        .await?;

    Ok(Json(users))
}

/// Update any user's profile (admin only)
pub async fn update_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(update_account(state.db.as_ref(), id, payload).await?))
}

/// Delete any user (admin only)
pub async fn delete_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    delete_account(state.db.as_ref(), id).await?;
    Ok(Json(serde_json::json!({ "message": "User deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;

    fn owner_user(id: Uuid) -> user::Model {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        user::Model {
            id,
            email: "owner@example.com".to_string(),
            password_hash: String::new(),
            role: UserRole::Owner,
            name: "Owner".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            telephone: "0800000000".to_string(),
            address: "1 Main Street".to_string(),
            profile_image_url: None,
            created_at: created.into(),
            updated_at: created.into(),
        }
    }

    fn owner_payment(owner_id: Uuid, status: PaymentStatus) -> payment::Model {
        let created = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        payment::Model {
            id: Uuid::new_v4(),
            owner_id,
            status,
            pay_type: None,
            pay_date: None,
            metadata: json!({}),
            created_at: created.into(),
            updated_at: created.into(),
        }
    }

    #[tokio::test]
    async fn test_deleting_owner_refunds_only_open_payments() {
        let owner_id = Uuid::new_v4();
        let payments: Vec<payment::Model> = [
            PaymentStatus::Paid,
            PaymentStatus::Refunded,
            PaymentStatus::Failed,
            PaymentStatus::Unpaid,
        ]
        .into_iter()
        .map(|status| owner_payment(owner_id, status))
        .collect();
        let refunded = |p: &payment::Model| payment::Model {
            status: PaymentStatus::Refunded,
            ..p.clone()
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![owner_user(owner_id)]])
            .append_query_results([payments.clone()])
            .append_query_results([vec![refunded(&payments[0])]])
            .append_query_results([vec![refunded(&payments[3])]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        delete_account(&db, owner_id).await.unwrap();

        let updates = db
            .into_transaction_log()
            .iter()
            .flat_map(|txn| txn.statements().to_vec())
            .filter(|stmt| stmt.sql.starts_with("UPDATE \"payment\""))
            .count();
        assert_eq!(updates, 2);
    }

    #[test]
    fn test_only_supported_image_types() {
        assert_eq!(image_extension("image/png"), Some("png"));
        assert_eq!(image_extension("image/jpeg"), Some("jpg"));
        assert_eq!(image_extension("image/webp"), Some("webp"));
        assert_eq!(image_extension("image/gif"), None);
        assert_eq!(image_extension(""), None);
    }
}
