use axum::{extract::State, Extension, Json};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};

use crate::entities::user::{self, UserRole};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppPath};
use crate::services::auth::{self, AuthResponse, LoginRequest, RegisterRequest};
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ResetEmailRequest {
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenCheckResponse {
    pub token: String,
    pub user: user::Model,
}

/// Register an owner, caretaker or doctor account
pub async fn register(
    State(state): State<AppState>,
    AppPath(role): AppPath<UserRole>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    if role == UserRole::Admin {
        return Err(AppError::Forbidden(
            "Admins can only be created by another admin".to_string(),
        ));
    }

    let response = auth::register(state.db.as_ref(), &state.tokens, role, payload, Utc::now()).await?;
    Ok(Json(response))
}

/// Login with email and password for the given role
pub async fn login(
    State(state): State<AppState>,
    AppPath(role): AppPath<UserRole>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let response = auth::login(state.db.as_ref(), &state.tokens, role, payload).await?;
    Ok(Json(response))
}

/// Validate the current token and hand back a fresh one
pub async fn check_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<TokenCheckResponse>> {
    let user = user::Entity::find_by_id(claims.sub)
        .one(state.db.as_ref())
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

    let token = state.tokens.issue_access(user.id, user.role)?;
    Ok(Json(TokenCheckResponse { token, user }))
}

/// Create another admin (admin only)
pub async fn create_admin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    let response =
        auth::register(state.db.as_ref(), &state.tokens, UserRole::Admin, payload, Utc::now()).await?;

    tracing::info!(created_by = %claims.sub, admin_id = %response.user.id, "Admin created");
    Ok(Json(response))
}

/// Send a password reset email. Always answers 200.
pub async fn request_password_reset(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ResetEmailRequest>,
) -> AppResult<Json<serde_json::Value>> {
    auth::request_password_reset(
        state.db.as_ref(),
        &state.tokens,
        state.mailer.as_ref(),
        &state.config.frontend_url,
        &payload.email,
        payload.role,
        Utc::now(),
    )
    .await?;

    Ok(Json(serde_json::json!({
        "message": "If the account exists, a reset link has been sent"
    })))
}

/// Apply a password reset using the bearer reset token
pub async fn reset_password(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let TypedHeader(bearer) =
        bearer.ok_or_else(|| AppError::Unauthorized("Missing reset token".to_string()))?;

    auth::reset_password(
        state.db.as_ref(),
        &state.tokens,
        bearer.token(),
        payload.password,
        Utc::now(),
    )
    .await?;

    Ok(Json(serde_json::json!({ "message": "Password updated" })))
}
