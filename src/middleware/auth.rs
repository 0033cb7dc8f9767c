use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::entities::user::UserRole;
use crate::error::{AppError, AppResult};
use crate::services::auth::check_token;
use crate::utils::jwt::Claims;
use crate::AppState;

/// Validates the bearer access token, checks that its user still exists and
/// stores the claims in the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let TypedHeader(auth) =
        auth.ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let (claims, _) = check_token(state.db.as_ref(), &state.tokens, auth.token()).await?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

fn claims_of(request: &Request) -> AppResult<&Claims> {
    request
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::Unauthorized("No authentication found".to_string()))
}

/// Require admin role
pub async fn require_admin(request: Request, next: Next) -> AppResult<Response> {
    if !claims_of(&request)?.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    Ok(next.run(request).await)
}

/// Require owner role
pub async fn require_owner(request: Request, next: Next) -> AppResult<Response> {
    if claims_of(&request)?.role != UserRole::Owner {
        return Err(AppError::Forbidden("Owner access required".to_string()));
    }

    Ok(next.run(request).await)
}

/// Require caretaker or doctor role
pub async fn require_staff(request: Request, next: Next) -> AppResult<Response> {
    if !claims_of(&request)?.role.is_staff() {
        return Err(AppError::Forbidden("Staff access required".to_string()));
    }

    Ok(next.run(request).await)
}
