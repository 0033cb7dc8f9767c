use axum::{extract::State, Extension, Json};
use chrono::{NaiveDate, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::entities::leaveday::{self, StaffType};
use crate::entities::user::UserRole;
use crate::error::{AppError, AppResult};
use crate::extract::AppPath;
use crate::services::availability;
use crate::utils::jwt::Claims;
use crate::AppState;

fn staff_type_of(claims: &Claims) -> AppResult<StaffType> {
    match claims.role {
        UserRole::Caretaker => Ok(StaffType::Caretaker),
        UserRole::Doctor => Ok(StaffType::Doctor),
        _ => Err(AppError::Forbidden("Staff access required".to_string())),
    }
}

/// List own leave days
pub async fn list_leavedays(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<leaveday::Model>>> {
    let staff_type = staff_type_of(&claims)?;

    let days = leaveday::Entity::find()
        .filter(leaveday::Column::StaffType.eq(staff_type))
        .filter(leaveday::Column::StaffId.eq(claims.sub))
        .order_by_asc(leaveday::Column::Day)
        .all(state.db.as_ref())
        .await?;

    Ok(Json(days))
}

/// Add a leave day (`YYYY-MM-DD`)
pub async fn add_leaveday(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(day): AppPath<NaiveDate>,
) -> AppResult<Json<leaveday::Model>> {
    let staff_type = staff_type_of(&claims)?;

    let leave =
        availability::add_leave_day(state.db.as_ref(), staff_type, claims.sub, day, Utc::now())
            .await?;

    Ok(Json(leave))
}

/// Remove a leave day
pub async fn delete_leaveday(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppPath(day): AppPath<NaiveDate>,
) -> AppResult<Json<serde_json::Value>> {
    let staff_type = staff_type_of(&claims)?;

    availability::remove_leave_day(state.db.as_ref(), staff_type, claims.sub, day, Utc::now())
        .await?;

    Ok(Json(serde_json::json!({ "message": "Leave day removed" })))
}
