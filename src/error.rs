use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{DbErr, SqlErr};
use serde_json::json;
use thiserror::Error;

use crate::db::is_serialization_failure;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unprocessable: {0}")]
    Unprocessable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "Internal server error".to_string()
            }
            AppError::BadRequest(m)
            | AppError::Unauthorized(m)
            | AppError::Forbidden(m)
            | AppError::NotFound(m)
            | AppError::Conflict(m)
            | AppError::Unprocessable(m) => m,
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        if let DbErr::RecordNotFound(what) = &err {
            return AppError::NotFound(what.clone());
        }

        if is_serialization_failure(&err) {
            return AppError::Conflict(
                "Concurrent update detected, availability lost".to_string(),
            );
        }

        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                tracing::debug!(detail = %detail, "Unique constraint violation");
                AppError::Conflict("Resource already exists".to_string())
            }
            Some(SqlErr::ForeignKeyConstraintViolation(detail)) => {
                tracing::debug!(detail = %detail, "Foreign key violation");
                AppError::Conflict("Referenced resource is missing or still in use".to_string())
            }
            _ => AppError::Internal(format!("Database error: {}", err)),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<(String, String)> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let detail = errs
                    .first()
                    .map(|e| match &e.message {
                        Some(message) => message.to_string(),
                        None => e.code.to_string(),
                    })
                    .unwrap_or_default();
                (field.to_string(), detail)
            })
            .collect();
        fields.sort();

        match fields.into_iter().next() {
            Some((field, detail)) => AppError::Unprocessable(format!("{}: {}", field, detail)),
            None => AppError::Unprocessable("Validation failed".to_string()),
        }
    }
}

/// Syntactically valid JSON that does not fit the target type (bad enum
/// value, wrong field type) is a validation failure; everything else is a
/// malformed request.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => AppError::Unprocessable(e.body_text()),
            other => AppError::BadRequest(other.body_text()),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Signup {
        #[validate(email(message = "must be a valid email"))]
        email: String,
        #[validate(length(min = 8, message = "must be at least 8 characters"))]
        password: String,
    }

    #[test]
    fn test_status_codes_follow_taxonomy() {
        let cases = [
            (AppError::BadRequest(String::new()), 400),
            (AppError::Unauthorized(String::new()), 401),
            (AppError::Forbidden(String::new()), 403),
            (AppError::NotFound(String::new()), 404),
            (AppError::Conflict(String::new()), 409),
            (AppError::Unprocessable(String::new()), 422),
            (AppError::Internal(String::new()), 500),
        ];

        for (err, code) in cases {
            assert_eq!(err.status_code().as_u16(), code);
        }
    }

    #[test]
    fn test_record_not_found_maps_to_not_found() {
        let err: AppError = DbErr::RecordNotFound("Payment not found".to_string()).into();
        assert!(matches!(err, AppError::NotFound(m) if m == "Payment not found"));
    }

    #[test]
    fn test_generic_db_error_is_internal() {
        let err: AppError = DbErr::Custom("boom".to_string()).into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_validation_reports_first_field_error() {
        let input = Signup {
            email: "not-an-email".to_string(),
            password: "short".to_string(),
        };
        let err: AppError = input.validate().unwrap_err().into();

        match err {
            AppError::Unprocessable(message) => {
                assert_eq!(message, "email: must be a valid email");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
