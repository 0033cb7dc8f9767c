use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::handlers::{auth, leaveday, payment, pet, service, user, webhook};
use crate::middleware::auth::{auth_middleware, require_admin, require_owner, require_staff};
use crate::middleware::rate_limit::create_public_governor;
use crate::middleware::user_rate_limit::{create_user_governor, UserTier};
use crate::AppState;

pub const API_PREFIX: &str = "/api/v1";

pub fn create_router(state: AppState) -> Router {
    let owner_governor = create_user_governor(UserTier::Owner);
    let staff_governor = create_user_governor(UserTier::Staff);
    // IP-based governor for the unauthenticated auth routes
    let public_governor = create_public_governor();

    // Public routes (rate limited per IP)
    let public_auth_routes = Router::new()
        .route("/auth/register/{role}", post(auth::register))
        .route("/auth/login/{role}", post(auth::login))
        .route("/auth/password/email", post(auth::request_password_reset))
        .route("/auth/password", patch(auth::reset_password))
        .layer(public_governor);

    // Provider-signed, no bearer token
    let webhook_routes = Router::new().route("/webhooks/payment", post(webhook::payment_webhook));

    // Any authenticated user; handlers check role and ownership
    let account_routes = Router::new()
        .route("/auth/token", get(auth::check_token))
        .route(
            "/user",
            get(user::get_me).patch(user::update_me).delete(user::delete_me),
        )
        .route(
            "/user/",
            get(user::get_me).patch(user::update_me).delete(user::delete_me),
        )
        .route(
            "/user/profile",
            patch(user::upload_profile_image)
                .layer(DefaultBodyLimit::max(user::MAX_PROFILE_IMAGE_BYTES + 1)),
        )
        .route("/pets", post(pet::create_pet).get(pet::list_pets))
        .route("/pets/{petID}", patch(pet::update_pet).delete(pet::delete_pet))
        .route("/services", post(service::create_service).get(service::list_services))
        .route(
            "/services/{serviceID}",
            get(service::get_service)
                .patch(service::update_service)
                .delete(service::cancel_service),
        )
        .route("/payments", get(payment::list_payments).post(payment::create_payment))
        .layer(owner_governor.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Owner routes (requires auth + owner role)
    let owner_routes = Router::new()
        .route("/pets/owner", get(pet::list_my_pets))
        .route("/services/{serviceID}/review", patch(service::review_service))
        .route("/payments/{paymentID}/checkout", post(payment::checkout))
        .layer(owner_governor)
        .layer(middleware::from_fn(require_owner))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Staff routes (requires auth + caretaker or doctor role)
    let staff_routes = Router::new()
        .route("/leaveday", get(leaveday::list_leavedays))
        .route(
            "/leaveday/{day}",
            post(leaveday::add_leaveday).delete(leaveday::delete_leaveday),
        )
        .layer(staff_governor)
        .layer(middleware::from_fn(require_staff))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Admin routes (requires auth + admin role)
    let admin_routes = Router::new()
        .route("/auth/admin", post(auth::create_admin))
        .route("/user/all", get(user::list_users))
        .route("/user/{userID}", patch(user::update_user).delete(user::delete_user))
        .route("/payments/{paymentID}", patch(payment::update_payment))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let api = Router::new()
        .merge(public_auth_routes)
        .merge(webhook_routes)
        .merge(account_routes)
        .merge(owner_routes)
        .merge(staff_routes)
        .merge(admin_routes);

    Router::new().nest(API_PREFIX, api).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::entities::user::{self, UserRole};
    use crate::services::{mailer::LogMailer, storage::DisabledStorage};
    use crate::utils::jwt::TokenService;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use chrono::{NaiveDate, Utc};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            jwt_secret: "test-secret".to_string(),
            stripe_webhook_secret: "whsec_test".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            resend_api_key: None,
            email_from: "no-reply@test.local".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            supabase: None,
            request_timeout_secs: 30,
            advance_interval_secs: 60,
            admin_email: None,
            admin_password: None,
        }
    }

    fn test_state(db: MockDatabase) -> AppState {
        let config = test_config();
        AppState {
            db: Arc::new(db.into_connection()),
            tokens: TokenService::new(&config.jwt_secret),
            mailer: Arc::new(LogMailer),
            storage: Arc::new(DisabledStorage),
            config,
        }
    }

    async fn message_of(response: axum::response::Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["message"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let app = create_router(test_state(MockDatabase::new(DatabaseBackend::Postgres)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/auth/token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!message_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_token_is_unauthorized() {
        let app = create_router(test_state(MockDatabase::new(DatabaseBackend::Postgres)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/services")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unsigned_webhook_is_unauthorized() {
        let app = create_router(test_state(MockDatabase::new(DatabaseBackend::Postgres)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/webhooks/payment")
                    .header("content-type", "application/json")
                    .header("stripe-signature", "t=1,v1=00")
                    .body(Body::from(r#"{"id":"evt_1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(message_of(response).await, "Invalid webhook signature");
    }

    fn account(role: UserRole) -> user::Model {
        user::Model {
            id: uuid::Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            password_hash: String::new(),
            role,
            name: "Someone".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            telephone: "0800000000".to_string(),
            address: "1 Main Street".to_string(),
            profile_image_url: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_only_owners_create_pets() {
        let admin = account(UserRole::Admin);
        let state = test_state(
            MockDatabase::new(DatabaseBackend::Postgres).append_query_results([vec![admin.clone()]]),
        );
        let token = state.tokens.issue_access(admin.id, UserRole::Admin).unwrap();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/pets")
                    .header("authorization", format!("Bearer {}", token))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"kind":"dog","birth_date":"2020-01-01","weight":"4.5","sex":"male"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = create_router(test_state(MockDatabase::new(DatabaseBackend::Postgres)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/nothing-here")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
