use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::PeerIpKeyExtractor, GovernorError,
    GovernorLayer,
};

/// Type alias for IP-based governor layers
pub type IpGovernorLayer = GovernorLayer<
    PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    Body,
>;

/// Create a GovernorLayer for global rate limiting (per IP address)
/// - 1000 requests per minute (one token every 60ms)
/// - Applied before authentication to protect against DDoS
pub fn create_global_governor() -> IpGovernorLayer {
    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(60) // One token every 60ms (1000 per minute)
            .burst_size(1000)    // Max capacity of the "window"
            .finish()
            .expect("global governor configuration is valid"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

/// Create a GovernorLayer for the unauthenticated auth routes (per IP address)
/// - 20 requests per minute, burst of 20
/// - Slows down credential stuffing and reset-mail flooding
pub fn create_public_governor() -> IpGovernorLayer {
    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(3)
            .burst_size(20)
            .finish()
            .expect("public governor configuration is valid"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

/// Renders governor rejections with the same `{message}` body as every other
/// error.
pub fn rate_limit_error_handler(error: GovernorError) -> Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, .. } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "message": format!("Too many requests, retry in {} seconds", wait_time)
                })),
            )
                .into_response();
            if let Ok(value) = wait_time.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
        GovernorError::UnableToExtractKey => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unable to identify the client" })),
        )
            .into_response(),
        GovernorError::Other { code, msg, .. } => (
            code,
            Json(json!({ "message": msg.unwrap_or_else(|| "Request rejected".to_string()) })),
        )
            .into_response(),
    }
}

/// Middleware to log rate limiting and request details
pub async fn log_request(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    tracing::debug!(
        client_ip = %addr.ip(),
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    let response = next.run(request).await;
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(
            client_ip = %addr.ip(),
            method = %method,
            uri = %uri,
            "RATE LIMITED - Request rejected due to too many requests"
        );
    } else if status.is_client_error() || status.is_server_error() {
        tracing::warn!(
            client_ip = %addr.ip(),
            method = %method,
            uri = %uri,
            status = %status,
            "Request failed"
        );
    } else {
        tracing::debug!(
            client_ip = %addr.ip(),
            method = %method,
            uri = %uri,
            status = %status,
            "Request completed"
        );
    }

    response
}
