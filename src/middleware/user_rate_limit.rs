use axum::http::Request;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::KeyExtractor,
    GovernorError, GovernorLayer,
};
use uuid::Uuid;

use crate::middleware::rate_limit::rate_limit_error_handler;
use crate::utils::jwt::Claims;

/// Custom key extractor that extracts user ID from JWT claims in request extensions
#[derive(Debug, Clone, Copy)]
pub struct UserIdExtractor;

impl KeyExtractor for UserIdExtractor {
    type Key = Uuid;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        // Get claims from request extensions (set by auth_middleware)
        let claims = req
            .extensions()
            .get::<Claims>()
            .ok_or(GovernorError::UnableToExtractKey)?;

        Ok(claims.sub)
    }
}

pub type UserGovernorLayer = GovernorLayer<
    UserIdExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Rate-limit tiers for authenticated users. Admin-only routes are covered
/// by the global per-IP limiter alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTier {
    /// 100 requests per minute
    Owner,
    /// 500 requests per minute
    Staff,
}

impl UserTier {
    fn quota(self) -> (u64, u32) {
        match self {
            UserTier::Owner => (600, 100),
            UserTier::Staff => (120, 500),
        }
    }
}

pub fn create_user_governor(tier: UserTier) -> UserGovernorLayer {
    let (per_ms, burst) = tier.quota();

    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(burst)
            .key_extractor(UserIdExtractor)
            .finish()
            .expect("user governor configuration is valid"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::user::UserRole;
    use crate::utils::jwt::TokenPurpose;

    #[test]
    fn test_extracts_subject_from_claims() {
        let sub = Uuid::new_v4();
        let mut req = Request::new(());
        req.extensions_mut().insert(Claims {
            sub,
            role: UserRole::Owner,
            purpose: TokenPurpose::Access,
            iat: 0,
            nbf: 0,
            exp: 0,
            nonce: None,
        });

        assert_eq!(UserIdExtractor.extract(&req).unwrap(), sub);
    }

    #[test]
    fn test_missing_claims_cannot_be_keyed() {
        let req = Request::new(());
        assert!(UserIdExtractor.extract(&req).is_err());
    }
}
