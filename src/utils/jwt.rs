use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::user::UserRole;
use crate::error::{AppError, AppResult};

pub const ACCESS_TOKEN_HOURS: i64 = 6;
pub const RESET_TOKEN_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Access,
    Reset,
}

impl TokenPurpose {
    pub fn lifetime(self) -> Duration {
        match self {
            TokenPurpose::Access => Duration::hours(ACCESS_TOKEN_HOURS),
            TokenPurpose::Reset => Duration::minutes(RESET_TOKEN_MINUTES),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,       // user id
    pub role: UserRole,
    pub purpose: TokenPurpose,
    pub iat: i64,        // issued at timestamp
    pub nbf: i64,        // not valid before
    pub exp: i64,        // expiration timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Uuid>,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Rejects with 403 unless the token's role is one of `roles`.
    pub fn require(&self, roles: &[UserRole]) -> AppResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Role {:?} is not allowed to perform this action",
                self.role
            )))
        }
    }

    /// Admins act on anything; everyone else only on their own records.
    pub fn require_self_or_admin(&self, owner_id: Uuid) -> AppResult<()> {
        if self.is_admin() || self.sub == owner_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You can only access your own resources".to_string(),
            ))
        }
    }
}

/// Signs and verifies bearer tokens with the process-wide HMAC secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        role: UserRole,
        purpose: TokenPurpose,
        nonce: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        let exp = now + purpose.lifetime();

        let claims = Claims {
            sub: user_id,
            role,
            purpose,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
            nonce,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    pub fn issue_access(&self, user_id: Uuid, role: UserRole) -> AppResult<String> {
        self.issue(user_id, role, TokenPurpose::Access, None, Utc::now())
    }

    /// Checks signature, `exp`, `nbf` and that the token was minted for
    /// `expected` purpose.
    pub fn verify(&self, token: &str, expected: TokenPurpose) -> AppResult<Claims> {
        let mut validation = Validation::default();
        validation.validate_nbf = true;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

        if claims.purpose != expected {
            return Err(AppError::Unauthorized(
                "Token was not issued for this purpose".to_string(),
            ));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret")
    }

    #[test]
    fn test_issue_then_verify_round_trip() {
        let tokens = service();
        let user_id = Uuid::new_v4();
        let token = tokens.issue_access(user_id, UserRole::Caretaker).unwrap();

        let claims = tokens.verify(&token, TokenPurpose::Access).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, UserRole::Caretaker);
        assert_eq!(claims.purpose, TokenPurpose::Access);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_HOURS * 3600);
    }

    #[test]
    fn test_reset_token_is_not_an_access_token() {
        let tokens = service();
        let nonce = Uuid::new_v4();
        let token = tokens
            .issue(Uuid::new_v4(), UserRole::Owner, TokenPurpose::Reset, Some(nonce), Utc::now())
            .unwrap();

        assert!(matches!(
            tokens.verify(&token, TokenPurpose::Access),
            Err(AppError::Unauthorized(_))
        ));

        let claims = tokens.verify(&token, TokenPurpose::Reset).unwrap();
        assert_eq!(claims.nonce, Some(nonce));
        assert_eq!(claims.exp - claims.iat, RESET_TOKEN_MINUTES * 60);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let tokens = service();
        let issued = Utc::now() - Duration::hours(ACCESS_TOKEN_HOURS + 1);
        let token = tokens
            .issue(Uuid::new_v4(), UserRole::Owner, TokenPurpose::Access, None, issued)
            .unwrap();

        assert!(tokens.verify(&token, TokenPurpose::Access).is_err());
    }

    #[test]
    fn test_token_not_yet_valid_is_rejected() {
        let tokens = service();
        let issued = Utc::now() + Duration::minutes(10);
        let token = tokens
            .issue(Uuid::new_v4(), UserRole::Owner, TokenPurpose::Access, None, issued)
            .unwrap();

        assert!(tokens.verify(&token, TokenPurpose::Access).is_err());
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let token = TokenService::new("other-secret")
            .issue_access(Uuid::new_v4(), UserRole::Admin)
            .unwrap();

        assert!(service().verify(&token, TokenPurpose::Access).is_err());
    }

    #[test]
    fn test_require_self_or_admin() {
        let owner = Uuid::new_v4();
        let claims = Claims {
            sub: owner,
            role: UserRole::Owner,
            purpose: TokenPurpose::Access,
            iat: 0,
            nbf: 0,
            exp: 0,
            nonce: None,
        };

        assert!(claims.require_self_or_admin(owner).is_ok());
        assert!(matches!(
            claims.require_self_or_admin(Uuid::new_v4()),
            Err(AppError::Forbidden(_))
        ));
        assert!(claims.require(&[UserRole::Admin]).is_err());
        assert!(claims.require(&[UserRole::Owner, UserRole::Admin]).is_ok());
    }
}
