//! JWT issuance and validation

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Claims carried in access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    /// Token id, recorded in `user_sessions` for revocation
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// A freshly issued token plus the metadata the session store needs
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue an access token for a user
    pub fn issue_token(&self, user_id: Uuid, email: &str, role: &str) -> ApiResult<IssuedToken> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + Duration::hours(self.expiry_hours);
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role: role.to_string(),
            jti: jti.clone(),
            exp: expires_at.unix_timestamp(),
            iat: now.unix_timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("Failed to sign token: {e}")))?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Validate a token and return its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation).map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-secret-key-for-unit-tests", 24)
    }

    #[test]
    fn issued_token_round_trips() {
        let manager = manager();
        let user_id = Uuid::new_v4();

        let issued = manager
            .issue_token(user_id, "writer@example.com", "user")
            .unwrap();
        let claims = manager.validate_token(&issued.token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "writer@example.com");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.jti, issued.jti);
    }

    #[test]
    fn role_claim_survives_round_trip() {
        let manager = manager();
        let issued = manager
            .issue_token(Uuid::new_v4(), "admin@example.com", "admin")
            .unwrap();
        let claims = manager.validate_token(&issued.token).unwrap();
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let issued = JwtManager::new("secret-a", 24)
            .issue_token(Uuid::new_v4(), "writer@example.com", "user")
            .unwrap();
        assert!(JwtManager::new("secret-b", 24)
            .validate_token(&issued.token)
            .is_err());
    }

    #[test]
    fn each_token_gets_a_fresh_jti() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let a = manager.issue_token(user_id, "a@example.com", "user").unwrap();
        let b = manager.issue_token(user_id, "a@example.com", "user").unwrap();
        assert_ne!(a.jti, b.jti);
    }
}
