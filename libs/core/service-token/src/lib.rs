//! Mints and verifies short-lived HMAC-signed tokens for users and
//! services, and signs/verifies individual requests for service-to-service
//! calls. Grounded on `backend/app/services/service_auth.py`.

mod cache;
mod claims;
mod signing;

pub use claims::{VerifiedClaims, VALID_SERVICE_NAMES};

use chrono::{Duration as ChronoDuration, Utc};
use fabric_domain_models::Role;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use cache::ServiceTokenCache;
use claims::Claims;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("misconfigured_secret")]
    MisconfiguredSecret,
    #[error("invalid_token")]
    InvalidToken,
    #[error("expired_token")]
    ExpiredToken,
    #[error("unknown_service: {0}")]
    UnknownService(String),
}

pub struct ServiceTokenAuthority {
    secret: String,
    cache: ServiceTokenCache,
}

impl ServiceTokenAuthority {
    pub fn new(secret: impl Into<String>) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(TokenError::MisconfiguredSecret);
        }
        Ok(Self {
            secret,
            cache: ServiceTokenCache::default(),
        })
    }

    pub fn issue_user_token(
        &self,
        user_id: Uuid,
        username: &str,
        role: Role,
        ttl: ChronoDuration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: Some(username.to_string()),
            role: Some(role),
            is_service: false,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        self.encode(&claims)
    }

    /// Only reachable from in-process callers (startup self-checks, the
    /// upstream pool warm-up); never wired to a public route.
    pub fn issue_service_token(
        &self,
        service_name: &str,
        ttl: ChronoDuration,
    ) -> Result<String, TokenError> {
        if !VALID_SERVICE_NAMES.contains(&service_name) {
            return Err(TokenError::UnknownService(service_name.to_string()));
        }
        let now = Utc::now();
        let claims = Claims {
            sub: service_name.to_string(),
            username: None,
            role: None,
            is_service: true,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        self.encode(&claims)
    }

    /// Returns a cached service token, refreshing it when the remaining TTL
    /// drops below 60s. Concurrent misses for the same service collapse
    /// into a single issuance.
    pub async fn cached_service_token(&self, service_name: &str) -> Result<String, TokenError> {
        self.cache
            .get_or_refresh(service_name, |name| {
                self.issue_service_token(name, ChronoDuration::minutes(5))
            })
            .await
    }

    fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| TokenError::MisconfiguredSecret)
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
            _ => TokenError::InvalidToken,
        })?;

        let claims = data.claims;
        if claims.is_service && !VALID_SERVICE_NAMES.contains(&claims.sub.as_str()) {
            return Err(TokenError::UnknownService(claims.sub));
        }
        VerifiedClaims::try_from(claims)
    }

    pub fn sign_request(&self, method: &str, path: &str, body: &[u8], t: i64) -> String {
        signing::sign(&self.secret, method, path, body, t)
    }

    pub fn verify_signature(
        &self,
        method: &str,
        path: &str,
        signature: &str,
        t: i64,
        body: &[u8],
        max_age_secs: i64,
    ) -> bool {
        signing::verify(&self.secret, method, path, signature, t, body, max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_user_token() {
        let authority = ServiceTokenAuthority::new("test-secret").unwrap();
        let user_id = Uuid::new_v4();
        let token = authority
            .issue_user_token(user_id, "alice", Role::Owner, ChronoDuration::hours(1))
            .unwrap();
        let claims = authority.verify(&token).unwrap();
        assert_eq!(claims.user_id, Some(user_id));
        assert!(!claims.is_service);
    }

    #[test]
    fn service_token_is_owner_equivalent() {
        let authority = ServiceTokenAuthority::new("test-secret").unwrap();
        let token = authority
            .issue_service_token("notification", ChronoDuration::minutes(5))
            .unwrap();
        let claims = authority.verify(&token).unwrap();
        assert!(claims.is_service);
        assert_eq!(claims.effective_role(), Role::Owner);
    }

    #[test]
    fn rejects_unknown_service() {
        let authority = ServiceTokenAuthority::new("test-secret").unwrap();
        assert!(authority
            .issue_service_token("crypto-miner", ChronoDuration::minutes(5))
            .is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let authority = ServiceTokenAuthority::new("test-secret").unwrap();
        let token = authority
            .issue_user_token(Uuid::new_v4(), "bob", Role::Member, ChronoDuration::seconds(-1))
            .unwrap();
        assert!(matches!(authority.verify(&token), Err(TokenError::ExpiredToken)));
    }
}
