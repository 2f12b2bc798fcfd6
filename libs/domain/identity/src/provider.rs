use async_trait::async_trait;
use fabric_core_token::ServiceTokenAuthority;
use fabric_domain_models::{AuthMethod, IdentityClaims};
use fabric_infra_upstream::{RequestOptions, UpstreamPool};
use reqwest::Method;
use std::sync::Arc;

use crate::repository::IdentityRepository;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid token")]
    InvalidToken,
    #[error("user not active")]
    UserNotActive,
    #[error("webhook verification failed")]
    WebhookVerificationFailed,
    #[error("upstream error: {0}")]
    Upstream(String),
}

pub struct WebhookResult {
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Capability set every identity provider implements, per spec §4.5.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn validate_token(&self, opaque_token: &str) -> Result<Option<IdentityClaims>, ProviderError>;
    async fn validate_session(&self, bearer: Option<&str>, session_cookie: Option<&str>) -> Result<Option<IdentityClaims>, ProviderError>;
    fn login_url(&self, redirect: &str) -> String;
    fn logout_url(&self, redirect: &str) -> String;
    async fn revoke_session(&self, session_id: &str) -> Result<bool, ProviderError>;
}

/// Tokens are the signed envelopes from `fabric-core-token`. Webhooks are
/// not applicable; sessions are stateless so revocation is a no-op.
pub struct LocalProvider {
    token_authority: Arc<ServiceTokenAuthority>,
    repository: Arc<dyn IdentityRepository>,
}

impl LocalProvider {
    pub fn new(token_authority: Arc<ServiceTokenAuthority>, repository: Arc<dyn IdentityRepository>) -> Self {
        Self { token_authority, repository }
    }
}

#[async_trait]
impl IdentityProvider for LocalProvider {
    async fn validate_token(&self, opaque_token: &str) -> Result<Option<IdentityClaims>, ProviderError> {
        let verified = match self.token_authority.verify(opaque_token) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let Some(user_id) = verified.user_id else { return Ok(None) };
        let Some(user) = self.repository.find_user_by_id(user_id).await else { return Ok(None) };
        if !user.is_active {
            return Err(ProviderError::UserNotActive);
        }

        Ok(Some(IdentityClaims {
            provider: "local".to_string(),
            external_user_id: user.id.to_string(),
            auth_method: AuthMethod::Password,
            email: user.email,
            email_verified: user.is_verified,
            username: Some(user.username),
            first_name: Some(user.first_name),
            last_name: Some(user.last_name),
            avatar_url: user.avatar_url,
            session_id: None,
            issued_at: chrono::Utc::now(),
            expires_at: None,
            organization_id: None,
            organization_slug: None,
            organization_role: None,
            sso_connection: None,
            raw_attributes: None,
            local_user_id: Some(user.id),
        }))
    }

    async fn validate_session(&self, bearer: Option<&str>, _session_cookie: Option<&str>) -> Result<Option<IdentityClaims>, ProviderError> {
        match bearer {
            Some(token) => self.validate_token(token).await,
            None => Ok(None),
        }
    }

    fn login_url(&self, redirect: &str) -> String {
        format!("/api/auth/login?redirect={redirect}")
    }

    fn logout_url(&self, redirect: &str) -> String {
        format!("/api/auth/logout?redirect={redirect}")
    }

    async fn revoke_session(&self, _session_id: &str) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Sessions are opaque tokens verified against the upstream cloud IdP.
pub struct CloudProvider {
    upstreams: Arc<UpstreamPool>,
    webhook_secret: String,
}

impl CloudProvider {
    pub fn new(upstreams: Arc<UpstreamPool>, webhook_secret: impl Into<String>) -> Self {
        Self { upstreams, webhook_secret: webhook_secret.into() }
    }

    fn infer_auth_method(strategy: &str) -> AuthMethod {
        if strategy.contains("oauth") {
            AuthMethod::SocialOauth
        } else if strategy.contains("passkey") {
            AuthMethod::Passkey
        } else if strategy.contains("email_link") {
            AuthMethod::MagicLink
        } else {
            AuthMethod::Password
        }
    }

    fn claims_from_profile(profile: &serde_json::Value) -> Option<IdentityClaims> {
        let external_user_id = profile.get("id")?.as_str()?.to_string();
        let strategy = profile.get("strategy").and_then(|v| v.as_str()).unwrap_or("password");

        let emails = profile.get("email_addresses").and_then(|v| v.as_array());
        let primary_id = profile.get("primary_email_address_id").and_then(|v| v.as_str());
        let primary_email = emails.and_then(|list| {
            list.iter().find(|e| e.get("id").and_then(|v| v.as_str()) == primary_id).or_else(|| list.first())
        });

        let email = primary_email
            .and_then(|e| e.get("email_address"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let email_verified = primary_email
            .and_then(|e| e.get("verification"))
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .map(|s| s == "verified")
            .unwrap_or(false);

        Some(IdentityClaims {
            provider: "cloud".to_string(),
            external_user_id,
            auth_method: Self::infer_auth_method(strategy),
            email,
            email_verified,
            username: profile.get("username").and_then(|v| v.as_str()).map(String::from),
            first_name: profile.get("first_name").and_then(|v| v.as_str()).map(String::from),
            last_name: profile.get("last_name").and_then(|v| v.as_str()).map(String::from),
            avatar_url: profile.get("image_url").and_then(|v| v.as_str()).map(String::from),
            session_id: None,
            issued_at: chrono::Utc::now(),
            expires_at: None,
            organization_id: None,
            organization_slug: None,
            organization_role: None,
            sso_connection: None,
            raw_attributes: None,
            local_user_id: None,
        })
    }
}

#[async_trait]
impl IdentityProvider for CloudProvider {
    async fn validate_token(&self, opaque_token: &str) -> Result<Option<IdentityClaims>, ProviderError> {
        let options = RequestOptions {
            headers: vec![("Authorization".to_string(), format!("Bearer {opaque_token}"))],
            ..Default::default()
        };
        let response = self
            .upstreams
            .request("identity", Method::GET, "/v1/sessions/verify", options)
            .await
            .map_err(|err| ProviderError::Upstream(err.to_string()))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let profile: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderError::Upstream(err.to_string()))?;

        Ok(Self::claims_from_profile(&profile))
    }

    async fn validate_session(&self, bearer: Option<&str>, session_cookie: Option<&str>) -> Result<Option<IdentityClaims>, ProviderError> {
        let token = session_cookie.or(bearer);
        match token {
            Some(token) => self.validate_token(token).await,
            None => Ok(None),
        }
    }

    fn login_url(&self, redirect: &str) -> String {
        format!("/api/auth/cloud/login?redirect={redirect}")
    }

    fn logout_url(&self, redirect: &str) -> String {
        format!("/api/auth/cloud/logout?redirect={redirect}")
    }

    async fn revoke_session(&self, session_id: &str) -> Result<bool, ProviderError> {
        let response = self
            .upstreams
            .request("identity", Method::POST, &format!("/v1/sessions/{session_id}/revoke"), RequestOptions::default())
            .await
            .map_err(|err| ProviderError::Upstream(err.to_string()))?;
        Ok(response.status().is_success())
    }

    // handle_webhook lives on CloudProvider directly rather than the trait,
    // since only the cloud variant supports it (spec §4.5: "not applicable"
    // for local).
}

impl CloudProvider {
    /// Builds `IdentityClaims` out of the `data` object carried by a
    /// `user.created`/`user.updated` webhook payload, reusing the same
    /// mapping `validate_token` applies to a session-verify profile.
    pub fn claims_from_webhook_payload(&self, data: &serde_json::Value) -> Option<IdentityClaims> {
        Self::claims_from_profile(data)
    }

    pub fn verify_webhook(&self, id: &str, timestamp: &str, signature: &str, body: &[u8]) -> Result<(), ProviderError> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let message = format!("{id}.{timestamp}.{}", String::from_utf8_lossy(body));
        let mut mac = Hmac::<Sha256>::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| ProviderError::WebhookVerificationFailed)?;
        mac.update(message.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        if expected == signature.trim_start_matches("v1,") {
            Ok(())
        } else {
            Err(ProviderError::WebhookVerificationFailed)
        }
    }
}

/// Tagged variant so the factory (one singleton per process) can be
/// chosen from configuration without dynamic dispatch overhead at every
/// call site, while still behaving like a trait object where needed.
pub enum Provider {
    Local(LocalProvider),
    Cloud(CloudProvider),
}

#[async_trait]
impl IdentityProvider for Provider {
    async fn validate_token(&self, opaque_token: &str) -> Result<Option<IdentityClaims>, ProviderError> {
        match self {
            Provider::Local(p) => p.validate_token(opaque_token).await,
            Provider::Cloud(p) => p.validate_token(opaque_token).await,
        }
    }

    async fn validate_session(&self, bearer: Option<&str>, session_cookie: Option<&str>) -> Result<Option<IdentityClaims>, ProviderError> {
        match self {
            Provider::Local(p) => p.validate_session(bearer, session_cookie).await,
            Provider::Cloud(p) => p.validate_session(bearer, session_cookie).await,
        }
    }

    fn login_url(&self, redirect: &str) -> String {
        match self {
            Provider::Local(p) => p.login_url(redirect),
            Provider::Cloud(p) => p.login_url(redirect),
        }
    }

    fn logout_url(&self, redirect: &str) -> String {
        match self {
            Provider::Local(p) => p.logout_url(redirect),
            Provider::Cloud(p) => p.logout_url(redirect),
        }
    }

    async fn revoke_session(&self, session_id: &str) -> Result<bool, ProviderError> {
        match self {
            Provider::Local(p) => p.revoke_session(session_id).await,
            Provider::Cloud(p) => p.revoke_session(session_id).await,
        }
    }
}
