use fabric_domain_models::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TokenError;

/// Upstream names the gateway may hold a client or token for. `gateway`
/// itself is included so the process can self-sign during startup checks.
pub const VALID_SERVICE_NAMES: &[&str] = &[
    "gateway",
    "identity",
    "health",
    "metrics",
    "assistant",
    "notification",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub sub: String,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub is_service: bool,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub is_service: bool,
    pub service_name: Option<String>,
}

impl VerifiedClaims {
    /// Service tokens are treated as role=OWNER for internal authorization.
    pub fn effective_role(&self) -> Role {
        if self.is_service {
            Role::Owner
        } else {
            self.role.unwrap_or(Role::Member)
        }
    }
}

impl TryFrom<Claims> for VerifiedClaims {
    type Error = TokenError;

    fn try_from(claims: Claims) -> Result<Self, TokenError> {
        if claims.is_service {
            Ok(VerifiedClaims {
                user_id: None,
                username: None,
                role: None,
                is_service: true,
                service_name: Some(claims.sub),
            })
        } else {
            let user_id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::InvalidToken)?;
            Ok(VerifiedClaims {
                user_id: Some(user_id),
                username: claims.username,
                role: claims.role,
                is_service: false,
                service_name: None,
            })
        }
    }
}
