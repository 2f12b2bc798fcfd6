use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use typeshare::typeshare;
use uuid::Uuid;

use crate::user::Role;

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    SocialOauth,
    Passkey,
    MagicLink,
}

/// A (provider, external_user_id) -> local user mapping. Unique on both
/// the pair and, per user, at most one row per provider.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLink {
    pub user_id: Uuid,
    pub provider: String,
    pub external_user_id: String,
    pub created_at: DateTime<Utc>,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Expired,
    Revoked,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: InviteStatus,
    pub hashed_token: String,
    pub inviter_id: Uuid,
    pub inviter_display_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invite {
    /// EXPIRED is derived, not stored, except when explicitly materialized
    /// by a caller that wants to persist the terminal state.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InviteStatus {
        if self.status == InviteStatus::Pending && self.expires_at <= now {
            InviteStatus::Expired
        } else {
            self.status
        }
    }
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetToken {
    pub user_id: Uuid,
    pub hashed_token: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl PasswordResetToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

/// Provider-agnostic claims produced by any identity provider implementation.
/// Never persisted on its own; `local_user_id` is filled in by the sync engine.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaims {
    pub provider: String,
    pub external_user_id: String,
    pub auth_method: AuthMethod,
    pub email: String,
    pub email_verified: bool,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub session_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub organization_id: Option<String>,
    pub organization_slug: Option<String>,
    pub organization_role: Option<String>,
    pub sso_connection: Option<String>,
    pub raw_attributes: Option<HashMap<String, serde_json::Value>>,
    pub local_user_id: Option<Uuid>,
}

impl IdentityClaims {
    pub fn normalized_email(&self) -> String {
        crate::user::User::normalize(&self.email)
    }
}
