use async_trait::async_trait;
use fabric_domain_models::{Invite, PasswordResetToken, ProviderLink, User};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not_found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("integrity: {0}")]
    Integrity(String),
}

/// Storage boundary for the identity plane. The gateway binary wires this
/// to `fabric-infra-persistence`'s in-memory implementation; a SQL-backed
/// implementation can be substituted without touching `sync`/`provider`.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Option<User>;
    async fn find_user_by_username(&self, normalized_username: &str) -> Option<User>;
    async fn find_user_by_email(&self, normalized_email: &str) -> Option<User>;
    async fn count_users(&self) -> u64;
    async fn owner_exists(&self) -> bool;
    async fn create_user(&self, user: User) -> Result<User, RepositoryError>;
    async fn update_user(&self, user: User) -> Result<User, RepositoryError>;
    /// Forbidden for the sole OWNER; the caller enforces this invariant
    /// before calling delete.
    async fn delete_user(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn find_link(&self, provider: &str, external_user_id: &str) -> Option<ProviderLink>;
    async fn find_links_for_user(&self, user_id: Uuid) -> Vec<ProviderLink>;
    async fn create_link(&self, link: ProviderLink) -> Result<ProviderLink, RepositoryError>;
    async fn delete_link(&self, user_id: Uuid, provider: &str) -> Result<bool, RepositoryError>;

    async fn create_invite(&self, invite: Invite) -> Result<Invite, RepositoryError>;
    async fn find_invite_by_hashed_token(&self, hashed_token: &str) -> Option<Invite>;
    async fn find_pending_invite_by_email(&self, normalized_email: &str) -> Option<Invite>;
    async fn update_invite(&self, invite: Invite) -> Result<Invite, RepositoryError>;

    async fn create_reset_token(&self, token: PasswordResetToken) -> Result<PasswordResetToken, RepositoryError>;
    async fn find_reset_token(&self, hashed_token: &str) -> Option<PasswordResetToken>;
    async fn mark_reset_token_used(&self, hashed_token: &str) -> Result<(), RepositoryError>;
}
