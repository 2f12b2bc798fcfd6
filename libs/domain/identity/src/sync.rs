//! User-sync engine (C6), grounded on `auth-service/app/identity/sync.py`.

use std::sync::Arc;

use chrono::Utc;
use fabric_domain_models::{IdentityClaims, ProviderLink, Role, User};
use tracing::{info, warn};
use uuid::Uuid;

use crate::repository::{IdentityRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("integrity: unique username/email collision persisted after retry")]
    PersistentCollision,
    #[error("conflict: external id already linked to a different user")]
    LinkConflict,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub user_id: Option<Uuid>,
    pub created: bool,
    pub updated: bool,
}

pub struct UserSyncEngine {
    repository: Arc<dyn IdentityRepository>,
}

impl UserSyncEngine {
    pub fn new(repository: Arc<dyn IdentityRepository>) -> Self {
        Self { repository }
    }

    pub async fn sync(
        &self,
        claims: &IdentityClaims,
        create_if_missing: bool,
        update_profile: bool,
    ) -> Result<SyncOutcome, SyncError> {
        // Step 1: lookup by (provider, external_user_id).
        if let Some(link) = self.repository.find_link(&claims.provider, &claims.external_user_id).await {
            let mut user = self.repository.find_user_by_id(link.user_id).await.ok_or(RepositoryError::NotFound)?;
            let mut updated = false;
            if update_profile {
                updated = apply_profile(&mut user, claims);
                if updated {
                    user = self.repository.update_user(user).await?;
                }
            }
            return Ok(SyncOutcome { user_id: Some(user.id), created: false, updated });
        }

        // Step 2: auto-link by normalized email.
        let normalized_email = claims.normalized_email();
        if !normalized_email.is_empty() {
            if let Some(mut user) = self.repository.find_user_by_email(&normalized_email).await {
                self.repository
                    .create_link(ProviderLink {
                        user_id: user.id,
                        provider: claims.provider.clone(),
                        external_user_id: claims.external_user_id.clone(),
                        created_at: Utc::now(),
                    })
                    .await?;

                let mut updated = false;
                if update_profile {
                    updated = apply_profile(&mut user, claims);
                    if updated {
                        user = self.repository.update_user(user).await?;
                    }
                }
                info!(user_id = %user.id, provider = %claims.provider, "auto-linked provider by email");
                return Ok(SyncOutcome { user_id: Some(user.id), created: false, updated });
            }
        }

        // Step 3: create if missing.
        if create_if_missing {
            return self.create_and_link(claims).await;
        }

        Ok(SyncOutcome { user_id: None, created: false, updated: false })
    }

    async fn create_and_link(&self, claims: &IdentityClaims) -> Result<SyncOutcome, SyncError> {
        match self.try_create_and_link(claims).await {
            Err(SyncError::Repository(RepositoryError::Conflict(_))) => {
                // Step 4: rollback-and-retry once via the email auto-link path.
                warn!(provider = %claims.provider, "uniqueness collision creating user, retrying via email lookup");
                let normalized_email = claims.normalized_email();
                if let Some(user) = self.repository.find_user_by_email(&normalized_email).await {
                    self.repository
                        .create_link(ProviderLink {
                            user_id: user.id,
                            provider: claims.provider.clone(),
                            external_user_id: claims.external_user_id.clone(),
                            created_at: Utc::now(),
                        })
                        .await?;
                    Ok(SyncOutcome { user_id: Some(user.id), created: false, updated: false })
                } else {
                    Err(SyncError::PersistentCollision)
                }
            }
            other => other,
        }
    }

    async fn try_create_and_link(&self, claims: &IdentityClaims) -> Result<SyncOutcome, SyncError> {
        let username = self.unique_username(claims).await;
        let now = Utc::now();

        let user = User {
            id: Uuid::new_v4(),
            username,
            email: claims.normalized_email(),
            password_hash: String::new(),
            first_name: claims.first_name.clone().unwrap_or_default(),
            last_name: claims.last_name.clone().unwrap_or_default(),
            avatar_url: claims.avatar_url.clone(),
            role: Role::Member,
            is_active: true,
            is_verified: claims.email_verified,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        let user = self.repository.create_user(user).await?;

        self.repository
            .create_link(ProviderLink {
                user_id: user.id,
                provider: claims.provider.clone(),
                external_user_id: claims.external_user_id.clone(),
                created_at: now,
            })
            .await?;

        info!(user_id = %user.id, provider = %claims.provider, "created user from provider sync");
        Ok(SyncOutcome { user_id: Some(user.id), created: true, updated: false })
    }

    /// base = claims.username or local-part of email; append incrementing
    /// suffix until free.
    async fn unique_username(&self, claims: &IdentityClaims) -> String {
        let base = claims
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| claims.email.split('@').next().unwrap_or("user").to_string());
        let base = User::normalize(&base);

        if self.repository.find_user_by_username(&base).await.is_none() {
            return base;
        }
        let mut suffix = 1u32;
        loop {
            let candidate = format!("{base}{suffix}");
            if self.repository.find_user_by_username(&candidate).await.is_none() {
                return candidate;
            }
            suffix += 1;
        }
    }

    pub async fn deactivate(&self, provider: &str, external_user_id: &str) -> Result<(), SyncError> {
        let Some(link) = self.repository.find_link(provider, external_user_id).await else {
            return Ok(());
        };
        if let Some(mut user) = self.repository.find_user_by_id(link.user_id).await {
            if user.is_active {
                user.is_active = false;
                user.updated_at = Utc::now();
                self.repository.update_user(user).await?;
            }
        }
        Ok(())
    }

    /// Refuses if `external_user_id` is already linked to a different user;
    /// returns the existing link if it's the same user.
    pub async fn link(&self, user_id: Uuid, provider: &str, external_user_id: &str) -> Result<ProviderLink, SyncError> {
        if let Some(existing) = self.repository.find_link(provider, external_user_id).await {
            return if existing.user_id == user_id {
                Ok(existing)
            } else {
                Err(SyncError::LinkConflict)
            };
        }
        Ok(self
            .repository
            .create_link(ProviderLink {
                user_id,
                provider: provider.to_string(),
                external_user_id: external_user_id.to_string(),
                created_at: Utc::now(),
            })
            .await?)
    }

    pub async fn unlink(&self, user_id: Uuid, provider: &str) -> Result<bool, SyncError> {
        Ok(self.repository.delete_link(user_id, provider).await?)
    }

    pub async fn get_provider_links(&self, user_id: Uuid) -> Vec<ProviderLink> {
        self.repository.find_links_for_user(user_id).await
    }
}

/// Mutates `user` with any non-empty claim fields; returns whether anything
/// changed.
fn apply_profile(user: &mut User, claims: &IdentityClaims) -> bool {
    let mut changed = false;
    if let Some(first_name) = &claims.first_name {
        if !first_name.is_empty() && *first_name != user.first_name {
            user.first_name = first_name.clone();
            changed = true;
        }
    }
    if let Some(last_name) = &claims.last_name {
        if !last_name.is_empty() && *last_name != user.last_name {
            user.last_name = last_name.clone();
            changed = true;
        }
    }
    if let Some(avatar_url) = &claims.avatar_url {
        if Some(avatar_url.clone()) != user.avatar_url {
            user.avatar_url = Some(avatar_url.clone());
            changed = true;
        }
    }
    if claims.email_verified && !user.is_verified {
        user.is_verified = true;
        changed = true;
    }
    if changed {
        user.updated_at = Utc::now();
    }
    changed
}
