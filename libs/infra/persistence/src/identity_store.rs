//! In-memory `IdentityRepository`, backed by `DashMap`s that enforce the
//! identity plane's uniqueness invariants (unique case-insensitive
//! username/email, unique (provider, external_user_id)).

use async_trait::async_trait;
use dashmap::DashMap;
use fabric_domain_identity::repository::{IdentityRepository, RepositoryError};
use fabric_domain_models::{Invite, PasswordResetToken, ProviderLink, Role, User};
use uuid::Uuid;

#[derive(Default)]
pub struct IdentityStore {
    users: DashMap<Uuid, User>,
    username_index: DashMap<String, Uuid>,
    email_index: DashMap<String, Uuid>,
    links: DashMap<(String, String), ProviderLink>,
    links_by_user: DashMap<Uuid, Vec<(String, String)>>,
    invites: DashMap<Uuid, Invite>,
    invites_by_token: DashMap<String, Uuid>,
    reset_tokens: DashMap<String, PasswordResetToken>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registered user, for the OWNER-scoped user-management listing.
    pub fn list_users(&self) -> Vec<User> {
        self.users.iter().map(|u| u.clone()).collect()
    }

    /// Every invite ever issued, for the OWNER-scoped invite listing.
    pub fn list_invites(&self) -> Vec<Invite> {
        self.invites.iter().map(|i| i.clone()).collect()
    }

    pub fn find_invite_by_id(&self, id: Uuid) -> Option<Invite> {
        self.invites.get(&id).map(|i| i.clone())
    }
}

#[async_trait]
impl IdentityRepository for IdentityStore {
    async fn find_user_by_id(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    async fn find_user_by_username(&self, normalized_username: &str) -> Option<User> {
        let id = self.username_index.get(normalized_username)?;
        self.users.get(&*id).map(|u| u.clone())
    }

    async fn find_user_by_email(&self, normalized_email: &str) -> Option<User> {
        let id = self.email_index.get(normalized_email)?;
        self.users.get(&*id).map(|u| u.clone())
    }

    async fn count_users(&self) -> u64 {
        self.users.len() as u64
    }

    async fn owner_exists(&self) -> bool {
        self.users.iter().any(|u| u.role == Role::Owner && u.is_active)
    }

    async fn create_user(&self, user: User) -> Result<User, RepositoryError> {
        let username_key = User::normalize(&user.username);
        let email_key = User::normalize(&user.email);

        if self.username_index.contains_key(&username_key) {
            return Err(RepositoryError::Conflict(format!("username {username_key} already taken")));
        }
        if self.email_index.contains_key(&email_key) {
            return Err(RepositoryError::Conflict(format!("email {email_key} already registered")));
        }

        self.username_index.insert(username_key, user.id);
        self.email_index.insert(email_key, user.id);
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: User) -> Result<User, RepositoryError> {
        let mut existing = self.users.get_mut(&user.id).ok_or(RepositoryError::NotFound)?;

        let new_username_key = User::normalize(&user.username);
        let new_email_key = User::normalize(&user.email);
        let old_username_key = User::normalize(&existing.username);
        let old_email_key = User::normalize(&existing.email);

        if new_username_key != old_username_key {
            if self.username_index.contains_key(&new_username_key) {
                return Err(RepositoryError::Conflict(format!("username {new_username_key} already taken")));
            }
            self.username_index.remove(&old_username_key);
            self.username_index.insert(new_username_key, user.id);
        }
        if new_email_key != old_email_key {
            if self.email_index.contains_key(&new_email_key) {
                return Err(RepositoryError::Conflict(format!("email {new_email_key} already registered")));
            }
            self.email_index.remove(&old_email_key);
            self.email_index.insert(new_email_key, user.id);
        }

        *existing = user.clone();
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), RepositoryError> {
        let (_, user) = self.users.remove(&id).ok_or(RepositoryError::NotFound)?;
        self.username_index.remove(&User::normalize(&user.username));
        self.email_index.remove(&User::normalize(&user.email));
        if let Some((_, keys)) = self.links_by_user.remove(&id) {
            for key in keys {
                self.links.remove(&key);
            }
        }
        Ok(())
    }

    async fn find_link(&self, provider: &str, external_user_id: &str) -> Option<ProviderLink> {
        self.links.get(&(provider.to_string(), external_user_id.to_string())).map(|l| l.clone())
    }

    async fn find_links_for_user(&self, user_id: Uuid) -> Vec<ProviderLink> {
        let Some(keys) = self.links_by_user.get(&user_id) else { return Vec::new() };
        keys.iter().filter_map(|key| self.links.get(key).map(|l| l.clone())).collect()
    }

    async fn create_link(&self, link: ProviderLink) -> Result<ProviderLink, RepositoryError> {
        let key = (link.provider.clone(), link.external_user_id.clone());
        if self.links.contains_key(&key) {
            return Err(RepositoryError::Conflict("provider link already exists".to_string()));
        }
        self.links.insert(key.clone(), link.clone());
        self.links_by_user.entry(link.user_id).or_default().push(key);
        Ok(link)
    }

    async fn delete_link(&self, user_id: Uuid, provider: &str) -> Result<bool, RepositoryError> {
        let Some(mut keys) = self.links_by_user.get_mut(&user_id) else { return Ok(false) };
        let Some(pos) = keys.iter().position(|(p, _)| p == provider) else { return Ok(false) };
        let key = keys.remove(pos);
        self.links.remove(&key);
        Ok(true)
    }

    async fn create_invite(&self, invite: Invite) -> Result<Invite, RepositoryError> {
        self.invites_by_token.insert(invite.hashed_token.clone(), invite.id);
        self.invites.insert(invite.id, invite.clone());
        Ok(invite)
    }

    async fn find_invite_by_hashed_token(&self, hashed_token: &str) -> Option<Invite> {
        let id = self.invites_by_token.get(hashed_token)?;
        self.invites.get(&*id).map(|i| i.clone())
    }

    async fn find_pending_invite_by_email(&self, normalized_email: &str) -> Option<Invite> {
        self.invites
            .iter()
            .find(|i| i.email.eq_ignore_ascii_case(normalized_email) && i.status == fabric_domain_models::InviteStatus::Pending)
            .map(|i| i.clone())
    }

    async fn update_invite(&self, invite: Invite) -> Result<Invite, RepositoryError> {
        let mut existing = self.invites.get_mut(&invite.id).ok_or(RepositoryError::NotFound)?;
        *existing = invite.clone();
        Ok(invite)
    }

    async fn create_reset_token(&self, token: PasswordResetToken) -> Result<PasswordResetToken, RepositoryError> {
        self.reset_tokens.insert(token.hashed_token.clone(), token.clone());
        Ok(token)
    }

    async fn find_reset_token(&self, hashed_token: &str) -> Option<PasswordResetToken> {
        self.reset_tokens.get(hashed_token).map(|t| t.clone())
    }

    async fn mark_reset_token_used(&self, hashed_token: &str) -> Result<(), RepositoryError> {
        let mut token = self.reset_tokens.get_mut(hashed_token).ok_or(RepositoryError::NotFound)?;
        token.used_at = Some(chrono::Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_user(username: &str, email: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            avatar_url: None,
            role: Role::Member,
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_username_case_insensitively() {
        let store = IdentityStore::new();
        store.create_user(sample_user("Alice", "alice@example.com")).await.unwrap();
        let result = store.create_user(sample_user("alice", "alice2@example.com")).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn find_by_email_is_case_insensitive() {
        let store = IdentityStore::new();
        store.create_user(sample_user("bob", "Bob@Example.com")).await.unwrap();
        assert!(store.find_user_by_email("bob@example.com").await.is_some());
    }

    #[tokio::test]
    async fn delete_user_cleans_up_links_and_indexes() {
        let store = IdentityStore::new();
        let user = store.create_user(sample_user("carol", "carol@example.com")).await.unwrap();
        store
            .create_link(ProviderLink { user_id: user.id, provider: "cloud".to_string(), external_user_id: "ext-1".to_string(), created_at: Utc::now() })
            .await
            .unwrap();

        store.delete_user(user.id).await.unwrap();
        assert!(store.find_user_by_username("carol").await.is_none());
        assert!(store.find_link("cloud", "ext-1").await.is_none());
    }
}
