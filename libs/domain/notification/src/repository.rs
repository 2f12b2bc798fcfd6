use std::collections::HashMap;

use async_trait::async_trait;
use fabric_domain_models::{
    NotificationRecord, ScheduledBroadcast, UserGlobalPreferences, UserNetworkPreferences,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not_found")]
    NotFound,
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn get_network_preferences(&self, user_id: Uuid, network_id: Uuid) -> Option<UserNetworkPreferences>;
    async fn save_network_preferences(&self, prefs: UserNetworkPreferences) -> Result<(), RepositoryError>;
    async fn get_global_preferences(&self, user_id: Uuid) -> Option<UserGlobalPreferences>;
    async fn save_global_preferences(&self, prefs: UserGlobalPreferences) -> Result<(), RepositoryError>;

    async fn record_delivery(&self, record: NotificationRecord) -> Result<(), RepositoryError>;

    async fn create_broadcast(&self, broadcast: ScheduledBroadcast) -> Result<ScheduledBroadcast, RepositoryError>;
    async fn update_broadcast(&self, broadcast: ScheduledBroadcast) -> Result<ScheduledBroadcast, RepositoryError>;
    async fn due_broadcasts(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<ScheduledBroadcast>;

    async fn is_silenced(&self, network_id: Uuid, device_ip: &str) -> bool;
    async fn silence_device(&self, network_id: Uuid, device_ip: &str);
    async fn unsilence_device(&self, network_id: Uuid, device_ip: &str);

    /// All users with the given global preference flag set, for global
    /// broadcasts that bypass network-member lookup.
    async fn users_with_global_flag(&self, flag: GlobalFlag) -> Vec<Uuid>;

    async fn email_for_user(&self, user_id: Uuid) -> Option<String>;

    /// Batch form of `email_for_user`, so a fan-out over many recipients
    /// costs one lookup instead of one per user.
    async fn emails_for_users(&self, user_ids: &[Uuid]) -> HashMap<Uuid, String>;

    /// Batch form of `get_network_preferences`, so a fan-out over many
    /// recipients costs one lookup instead of one per user.
    async fn network_preferences_for_users(&self, user_ids: &[Uuid], network_id: Uuid) -> HashMap<Uuid, UserNetworkPreferences>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalFlag {
    ServiceUp,
    ServiceDown,
}
