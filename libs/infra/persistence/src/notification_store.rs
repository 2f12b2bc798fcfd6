//! In-memory `NotificationRepository` + `RecipientLookup`, bridging the
//! notification pipeline to the identity plane's user records and the
//! network catalog's membership data.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fabric_domain_identity::IdentityRepository;
use fabric_domain_models::{NotificationRecord, ScheduledBroadcast, UserGlobalPreferences, UserNetworkPreferences};
use fabric_domain_notification::dispatch::RecipientLookup;
use fabric_domain_notification::repository::{GlobalFlag, NotificationRepository, RepositoryError};
use uuid::Uuid;

use crate::identity_store::IdentityStore;
use crate::network_store::NetworkStore;

pub struct NotificationStore {
    identity: Arc<IdentityStore>,
    networks: Arc<NetworkStore>,
    network_prefs: DashMap<(Uuid, Uuid), UserNetworkPreferences>,
    global_prefs: DashMap<Uuid, UserGlobalPreferences>,
    records: Mutex<Vec<NotificationRecord>>,
    broadcasts: DashMap<Uuid, ScheduledBroadcast>,
    silenced: DashMap<(Uuid, String), ()>,
}

impl NotificationStore {
    pub fn new(identity: Arc<IdentityStore>, networks: Arc<NetworkStore>) -> Self {
        Self {
            identity,
            networks,
            network_prefs: DashMap::new(),
            global_prefs: DashMap::new(),
            records: Mutex::new(Vec::new()),
            broadcasts: DashMap::new(),
            silenced: DashMap::new(),
        }
    }

    pub fn delivery_records(&self) -> Vec<NotificationRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Every broadcast ever scheduled, newest first, for the OWNER-scoped
    /// broadcast listing.
    pub fn list_broadcasts(&self) -> Vec<ScheduledBroadcast> {
        let mut broadcasts: Vec<ScheduledBroadcast> = self.broadcasts.iter().map(|b| b.clone()).collect();
        broadcasts.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        broadcasts
    }

    pub fn find_broadcast(&self, id: Uuid) -> Option<ScheduledBroadcast> {
        self.broadcasts.get(&id).map(|b| b.clone())
    }

    /// Every device IP silenced for a given network.
    pub fn list_silenced_devices(&self, network_id: Uuid) -> Vec<String> {
        self.silenced.iter().filter(|entry| entry.key().0 == network_id).map(|entry| entry.key().1.clone()).collect()
    }

    /// Only `ScheduledBroadcast::is_deletable` rows should ever reach this;
    /// callers enforce that before calling it.
    pub fn delete_broadcast(&self, id: Uuid) -> bool {
        self.broadcasts.remove(&id).is_some()
    }
}

#[async_trait]
impl NotificationRepository for NotificationStore {
    async fn get_network_preferences(&self, user_id: Uuid, network_id: Uuid) -> Option<UserNetworkPreferences> {
        self.network_prefs.get(&(user_id, network_id)).map(|p| p.clone())
    }

    async fn save_network_preferences(&self, prefs: UserNetworkPreferences) -> Result<(), RepositoryError> {
        self.network_prefs.insert((prefs.user_id, prefs.network_id), prefs);
        Ok(())
    }

    async fn get_global_preferences(&self, user_id: Uuid) -> Option<UserGlobalPreferences> {
        self.global_prefs.get(&user_id).map(|p| p.clone())
    }

    async fn save_global_preferences(&self, prefs: UserGlobalPreferences) -> Result<(), RepositoryError> {
        self.global_prefs.insert(prefs.user_id, prefs);
        Ok(())
    }

    async fn record_delivery(&self, record: NotificationRecord) -> Result<(), RepositoryError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn create_broadcast(&self, broadcast: ScheduledBroadcast) -> Result<ScheduledBroadcast, RepositoryError> {
        self.broadcasts.insert(broadcast.id, broadcast.clone());
        Ok(broadcast)
    }

    async fn update_broadcast(&self, broadcast: ScheduledBroadcast) -> Result<ScheduledBroadcast, RepositoryError> {
        let mut existing = self.broadcasts.get_mut(&broadcast.id).ok_or(RepositoryError::NotFound)?;
        *existing = broadcast.clone();
        Ok(broadcast)
    }

    async fn due_broadcasts(&self, now: DateTime<Utc>) -> Vec<ScheduledBroadcast> {
        self.broadcasts
            .iter()
            .filter(|b| b.status == fabric_domain_models::BroadcastStatus::Pending && b.scheduled_at <= now)
            .map(|b| b.clone())
            .collect()
    }

    async fn is_silenced(&self, network_id: Uuid, device_ip: &str) -> bool {
        self.silenced.contains_key(&(network_id, device_ip.to_string()))
    }

    async fn silence_device(&self, network_id: Uuid, device_ip: &str) {
        self.silenced.insert((network_id, device_ip.to_string()), ());
    }

    async fn unsilence_device(&self, network_id: Uuid, device_ip: &str) {
        self.silenced.remove(&(network_id, device_ip.to_string()));
    }

    async fn users_with_global_flag(&self, flag: GlobalFlag) -> Vec<Uuid> {
        self.global_prefs
            .iter()
            .filter(|entry| match flag {
                GlobalFlag::ServiceUp => entry.service_up_enabled,
                GlobalFlag::ServiceDown => entry.service_down_enabled,
            })
            .map(|entry| *entry.key())
            .collect()
    }

    async fn email_for_user(&self, user_id: Uuid) -> Option<String> {
        self.identity.find_user_by_id(user_id).await.map(|u| u.email)
    }

    async fn emails_for_users(&self, user_ids: &[Uuid]) -> std::collections::HashMap<Uuid, String> {
        let mut emails = std::collections::HashMap::with_capacity(user_ids.len());
        for &user_id in user_ids {
            if let Some(user) = self.identity.find_user_by_id(user_id).await {
                emails.insert(user_id, user.email);
            }
        }
        emails
    }

    async fn network_preferences_for_users(
        &self,
        user_ids: &[Uuid],
        network_id: Uuid,
    ) -> std::collections::HashMap<Uuid, UserNetworkPreferences> {
        user_ids
            .iter()
            .filter_map(|&user_id| self.network_prefs.get(&(user_id, network_id)).map(|p| (user_id, p.clone())))
            .collect()
    }
}

#[async_trait]
impl RecipientLookup for NotificationStore {
    async fn members_of_network(&self, network_id: Uuid) -> Vec<Uuid> {
        self.networks.members_of(network_id)
    }

    async fn all_active_users(&self) -> Vec<Uuid> {
        self.networks.all_known_users()
    }

    async fn all_network_ids(&self) -> Vec<Uuid> {
        self.networks.all_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_domain_models::{BroadcastStatus, NotificationPriority, NotificationType};

    fn sample_broadcast(scheduled_at: DateTime<Utc>) -> ScheduledBroadcast {
        ScheduledBroadcast {
            id: Uuid::new_v4(),
            title: "Maintenance".to_string(),
            message: "window tonight".to_string(),
            event_type: NotificationType::ScheduledMaintenance,
            priority: NotificationPriority::Medium,
            scheduled_at,
            creator_id: Uuid::new_v4(),
            status: BroadcastStatus::Pending,
            sent_at: None,
            users_notified: 0,
            error: None,
        }
    }

    #[tokio::test]
    async fn due_broadcasts_only_returns_pending_past_due() {
        let store = NotificationStore::new(Arc::new(IdentityStore::new()), Arc::new(NetworkStore::new()));
        let now = Utc::now();
        let due = store.create_broadcast(sample_broadcast(now - chrono::Duration::minutes(5))).await.unwrap();
        store.create_broadcast(sample_broadcast(now + chrono::Duration::hours(1))).await.unwrap();

        let results = store.due_broadcasts(now).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, due.id);
    }

    #[tokio::test]
    async fn silencing_is_per_network_device() {
        let store = NotificationStore::new(Arc::new(IdentityStore::new()), Arc::new(NetworkStore::new()));
        let network_id = Uuid::new_v4();
        store.silence_device(network_id, "10.0.0.5").await;
        assert!(store.is_silenced(network_id, "10.0.0.5").await);
        assert!(!store.is_silenced(network_id, "10.0.0.6").await);
        store.unsilence_device(network_id, "10.0.0.5").await;
        assert!(!store.is_silenced(network_id, "10.0.0.5").await);
    }
}
