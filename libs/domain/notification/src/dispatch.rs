//! Notification dispatcher (C11), grounded on `notification_service/dispatcher.py`.
//!
//! Fans a single [`NotificationEvent`] out to every eligible recipient,
//! checking policy per-recipient and recording the outcome of each delivery
//! attempt via the channel adapters in `fabric-infra-delivery`. DEVICE_OFFLINE
//! events are first routed through the mass-outage aggregator (C10): a lone
//! offline device is buffered, and either collapses into one MASS_OUTAGE
//! notification once enough devices join it, or is flushed back out on its
//! own once the aggregation window expires.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fabric_domain_models::{NotificationEvent, NotificationRecord, NotificationType, UserNetworkPreferences};
use fabric_infra_delivery::{DeliveryChannel, DeliveryMessage};
use tracing::{info, warn};
use uuid::Uuid;

use crate::outage::MassOutageAggregator;
use crate::policy::DispatchPolicyEngine;
use crate::repository::{GlobalFlag, NotificationRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Abstracts "who belongs to this network" / "who to notify globally" —
/// kept separate from [`NotificationRepository`] since network membership
/// is owned by the identity plane, not the notification pipeline.
#[async_trait]
pub trait RecipientLookup: Send + Sync {
    async fn members_of_network(&self, network_id: Uuid) -> Vec<Uuid>;
    /// Every active user, used for scheduled broadcasts which carry no
    /// network scope.
    async fn all_active_users(&self) -> Vec<Uuid>;
    /// Every network id known to the system, used by the scheduler to sweep
    /// expired mass-outage aggregation windows.
    async fn all_network_ids(&self) -> Vec<Uuid>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchOutcome {
    pub delivered: u32,
    pub denied: u32,
    pub failed: u32,
}

impl DispatchOutcome {
    fn merge(&mut self, other: DispatchOutcome) {
        self.delivered += other.delivered;
        self.denied += other.denied;
        self.failed += other.failed;
    }
}

pub struct NotificationDispatcher {
    repository: Arc<dyn NotificationRepository>,
    recipients: Arc<dyn RecipientLookup>,
    outages: Arc<MassOutageAggregator>,
    policy: DispatchPolicyEngine,
    email: Arc<dyn DeliveryChannel>,
    chat_dm: Arc<dyn DeliveryChannel>,
    chat_channel: Arc<dyn DeliveryChannel>,
}

impl NotificationDispatcher {
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        recipients: Arc<dyn RecipientLookup>,
        outages: Arc<MassOutageAggregator>,
        email: Arc<dyn DeliveryChannel>,
        chat_dm: Arc<dyn DeliveryChannel>,
        chat_channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self { repository, recipients, outages, policy: DispatchPolicyEngine::new(), email, chat_dm, chat_channel }
    }

    /// Dispatches `event` to every member of `network_id`. DEVICE_OFFLINE
    /// events are buffered in the mass-outage aggregator first; everything
    /// else is fanned out immediately.
    pub async fn dispatch_to_network(&self, network_id: Uuid, event: &NotificationEvent) -> Result<DispatchOutcome, DispatchError> {
        if event.event_type == NotificationType::DeviceOffline {
            return self.route_offline_event(network_id, event).await;
        }
        self.fan_out_to_network(network_id, event).await
    }

    async fn route_offline_event(&self, network_id: Uuid, event: &NotificationEvent) -> Result<DispatchOutcome, DispatchError> {
        match self.outages.record_offline_event(network_id, event.clone()) {
            Some(mass_event) => self.fan_out_to_network(network_id, &mass_event).await,
            None => Ok(DispatchOutcome::default()),
        }
    }

    /// Flushes any of `network_id`'s aggregation windows that have expired
    /// without reaching the mass-outage threshold, dispatching the
    /// individual DEVICE_OFFLINE events that were buffered. Called on a
    /// schedule, not inline with `dispatch_to_network`.
    pub async fn dispatch_expired_offline_events(&self, network_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
        let mut outcome = DispatchOutcome::default();
        for event in self.outages.get_expired_events(network_id, Utc::now()) {
            outcome.merge(self.fan_out_to_network(network_id, &event).await?);
        }
        Ok(outcome)
    }

    pub async fn dispatch_globally(&self, flag: GlobalFlag, event: &NotificationEvent) -> Result<DispatchOutcome, DispatchError> {
        let mut outcome = DispatchOutcome::default();
        for user_id in self.repository.users_with_global_flag(flag).await {
            outcome.merge(self.dispatch_to_user_globally(user_id, event).await?);
        }
        Ok(outcome)
    }

    /// Dispatches a scheduled broadcast's synthetic event to every active
    /// user, regardless of their global service-up/down flags.
    pub async fn dispatch_broadcast(&self, event: &NotificationEvent) -> Result<DispatchOutcome, DispatchError> {
        let mut outcome = DispatchOutcome::default();
        for user_id in self.recipients.all_active_users().await {
            outcome.merge(self.dispatch_to_user_globally(user_id, event).await?);
        }
        Ok(outcome)
    }

    /// Resolves the network's members, then batch-fetches their emails and
    /// preferences in two queries (rather than one query per member) before
    /// delivering to each.
    async fn fan_out_to_network(&self, network_id: Uuid, event: &NotificationEvent) -> Result<DispatchOutcome, DispatchError> {
        let user_ids = self.recipients.members_of_network(network_id).await;
        let emails = self.repository.emails_for_users(&user_ids).await;
        let prefs_by_user = self.repository.network_preferences_for_users(&user_ids, network_id).await;

        let mut outcome = DispatchOutcome::default();
        for user_id in user_ids {
            let email = emails.get(&user_id).cloned();
            let prefs = prefs_by_user.get(&user_id).cloned();
            outcome.merge(self.dispatch_to_user_in_network(user_id, network_id, event, prefs, email).await?);
        }
        Ok(outcome)
    }

    async fn dispatch_to_user_globally(&self, user_id: Uuid, event: &NotificationEvent) -> Result<DispatchOutcome, DispatchError> {
        let prefs = self.repository.get_global_preferences(user_id).await.unwrap_or_else(|| default_global_preferences(user_id));

        match self.policy.should_deliver_global(user_id, &prefs.quiet_hours, event.priority, 20) {
            Ok(()) => Ok(self.deliver_global(user_id, event, &prefs).await),
            Err(reason) => {
                info!(%user_id, ?reason, "global notification suppressed by policy");
                Ok(DispatchOutcome { denied: 1, ..Default::default() })
            }
        }
    }

    async fn dispatch_to_user_in_network(
        &self,
        user_id: Uuid,
        network_id: Uuid,
        event: &NotificationEvent,
        prefetched_prefs: Option<UserNetworkPreferences>,
        email: Option<String>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut prefs = prefetched_prefs.unwrap_or_else(|| default_network_preferences(user_id, network_id));

        if DispatchPolicyEngine::migrate_if_needed(&mut prefs) {
            self.repository.save_network_preferences(prefs.clone()).await?;
        }

        match self.policy.should_deliver(user_id, &prefs, event) {
            Ok(()) => Ok(self.deliver_to_recipient(user_id, event, &prefs, email).await),
            Err(reason) => {
                info!(%user_id, %network_id, ?reason, "notification suppressed by policy");
                Ok(DispatchOutcome { denied: 1, ..Default::default() })
            }
        }
    }

    /// One `notification_id` is generated here and reused across every
    /// channel this recipient has enabled, so the delivery records for a
    /// single event/user pair can be correlated.
    async fn deliver_to_recipient(
        &self,
        user_id: Uuid,
        event: &NotificationEvent,
        prefs: &UserNetworkPreferences,
        email: Option<String>,
    ) -> DispatchOutcome {
        let notification_id = Uuid::new_v4();
        let mut outcome = DispatchOutcome::default();

        if prefs.email_enabled {
            outcome.merge(self.send_and_record(notification_id, user_id, event, &*self.email, email.clone()).await);
        }
        if prefs.chat_dm_enabled {
            outcome.merge(self.send_and_record(notification_id, user_id, event, &*self.chat_dm, prefs.chat_user_id.clone()).await);
        }
        if prefs.chat_channel_enabled {
            outcome.merge(self.send_and_record(notification_id, user_id, event, &*self.chat_channel, prefs.chat_user_id.clone()).await);
        }
        outcome
    }

    /// Global preferences carry no chat identifier (unlike per-network
    /// preferences), so global delivery is email-only.
    async fn deliver_global(
        &self,
        user_id: Uuid,
        event: &NotificationEvent,
        prefs: &fabric_domain_models::UserGlobalPreferences,
    ) -> DispatchOutcome {
        if !prefs.email_enabled {
            return DispatchOutcome::default();
        }
        let recipient = self.repository.email_for_user(user_id).await;
        let notification_id = Uuid::new_v4();
        self.send_and_record(notification_id, user_id, event, &*self.email, recipient).await
    }

    async fn send_and_record(
        &self,
        notification_id: Uuid,
        user_id: Uuid,
        event: &NotificationEvent,
        channel: &dyn DeliveryChannel,
        recipient: Option<String>,
    ) -> DispatchOutcome {
        let Some(recipient) = recipient else {
            warn!(%user_id, channel = channel.name(), "no recipient configured, skipping channel");
            return DispatchOutcome { failed: 1, ..Default::default() };
        };

        let message = DeliveryMessage { recipient: &recipient, title: &event.title, body: &event.message };
        let result = channel.send(message).await;

        let (success, error) = match &result {
            Ok(()) => (true, None),
            Err(err) => (false, Some(err.to_string())),
        };

        let record = NotificationRecord {
            id: Uuid::new_v4(),
            notification_id,
            event_id: event.event_id,
            user_id,
            channel: channel.name().to_string(),
            success,
            error,
            dispatched_at: Utc::now(),
        };
        if let Err(err) = self.repository.record_delivery(record).await {
            warn!(%user_id, %err, "failed to persist delivery record");
        }

        if success {
            DispatchOutcome { delivered: 1, ..Default::default() }
        } else {
            DispatchOutcome { failed: 1, ..Default::default() }
        }
    }
}

fn default_global_preferences(user_id: Uuid) -> fabric_domain_models::UserGlobalPreferences {
    fabric_domain_models::UserGlobalPreferences {
        user_id,
        email_enabled: true,
        chat_dm_enabled: false,
        service_up_enabled: true,
        service_down_enabled: true,
        quiet_hours: fabric_domain_models::QuietHours::default(),
    }
}

fn default_network_preferences(user_id: Uuid, network_id: Uuid) -> UserNetworkPreferences {
    use fabric_domain_models::{NotificationPriority, NotificationType as NType, QuietHours};
    use std::collections::HashSet;

    UserNetworkPreferences {
        user_id,
        network_id,
        email_enabled: true,
        chat_dm_enabled: false,
        chat_channel_enabled: false,
        chat_user_id: None,
        enabled_types: HashSet::from([
            NType::DeviceOffline,
            NType::DeviceDegraded,
            NType::MassOutage,
            NType::AnomalyDetected,
            NType::IspIssue,
            NType::SecurityAlert,
            NType::DeviceAdded,
            NType::DeviceRemoved,
        ]),
        type_priorities: Default::default(),
        minimum_priority: NotificationPriority::Low,
        quiet_hours: QuietHours::default(),
        max_notifications_per_hour: 20,
        migrated_device_events: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_domain_models::NotificationPriority;
    use std::sync::Mutex;

    struct StubRepository {
        network_prefs: Mutex<HashMap<(Uuid, Uuid), UserNetworkPreferences>>,
        emails: Mutex<HashMap<Uuid, String>>,
        records: Mutex<Vec<NotificationRecord>>,
        network_pref_batch_calls: Mutex<u32>,
        email_batch_calls: Mutex<u32>,
    }

    impl StubRepository {
        fn new() -> Self {
            Self {
                network_prefs: Mutex::new(HashMap::new()),
                emails: Mutex::new(HashMap::new()),
                records: Mutex::new(Vec::new()),
                network_pref_batch_calls: Mutex::new(0),
                email_batch_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationRepository for StubRepository {
        async fn get_network_preferences(&self, user_id: Uuid, network_id: Uuid) -> Option<UserNetworkPreferences> {
            self.network_prefs.lock().unwrap().get(&(user_id, network_id)).cloned()
        }
        async fn save_network_preferences(&self, prefs: UserNetworkPreferences) -> Result<(), RepositoryError> {
            self.network_prefs.lock().unwrap().insert((prefs.user_id, prefs.network_id), prefs);
            Ok(())
        }
        async fn get_global_preferences(&self, _user_id: Uuid) -> Option<fabric_domain_models::UserGlobalPreferences> {
            None
        }
        async fn save_global_preferences(&self, _prefs: fabric_domain_models::UserGlobalPreferences) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn record_delivery(&self, record: NotificationRecord) -> Result<(), RepositoryError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
        async fn create_broadcast(
            &self,
            broadcast: fabric_domain_models::ScheduledBroadcast,
        ) -> Result<fabric_domain_models::ScheduledBroadcast, RepositoryError> {
            Ok(broadcast)
        }
        async fn update_broadcast(
            &self,
            broadcast: fabric_domain_models::ScheduledBroadcast,
        ) -> Result<fabric_domain_models::ScheduledBroadcast, RepositoryError> {
            Ok(broadcast)
        }
        async fn due_broadcasts(&self, _now: chrono::DateTime<Utc>) -> Vec<fabric_domain_models::ScheduledBroadcast> {
            Vec::new()
        }
        async fn is_silenced(&self, _network_id: Uuid, _device_ip: &str) -> bool {
            false
        }
        async fn silence_device(&self, _network_id: Uuid, _device_ip: &str) {}
        async fn unsilence_device(&self, _network_id: Uuid, _device_ip: &str) {}
        async fn users_with_global_flag(&self, _flag: GlobalFlag) -> Vec<Uuid> {
            Vec::new()
        }
        async fn email_for_user(&self, user_id: Uuid) -> Option<String> {
            self.emails.lock().unwrap().get(&user_id).cloned()
        }
        async fn emails_for_users(&self, user_ids: &[Uuid]) -> HashMap<Uuid, String> {
            *self.email_batch_calls.lock().unwrap() += 1;
            let emails = self.emails.lock().unwrap();
            user_ids.iter().filter_map(|id| emails.get(id).map(|e| (*id, e.clone()))).collect()
        }
        async fn network_preferences_for_users(&self, user_ids: &[Uuid], network_id: Uuid) -> HashMap<Uuid, UserNetworkPreferences> {
            *self.network_pref_batch_calls.lock().unwrap() += 1;
            let prefs = self.network_prefs.lock().unwrap();
            user_ids.iter().filter_map(|id| prefs.get(&(*id, network_id)).map(|p| (*id, p.clone()))).collect()
        }
    }

    struct StubRecipients {
        members: Vec<Uuid>,
    }

    #[async_trait]
    impl RecipientLookup for StubRecipients {
        async fn members_of_network(&self, _network_id: Uuid) -> Vec<Uuid> {
            self.members.clone()
        }
        async fn all_active_users(&self) -> Vec<Uuid> {
            self.members.clone()
        }
        async fn all_network_ids(&self) -> Vec<Uuid> {
            Vec::new()
        }
    }

    struct RecordingChannel {
        name: &'static str,
    }

    #[async_trait]
    impl DeliveryChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn send(&self, _message: DeliveryMessage<'_>) -> Result<(), fabric_infra_delivery::DeliveryError> {
            Ok(())
        }
    }

    fn sample_event() -> NotificationEvent {
        NotificationEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: NotificationType::DeviceDegraded,
            priority: NotificationPriority::Medium,
            network_id: None,
            device_ip: None,
            device_name: None,
            device_hostname: None,
            previous_state: None,
            current_state: None,
            title: "Device degraded".to_string(),
            message: "latency is elevated".to_string(),
            details: HashMap::new(),
            anomaly_score: None,
            model_version: None,
            is_predicted_anomaly: None,
        }
    }

    #[tokio::test]
    async fn fan_out_uses_one_batched_call_per_lookup() {
        let user_id = Uuid::new_v4();
        let network_id = Uuid::new_v4();
        let repository = Arc::new(StubRepository::new());
        repository.emails.lock().unwrap().insert(user_id, "user@example.com".to_string());
        repository.network_prefs.lock().unwrap().insert((user_id, network_id), default_network_preferences(user_id, network_id));

        let dispatcher = NotificationDispatcher::new(
            repository.clone(),
            Arc::new(StubRecipients { members: vec![user_id] }),
            Arc::new(MassOutageAggregator::new()),
            Arc::new(RecordingChannel { name: "email" }),
            Arc::new(RecordingChannel { name: "chat_dm" }),
            Arc::new(RecordingChannel { name: "chat_channel" }),
        );

        let outcome = dispatcher.dispatch_to_network(network_id, &sample_event()).await.unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(*repository.email_batch_calls.lock().unwrap(), 1);
        assert_eq!(*repository.network_pref_batch_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn shared_notification_id_spans_every_enabled_channel() {
        let user_id = Uuid::new_v4();
        let network_id = Uuid::new_v4();
        let repository = Arc::new(StubRepository::new());
        repository.emails.lock().unwrap().insert(user_id, "user@example.com".to_string());
        let mut prefs = default_network_preferences(user_id, network_id);
        prefs.chat_dm_enabled = true;
        prefs.chat_user_id = Some("chat-user".to_string());
        repository.network_prefs.lock().unwrap().insert((user_id, network_id), prefs);

        let dispatcher = NotificationDispatcher::new(
            repository.clone(),
            Arc::new(StubRecipients { members: vec![user_id] }),
            Arc::new(MassOutageAggregator::new()),
            Arc::new(RecordingChannel { name: "email" }),
            Arc::new(RecordingChannel { name: "chat_dm" }),
            Arc::new(RecordingChannel { name: "chat_channel" }),
        );

        dispatcher.dispatch_to_network(network_id, &sample_event()).await.unwrap();
        let records = repository.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].notification_id, records[1].notification_id);
    }

    #[tokio::test]
    async fn offline_event_is_buffered_until_mass_outage_threshold() {
        let network_id = Uuid::new_v4();
        let repository = Arc::new(StubRepository::new());
        let dispatcher = NotificationDispatcher::new(
            repository.clone(),
            Arc::new(StubRecipients { members: vec![] }),
            Arc::new(MassOutageAggregator::new()),
            Arc::new(RecordingChannel { name: "email" }),
            Arc::new(RecordingChannel { name: "chat_dm" }),
            Arc::new(RecordingChannel { name: "chat_channel" }),
        );

        let mut offline_event = sample_event();
        offline_event.event_type = NotificationType::DeviceOffline;
        offline_event.device_ip = Some("10.0.0.1".to_string());

        let outcome = dispatcher.dispatch_to_network(network_id, &offline_event).await.unwrap();
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.denied, 0);
        assert_eq!(outcome.failed, 0);
    }
}
