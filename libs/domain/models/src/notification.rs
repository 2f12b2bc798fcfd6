use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use typeshare::typeshare;
use uuid::Uuid;

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DeviceOffline,
    DeviceOnline,
    DeviceDegraded,
    HighLatency,
    PacketLoss,
    AnomalyDetected,
    MassOutage,
    MassRecovery,
    DeviceAdded,
    DeviceRemoved,
    IspIssue,
    SecurityAlert,
    ScheduledMaintenance,
    SystemStatus,
    CartographerUp,
    CartographerDown,
}

impl NotificationType {
    /// Static default-priority-for-type table from spec §4.8.
    pub fn default_priority(self) -> NotificationPriority {
        use NotificationPriority::*;
        use NotificationType::*;
        match self {
            DeviceOffline => Medium,
            DeviceOnline => Low,
            DeviceDegraded => Medium,
            HighLatency => Medium,
            PacketLoss => Medium,
            AnomalyDetected => High,
            MassOutage => High,
            MassRecovery => Medium,
            DeviceAdded => Low,
            DeviceRemoved => Low,
            IspIssue => High,
            SecurityAlert => Critical,
            ScheduledMaintenance => Medium,
            SystemStatus => Medium,
            CartographerUp => Medium,
            CartographerDown => Critical,
        }
    }
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: NotificationType,
    pub priority: NotificationPriority,
    pub network_id: Option<Uuid>,
    pub device_ip: Option<String>,
    pub device_name: Option<String>,
    pub device_hostname: Option<String>,
    pub previous_state: Option<String>,
    pub current_state: Option<String>,
    pub title: String,
    pub message: String,
    pub details: HashMap<String, serde_json::Value>,
    pub anomaly_score: Option<f64>,
    pub model_version: Option<String>,
    pub is_predicted_anomaly: Option<bool>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
    pub dispatched_at: DateTime<Utc>,
}

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBroadcast {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub event_type: NotificationType,
    pub priority: NotificationPriority,
    pub scheduled_at: DateTime<Utc>,
    pub creator_id: Uuid,
    pub status: BroadcastStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub users_notified: u32,
    pub error: Option<String>,
}

impl ScheduledBroadcast {
    pub fn is_editable(&self) -> bool {
        self.status == BroadcastStatus::Pending
    }

    pub fn is_deletable(&self) -> bool {
        self.status != BroadcastStatus::Pending
    }
}
