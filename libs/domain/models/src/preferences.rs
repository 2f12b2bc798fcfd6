use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::notification::{NotificationPriority, NotificationType};

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    /// `HH:MM`, 24-hour.
    pub start: String,
    pub end: String,
    pub timezone: String,
    pub bypass_priority: Option<NotificationPriority>,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "22:00".to_string(),
            end: "07:00".to_string(),
            timezone: "UTC".to_string(),
            bypass_priority: None,
        }
    }
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNetworkPreferences {
    pub user_id: uuid::Uuid,
    pub network_id: uuid::Uuid,
    pub email_enabled: bool,
    pub chat_dm_enabled: bool,
    pub chat_channel_enabled: bool,
    pub chat_user_id: Option<String>,
    pub enabled_types: HashSet<NotificationType>,
    pub type_priorities: HashMap<NotificationType, NotificationPriority>,
    pub minimum_priority: NotificationPriority,
    pub quiet_hours: QuietHours,
    pub max_notifications_per_hour: u32,
    /// One-time migration marker: once true, DEVICE_ADDED/DEVICE_REMOVED
    /// have already been appended to `enabled_types` for this row.
    pub migrated_device_events: bool,
}

impl UserNetworkPreferences {
    pub fn any_channel_enabled(&self) -> bool {
        self.email_enabled || self.chat_dm_enabled || self.chat_channel_enabled
    }
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGlobalPreferences {
    pub user_id: uuid::Uuid,
    pub email_enabled: bool,
    pub chat_dm_enabled: bool,
    pub service_up_enabled: bool,
    pub service_down_enabled: bool,
    pub quiet_hours: QuietHours,
}
