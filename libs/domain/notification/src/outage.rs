//! Mass-outage aggregator (C10), grounded on `network_monitor/mass_outage_detector.py`.
//!
//! Individual device-offline events within a short window of each other on
//! the same network are collapsed into a single MASS_OUTAGE notification
//! instead of flooding recipients with one message per device.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fabric_domain_models::{NotificationEvent, NotificationPriority, NotificationType};
use uuid::Uuid;

const AGGREGATION_WINDOW_SECONDS: i64 = 60;
const MIN_DEVICES_FOR_MASS_OUTAGE: usize = 3;
pub const CLEANUP_INTERVAL_SECONDS: i64 = 30;

#[derive(Debug, Clone, Default)]
struct PendingOutage {
    devices: HashMap<String, NotificationEvent>,
}

#[derive(Default)]
pub struct MassOutageAggregator {
    pending: Mutex<HashMap<Uuid, PendingOutage>>,
    /// Per-network rate limit for `get_expired_events`, kept independent of
    /// `pending`'s entry lifecycle so it survives a window being emptied or
    /// flushed (mirrors the originating buffer's own persistence).
    last_cleanup: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl MassOutageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a DEVICE_OFFLINE event for `network_id`/`device_ip`. A device
    /// already pending is left untouched (no-op, matching the source
    /// detector's dedup rule). Returns `Some` with a synthesized MASS_OUTAGE
    /// event the instant the window's device count crosses the threshold,
    /// and clears the window so a single outage is only ever flushed once.
    pub fn record_offline_event(&self, network_id: Uuid, event: NotificationEvent) -> Option<NotificationEvent> {
        let device_ip = event.device_ip.clone().unwrap_or_default();
        let mut pending = self.pending.lock().unwrap();
        let window = pending.entry(network_id).or_default();

        if window.devices.contains_key(&device_ip) {
            return None;
        }
        window.devices.insert(device_ip, event);

        if window.devices.len() >= MIN_DEVICES_FOR_MASS_OUTAGE {
            let window = pending.remove(&network_id).unwrap();
            return Some(Self::build_mass_outage_event(network_id, &window.devices));
        }
        None
    }

    /// A device recovering before the window flushes is pulled out of the
    /// pending set so it isn't double-counted in a later mass-outage flush.
    pub fn remove_device(&self, network_id: Uuid, device_ip: &str) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(window) = pending.get_mut(&network_id) {
            window.devices.remove(device_ip);
            if window.devices.is_empty() {
                pending.remove(&network_id);
            }
        }
    }

    /// Whether `network_id` currently has enough pending offline devices to
    /// be treated as a mass outage.
    pub fn should_aggregate(&self, network_id: Uuid) -> bool {
        self.pending.lock().unwrap().get(&network_id).is_some_and(|w| w.devices.len() >= MIN_DEVICES_FOR_MASS_OUTAGE)
    }

    /// Unconditionally flushes whatever is pending for `network_id` into a
    /// MASS_OUTAGE event, regardless of whether the threshold was reached.
    /// Returns `None` if nothing is pending.
    pub fn flush_and_create_mass_outage_event(&self, network_id: Uuid) -> Option<NotificationEvent> {
        let mut pending = self.pending.lock().unwrap();
        let window = pending.remove(&network_id)?;
        if window.devices.is_empty() {
            return None;
        }
        Some(Self::build_mass_outage_event(network_id, &window.devices))
    }

    /// Drains devices whose offline event is older than the aggregation
    /// window for `network_id`, returning their original DEVICE_OFFLINE
    /// events so the caller can dispatch them individually. Rate-limited to
    /// once per `CLEANUP_INTERVAL_SECONDS` per network; calls inside that
    /// window return an empty list without touching `pending`.
    pub fn get_expired_events(&self, network_id: Uuid, now: DateTime<Utc>) -> Vec<NotificationEvent> {
        {
            let mut last_cleanup = self.last_cleanup.lock().unwrap();
            let due = match last_cleanup.get(&network_id) {
                Some(last) => (now - *last).num_seconds() >= CLEANUP_INTERVAL_SECONDS,
                None => true,
            };
            if !due {
                return Vec::new();
            }
            last_cleanup.insert(network_id, now);
        }

        let cutoff = now - ChronoDuration::seconds(AGGREGATION_WINDOW_SECONDS);
        let mut pending = self.pending.lock().unwrap();
        let Some(window) = pending.get_mut(&network_id) else {
            return Vec::new();
        };

        let expired_ips: Vec<String> =
            window.devices.iter().filter(|(_, event)| event.timestamp < cutoff).map(|(ip, _)| ip.clone()).collect();
        let expired: Vec<NotificationEvent> = expired_ips.iter().filter_map(|ip| window.devices.remove(ip)).collect();

        if window.devices.is_empty() {
            pending.remove(&network_id);
        }
        expired
    }

    pub fn get_all_pending_events(&self) -> Vec<(Uuid, usize)> {
        self.pending.lock().unwrap().iter().map(|(id, w)| (*id, w.devices.len())).collect()
    }

    /// Removes and returns every still-pending window, called on graceful
    /// shutdown so in-flight aggregation state isn't silently lost.
    pub fn flush_all_pending_events(&self) -> Vec<Uuid> {
        let mut pending = self.pending.lock().unwrap();
        let ids: Vec<Uuid> = pending.keys().copied().collect();
        pending.clear();
        ids
    }

    fn build_mass_outage_event(network_id: Uuid, devices: &HashMap<String, NotificationEvent>) -> NotificationEvent {
        let mut sorted: Vec<&NotificationEvent> = devices.values().collect();
        sorted.sort_by_key(|e| e.timestamp);

        let total_affected = sorted.len();
        let first_detected = sorted.first().map(|e| e.timestamp);
        let last_detected = sorted.last().map(|e| e.timestamp);

        let affected_devices: Vec<serde_json::Value> = sorted
            .iter()
            .map(|e| {
                let ip = e.device_ip.clone().unwrap_or_default();
                let name = e.device_name.clone().unwrap_or_else(|| ip.clone());
                serde_json::json!({ "ip": ip, "name": name, "timestamp": e.timestamp })
            })
            .collect();

        let preview: Vec<String> = sorted
            .iter()
            .take(5)
            .map(|e| e.device_name.clone().unwrap_or_else(|| e.device_ip.clone().unwrap_or_default()))
            .collect();
        let more = total_affected.saturating_sub(preview.len());
        let device_list = if more > 0 { format!("{} and {more} more", preview.join(", ")) } else { preview.join(", ") };

        let mut details = HashMap::new();
        details.insert("affected_devices".to_string(), serde_json::Value::Array(affected_devices));
        details.insert("total_affected".to_string(), serde_json::Value::from(total_affected));
        if let Some(first) = first_detected {
            details.insert("first_detected".to_string(), serde_json::Value::from(first.to_rfc3339()));
        }
        if let Some(last) = last_detected {
            details.insert("last_detected".to_string(), serde_json::Value::from(last.to_rfc3339()));
        }
        details.insert("detection_window_seconds".to_string(), serde_json::Value::from(AGGREGATION_WINDOW_SECONDS));

        NotificationEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: NotificationType::MassOutage,
            priority: NotificationPriority::High,
            network_id: Some(network_id),
            device_ip: None,
            device_name: None,
            device_hostname: None,
            previous_state: None,
            current_state: None,
            title: "Mass Device Outage Detected".to_string(),
            message: format!("{total_affected} devices went offline within {AGGREGATION_WINDOW_SECONDS}s: {device_list}"),
            details,
            anomaly_score: None,
            model_version: None,
            is_predicted_anomaly: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_event_at(network_id: Uuid, device_ip: &str, timestamp: DateTime<Utc>) -> NotificationEvent {
        NotificationEvent {
            event_id: Uuid::new_v4(),
            timestamp,
            event_type: NotificationType::DeviceOffline,
            priority: NotificationPriority::Medium,
            network_id: Some(network_id),
            device_ip: Some(device_ip.to_string()),
            device_name: Some(device_ip.to_string()),
            device_hostname: None,
            previous_state: Some("online".to_string()),
            current_state: Some("offline".to_string()),
            title: "Device offline".to_string(),
            message: "went offline".to_string(),
            details: HashMap::new(),
            anomaly_score: None,
            model_version: None,
            is_predicted_anomaly: None,
        }
    }

    fn offline_event(network_id: Uuid, device_ip: &str) -> NotificationEvent {
        offline_event_at(network_id, device_ip, Utc::now())
    }

    #[test]
    fn flushes_on_threshold_with_full_field_set() {
        let aggregator = MassOutageAggregator::new();
        let network_id = Uuid::new_v4();
        assert!(aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.1")).is_none());
        assert!(aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.2")).is_none());
        let flushed = aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.3")).unwrap();

        assert_eq!(flushed.event_type, NotificationType::MassOutage);
        assert_eq!(flushed.details["total_affected"], serde_json::json!(3));
        assert!(flushed.details.contains_key("affected_devices"));
        assert!(flushed.details.contains_key("first_detected"));
        assert!(flushed.details.contains_key("last_detected"));
        assert_eq!(flushed.details["detection_window_seconds"], serde_json::json!(60));
        assert_eq!(flushed.details["affected_devices"].as_array().unwrap().len(), 3);
        assert!(!aggregator.should_aggregate(network_id));
    }

    #[test]
    fn should_aggregate_requires_min_devices() {
        let aggregator = MassOutageAggregator::new();
        let network_id = Uuid::new_v4();
        assert!(!aggregator.should_aggregate(network_id));
        aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.1"));
        aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.2"));
        assert!(!aggregator.should_aggregate(network_id));
    }

    #[test]
    fn duplicate_device_record_is_a_no_op() {
        let aggregator = MassOutageAggregator::new();
        let network_id = Uuid::new_v4();
        aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.1"));
        aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.1"));
        assert_eq!(aggregator.get_all_pending_events(), vec![(network_id, 1)]);
    }

    #[test]
    fn remove_device_clears_empty_window() {
        let aggregator = MassOutageAggregator::new();
        let network_id = Uuid::new_v4();
        aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.1"));
        aggregator.remove_device(network_id, "10.0.0.1");
        assert!(!aggregator.should_aggregate(network_id));
        assert!(aggregator.get_all_pending_events().is_empty());
    }

    #[test]
    fn force_flush_below_threshold_still_flushes_unconditionally() {
        let aggregator = MassOutageAggregator::new();
        let network_id = Uuid::new_v4();
        aggregator.record_offline_event(network_id, offline_event(network_id, "10.0.0.1"));
        let flushed = aggregator.flush_and_create_mass_outage_event(network_id).unwrap();
        assert_eq!(flushed.details["total_affected"], serde_json::json!(1));
        assert!(!aggregator.should_aggregate(network_id));
    }

    #[test]
    fn force_flush_on_empty_network_returns_none() {
        let aggregator = MassOutageAggregator::new();
        assert!(aggregator.flush_and_create_mass_outage_event(Uuid::new_v4()).is_none());
    }

    #[test]
    fn expired_events_are_rate_limited_and_consuming() {
        let aggregator = MassOutageAggregator::new();
        let network_id = Uuid::new_v4();
        let base = Utc::now();
        let stale = base - ChronoDuration::seconds(90);
        aggregator.record_offline_event(network_id, offline_event_at(network_id, "10.0.0.1", stale));

        let first = aggregator.get_expired_events(network_id, base);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].device_ip.as_deref(), Some("10.0.0.1"));
        assert!(!aggregator.should_aggregate(network_id));

        aggregator.record_offline_event(network_id, offline_event_at(network_id, "10.0.0.2", stale));
        let rate_limited = aggregator.get_expired_events(network_id, base + ChronoDuration::seconds(5));
        assert!(rate_limited.is_empty());

        let after_interval = aggregator.get_expired_events(network_id, base + ChronoDuration::seconds(31));
        assert_eq!(after_interval.len(), 1);
    }
}
