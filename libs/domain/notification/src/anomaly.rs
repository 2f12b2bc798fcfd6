//! Anomaly detector (C9), grounded on `network_monitor/network_anomaly_detector.py`.
//!
//! Maintains a running Welford baseline per (network, device), scores each
//! incoming health sample against that baseline, and synthesizes a
//! notification-worthy event when a state transition or anomaly warrants one.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use fabric_domain_models::{DeviceStats, NotificationEvent, NotificationPriority, NotificationType};
use uuid::Uuid;

const MIN_SAMPLES_FOR_BASELINE_CHECK: u64 = 10;
const LATENCY_ZSCORE_THRESHOLD: f64 = 3.0;
const PACKET_LOSS_GATE: f64 = 0.1;
const PACKET_LOSS_HIGH: f64 = 0.2;
const UNEXPECTED_OFFLINE_AVAILABILITY: f64 = 0.9;
const TIME_BASED_MIN_SAMPLES: u64 = 30;
const TIME_BASED_AVAILABILITY_THRESHOLD: f64 = 0.8;
const ANOMALY_SCORE_CUTOFF: f64 = 0.3;

#[derive(Debug, Clone, Copy)]
pub struct HealthSample {
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyType {
    UnexpectedOffline,
    LatencySpike,
    PacketLossSpike,
    TimeBased,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalySignal {
    pub is_anomaly: bool,
    pub score: f64,
    pub anomaly_type: Option<AnomalyType>,
    pub factors: Vec<String>,
    pub latency_zscore: Option<f64>,
    pub packet_loss_excess: Option<f64>,
    pub state_changed: bool,
}

impl AnomalySignal {
    fn none(state_changed: bool, latency_zscore: Option<f64>) -> Self {
        Self {
            is_anomaly: false,
            score: 0.0,
            anomaly_type: None,
            factors: Vec::new(),
            latency_zscore,
            packet_loss_excess: None,
            state_changed,
        }
    }
}

/// Per-device detector instance. Kept free-standing (rather than bundled
/// into `DeviceStats` itself) so the statistics model stays a pure data
/// type and the scoring logic lives alongside the other pipeline stages.
pub struct AnomalyDetector {
    stats: DeviceStats,
    /// Set on the first genuine offline transition, cleared on recovery.
    /// Not persisted across restarts; on a cold start a device mid-outage
    /// is simply re-detected via `just_went_offline` on its next failure.
    notified_offline: bool,
}

impl AnomalyDetector {
    pub fn new(network_id: Uuid, device_ip: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { stats: DeviceStats::new(network_id, device_ip, now), notified_offline: false }
    }

    pub fn from_stats(stats: DeviceStats) -> Self {
        Self { stats, notified_offline: false }
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Folds one health check into the baseline and scores it. Signals are
    /// evaluated against the baseline established *before* this sample, so a
    /// single huge spike can't dilute the mean it's being compared to.
    pub fn observe(&mut self, sample: HealthSample) -> AnomalySignal {
        let last_success_before = self.stats.last_success;
        let state_changed = last_success_before.is_some_and(|last| last != sample.success);

        let availability_before = self.stats.availability();
        let latency_zscore = sample.latency_ms.map(|latency| self.stats.latency.z_score(latency));
        let latency_std_before = self.stats.latency.std_dev();
        let latency_mean_before = self.stats.latency.mean;
        let packet_loss_mean_before = if self.stats.packet_loss.count > 0 { self.stats.packet_loss.mean } else { 0.0 };
        let hour_avail_before = self.stats.hour_of_day[sample.timestamp.hour() as usize].availability();

        self.stats.total_checks += 1;
        if sample.success {
            self.stats.successful_checks += 1;
            self.stats.consecutive_successes += 1;
            self.stats.consecutive_failures = 0;
        } else {
            self.stats.failed_checks += 1;
            self.stats.consecutive_failures += 1;
            self.stats.consecutive_successes = 0;
        }
        if state_changed {
            self.stats.state_transitions += 1;
        }
        if let Some(latency) = sample.latency_ms {
            self.stats.latency.observe(latency);
        }
        if let Some(loss) = sample.packet_loss {
            self.stats.packet_loss.observe(loss);
        }
        self.stats.hour_of_day[sample.timestamp.hour() as usize].observe(sample.success);
        self.stats.day_of_week[sample.timestamp.weekday().num_days_from_monday() as usize].observe(sample.success);
        self.stats.last_success = Some(sample.success);
        self.stats.last_updated = sample.timestamp;

        if self.stats.total_checks < MIN_SAMPLES_FOR_BASELINE_CHECK {
            return AnomalySignal::none(state_changed, latency_zscore);
        }
        if !sample.success && self.stats.is_stable_offline() {
            return AnomalySignal::none(state_changed, latency_zscore);
        }

        let mut best: Option<(AnomalyType, f64, String)> = None;

        if !sample.success && availability_before >= UNEXPECTED_OFFLINE_AVAILABILITY {
            let mut score = availability_before.min(0.95);
            if self.stats.consecutive_failures > 1 {
                score = (score + self.stats.consecutive_failures as f64 * 0.1).min(0.99);
            }
            consider(
                &mut best,
                AnomalyType::UnexpectedOffline,
                score,
                format!("device typically has {:.1}% availability but is now offline", availability_before * 100.0),
            );
        }

        if let Some(z) = latency_zscore {
            if latency_std_before > 0.0 && z > LATENCY_ZSCORE_THRESHOLD {
                consider(
                    &mut best,
                    AnomalyType::LatencySpike,
                    (z / 10.0).min(0.9),
                    format!(
                        "latency {:.1}ms is {:.1} std devs from normal ({:.1}ms)",
                        sample.latency_ms.unwrap_or_default(),
                        z,
                        latency_mean_before
                    ),
                );
            }
        }

        let mut packet_loss_excess = None;
        if let Some(loss) = sample.packet_loss {
            if loss > PACKET_LOSS_GATE && (loss > packet_loss_mean_before * 2.0 || loss > PACKET_LOSS_HIGH) {
                packet_loss_excess = Some(loss - packet_loss_mean_before);
                consider(
                    &mut best,
                    AnomalyType::PacketLossSpike,
                    (loss * 2.0).min(0.8),
                    format!("packet loss {:.1}% is higher than normal ({:.1}%)", loss * 100.0, packet_loss_mean_before * 100.0),
                );
            }
        }

        if !sample.success && self.stats.total_checks >= TIME_BASED_MIN_SAMPLES && hour_avail_before > TIME_BASED_AVAILABILITY_THRESHOLD {
            consider(
                &mut best,
                AnomalyType::TimeBased,
                hour_avail_before.min(0.7),
                format!("device is {:.1}% available at this hour but is currently offline", hour_avail_before * 100.0),
            );
        }

        let (anomaly_type, score, factors) = match best {
            Some((kind, score, factor)) => (Some(kind), score, vec![factor]),
            None => (None, 0.0, Vec::new()),
        };

        AnomalySignal {
            is_anomaly: score >= ANOMALY_SCORE_CUTOFF,
            score,
            anomaly_type,
            factors,
            latency_zscore,
            packet_loss_excess,
            state_changed,
        }
    }

    /// Translates the latest `observe` result into a notification event, if
    /// the device's behavior is notification-worthy. Must be called with the
    /// same `sample` just passed to `observe` — it reads the stats `observe`
    /// just updated.
    pub fn synthesize_event(
        &mut self,
        network_id: Uuid,
        device_name: Option<&str>,
        device_hostname: Option<&str>,
        signal: &AnomalySignal,
        sample: &HealthSample,
    ) -> Option<NotificationEvent> {
        let device_ip = self.stats.device_ip.clone();

        if !sample.success && self.stats.is_stable_offline() {
            return None;
        }

        let just_went_offline = !sample.success
            && self.stats.consecutive_failures == 1
            && self.stats.successful_checks >= 3
            && !self.stats.is_stable_online();
        let just_came_online = sample.success
            && self.stats.consecutive_successes == 1
            && self.stats.failed_checks >= 3
            && !self.stats.is_stable_offline();

        let mut event = None;

        if !sample.success {
            if self.notified_offline || just_went_offline || signal.is_anomaly {
                let priority = if self.stats.consecutive_failures >= 3 || signal.is_anomaly {
                    NotificationPriority::High
                } else {
                    NotificationPriority::Medium
                };
                let name = device_name.unwrap_or(&device_ip).to_string();
                event = Some(build_event(
                    NotificationType::DeviceOffline,
                    priority,
                    network_id,
                    &device_ip,
                    device_name,
                    device_hostname,
                    Some("online"),
                    Some("offline"),
                    format!("Device offline: {name}"),
                    format!(
                        "The device at {device_ip} is no longer responding ({} consecutive failures).",
                        self.stats.consecutive_failures
                    ),
                    signal,
                ));
                self.notified_offline = true;
            }
        } else {
            if self.notified_offline || just_came_online {
                let name = device_name.unwrap_or(&device_ip).to_string();
                event = Some(build_event(
                    NotificationType::DeviceOnline,
                    NotificationPriority::Low,
                    network_id,
                    &device_ip,
                    device_name,
                    device_hostname,
                    Some("offline"),
                    Some("online"),
                    format!("Device online: {name}"),
                    format!("The device at {device_ip} is responding again."),
                    signal,
                ));
                self.notified_offline = false;
            }

            match signal.anomaly_type {
                Some(AnomalyType::LatencySpike) => {
                    let name = device_name.unwrap_or(&device_ip).to_string();
                    event = Some(build_event(
                        NotificationType::HighLatency,
                        NotificationPriority::Medium,
                        network_id,
                        &device_ip,
                        device_name,
                        device_hostname,
                        None,
                        Some("online"),
                        format!("High latency: {name}"),
                        format!(
                            "Unusual latency detected on {device_ip}: {:.1}ms (normally {:.1}ms)",
                            sample.latency_ms.unwrap_or_default(),
                            self.stats.latency.mean
                        ),
                        signal,
                    ));
                }
                Some(AnomalyType::PacketLossSpike) => {
                    let name = device_name.unwrap_or(&device_ip).to_string();
                    event = Some(build_event(
                        NotificationType::PacketLoss,
                        NotificationPriority::Medium,
                        network_id,
                        &device_ip,
                        device_name,
                        device_hostname,
                        None,
                        Some("online"),
                        format!("Packet loss: {name}"),
                        format!("High packet loss detected on {device_ip}: {:.1}%", sample.packet_loss.unwrap_or_default() * 100.0),
                        signal,
                    ));
                }
                _ => {}
            }
        }

        event
    }

    pub fn record_false_positive(&mut self) {
        self.stats.false_positive_feedback_count += 1;
    }
}

fn consider(best: &mut Option<(AnomalyType, f64, String)>, kind: AnomalyType, score: f64, factor: String) {
    let replace = match best {
        Some((_, existing, _)) => score > *existing,
        None => true,
    };
    if replace {
        *best = Some((kind, score, factor));
    }
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    event_type: NotificationType,
    priority: NotificationPriority,
    network_id: Uuid,
    device_ip: &str,
    device_name: Option<&str>,
    device_hostname: Option<&str>,
    previous_state: Option<&str>,
    current_state: Option<&str>,
    title: String,
    message: String,
    signal: &AnomalySignal,
) -> NotificationEvent {
    let mut details = HashMap::new();
    if !signal.factors.is_empty() {
        details.insert("contributing_factors".to_string(), serde_json::Value::from(signal.factors.clone()));
    }

    NotificationEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type,
        priority,
        network_id: Some(network_id),
        device_ip: Some(device_ip.to_string()),
        device_name: device_name.map(str::to_string),
        device_hostname: device_hostname.map(str::to_string),
        previous_state: previous_state.map(str::to_string),
        current_state: current_state.map(str::to_string),
        title,
        message,
        details,
        anomaly_score: signal.is_anomaly.then_some(signal.score),
        model_version: Some("1.0.0".to_string()),
        is_predicted_anomaly: Some(signal.is_anomaly),
    }
}

/// Registry of per-(network, device) anomaly baseline detectors.
#[derive(Default)]
pub struct AnomalyDetectorManager {
    detectors: DashMap<(Uuid, String), AnomalyDetector>,
}

impl AnomalyDetectorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trains the baseline on one health sample, scores it, and synthesizes
    /// a notification event if the result is notification-worthy.
    pub fn observe(
        &self,
        network_id: Uuid,
        device_ip: &str,
        device_name: Option<&str>,
        device_hostname: Option<&str>,
        sample: HealthSample,
    ) -> (AnomalySignal, Option<NotificationEvent>) {
        let mut entry = self
            .detectors
            .entry((network_id, device_ip.to_string()))
            .or_insert_with(|| AnomalyDetector::new(network_id, device_ip, sample.timestamp));
        let signal = entry.observe(sample);
        let event = entry.synthesize_event(network_id, device_name, device_hostname, &signal, &sample);
        (signal, event)
    }

    pub fn stats_snapshot(&self, network_id: Uuid, device_ip: &str) -> Option<DeviceStats> {
        self.detectors.get(&(network_id, device_ip.to_string())).map(|d| d.stats().clone())
    }

    pub fn record_false_positive(&self, network_id: Uuid, device_ip: &str) {
        if let Some(mut entry) = self.detectors.get_mut(&(network_id, device_ip.to_string())) {
            entry.record_false_positive();
        }
    }

    /// Every tracked baseline, for persisting to the state directory at
    /// shutdown so history survives a restart.
    pub fn snapshot_all(&self) -> Vec<DeviceStats> {
        self.detectors.iter().map(|entry| entry.stats().clone()).collect()
    }

    /// Restores baselines from a prior shutdown's snapshot.
    pub fn restore(&self, snapshots: Vec<DeviceStats>) {
        for stats in snapshots {
            let key = (stats.network_id, stats.device_ip.clone());
            self.detectors.insert(key, AnomalyDetector::from_stats(stats));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fabric_domain_models::stats::{Tally, WelfordStat};

    fn sample(success: bool, latency_ms: f64) -> HealthSample {
        HealthSample { success, latency_ms: Some(latency_ms), packet_loss: Some(0.0), timestamp: Utc::now() }
    }

    fn baseline_stats(network_id: Uuid, device_ip: &str, now: DateTime<Utc>) -> DeviceStats {
        DeviceStats::new(network_id, device_ip, now)
    }

    #[test]
    fn no_anomaly_before_baseline_established() {
        let mut detector = AnomalyDetector::new(Uuid::new_v4(), "10.0.0.1", Utc::now());
        for _ in 0..5 {
            let signal = detector.observe(sample(true, 20.0));
            assert!(!signal.is_anomaly);
        }
    }

    #[test]
    fn latency_spike_matches_seed_scenario() {
        let network_id = Uuid::new_v4();
        let now = Utc::now();
        let mut stats = baseline_stats(network_id, "10.0.0.1", now);
        stats.total_checks = 15;
        stats.successful_checks = 15;
        stats.consecutive_successes = 15;
        stats.last_success = Some(true);
        stats.latency = WelfordStat { count: 15, mean: 20.0, m2: 16.0 * 14.0, min: 18.0, max: 22.0 };

        let mut detector = AnomalyDetector::from_stats(stats);
        let signal = detector.observe(sample(true, 120.0));

        assert_eq!(signal.anomaly_type, Some(AnomalyType::LatencySpike));
        assert!((signal.score - 0.9).abs() < 1e-9);
        assert!(signal.is_anomaly);
    }

    #[test]
    fn unexpected_offline_scores_against_availability() {
        let network_id = Uuid::new_v4();
        let now = Utc::now();
        let mut stats = baseline_stats(network_id, "10.0.0.1", now);
        stats.total_checks = 15;
        stats.successful_checks = 15;
        stats.consecutive_successes = 15;
        stats.last_success = Some(true);

        let mut detector = AnomalyDetector::from_stats(stats);
        let signal = detector.observe(HealthSample { success: false, latency_ms: None, packet_loss: None, timestamp: now });

        assert_eq!(signal.anomaly_type, Some(AnomalyType::UnexpectedOffline));
        assert!((signal.score - 0.95).abs() < 1e-9);
        assert!(signal.is_anomaly);
        assert!(signal.state_changed);
    }

    #[test]
    fn packet_loss_spike_detected_above_baseline() {
        let network_id = Uuid::new_v4();
        let now = Utc::now();
        let mut stats = baseline_stats(network_id, "10.0.0.1", now);
        stats.total_checks = 15;
        stats.successful_checks = 15;
        stats.consecutive_successes = 15;
        stats.last_success = Some(true);
        stats.packet_loss = WelfordStat { count: 15, mean: 0.02, m2: 0.0, min: 0.0, max: 0.05 };

        let mut detector = AnomalyDetector::from_stats(stats);
        let signal = detector.observe(HealthSample { success: true, latency_ms: None, packet_loss: Some(0.25), timestamp: now });

        assert_eq!(signal.anomaly_type, Some(AnomalyType::PacketLossSpike));
        assert!((signal.score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn time_based_anomaly_flags_offline_during_typically_up_hour() {
        let network_id = Uuid::new_v4();
        let fixed_hour = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut stats = baseline_stats(network_id, "10.0.0.1", fixed_hour);
        stats.total_checks = 35;
        stats.successful_checks = 30;
        stats.failed_checks = 5;
        stats.consecutive_successes = 1;
        stats.last_success = Some(true);
        stats.hour_of_day[10] = Tally { success: 9, total: 10 };

        let mut detector = AnomalyDetector::from_stats(stats);
        let signal = detector.observe(HealthSample { success: false, latency_ms: None, packet_loss: None, timestamp: fixed_hour });

        assert_eq!(signal.anomaly_type, Some(AnomalyType::TimeBased));
        assert!((signal.score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn stable_offline_device_is_never_flagged() {
        let network_id = Uuid::new_v4();
        let now = Utc::now();
        let mut stats = baseline_stats(network_id, "10.0.0.1", now);
        stats.total_checks = 20;
        stats.successful_checks = 1;
        stats.failed_checks = 19;
        stats.consecutive_failures = 19;
        stats.last_success = Some(false);

        let mut detector = AnomalyDetector::from_stats(stats);
        let signal = detector.observe(HealthSample { success: false, latency_ms: None, packet_loss: None, timestamp: now });
        assert!(!signal.is_anomaly);

        let event = detector.synthesize_event(network_id, None, None, &signal, &HealthSample {
            success: false,
            latency_ms: None,
            packet_loss: None,
            timestamp: now,
        });
        assert!(event.is_none());
    }

    #[test]
    fn genuine_offline_transition_escalates_to_high_after_three_failures() {
        let network_id = Uuid::new_v4();
        let now = Utc::now();
        let mut stats = baseline_stats(network_id, "10.0.0.1", now);
        stats.total_checks = 3;
        stats.successful_checks = 3;
        stats.consecutive_successes = 3;
        stats.last_success = Some(true);

        let mut detector = AnomalyDetector::from_stats(stats);

        let offline = HealthSample { success: false, latency_ms: None, packet_loss: None, timestamp: now };

        let signal1 = detector.observe(offline);
        let event1 = detector.synthesize_event(network_id, Some("router"), None, &signal1, &offline).unwrap();
        assert_eq!(event1.event_type, NotificationType::DeviceOffline);
        assert_eq!(event1.priority, NotificationPriority::Medium);

        let signal2 = detector.observe(offline);
        let event2 = detector.synthesize_event(network_id, Some("router"), None, &signal2, &offline).unwrap();
        assert_eq!(event2.priority, NotificationPriority::Medium);

        let signal3 = detector.observe(offline);
        let event3 = detector.synthesize_event(network_id, Some("router"), None, &signal3, &offline).unwrap();
        assert_eq!(event3.priority, NotificationPriority::High);
    }

    #[test]
    fn recovery_after_offline_transition_is_low_priority() {
        let network_id = Uuid::new_v4();
        let now = Utc::now();
        let mut stats = baseline_stats(network_id, "10.0.0.1", now);
        stats.total_checks = 3;
        stats.successful_checks = 3;
        stats.consecutive_successes = 3;
        stats.last_success = Some(true);

        let mut detector = AnomalyDetector::from_stats(stats);
        let offline = HealthSample { success: false, latency_ms: None, packet_loss: None, timestamp: now };
        let signal = detector.observe(offline);
        detector.synthesize_event(network_id, None, None, &signal, &offline).expect("offline transition notifies");

        let online = sample(true, 20.0);
        let recovery_signal = detector.observe(online);
        let recovery_event = detector.synthesize_event(network_id, None, None, &recovery_signal, &online).unwrap();
        assert_eq!(recovery_event.event_type, NotificationType::DeviceOnline);
        assert_eq!(recovery_event.priority, NotificationPriority::Low);
    }

    #[test]
    fn high_latency_event_emitted_on_successful_but_anomalous_check() {
        let network_id = Uuid::new_v4();
        let now = Utc::now();
        let mut stats = baseline_stats(network_id, "10.0.0.1", now);
        stats.total_checks = 15;
        stats.successful_checks = 15;
        stats.consecutive_successes = 15;
        stats.last_success = Some(true);
        stats.latency = WelfordStat { count: 15, mean: 20.0, m2: 16.0 * 14.0, min: 18.0, max: 22.0 };

        let mut detector = AnomalyDetector::from_stats(stats);
        let spike = sample(true, 120.0);
        let signal = detector.observe(spike);
        let event = detector.synthesize_event(network_id, None, None, &signal, &spike).unwrap();
        assert_eq!(event.event_type, NotificationType::HighLatency);
    }
}
