use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

const MIN_SAMPLES_FOR_BASELINE: u64 = 10;

/// Running Welford accumulator for one metric (latency or packet-loss).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WelfordStat {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
    pub min: f64,
    pub max: f64,
}

impl WelfordStat {
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }

    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    pub fn z_score(&self, value: f64) -> f64 {
        let sd = self.std_dev();
        if sd <= 0.0 {
            0.0
        } else {
            (value - self.mean).abs() / sd
        }
    }
}

/// One hour-of-day or day-of-week tally: (successes, total).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Tally {
    pub success: u64,
    pub total: u64,
}

impl Tally {
    pub fn observe(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.success += 1;
        }
    }

    pub fn availability(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success as f64 / self.total as f64
        }
    }
}

/// Per (network, device) online statistics, trained incrementally by the
/// anomaly detector.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub network_id: uuid::Uuid,
    pub device_ip: String,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    #[serde(skip)]
    pub latency: WelfordStat,
    #[serde(skip)]
    pub packet_loss: WelfordStat,
    #[serde(skip)]
    pub hour_of_day: [Tally; 24],
    #[serde(skip)]
    pub day_of_week: [Tally; 7],
    pub last_success: Option<bool>,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
    pub state_transitions: u64,
    pub false_positive_feedback_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl DeviceStats {
    pub fn new(network_id: uuid::Uuid, device_ip: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            network_id,
            device_ip: device_ip.into(),
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            latency: WelfordStat::default(),
            packet_loss: WelfordStat::default(),
            hour_of_day: [Tally::default(); 24],
            day_of_week: [Tally::default(); 7],
            last_success: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
            state_transitions: 0,
            false_positive_feedback_count: 0,
            first_seen: now,
            last_updated: now,
        }
    }

    pub fn availability(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.successful_checks as f64 / self.total_checks as f64
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.total_checks >= MIN_SAMPLES_FOR_BASELINE
    }

    pub fn is_stable_offline(&self) -> bool {
        self.has_baseline() && self.availability() < 0.10
    }

    pub fn is_stable_online(&self) -> bool {
        self.has_baseline() && self.availability() >= 0.95
    }
}
