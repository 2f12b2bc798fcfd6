//! Scheduler (C12), grounded on `notification_service/scheduler.py`.
//!
//! A single background loop, woken every 30s, that fires due scheduled
//! broadcasts and drives the periodic upstream-version check.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fabric_domain_models::{BroadcastStatus, NotificationEvent, NotificationPriority, NotificationType, ScheduledBroadcast};
use fabric_infra_upstream::{RequestOptions, UpstreamPool};
use fabric_shared_statefile::StateDirectory;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch::{NotificationDispatcher, RecipientLookup};
use crate::repository::NotificationRepository;

const TICK_INTERVAL: Duration = Duration::from_secs(30);
const VERSION_CHECK_UPSTREAM: &str = "release-channel";
const VERSION_CHECK_PATH: &str = "/VERSION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SemVer {
    major: u32,
    minor: u32,
    patch: u32,
}

impl SemVer {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_start_matches('v');
        let mut parts = text.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        Some(Self { major, minor, patch })
    }

    fn bump_priority(&self, previous: &SemVer) -> NotificationPriority {
        if self.major != previous.major {
            NotificationPriority::High
        } else if self.minor != previous.minor {
            NotificationPriority::Medium
        } else {
            NotificationPriority::Low
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionCheck {
    pub last_notified_version: Option<String>,
    pub last_checked_at: Option<chrono::DateTime<Utc>>,
}

pub struct Scheduler {
    repository: Arc<dyn NotificationRepository>,
    recipients: Arc<dyn RecipientLookup>,
    dispatcher: Arc<NotificationDispatcher>,
    upstreams: Arc<UpstreamPool>,
    state: Arc<StateDirectory>,
    current_version: String,
    version_check_interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        recipients: Arc<dyn RecipientLookup>,
        dispatcher: Arc<NotificationDispatcher>,
        upstreams: Arc<UpstreamPool>,
        state: Arc<StateDirectory>,
        current_version: impl Into<String>,
        version_check_interval: Duration,
    ) -> Self {
        Self {
            repository,
            recipients,
            dispatcher,
            upstreams,
            state,
            current_version: current_version.into(),
            version_check_interval,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(&self) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut last_version_check = tokio::time::Instant::now() - self.version_check_interval;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("scheduler stopping");
                    return;
                }
                _ = tick.tick() => {
                    self.dispatch_due_broadcasts().await;
                    self.flush_expired_outage_windows().await;

                    if last_version_check.elapsed() >= self.version_check_interval {
                        last_version_check = tokio::time::Instant::now();
                        self.check_version().await;
                    }
                }
            }
        }
    }

    async fn dispatch_due_broadcasts(&self) {
        let now = Utc::now();
        for broadcast in self.repository.due_broadcasts(now).await {
            if let Err(err) = self.fire_broadcast(broadcast.clone()).await {
                error!(broadcast_id = %broadcast.id, %err, "scheduled broadcast failed");
                let mut failed = broadcast;
                failed.status = BroadcastStatus::Failed;
                failed.error = Some(err.to_string());
                if let Err(persist_err) = self.repository.update_broadcast(failed).await {
                    error!(%persist_err, "failed to persist FAILED broadcast status");
                }
            }
        }
    }

    /// Sweeps every network's mass-outage aggregation window for entries
    /// that timed out without reaching the mass-outage threshold, so a
    /// lone offline device still eventually gets dispatched on its own.
    async fn flush_expired_outage_windows(&self) {
        for network_id in self.recipients.all_network_ids().await {
            if let Err(err) = self.dispatcher.dispatch_expired_offline_events(network_id).await {
                error!(%network_id, %err, "failed to dispatch expired offline events");
            }
        }
    }

    async fn fire_broadcast(&self, mut broadcast: ScheduledBroadcast) -> Result<(), crate::dispatch::DispatchError> {
        let event = synthesize_event(&broadcast);
        let outcome = self.dispatcher.dispatch_broadcast(&event).await?;

        broadcast.status = BroadcastStatus::Sent;
        broadcast.sent_at = Some(Utc::now());
        broadcast.users_notified = outcome.delivered;
        self.repository.update_broadcast(broadcast).await?;
        Ok(())
    }

    async fn check_version(&self) {
        let mut check: VersionCheck = self.state.load("version_check");

        let fetched = match self
            .upstreams
            .request(VERSION_CHECK_UPSTREAM, Method::GET, VERSION_CHECK_PATH, RequestOptions::default())
            .await
        {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(%err, "version check: failed to read response body");
                    return;
                }
            },
            Err(err) => {
                warn!(%err, "version check: upstream request failed");
                return;
            }
        };

        let Some(fetched_version) = SemVer::parse(&fetched) else {
            warn!(raw = %fetched, "version check: unparseable VERSION payload");
            return;
        };
        let Some(current) = SemVer::parse(&self.current_version) else {
            error!(current = %self.current_version, "scheduler: own version string is unparseable");
            return;
        };

        check.last_checked_at = Some(Utc::now());

        let already_notified = check.last_notified_version.as_deref() == Some(fetched.trim());
        if fetched_version > current && !already_notified {
            let priority = fetched_version.bump_priority(&current);
            let event = NotificationEvent {
                event_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                event_type: NotificationType::SystemStatus,
                priority,
                network_id: None,
                device_ip: None,
                device_name: None,
                device_hostname: None,
                previous_state: Some(self.current_version.clone()),
                current_state: Some(fetched.trim().to_string()),
                title: "New version available".to_string(),
                message: format!("Upstream release channel reports {} (running {})", fetched.trim(), self.current_version),
                details: Default::default(),
                anomaly_score: None,
                model_version: None,
                is_predicted_anomaly: None,
            };

            if let Err(err) = self.dispatcher.dispatch_broadcast(&event).await {
                error!(%err, "failed to dispatch version-check notification");
            } else {
                check.last_notified_version = Some(fetched.trim().to_string());
            }
        }

        if let Err(err) = self.state.save("version_check", &check) {
            error!(%err, "failed to persist version-check state");
        }
    }
}

fn synthesize_event(broadcast: &ScheduledBroadcast) -> NotificationEvent {
    NotificationEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type: broadcast.event_type,
        priority: broadcast.priority,
        network_id: None,
        device_ip: None,
        device_name: None,
        device_hostname: None,
        previous_state: None,
        current_state: None,
        title: broadcast.title.clone(),
        message: broadcast.message.clone(),
        details: Default::default(),
        anomaly_score: None,
        model_version: None,
        is_predicted_anomaly: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_orders_semver() {
        let a = SemVer::parse("v1.2.3").unwrap();
        let b = SemVer::parse("1.3.0").unwrap();
        assert!(b > a);
        assert_eq!(b.bump_priority(&a), NotificationPriority::Medium);
    }

    #[test]
    fn major_bump_is_high_priority() {
        let a = SemVer::parse("v1.2.3").unwrap();
        let b = SemVer::parse("v2.0.0").unwrap();
        assert_eq!(b.bump_priority(&a), NotificationPriority::High);
    }

    #[test]
    fn rejects_malformed_version_string() {
        assert!(SemVer::parse("not-a-version").is_none());
    }
}
