//! Startup and shutdown sequencing: an async integrity pass that flips the
//! readiness gate once it settles, plus the ordered drain/flush steps run
//! on shutdown.

use std::time::Duration;

use chrono::Utc;
use fabric_domain_models::{NotificationEvent, NotificationPriority, NotificationType};
use fabric_domain_notification::repository::GlobalFlag;
use fabric_shared_statefile::ShutdownMarker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::{AppState, SystemMode};

const ANOMALY_SNAPSHOT_KEY: &str = "anomaly_snapshots";

pub struct Bootstrap;

impl Bootstrap {
    /// Runs the startup sequence and flips the readiness gate. Config
    /// validation already happened in `Settings::from_env()` before the
    /// kernel was built, so this only covers what can fail or take time at
    /// runtime: upstream warm-up, restoring persisted state, and announcing
    /// the recovery.
    pub async fn run_startup(state: &AppState) {
        state.upstreams.warm_up_all().await;

        let snapshots: Vec<fabric_domain_models::DeviceStats> = state.state_dir.load(ANOMALY_SNAPSHOT_KEY);
        if !snapshots.is_empty() {
            info!(count = snapshots.len(), "restoring anomaly-detector baselines");
            state.anomaly_detectors.restore(snapshots);
        }

        let marker: ShutdownMarker = state.state_dir.shutdown_marker();
        let message = if marker.clean_shutdown {
            match marker.last_shutdown {
                Some(last) => format!("recovered from a clean shutdown at {last}"),
                None => "starting up".to_string(),
            }
        } else if marker.last_shutdown.is_some() || marker.last_startup.is_some() {
            "recovered from unexpected shutdown".to_string()
        } else {
            "first startup".to_string()
        };

        let running_marker = ShutdownMarker {
            clean_shutdown: false,
            last_shutdown: marker.last_shutdown,
            last_startup: Some(Utc::now()),
        };
        if let Err(err) = state.state_dir.save_shutdown_marker(&running_marker) {
            error!(%err, "failed to persist startup marker");
        }

        let event = service_event(NotificationType::CartographerUp, NotificationPriority::Medium, "Gateway online", &message);
        if let Err(err) = state.dispatcher.dispatch_globally(GlobalFlag::ServiceUp, &event).await {
            warn!(%err, "failed to dispatch startup notification");
        }

        tokio::spawn({
            let scheduler = state.scheduler.clone();
            async move { scheduler.run().await }
        });

        state.set_mode(SystemMode::Operational);
        info!("gateway is operational");
    }

    /// Runs the shutdown sequence: announce, drain briefly, persist
    /// whatever in-memory state would otherwise be lost, then release
    /// resources.
    pub async fn run_shutdown(state: &AppState) {
        state.set_mode(SystemMode::Maintenance("shutting down".to_string()));

        let event = service_event(
            NotificationType::CartographerDown,
            NotificationPriority::Critical,
            "Gateway shutting down",
            "graceful shutdown initiated",
        );
        if let Err(err) = state.dispatcher.dispatch_globally(GlobalFlag::ServiceDown, &event).await {
            warn!(%err, "failed to dispatch shutdown notification");
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshots = state.anomaly_detectors.snapshot_all();
        if let Err(err) = state.state_dir.save(ANOMALY_SNAPSHOT_KEY, &snapshots) {
            error!(%err, "failed to persist anomaly-detector snapshots");
        }

        state.scheduler.stop();
        state.upstreams.close_all().await;

        let marker = ShutdownMarker {
            clean_shutdown: true,
            last_shutdown: Some(Utc::now()),
            last_startup: state.state_dir.shutdown_marker().last_startup,
        };
        if let Err(err) = state.state_dir.save_shutdown_marker(&marker) {
            error!(%err, "failed to persist clean-shutdown marker");
        }

        info!("gateway shutdown complete");
    }
}

fn service_event(event_type: NotificationType, priority: NotificationPriority, title: &str, message: &str) -> NotificationEvent {
    NotificationEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type,
        priority,
        network_id: None,
        device_ip: None,
        device_name: None,
        device_hostname: None,
        previous_state: None,
        current_state: None,
        title: title.to_string(),
        message: message.to_string(),
        details: Default::default(),
        anomaly_score: None,
        model_version: None,
        is_predicted_anomaly: None,
    }
}
