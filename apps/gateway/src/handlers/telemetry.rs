//! Ingestion surface for device health checks (C9's only live entry point).
//! The upstream health-monitor service calls this once per check with a
//! service token; every sample is folded into that device's baseline and,
//! if it synthesizes a notification-worthy event, routed to C10/C11.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use fabric_domain_notification::HealthSample;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HealthSampleRequest {
    pub network_id: Uuid,
    pub device_ip: String,
    pub device_name: Option<String>,
    pub device_hostname: Option<String>,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    #[serde(default = "Utc::now")]
    pub timestamp: chrono::DateTime<Utc>,
}

pub async fn ingest_health_sample(State(state): State<AppState>, Json(req): Json<HealthSampleRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let sample = HealthSample { success: req.success, latency_ms: req.latency_ms, packet_loss: req.packet_loss, timestamp: req.timestamp };

    let (signal, event) = state.anomaly_detectors.observe(
        req.network_id,
        &req.device_ip,
        req.device_name.as_deref(),
        req.device_hostname.as_deref(),
        sample,
    );

    let outcome = match &event {
        Some(event) => Some(state.dispatcher.dispatch_to_network(req.network_id, event).await.map_err(anyhow::Error::from)?),
        None => None,
    };

    Ok(Json(serde_json::json!({
        "is_anomaly": signal.is_anomaly,
        "score": signal.score,
        "event_dispatched": event.is_some(),
        "delivered": outcome.map(|o| o.delivered).unwrap_or(0),
    })))
}
