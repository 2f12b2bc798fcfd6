//! Cloud identity-provider webhook (C14): verifies the HMAC signature,
//! routes `user.*` events into the sync engine.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use fabric_domain_identity::Provider;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation(format!("missing {name} header")))
}

pub async fn clerk_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<(), ApiError> {
    let Provider::Cloud(cloud) = &*state.identity_provider else {
        warn!("received cloud webhook while running the local auth provider");
        return Err(ApiError::Validation("webhooks are only accepted in cloud-auth mode".to_string()));
    };
    if state.settings.webhook_secret.as_deref().unwrap_or_default().is_empty() {
        return Err(ApiError::Internal(anyhow::anyhow!("webhook secret is not configured")));
    }

    let id = header_str(&headers, "id")?;
    let timestamp = header_str(&headers, "timestamp")?;
    let signature = header_str(&headers, "signature")?;

    if cloud.verify_webhook(id, timestamp, signature, &body).is_err() {
        warn!("webhook signature verification failed");
        return Err(ApiError::Unauthenticated);
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|err| ApiError::Validation(err.to_string()))?;
    let event_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or_default();
    let data = payload.get("data").cloned().unwrap_or(serde_json::Value::Null);

    match event_type {
        "user.created" | "user.updated" => {
            let Some(claims) = cloud.claims_from_webhook_payload(&data) else {
                return Err(ApiError::Validation("webhook payload missing user id".to_string()));
            };
            let create_if_missing = event_type == "user.created";
            let outcome = state.sync_engine.sync(&claims, create_if_missing, true).await.map_err(anyhow::Error::from)?;
            info!(?outcome, event_type, "synced user from webhook");
        }
        "user.deleted" => {
            let external_user_id = data.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            state.sync_engine.deactivate("cloud", external_user_id).await.map_err(anyhow::Error::from)?;
            info!(external_user_id, "deactivated user from webhook");
        }
        other => {
            info!(event_type = other, "ignoring unhandled webhook event type");
        }
    }

    Ok(())
}
