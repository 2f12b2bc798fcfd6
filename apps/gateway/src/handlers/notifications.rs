//! Notification preferences, silenced devices, broadcasts, and the
//! version/service-status surfaces (C8/C11/C12's HTTP edge). Preference
//! reads are cached for 30s and invalidated on write, mirroring the
//! teacher's cache-then-invalidate pattern for hot read paths.

use std::collections::HashSet;

use axum::extract::{Extension, Path, State};
use axum::Json;
use chrono::Utc;
use fabric_domain_models::{
    BroadcastStatus, NotificationEvent, NotificationPriority, NotificationType, QuietHours, ScheduledBroadcast,
    UserGlobalPreferences, UserNetworkPreferences,
};
use fabric_domain_notification::policy::DispatchPolicyEngine;
use fabric_domain_notification::repository::NotificationRepository;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

const PREFS_CACHE_TTL_SECS: u64 = 30;

fn default_network_preferences(user_id: Uuid, network_id: Uuid) -> UserNetworkPreferences {
    UserNetworkPreferences {
        user_id,
        network_id,
        email_enabled: true,
        chat_dm_enabled: false,
        chat_channel_enabled: false,
        chat_user_id: None,
        enabled_types: HashSet::from([
            NotificationType::DeviceOffline,
            NotificationType::DeviceDegraded,
            NotificationType::MassOutage,
            NotificationType::AnomalyDetected,
            NotificationType::IspIssue,
            NotificationType::SecurityAlert,
            NotificationType::DeviceAdded,
            NotificationType::DeviceRemoved,
        ]),
        type_priorities: Default::default(),
        minimum_priority: NotificationPriority::Low,
        quiet_hours: QuietHours::default(),
        max_notifications_per_hour: 20,
        migrated_device_events: true,
    }
}

fn default_global_preferences(user_id: Uuid) -> UserGlobalPreferences {
    UserGlobalPreferences {
        user_id,
        email_enabled: true,
        chat_dm_enabled: false,
        service_up_enabled: true,
        service_down_enabled: true,
        quiet_hours: QuietHours::default(),
    }
}

fn network_prefs_cache_key(user_id: Uuid, network_id: Uuid) -> String {
    fabric_infra_cache::CacheService::make_key(&["notif_prefs", "network", &user_id.to_string(), &network_id.to_string()])
}

fn global_prefs_cache_key(user_id: Uuid) -> String {
    fabric_infra_cache::CacheService::make_key(&["notif_prefs", "global", &user_id.to_string()])
}

pub async fn get_network_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
) -> Result<Json<UserNetworkPreferences>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let cache_key = network_prefs_cache_key(user_id, network_id);
    if let Some(cached) = state.cache.get::<UserNetworkPreferences>(&cache_key).await {
        return Ok(Json(cached));
    }

    let mut prefs = state
        .notification_store
        .get_network_preferences(user_id, network_id)
        .await
        .unwrap_or_else(|| default_network_preferences(user_id, network_id));

    if DispatchPolicyEngine::migrate_if_needed(&mut prefs) {
        state.notification_store.save_network_preferences(prefs.clone()).await?;
    }

    state.cache.set(&cache_key, &prefs, Some(PREFS_CACHE_TTL_SECS)).await;
    Ok(Json(prefs))
}

pub async fn put_network_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
    Json(mut prefs): Json<UserNetworkPreferences>,
) -> Result<Json<UserNetworkPreferences>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    prefs.user_id = user_id;
    prefs.network_id = network_id;
    state.notification_store.save_network_preferences(prefs.clone()).await?;
    state.cache.delete(&network_prefs_cache_key(user_id, network_id)).await;
    Ok(Json(prefs))
}

pub async fn delete_network_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
) -> Result<Json<UserNetworkPreferences>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let reset = default_network_preferences(user_id, network_id);
    state.notification_store.save_network_preferences(reset.clone()).await?;
    state.cache.delete(&network_prefs_cache_key(user_id, network_id)).await;
    Ok(Json(reset))
}

pub async fn get_global_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserGlobalPreferences>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let cache_key = global_prefs_cache_key(user_id);
    if let Some(cached) = state.cache.get::<UserGlobalPreferences>(&cache_key).await {
        return Ok(Json(cached));
    }

    let prefs = state.notification_store.get_global_preferences(user_id).await.unwrap_or_else(|| default_global_preferences(user_id));
    state.cache.set(&cache_key, &prefs, Some(PREFS_CACHE_TTL_SECS)).await;
    Ok(Json(prefs))
}

pub async fn put_global_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(mut prefs): Json<UserGlobalPreferences>,
) -> Result<Json<UserGlobalPreferences>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    prefs.user_id = user_id;
    state.notification_store.save_global_preferences(prefs.clone()).await?;
    state.cache.delete(&global_prefs_cache_key(user_id)).await;
    Ok(Json(prefs))
}

pub async fn delete_global_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserGlobalPreferences>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let reset = default_global_preferences(user_id);
    state.notification_store.save_global_preferences(reset.clone()).await?;
    state.cache.delete(&global_prefs_cache_key(user_id)).await;
    Ok(Json(reset))
}

#[derive(Debug, Serialize)]
pub struct SilencedDevicesResponse {
    pub devices: Vec<String>,
}

pub async fn list_silenced_devices(
    State(state): State<AppState>,
    Path(network_id): Path<Uuid>,
) -> Result<Json<SilencedDevicesResponse>, ApiError> {
    Ok(Json(SilencedDevicesResponse { devices: state.notification_store.list_silenced_devices(network_id) }))
}

#[derive(Debug, Deserialize)]
pub struct SilenceDeviceRequest {
    pub device_ip: String,
}

pub async fn silence_device(
    State(state): State<AppState>,
    Path(network_id): Path<Uuid>,
    Json(req): Json<SilenceDeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.notification_store.silence_device(network_id, &req.device_ip).await;
    Ok(Json(serde_json::json!({ "silenced": true })))
}

pub async fn unsilence_device(
    State(state): State<AppState>,
    Path((network_id, device_ip)): Path<(Uuid, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.notification_store.unsilence_device(network_id, &device_ip).await;
    Ok(Json(serde_json::json!({ "silenced": false })))
}

#[derive(Debug, Deserialize)]
pub struct TestNotificationRequest {
    pub network_id: Uuid,
}

pub async fn send_test_notification(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<TestNotificationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let event = NotificationEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type: NotificationType::SystemStatus,
        priority: NotificationPriority::Low,
        network_id: Some(req.network_id),
        device_ip: None,
        device_name: None,
        device_hostname: None,
        previous_state: None,
        current_state: None,
        title: "Test notification".to_string(),
        message: format!("Requested by {}", user.username.as_deref().unwrap_or("unknown user")),
        details: Default::default(),
        anomaly_score: None,
        model_version: None,
        is_predicted_anomaly: None,
    };

    let outcome = state.dispatcher.dispatch_to_network(req.network_id, &event).await.map_err(anyhow::Error::from)?;
    Ok(Json(serde_json::json!({
        "delivered": outcome.delivered,
        "denied": outcome.denied,
        "failed": outcome.failed,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBroadcastRequest {
    pub title: String,
    pub message: String,
    pub event_type: NotificationType,
    pub priority: NotificationPriority,
    pub scheduled_at: chrono::DateTime<Utc>,
}

pub async fn list_broadcasts(State(state): State<AppState>) -> Json<Vec<ScheduledBroadcast>> {
    Json(state.notification_store.list_broadcasts())
}

pub async fn create_broadcast(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateBroadcastRequest>,
) -> Result<Json<ScheduledBroadcast>, ApiError> {
    let creator_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let broadcast = ScheduledBroadcast {
        id: Uuid::new_v4(),
        title: req.title,
        message: req.message,
        event_type: req.event_type,
        priority: req.priority,
        scheduled_at: req.scheduled_at,
        creator_id,
        status: BroadcastStatus::Pending,
        sent_at: None,
        users_notified: 0,
        error: None,
    };
    Ok(Json(state.notification_store.create_broadcast(broadcast).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBroadcastRequest {
    pub title: Option<String>,
    pub message: Option<String>,
    pub priority: Option<NotificationPriority>,
    pub scheduled_at: Option<chrono::DateTime<Utc>>,
}

pub async fn update_broadcast(
    State(state): State<AppState>,
    Path(broadcast_id): Path<Uuid>,
    Json(req): Json<UpdateBroadcastRequest>,
) -> Result<Json<ScheduledBroadcast>, ApiError> {
    let mut broadcast = state.notification_store.find_broadcast(broadcast_id).ok_or(ApiError::NotFound)?;
    if !broadcast.is_editable() {
        return Err(ApiError::Validation("only pending broadcasts can be edited".to_string()));
    }

    if let Some(title) = req.title {
        broadcast.title = title;
    }
    if let Some(message) = req.message {
        broadcast.message = message;
    }
    if let Some(priority) = req.priority {
        broadcast.priority = priority;
    }
    if let Some(scheduled_at) = req.scheduled_at {
        broadcast.scheduled_at = scheduled_at;
    }

    Ok(Json(state.notification_store.update_broadcast(broadcast).await?))
}

pub async fn cancel_broadcast(State(state): State<AppState>, Path(broadcast_id): Path<Uuid>) -> Result<Json<ScheduledBroadcast>, ApiError> {
    let mut broadcast = state.notification_store.find_broadcast(broadcast_id).ok_or(ApiError::NotFound)?;
    if !broadcast.is_editable() {
        return Err(ApiError::Validation("only pending broadcasts can be cancelled".to_string()));
    }
    broadcast.status = BroadcastStatus::Cancelled;
    Ok(Json(state.notification_store.update_broadcast(broadcast).await?))
}

pub async fn delete_broadcast(State(state): State<AppState>, Path(broadcast_id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    let broadcast = state.notification_store.find_broadcast(broadcast_id).ok_or(ApiError::NotFound)?;
    if !broadcast.is_deletable() {
        return Err(ApiError::Validation("pending broadcasts must be cancelled before they can be deleted".to_string()));
    }
    state.notification_store.delete_broadcast(broadcast_id);
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Serialize)]
pub struct VersionStatusResponse {
    pub current_version: String,
}

pub async fn version_status(State(_state): State<AppState>) -> Json<VersionStatusResponse> {
    Json(VersionStatusResponse { current_version: env!("CARGO_PKG_VERSION").to_string() })
}

#[derive(Debug, Serialize)]
pub struct CircuitStatus {
    pub upstream: String,
    pub state: fabric_domain_models::CircuitState,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    pub circuits: Vec<CircuitStatus>,
}

pub async fn service_status(State(state): State<AppState>) -> Json<ServiceStatusResponse> {
    let circuits = state.circuits.snapshot_all().into_iter().map(|(upstream, state)| CircuitStatus { upstream, state }).collect();
    Json(ServiceStatusResponse { circuits })
}
