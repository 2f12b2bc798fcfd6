//! Network CRUD and permission management (C7's `/api/networks/*` surface).
//! Access is owner-or-permission-row, enforced per handler rather than by a
//! blanket middleware layer since the check is resource-scoped.

use axum::extract::{Extension, Path, State};
use axum::Json;
use chrono::Utc;
use fabric_domain_models::{Network, PermissionRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

fn require_access(state: &AppState, network: &Network, user_id: Uuid) -> Result<(), ApiError> {
    let permissions = state.network_store.permissions_for(network.id);
    if network.has_access(user_id, &permissions) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn require_write_access(state: &AppState, network: &Network, user_id: Uuid) -> Result<(), ApiError> {
    let permissions = state.network_store.permissions_for(network.id);
    if network.has_write_access(user_id, &permissions) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateNetworkRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn list_networks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Network>>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    Ok(Json(state.network_store.accessible_by(user_id)))
}

pub async fn create_network(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateNetworkRequest>,
) -> Result<Json<Network>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let now = Utc::now();
    let network = Network {
        id: Uuid::new_v4(),
        owner_id: user_id,
        name: req.name,
        description: req.description,
        layout: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    Ok(Json(state.network_store.create(network)))
}

pub async fn get_network(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
) -> Result<Json<Network>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let network = state.network_store.find(network_id).ok_or(ApiError::NotFound)?;
    require_access(&state, &network, user_id)?;
    Ok(Json(network))
}

#[derive(Debug, Deserialize)]
pub struct UpdateNetworkRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub layout: Option<serde_json::Value>,
    pub is_active: Option<bool>,
}

pub async fn update_network(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
    Json(req): Json<UpdateNetworkRequest>,
) -> Result<Json<Network>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let mut network = state.network_store.find(network_id).ok_or(ApiError::NotFound)?;
    require_write_access(&state, &network, user_id)?;

    if let Some(name) = req.name {
        network.name = name;
    }
    if let Some(description) = req.description {
        network.description = Some(description);
    }
    if let Some(layout) = req.layout {
        network.layout = Some(layout);
    }
    if let Some(is_active) = req.is_active {
        network.is_active = is_active;
    }
    network.updated_at = Utc::now();

    Ok(Json(state.network_store.update(network)?))
}

pub async fn delete_network(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let network = state.network_store.find(network_id).ok_or(ApiError::NotFound)?;
    if network.owner_id != user_id {
        return Err(ApiError::Forbidden);
    }
    state.network_store.delete(network_id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    pub user_id: Uuid,
    pub role: PermissionRole,
}

#[derive(Debug, Serialize)]
pub struct PermissionsResponse {
    pub permissions: Vec<fabric_domain_models::NetworkPermission>,
}

pub async fn list_permissions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
) -> Result<Json<PermissionsResponse>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let network = state.network_store.find(network_id).ok_or(ApiError::NotFound)?;
    require_access(&state, &network, user_id)?;
    Ok(Json(PermissionsResponse { permissions: state.network_store.permissions_for(network_id) }))
}

pub async fn grant_permission(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(network_id): Path<Uuid>,
    Json(req): Json<GrantPermissionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let network = state.network_store.find(network_id).ok_or(ApiError::NotFound)?;
    if network.owner_id != user_id {
        return Err(ApiError::Forbidden);
    }
    state.network_store.grant(network_id, req.user_id, req.role);
    Ok(Json(serde_json::json!({ "granted": true })))
}

pub async fn revoke_permission(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((network_id, target_user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = user.user_id.ok_or(ApiError::Unauthenticated)?;
    let network = state.network_store.find(network_id).ok_or(ApiError::NotFound)?;
    if network.owner_id != user_id {
        return Err(ApiError::Forbidden);
    }
    state.network_store.revoke(network_id, target_user_id);
    Ok(Json(serde_json::json!({ "revoked": true })))
}
