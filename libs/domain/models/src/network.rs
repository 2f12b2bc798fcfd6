use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;
use uuid::Uuid;

#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionRole {
    Viewer,
    Editor,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPermission {
    pub network_id: Uuid,
    pub user_id: Uuid,
    pub role: PermissionRole,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub layout: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Network {
    /// A user has access iff they own the network or hold a permission row.
    pub fn has_access(&self, user_id: Uuid, permissions: &[NetworkPermission]) -> bool {
        self.owner_id == user_id
            || permissions
                .iter()
                .any(|p| p.network_id == self.id && p.user_id == user_id)
    }

    pub fn has_write_access(&self, user_id: Uuid, permissions: &[NetworkPermission]) -> bool {
        self.owner_id == user_id
            || permissions.iter().any(|p| {
                p.network_id == self.id && p.user_id == user_id && p.role == PermissionRole::Editor
            })
    }

    /// Members of this network: the owner plus every permission holder.
    pub fn members(&self, permissions: &[NetworkPermission]) -> Vec<Uuid> {
        let mut members = vec![self.owner_id];
        for p in permissions.iter().filter(|p| p.network_id == self.id) {
            if !members.contains(&p.user_id) {
                members.push(p.user_id);
            }
        }
        members
    }
}
