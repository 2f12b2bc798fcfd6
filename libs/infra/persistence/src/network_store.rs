//! In-memory network catalog and permission grants (C2's storage boundary).
//! No trait is defined for this in the domain layer — network CRUD is
//! gateway-owned, so the store is consumed directly by its handlers and by
//! [`crate::notification_store::NotificationStore`] for membership lookups.

use dashmap::DashMap;
use fabric_domain_models::{Network, NetworkPermission, PermissionRole};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum NetworkStoreError {
    #[error("not_found")]
    NotFound,
}

#[derive(Default)]
pub struct NetworkStore {
    networks: DashMap<Uuid, Network>,
    permissions: DashMap<Uuid, Vec<NetworkPermission>>,
}

impl NetworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, network: Network) -> Network {
        self.networks.insert(network.id, network.clone());
        network
    }

    pub fn find(&self, id: Uuid) -> Option<Network> {
        self.networks.get(&id).map(|n| n.clone())
    }

    pub fn update(&self, network: Network) -> Result<Network, NetworkStoreError> {
        let mut existing = self.networks.get_mut(&network.id).ok_or(NetworkStoreError::NotFound)?;
        *existing = network.clone();
        Ok(network)
    }

    pub fn delete(&self, id: Uuid) -> Result<(), NetworkStoreError> {
        self.networks.remove(&id).ok_or(NetworkStoreError::NotFound)?;
        self.permissions.remove(&id);
        Ok(())
    }

    pub fn owned_by(&self, owner_id: Uuid) -> Vec<Network> {
        self.networks.iter().filter(|n| n.owner_id == owner_id).map(|n| n.clone()).collect()
    }

    pub fn accessible_by(&self, user_id: Uuid) -> Vec<Network> {
        self.networks
            .iter()
            .filter(|n| n.has_access(user_id, &self.permissions_for(n.id)))
            .map(|n| n.clone())
            .collect()
    }

    pub fn permissions_for(&self, network_id: Uuid) -> Vec<NetworkPermission> {
        self.permissions.get(&network_id).map(|p| p.clone()).unwrap_or_default()
    }

    pub fn grant(&self, network_id: Uuid, user_id: Uuid, role: PermissionRole) {
        let mut grants = self.permissions.entry(network_id).or_default();
        if let Some(existing) = grants.iter_mut().find(|g| g.user_id == user_id) {
            existing.role = role;
        } else {
            grants.push(NetworkPermission { network_id, user_id, role });
        }
    }

    pub fn revoke(&self, network_id: Uuid, user_id: Uuid) {
        if let Some(mut grants) = self.permissions.get_mut(&network_id) {
            grants.retain(|g| g.user_id != user_id);
        }
    }

    /// Every user id with access to any network: owner ∪ permission holders,
    /// deduplicated, used for scheduled-broadcast fan-out.
    pub fn all_known_users(&self) -> Vec<Uuid> {
        let mut seen = std::collections::HashSet::new();
        for network in self.networks.iter() {
            seen.insert(network.owner_id);
        }
        for grants in self.permissions.iter() {
            for grant in grants.iter() {
                seen.insert(grant.user_id);
            }
        }
        seen.into_iter().collect()
    }

    pub fn members_of(&self, network_id: Uuid) -> Vec<Uuid> {
        match self.find(network_id) {
            Some(network) => network.members(&self.permissions_for(network_id)),
            None => Vec::new(),
        }
    }

    /// Every known network id, used by the scheduler to sweep mass-outage
    /// aggregation windows.
    pub fn all_ids(&self) -> Vec<Uuid> {
        self.networks.iter().map(|n| n.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_network(owner_id: Uuid) -> Network {
        let now = Utc::now();
        Network { id: Uuid::new_v4(), owner_id, name: "home".to_string(), description: None, layout: None, is_active: true, created_at: now, updated_at: now }
    }

    #[test]
    fn members_includes_owner_and_grantees() {
        let store = NetworkStore::new();
        let owner = Uuid::new_v4();
        let editor = Uuid::new_v4();
        let network = store.create(sample_network(owner));
        store.grant(network.id, editor, PermissionRole::Editor);

        let members = store.members_of(network.id);
        assert!(members.contains(&owner));
        assert!(members.contains(&editor));
    }

    #[test]
    fn revoke_removes_member() {
        let store = NetworkStore::new();
        let owner = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let network = store.create(sample_network(owner));
        store.grant(network.id, viewer, PermissionRole::Viewer);
        store.revoke(network.id, viewer);
        assert!(!store.members_of(network.id).contains(&viewer));
    }
}
