//! In-memory repository implementations wired into the gateway. No SQL
//! driver is mandated by the storage contract, so these DashMap-backed
//! stores stand in as the reference implementation of both
//! `fabric_domain_identity::IdentityRepository` and
//! `fabric_domain_notification::NotificationRepository` (see DESIGN.md).

pub mod identity_store;
pub mod network_store;
pub mod notification_store;

pub use identity_store::IdentityStore;
pub use network_store::{NetworkStore, NetworkStoreError};
pub use notification_store::NotificationStore;
