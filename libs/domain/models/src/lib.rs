//! Shared data model for the gateway, identity plane, and notification pipeline.
//!
//! Pure types only: no I/O, no business rules beyond the small predicates
//! the data model itself is invariant on (e.g. network membership).

pub mod identity;
pub mod network;
pub mod notification;
pub mod preferences;
pub mod stats;
pub mod token;
pub mod user;

pub use identity::{AuthMethod, IdentityClaims, Invite, InviteStatus, PasswordResetToken, ProviderLink};
pub use network::{Network, NetworkPermission, PermissionRole};
pub use notification::{
    BroadcastStatus, NotificationEvent, NotificationPriority, NotificationRecord,
    NotificationType, ScheduledBroadcast,
};
pub use preferences::{QuietHours, UserGlobalPreferences, UserNetworkPreferences};
pub use stats::DeviceStats;
pub use token::{CircuitState, ServiceToken, TokenSubject};
pub use user::{Role, User};
