pub mod auth;
pub mod networks;
pub mod notifications;
pub mod proxy;
pub mod spa;
pub mod telemetry;
pub mod webhooks;
