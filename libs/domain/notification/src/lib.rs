//! The notification pipeline: dispatch policy (C8), anomaly detection (C9),
//! mass-outage aggregation (C10), the dispatcher (C11), and the scheduler
//! (C12).

pub mod anomaly;
pub mod dispatch;
pub mod outage;
pub mod policy;
pub mod repository;
pub mod scheduler;

pub use anomaly::{AnomalyDetector, AnomalyDetectorManager, AnomalySignal, AnomalyType, HealthSample};
pub use dispatch::{DispatchError, DispatchOutcome, NotificationDispatcher, RecipientLookup};
pub use outage::MassOutageAggregator;
pub use policy::{DenyReason, DispatchPolicyEngine};
pub use repository::NotificationRepository;
pub use scheduler::{Scheduler, VersionCheck};
