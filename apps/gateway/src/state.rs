//! Composition root. `AppState` bundles every manager and repository the
//! handlers need behind `Arc`, plus a readiness gate consulted by
//! `middleware::health_guard`.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use fabric_core_breaker::CircuitRegistry;
use fabric_core_token::ServiceTokenAuthority;
use fabric_domain_identity::{Provider, UserSyncEngine};
use fabric_domain_notification::{AnomalyDetectorManager, MassOutageAggregator, NotificationDispatcher, Scheduler};
use fabric_infra_cache::CacheService;
use fabric_infra_persistence::{IdentityStore, NetworkStore, NotificationStore};
use fabric_infra_upstream::UpstreamPool;
use fabric_shared_config::Settings;
use fabric_shared_statefile::StateDirectory;

use crate::middleware::AuthenticatedUser;

/// Liveness gate consulted by every authenticated and owner-only route.
/// Mirrors the readiness flag pattern used by every other service in this
/// fabric, generalized from a single boolean to a reason string so a 503
/// response can say why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMode {
    Operational,
    Maintenance(String),
}

/// Five-minute cache of resolved remote-provider sessions, keyed by a
/// truncated SHA-256 of the bearer/cookie token so raw tokens never sit in
/// memory longer than the request that carried them.
#[derive(Default)]
pub struct SessionCache {
    entries: DashMap<String, (AuthenticatedUser, Instant)>,
}

impl SessionCache {
    const TTL_SECS: u64 = 300;

    pub fn get(&self, key: &str) -> Option<AuthenticatedUser> {
        let entry = self.entries.get(key)?;
        if entry.1.elapsed().as_secs() > Self::TTL_SECS {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.0.clone())
    }

    pub fn put(&self, key: String, user: AuthenticatedUser) {
        self.entries.insert(key, (user, Instant::now()));
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub token_authority: Arc<ServiceTokenAuthority>,
    pub circuits: Arc<CircuitRegistry>,
    pub upstreams: Arc<UpstreamPool>,
    pub cache: Arc<CacheService>,
    pub identity_store: Arc<IdentityStore>,
    pub network_store: Arc<NetworkStore>,
    pub notification_store: Arc<NotificationStore>,
    pub identity_provider: Arc<Provider>,
    pub sync_engine: Arc<UserSyncEngine>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub anomaly_detectors: Arc<AnomalyDetectorManager>,
    pub outage_aggregator: Arc<MassOutageAggregator>,
    pub state_dir: Arc<StateDirectory>,
    pub session_cache: Arc<SessionCache>,
    mode: Arc<RwLock<SystemMode>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        token_authority: Arc<ServiceTokenAuthority>,
        circuits: Arc<CircuitRegistry>,
        upstreams: Arc<UpstreamPool>,
        cache: Arc<CacheService>,
        identity_store: Arc<IdentityStore>,
        network_store: Arc<NetworkStore>,
        notification_store: Arc<NotificationStore>,
        identity_provider: Arc<Provider>,
        sync_engine: Arc<UserSyncEngine>,
        dispatcher: Arc<NotificationDispatcher>,
        scheduler: Arc<Scheduler>,
        anomaly_detectors: Arc<AnomalyDetectorManager>,
        outage_aggregator: Arc<MassOutageAggregator>,
        state_dir: Arc<StateDirectory>,
    ) -> Self {
        Self {
            settings,
            token_authority,
            circuits,
            upstreams,
            cache,
            identity_store,
            network_store,
            notification_store,
            identity_provider,
            sync_engine,
            dispatcher,
            scheduler,
            anomaly_detectors,
            outage_aggregator,
            state_dir,
            session_cache: Arc::new(SessionCache::default()),
            mode: Arc::new(RwLock::new(SystemMode::Maintenance("starting up".to_string()))),
        }
    }

    pub fn set_mode(&self, mode: SystemMode) {
        *self.mode.write().expect("system mode lock poisoned") = mode;
    }

    pub fn is_operational(&self) -> Result<(), String> {
        match &*self.mode.read().expect("system mode lock poisoned") {
            SystemMode::Operational => Ok(()),
            SystemMode::Maintenance(reason) => Err(reason.clone()),
        }
    }
}
