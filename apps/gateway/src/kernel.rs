//! Composition root and process lifecycle. `Kernel::ignite` builds every
//! manager and repository into an `AppState`; `Kernel::launch` runs the
//! startup sequence, serves HTTP, and runs the shutdown sequence on signal.

use std::sync::Arc;
use std::time::Duration;

use fabric_core_breaker::{BreakerConfig, CircuitRegistry};
use fabric_core_token::ServiceTokenAuthority;
use fabric_domain_identity::{CloudProvider, LocalProvider, Provider, UserSyncEngine};
use fabric_domain_notification::{AnomalyDetectorManager, MassOutageAggregator, NotificationDispatcher, Scheduler};
use fabric_infra_cache::{CacheConfig, CacheService};
use fabric_infra_delivery::{DeliveryChannel, DiscordChannelAdapter, DiscordDmAdapter, LoggingChannel, ResendEmailAdapter};
use fabric_infra_persistence::{IdentityStore, NetworkStore, NotificationStore};
use fabric_infra_upstream::UpstreamPool;
use fabric_shared_config::{AuthProvider, Settings};
use fabric_shared_statefile::StateDirectory;
use tokio::net::TcpListener;

use crate::bootstrap::Bootstrap;
use crate::routes;
use crate::state::AppState;

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const VERSION_CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);
const STATE_DIR: &str = "./data/state";

pub struct Kernel {
    state: AppState,
}

impl Kernel {
    pub async fn ignite(settings: Settings) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);

        let token_authority = Arc::new(ServiceTokenAuthority::new(settings.jwt_secret.clone())?);
        let circuits = Arc::new(CircuitRegistry::new(BreakerConfig::default()));
        let upstreams = Arc::new(UpstreamPool::new(circuits.clone()));
        upstreams.register_all(&settings.upstream_urls);

        let cache = Arc::new(
            CacheService::initialize(CacheConfig {
                enabled: settings.redis_cache_enabled,
                redis_url: settings.redis_url.clone(),
                redis_db: settings.redis_db,
            })
            .await,
        );

        let identity_store = Arc::new(IdentityStore::new());
        let network_store = Arc::new(NetworkStore::new());
        let notification_store = Arc::new(NotificationStore::new(identity_store.clone(), network_store.clone()));

        let identity_provider = Arc::new(match settings.auth_provider {
            AuthProvider::Local => Provider::Local(LocalProvider::new(token_authority.clone(), identity_store.clone())),
            AuthProvider::Cloud => {
                let webhook_secret = settings.webhook_secret.clone().unwrap_or_default();
                Provider::Cloud(CloudProvider::new(upstreams.clone(), webhook_secret))
            }
        });

        let sync_engine = Arc::new(UserSyncEngine::new(identity_store.clone()));

        let email: Arc<dyn DeliveryChannel> = match (&settings.resend_api_key, &settings.email_from) {
            (Some(key), Some(from)) => Arc::new(ResendEmailAdapter::new(key.clone(), from.clone())),
            _ => Arc::new(LoggingChannel::new("email")),
        };
        let chat_dm: Arc<dyn DeliveryChannel> = match &settings.discord_bot_token {
            Some(token) => Arc::new(DiscordDmAdapter::new(token.clone())),
            None => Arc::new(LoggingChannel::new("chat_dm")),
        };
        let chat_channel: Arc<dyn DeliveryChannel> = match &settings.discord_bot_token {
            Some(token) => Arc::new(DiscordChannelAdapter::new(token.clone())),
            None => Arc::new(LoggingChannel::new("chat_channel")),
        };

        let outage_aggregator = Arc::new(MassOutageAggregator::new());

        let dispatcher = Arc::new(NotificationDispatcher::new(
            notification_store.clone(),
            notification_store.clone(),
            outage_aggregator.clone(),
            email,
            chat_dm,
            chat_channel,
        ));

        let state_dir = Arc::new(StateDirectory::new(STATE_DIR)?);

        let scheduler = Arc::new(Scheduler::new(
            notification_store.clone(),
            notification_store.clone(),
            dispatcher.clone(),
            upstreams.clone(),
            state_dir.clone(),
            CURRENT_VERSION,
            VERSION_CHECK_INTERVAL,
        ));

        let anomaly_detectors = Arc::new(AnomalyDetectorManager::new());

        let state = AppState::new(
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
        );

        Ok(Self { state })
    }

    pub async fn launch(self) -> anyhow::Result<()> {
        Bootstrap::run_startup(&self.state).await;

        let port = self.state.settings.port;
        let router = routes::create_router(self.state.clone());
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "gateway listening");

        let shutdown_state = self.state.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
            })
            .await?;

        Bootstrap::run_shutdown(&shutdown_state).await;
        Ok(())
    }
}
