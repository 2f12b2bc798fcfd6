//! Registry of keep-alive HTTP clients, one per declared upstream service,
//! each call protected by that service's circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fabric_core_breaker::{CircuitBreaker, CircuitError, CircuitRegistry};
use reqwest::{Client, Method, Response};
use tracing::{info, warn};

const WARM_UP_PATHS: &[&str] = &["/health", "/healthz", "/api/health", "/"];

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("circuit_open")]
    CircuitOpen,
    #[error("unregistered upstream: {0}")]
    Unregistered(String),
    #[error("connect_error: {0}")]
    Connect(String),
    #[error("upstream_timeout")]
    Timeout(String),
    #[error("request build error: {0}")]
    Build(String),
}

impl From<CircuitError> for UpstreamError {
    fn from(_: CircuitError) -> Self {
        UpstreamError::CircuitOpen
    }
}

pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }
}

struct Upstream {
    base_url: String,
    client: Client,
}

pub struct UpstreamPool {
    upstreams: DashMap<String, Upstream>,
    circuits: Arc<CircuitRegistry>,
}

impl UpstreamPool {
    pub fn new(circuits: Arc<CircuitRegistry>) -> Self {
        Self { upstreams: DashMap::new(), circuits }
    }

    pub fn register(&self, name: &str, base_url: &str) {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .build()
            .expect("reqwest client builder should not fail with static config");

        self.upstreams.insert(
            name.to_string(),
            Upstream { base_url: base_url.trim_end_matches('/').to_string(), client },
        );
        self.circuits.get_or_create(name);
    }

    pub fn register_all(&self, upstreams: &HashMap<String, String>) {
        for (name, url) in upstreams {
            self.register(name, url);
        }
    }

    /// GETs each warm-up path in order and stops at the first non-5xx
    /// response. Failures are logged but never fatal.
    pub async fn warm_up_all(&self) {
        let names: Vec<String> = self.upstreams.iter().map(|e| e.key().clone()).collect();
        for name in names {
            for path in WARM_UP_PATHS {
                match self.request(&name, Method::GET, path, RequestOptions::default()).await {
                    Ok(resp) if resp.status().as_u16() < 500 => {
                        info!(upstream = %name, path, status = %resp.status(), "warm-up ok");
                        break;
                    }
                    Ok(resp) => {
                        warn!(upstream = %name, path, status = %resp.status(), "warm-up 5xx, trying next path");
                    }
                    Err(err) => {
                        warn!(upstream = %name, path, %err, "warm-up failed, trying next path");
                    }
                }
            }
        }
    }

    fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuits.get_or_create(name)
    }

    /// Issues a request routed through the named upstream's circuit
    /// breaker. Connection errors and timeouts count as circuit failures;
    /// any other non-2xx response from the upstream is an application-level
    /// result, not a circuit failure.
    pub async fn request(
        &self,
        name: &str,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, UpstreamError> {
        let upstream = self
            .upstreams
            .get(name)
            .ok_or_else(|| UpstreamError::Unregistered(name.to_string()))?;

        let breaker = self.breaker(name);
        breaker.allow_request()?;

        let url = format!("{}{}", upstream.base_url, path);
        let mut builder = upstream.client.request(method, &url).timeout(options.timeout);
        for (key, value) in &options.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = options.body {
            builder = builder.body(body);
        }

        match builder.send().await {
            Ok(response) => {
                breaker.on_success();
                Ok(response)
            }
            Err(err) if err.is_connect() => {
                breaker.on_failure();
                Err(UpstreamError::Connect(err.to_string()))
            }
            Err(err) if err.is_timeout() => {
                breaker.on_failure();
                Err(UpstreamError::Timeout(err.to_string()))
            }
            Err(err) => {
                breaker.on_failure();
                Err(UpstreamError::Build(err.to_string()))
            }
        }
    }

    pub async fn close_all(&self) {
        self.upstreams.clear();
        info!("upstream pool closed");
    }
}
