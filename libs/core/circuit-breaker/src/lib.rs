//! Per-upstream circuit breaker.
//!
//! States and transitions mirror the CLOSED/OPEN/HALF_OPEN machine used by
//! the original service-auth circuit breaker, generalized to guard any
//! named upstream rather than just the identity service.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fabric_domain_models::CircuitState;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    #[error("upstream_unavailable")]
    UpstreamUnavailable,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_in_flight: 0,
        }
    }
}

/// A single named circuit. Cheap to read, mutex-guarded on writes; state
/// transitions log at INFO per spec.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut guard = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut guard);
        guard.state
    }

    /// Lazy state-transition-on-read: OPEN -> HALF_OPEN once the recovery
    /// timeout has elapsed since the last failure.
    fn maybe_transition_to_half_open(&self, guard: &mut Inner) {
        if guard.state == CircuitState::Open {
            if let Some(last_failure) = guard.last_failure {
                if last_failure.elapsed() >= self.config.recovery_timeout {
                    guard.state = CircuitState::HalfOpen;
                    guard.half_open_in_flight = 0;
                    info!(upstream = %self.name, "circuit half-open");
                }
            }
        }
    }

    /// Call before issuing a request. Returns `Err` if the request should be
    /// rejected without being attempted.
    pub fn allow_request(&self) -> Result<(), CircuitError> {
        let mut guard = self.inner.lock().unwrap();
        self.maybe_transition_to_half_open(&mut guard);

        match guard.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(CircuitError::UpstreamUnavailable),
            CircuitState::HalfOpen => {
                if guard.half_open_in_flight >= self.config.half_open_max_calls {
                    Err(CircuitError::UpstreamUnavailable)
                } else {
                    guard.half_open_in_flight += 1;
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut guard = self.inner.lock().unwrap();
        match guard.state {
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Closed;
                guard.failure_count = 0;
                guard.half_open_in_flight = 0;
                info!(upstream = %self.name, "circuit closed");
            }
            CircuitState::Closed => {
                guard.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut guard = self.inner.lock().unwrap();
        match guard.state {
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.last_failure = Some(Instant::now());
                guard.half_open_in_flight = 0;
                info!(upstream = %self.name, "circuit re-opened from half-open probe failure");
            }
            CircuitState::Closed => {
                guard.failure_count += 1;
                if guard.failure_count >= self.config.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.last_failure = Some(Instant::now());
                    info!(upstream = %self.name, failures = guard.failure_count, "circuit opened");
                }
            }
            CircuitState::Open => {
                guard.last_failure = Some(Instant::now());
            }
        }
    }
}

/// Registry of breakers, one per upstream name, created on first use.
pub struct CircuitRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut guard = self.breakers.lock().unwrap();
        guard
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(name, self.config)))
            .clone()
    }

    /// Current state of every upstream that has had a breaker created for
    /// it, for the service-status endpoint.
    pub fn snapshot_all(&self) -> Vec<(String, CircuitState)> {
        let guard = self.breakers.lock().unwrap();
        guard.iter().map(|(name, breaker)| (name.clone(), breaker.state())).collect()
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cfg = BreakerConfig { failure_threshold: 3, ..Default::default() };
        let breaker = CircuitBreaker::new("assistant", cfg);
        for _ in 0..2 {
            breaker.allow_request().unwrap();
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.allow_request().unwrap();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow_request().is_err());
    }

    #[test]
    fn half_open_single_success_closes() {
        let cfg = BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(0),
            half_open_max_calls: 1,
        };
        let breaker = CircuitBreaker::new("metrics", cfg);
        breaker.allow_request().unwrap();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // recovery_timeout is zero, so the next read flips to half-open.
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.allow_request().unwrap();
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cfg = BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(0),
            half_open_max_calls: 1,
        };
        let breaker = CircuitBreaker::new("health", cfg);
        breaker.allow_request().unwrap();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.allow_request().unwrap();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
