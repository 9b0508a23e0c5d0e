//! Circuit breaker guarding writes to the account store.
//!
//! While the store is failing, mutations are queued locally without first
//! waiting on a doomed round trip. After `open_duration` a probe is allowed
//! through; enough consecutive successes close the circuit again.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Calls go through
    Closed,
    /// Calls are rejected without reaching the store
    Open,
    /// Probing whether the store recovered
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_duration: Duration,
    /// Successful probes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may be attempted now. Moves an expired open circuit
    /// to half-open.
    pub async fn can_execute(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let expired = inner
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.config.open_duration);
                if expired {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.successes = 0;
                    info!("Circuit breaker '{}' transitioned to HALF-OPEN", self.name);
                }
                expired
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitBreakerState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                    info!("Circuit breaker '{}' transitioned to CLOSED", self.name);
                }
            }
            CircuitBreakerState::Closed => inner.failures = 0,
            CircuitBreakerState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        let trip = match inner.state {
            CircuitBreakerState::Closed => {
                inner.failures += 1;
                inner.failures >= self.config.failure_threshold
            }
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => false,
        };

        if trip {
            inner.state = CircuitBreakerState::Open;
            inner.successes = 0;
            inner.opened_at = Some(Instant::now());
            warn!("Circuit breaker '{}' transitioned to OPEN", self.name);
        }
    }

    pub async fn state(&self) -> CircuitBreakerState {
        self.inner.read().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn config(failure_threshold: u32, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            open_duration: Duration::from_millis(50),
            success_threshold,
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_to_open() {
        let cb = CircuitBreaker::new("accounts", config(3, 1));

        assert!(cb.can_execute().await);
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Open);
        assert!(!cb.can_execute().await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("accounts", config(2, 1));
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_recovery() {
        let cb = CircuitBreaker::new("accounts", config(1, 2));
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Open);

        sleep(Duration::from_millis(60)).await;
        assert!(cb.can_execute().await);
        assert_eq!(cb.state().await, CircuitBreakerState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitBreakerState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_failure() {
        let cb = CircuitBreaker::new("accounts", config(1, 1));
        cb.record_failure().await;
        sleep(Duration::from_millis(60)).await;
        assert!(cb.can_execute().await);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Open);
        assert!(!cb.can_execute().await);
    }
}
