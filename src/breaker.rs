//! Circuit breaker: per-endpoint failure isolation.
//!
//! State machine per named key:
//!
//! ```text
//! Closed → Open: failure_count reaches failure_threshold
//! Open → HalfOpen: reset_time elapsed since last failure
//! HalfOpen → Closed: half_open_max_calls consecutive probe successes
//! HalfOpen → Open: any probe failure
//! ```
//!
//! Calls rejected while open (or beyond the half-open probe budget) fail
//! fast with a retryable `SERVICE_UNAVAILABLE` error and never invoke the
//! wrapped operation. Breakers are independent per name and never share
//! counters.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{DomainError, ErrorCode, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown before an open circuit admits a probe.
    pub reset_time: Duration,
    /// Probe budget while half-open; also the successes needed to close.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_time: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
}

/// Read-only view of a breaker for dashboards and logs.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    /// Milliseconds since the failure that last affected the state, if any.
    pub last_failure_age_ms: Option<u64>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    // Never held across an await; admission and recording are separate
    // critical sections around the wrapped call.
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run an operation through the breaker. Rejected calls never invoke
    /// the operation.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.config.reset_time);
                if !cooled_down {
                    return Err(self.rejection());
                }
                inner.state = CircuitState::HalfOpen;
                inner.half_open_calls = 1;
                inner.success_count = 0;
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    return Err(self.rejection());
                }
                inner.half_open_calls += 1;
                Ok(())
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_calls {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.half_open_calls = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(Instant::now());
                    warn!(breaker = %self.name, failures = inner.failure_count, "circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(Instant::now());
                warn!(breaker = %self.name, "probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    fn rejection(&self) -> DomainError {
        DomainError::new(
            ErrorCode::ServiceUnavailable,
            format!("'{}' is failing fast after repeated errors", self.name),
        )
        .with_hint("The service will be retried automatically once it recovers.")
        .with_context("breaker", serde_json::Value::String(self.name.clone()))
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_age_ms: inner
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Maintenance hook: trip the breaker regardless of counters.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Instant::now());
    }

    /// Maintenance hook: return to closed and clear all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        *inner = BreakerInner {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            last_failure: None,
        };
    }
}

/// Registry of named breakers, created lazily on first use and alive for the
/// process lifetime.
pub struct CircuitBreakers {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing() -> Result<()> {
        Err(DomainError::new(ErrorCode::ServerError, "boom"))
    }

    async fn fail_once(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { failing() }).await;
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(
            "workflows",
            BreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );

        for _ in 0..2 {
            fail_once(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_invoking_operation() {
        let breaker = CircuitBreaker::new(
            "agents",
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.code, ErrorCode::ServiceUnavailable);
        assert!(error.retryable);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_to_half_open_after_reset_time() {
        let breaker = CircuitBreaker::new(
            "training",
            BreakerConfig {
                failure_threshold: 1,
                reset_time: Duration::from_secs(30),
                half_open_max_calls: 2,
            },
        );
        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Before the cooldown, still rejecting.
        assert!(breaker.call(|| async { Ok(()) }).await.is_err());

        tokio::time::advance(Duration::from_secs(30)).await;

        // Probe admitted; success counted toward closing.
        assert!(breaker.call(|| async { Ok(()) }).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(breaker.call(|| async { Ok(()) }).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            "models",
            BreakerConfig {
                failure_threshold: 1,
                reset_time: Duration::from_secs(5),
                half_open_max_calls: 3,
            },
        );
        fail_once(&breaker).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        fail_once(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_budget_is_enforced() {
        let breaker = Arc::new(CircuitBreaker::new(
            "quota",
            BreakerConfig {
                failure_threshold: 1,
                reset_time: Duration::from_secs(1),
                half_open_max_calls: 1,
            },
        ));
        fail_once(&breaker).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        // First probe is admitted and held in flight; the second must be
        // rejected while the budget is consumed.
        let probe = breaker.clone();
        let held = tokio::spawn(async move {
            probe
                .call(|| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let rejected = breaker
            .call(|| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(rejected.code, ErrorCode::ServiceUnavailable);

        assert!(held.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let breaker = CircuitBreaker::new(
            "sessions",
            BreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        fail_once(&breaker).await;
        assert!(breaker.call(|| async { Ok(()) }).await.is_ok());
        fail_once(&breaker).await;
        // Two failures total but never two consecutive; still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn registry_creates_independent_breakers() {
        let registry = CircuitBreakers::new(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let a = registry.get_or_create("a");
        let b = registry.get_or_create("b");

        let _ = a.call(|| async { failing() }).await;
        assert_eq!(a.state(), CircuitState::Open);
        assert_eq!(b.state(), CircuitState::Closed);

        // Same name returns the same breaker.
        assert_eq!(registry.get_or_create("a").state(), CircuitState::Open);

        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().any(|s| s.name == "a" && s.failure_count == 1));
    }

    #[tokio::test]
    async fn maintenance_hooks_force_and_reset() {
        let breaker = CircuitBreaker::new("admin", BreakerConfig::default());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.snapshot().last_failure_age_ms.is_none());
    }
}
