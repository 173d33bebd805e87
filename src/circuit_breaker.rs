//! Circuit breaker pattern implementation.

use crate::error::{HttpClientError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single probe request is allowed.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures that opens the circuit.
    pub failure_threshold: u32,
    /// Cooldown before a probe is allowed through an open circuit.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker config.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
        }
    }
}

/// Snapshot of breaker state for management endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failure count.
    pub failures: u32,
    /// Total successful calls.
    pub successes: u64,
    /// Closed and below the failure threshold.
    pub is_healthy: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    successes: u64,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker gating a fallible async operation.
///
/// All mutations happen under one mutex held only across constant-time
/// sections; the gated operation itself runs outside the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                successes: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Run `thunk` through the breaker gate.
    ///
    /// An open circuit rejects with [`HttpClientError::CircuitOpen`] without
    /// invoking the thunk. Once the reset timeout has elapsed, exactly one
    /// probe call is let through; its outcome decides whether the circuit
    /// closes again or reopens.
    pub async fn call<T, F, Fut>(&self, thunk: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let is_probe = self.acquire()?;
        let guard = ProbeGuard {
            breaker: self,
            armed: is_probe,
        };

        match thunk().await {
            Ok(value) => {
                guard.disarm();
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                guard.disarm();
                self.on_failure();
                Err(error)
            }
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot breaker counters.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            failures: inner.consecutive_failures,
            successes: inner.successes,
            is_healthy: inner.state == CircuitState::Closed
                && inner.consecutive_failures < self.config.failure_threshold,
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!("Circuit breaker reset to closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        inner.last_failure_at = None;
    }

    /// Admit or reject a call. Returns whether the admitted call is the
    /// half-open probe.
    fn acquire(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .is_none_or(|at| at.elapsed() > self.config.reset_timeout);
                if cooled_down {
                    debug!("Circuit breaker transitioning to half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(true)
                } else {
                    Err(HttpClientError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(HttpClientError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.successes += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                info!("Circuit breaker closing after successful probe");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.probe_in_flight = false;
            }
            CircuitState::Open => {
                debug!("Success recorded while circuit open, ignoring");
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.last_failure_at = Some(Instant::now());
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "Circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker reopening after failed probe");
                inner.state = CircuitState::Open;
                inner.last_failure_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }
}

/// Releases the half-open probe slot if the gated future is dropped before
/// it settles, so a cancelled probe cannot wedge the breaker.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.probe_in_flight = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fail() -> Result<()> {
        Err(HttpClientError::Network {
            url: "https://a".into(),
            message: "reset".into(),
        })
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(60)));

        for _ in 0..2 {
            let _ = cb.call(|| async { fail() }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(HttpClientError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(3, Duration::from_secs(60)));

        let _ = cb.call(|| async { fail() }).await;
        let _ = cb.call(|| async { fail() }).await;
        cb.call(|| async { Ok(()) }).await.unwrap();

        assert_eq!(cb.stats().failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_probe_success_closes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(10)));

        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        cb.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.stats().is_healthy);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_millis(10)));

        let _ = cb.call(|| async { fail() }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown restarts from the probe failure.
        let rejected = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(HttpClientError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_single_probe_in_half_open() {
        let cb = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new(
            1,
            Duration::from_millis(10),
        )));

        let _ = cb.call(|| async { fail() }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let probe_cb = cb.clone();
        let probe = tokio::spawn(async move {
            probe_cb
                .call(|| async {
                    let _ = rx.await;
                    Ok(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let rejected = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(HttpClientError::CircuitOpen)));

        tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_probe_releases_slot() {
        let cb = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::new(
            1,
            Duration::from_millis(10),
        )));

        let _ = cb.call(|| async { fail() }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let probe_cb = cb.clone();
        let probe = tokio::spawn(async move {
            probe_cb
                .call(|| async {
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        probe.abort();
        let _ = probe.await;

        // The aborted probe must not leave the slot taken.
        cb.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        let _ = cb.call(|| async { fail() }).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.stats().is_healthy);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.stats().is_healthy);
        cb.call(|| async { Ok(()) }).await.unwrap();
    }
}
