use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Why a guarded call did not produce a value.
///
/// `Open` and `Timeout` are produced by the breaker itself; `Inner` carries
/// the wrapped operation's own error unchanged.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Recent calls failed too often; the call was not attempted.
    #[error("circuit '{name}' is open, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    /// The call did not finish within `call_timeout` and was dropped.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Inner(E),
}

// ---------------------------------------------------------------------------
// State / config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before it closes again.
    pub success_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub cooldown: Duration,
    /// Upper bound for a single call.
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            cooldown: Duration::from_secs(120),
            call_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Bounds every call to an unreliable collaborator by a timeout and stops
/// calling it altogether after repeated failures.
///
/// State lives behind a std mutex that is never held across an await, so
/// `state()` is cheap enough for status snapshots.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    /// Run `f` through the breaker.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit::<E>()?;

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(e))
            }
            Err(_elapsed) => {
                self.on_failure();
                Err(CircuitBreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }
        let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed >= self.config.cooldown {
            info!(breaker = %self.name, "circuit half-open, probing");
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
            Ok(())
        } else {
            Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_in: self.config.cooldown - elapsed,
            })
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    info!(breaker = %self.name, "circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failures += 1;
        match inner.state {
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                warn!(breaker = %self.name, failures = inner.failures, "circuit opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.successes = 0;
            }
            _ => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.successes = 0;
        inner.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64, call_timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                success_threshold: 1,
                cooldown: Duration::from_millis(cooldown_ms),
                call_timeout: Duration::from_millis(call_timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn passes_values_and_inner_errors_through() {
        let cb = breaker(3, 1000, 1000);
        let ok: Result<u8, CircuitBreakerError<String>> = cb.call(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = cb
            .call(|| async { Err::<u8, _>("bad json".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CircuitBreakerError::Inner(ref m) if m == "bad json"));
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let cb = breaker(3, 1000, 20);
        let err = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CircuitBreakerError::Timeout(_)));
    }

    #[tokio::test]
    async fn opens_after_threshold_and_recovers_after_cooldown() {
        let cb = breaker(2, 40, 1000);
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("down") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert!(matches!(rejected, Err(CircuitBreakerError::Open { .. })));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cb.call(|| async { Ok::<_, String>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_trial_call_reopens() {
        let cb = breaker(1, 20, 1000);
        let _ = cb.call(|| async { Err::<(), _>("x") }).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = cb.call(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
