//! Circuit breaker guarding the rate limiter's abstract backend call
//! (SUPPLEMENTED FEATURES, DESIGN.md): a backend failing repeatedly is
//! tripped out of rotation instead of continuing to queue waiters against
//! it, orthogonal to the token bucket's admission control.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    config: CircuitBreakerConfig,
    failure_count: AtomicUsize,
    success_count: AtomicUsize,
    opened_at_ms: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            config,
            failure_count: AtomicUsize::new(0),
            success_count: AtomicUsize::new(0),
            opened_at_ms: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.check_state_transition();
        *self.state.read().unwrap()
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.success_threshold as usize {
                    self.close();
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.failure_threshold as usize {
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn open(&self) {
        *self.state.write().unwrap() = CircuitState::Open;
        self.opened_at_ms.store(now_ms(), Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub fn close(&self) {
        *self.state.write().unwrap() = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
    }

    fn check_state_transition(&self) {
        let is_open = matches!(*self.state.read().unwrap(), CircuitState::Open);
        if !is_open {
            return;
        }
        let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
        if now_ms().saturating_sub(opened_at) >= self.config.reset_timeout.as_millis() as u64 {
            let mut state = self.state.write().unwrap();
            if *state == CircuitState::Open {
                *state = CircuitState::HalfOpen;
                self.success_count.store(0, Ordering::SeqCst);
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit is open")]
    CircuitOpen,
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Run `operation` through the breaker: rejected immediately while open,
/// otherwise the result is recorded back into the breaker's counters.
pub async fn with_circuit_breaker<F, Fut, T, E>(
    breaker: &CircuitBreaker,
    operation: F,
) -> Result<T, CircuitBreakerError<E>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    if !breaker.is_allowed() {
        return Err(CircuitBreakerError::CircuitOpen);
    }
    match operation().await {
        Ok(v) => {
            breaker.record_success();
            Ok(v)
        }
        Err(e) => {
            breaker.record_failure();
            Err(CircuitBreakerError::OperationFailed(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_allowed());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(0),
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn with_circuit_breaker_rejects_when_open() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        breaker.record_failure();
        let result: Result<(), CircuitBreakerError<&str>> =
            with_circuit_breaker(&breaker, || async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }
}
