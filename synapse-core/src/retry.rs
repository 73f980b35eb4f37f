//! Exponential backoff with jitter, shared by cold-tier writes and any
//! other best-effort operation that must retry without a caller-visible
//! failure on the first hiccup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = base.min(self.max_delay.as_millis() as f64);
        let final_delay = if self.add_jitter {
            clamped + clamped * 0.25 * jitter()
        } else {
            clamped
        };
        Duration::from_millis(final_delay as u64)
    }
}

/// Deterministic-enough pseudo-random jitter in [0,1). Avoids pulling in a
/// dedicated `rand` dependency for a value this inconsequential.
fn jitter() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0);

    const A: u64 = 1103515245;
    const C: u64 = 12345;
    const M: u64 = 1 << 31;

    let seed = SEED.fetch_add(1, Ordering::Relaxed);
    let time_component = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let combined = seed.wrapping_add(time_component);
    let next = (A.wrapping_mul(combined).wrapping_add(C)) % M;
    (next as f64) / (M as f64)
}

/// Run `operation` until it succeeds or `config.max_attempts` is exhausted,
/// sleeping `delay_for_attempt` between tries.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(config.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_without_jitter() {
        let config = RetryConfig {
            add_jitter: false,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(0).as_millis(), 500);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 1000);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 2000);
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            add_jitter: false,
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn with_retry_succeeds_eventually() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let attempts = AtomicUsize::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result: Result<&str, &str> = with_retry(&config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("transient") } else { Ok("done") } }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }
}
