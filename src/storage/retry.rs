//! Bounded exponential backoff for storage writes.

use std::time::Duration;
use tracing::{error, warn};

use super::StorageError;
use crate::config::StorageConfig;

/// `attempts` tries with `base_delay * 2^n` sleeps in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Delay before retry number `retry` (1-based).
    fn delay_for(&self, retry: u32) -> Duration {
        // 2^16 × base is already minutes; cap the shift so it never overflows
        self.base_delay.saturating_mul(1u32 << (retry - 1).min(16))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Non-transient errors (conflicts, integrity) are returned immediately.
    pub async fn run<T, F>(&self, what: &'static str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Result<T, StorageError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.attempts => {
                    error!(op = what, attempts = attempt, error = %e, "Storage write failed after retries");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = what,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Storage write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delays_double() {
        let p = RetryPolicy::new(3, Duration::from_millis(50));
        assert_eq!(p.delay_for(1), Duration::from_millis(50));
        assert_eq!(p.delay_for(2), Duration::from_millis(100));
        assert_eq!(p.delay_for(3), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let p = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Cell::new(0);
        let result = p
            .run("test", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(StorageError::Unavailable("flaky".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let p = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Cell::new(0);
        let result: Result<(), _> = p
            .run("test", || {
                calls.set(calls.get() + 1);
                Err(StorageError::Unavailable("down".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn conflicts_are_not_retried() {
        let p = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Cell::new(0);
        let result: Result<(), _> = p
            .run("test", || {
                calls.set(calls.get() + 1);
                Err(StorageError::Conflict("dup".into()))
            })
            .await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
        assert_eq!(calls.get(), 1);
    }
}
