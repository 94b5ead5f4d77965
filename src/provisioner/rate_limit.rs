//! Single rate-limited gate in front of the spot-market provider
//! (spec.md section 4.4 step 3b and section 5, "Rate limiting").
//!
//! Hand-rolled rather than pulling in a crate like `governor`: the
//! core needs exactly one property (minimum spacing between calls,
//! plus a bounded-retry backoff wrapper on top), and the teacher
//! repo's own small concurrency primitives (see `infra/types.rs`'s
//! `RetryPolicy`) are similarly hand-rolled for single-purpose gates.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

pub struct RateGate {
    min_spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_call: Mutex::new(None),
        }
    }

    /// Blocks until at least `min_spacing` has elapsed since the last
    /// call admitted through this gate.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Exponential backoff (1s, 2s, 4s) with a ceiling of 3 retries on
/// 429-class transient errors, matching spec.md section 4.8's
/// provider-retry policy, reused by the Provisioner.
pub async fn retry_with_backoff<T, F, Fut>(operation: &str, target: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    const MAX_RETRIES: u32 = 3;
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                let delay = Duration::from_secs(1 << attempt);
                warn!(operation, target, attempt, delay_secs = delay.as_secs(), "transient error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(Error::TransientProviderError {
                    operation: operation.to_string(),
                    target: target.to_string(),
                    cause: format!("exhausted {MAX_RETRIES} retries: {e}"),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn gate_enforces_minimum_spacing() {
        let gate = RateGate::new(Duration::from_millis(50));
        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn retry_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", "host", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::TransientProviderError {
                    operation: "test".into(),
                    target: "host".into(),
                    cause: "429".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4); // initial + 3 retries
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", "host", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::TransientProviderError {
                        operation: "test".into(),
                        target: "host".into(),
                        cause: "429".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("test", "host", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ConfigurationError("bad config".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
