//! Retrying wrapper for network operations.
//!
//! Every REST call in the crate funnels through [`with_retry`]. Cancellation
//! and authentication failures propagate on the first occurrence; everything
//! else sleeps and retries with a multiplicatively growing delay.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::FetchConfig;
use crate::error::Result;

/// Bounds for one logical operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            ..Default::default()
        }
    }
}

/// Delay sequence for reconnection and retry waits.
///
/// The first delay is the configured initial delay; each subsequent delay is
/// multiplied by the factor and capped. Jitter, when enabled, is additive
/// only, so the sequence never shrinks between attempts.
pub struct Backoff {
    next_delay_ms: f64,
    multiplier: f64,
    max_delay_ms: f64,
    jitter_factor: f64,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            next_delay_ms: policy.initial_delay.as_millis() as f64,
            multiplier: policy.backoff_factor,
            max_delay_ms: policy.max_delay.as_millis() as f64,
            jitter_factor: 0.0,
        }
    }

    /// Enable additive jitter of up to `factor` of the base delay. Used by
    /// the stream reconnect path so a fleet of clients does not stampede.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_delay_ms.min(self.max_delay_ms);
        let delay = if self.jitter_factor > 0.0 {
            base + rand::rng().random_range(0.0..base * self.jitter_factor)
        } else {
            base
        };
        self.next_delay_ms = base * self.multiplier;
        Duration::from_millis(delay as u64)
    }
}

/// Run `operation` up to `policy.max_attempts` times.
///
/// On exhaustion the last failure propagates unchanged; nothing is wrapped
/// that would obscure the cause.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(policy);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && e.is_retryable() => {
                let delay = backoff.next_delay();
                tracing::debug!(
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_backoff_delays_are_non_decreasing() {
        let mut backoff = Backoff::new(&RetryPolicy::default());
        let d1 = backoff.next_delay();
        let d2 = backoff.next_delay();
        let d3 = backoff.next_delay();
        assert_eq!(d1, Duration::from_millis(1000));
        assert!(d2 >= d1);
        assert!(d3 >= d2);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let mut backoff = Backoff::new(&RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 10.0,
            max_delay: Duration::from_secs(5),
        });
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert!(backoff.next_delay() <= Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_stays_non_decreasing() {
        let mut backoff = Backoff::new(&RetryPolicy::default()).with_jitter(0.2);
        let mut previous = Duration::ZERO;
        for _ in 0..6 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result = with_retry(&fast_policy(), move || {
            let calls = calls_in_op.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::StreamClosed)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_required_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<()> = with_retry(&fast_policy(), move || {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::AuthRequired)
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::AuthRequired)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let result: Result<()> = with_retry(&fast_policy(), move || {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Cancelled)
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_propagates_last_failure() {
        let result: Result<()> = with_retry(&fast_policy(), || async {
            Err(SyncError::StreamClosed)
        })
        .await;
        assert!(matches!(result, Err(SyncError::StreamClosed)));
    }
}
