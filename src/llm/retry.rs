//! Bounded retry around gateway calls.
//!
//! Only [`GatewayError::is_retryable`] failures are retried. Malformed model
//! output is reported by the caller after a successful call, so it never
//! reaches this loop.

use super::gateway::GatewayError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_BACKOFF_MS: u64 = 4_000;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let max_retries = std::env::var("GATEWAY_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(2);
        let base_ms = std::env::var("GATEWAY_RETRY_BASE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(250);
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential delay for the given retry (1-based), capped, with ±20% jitter.
    fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let exp = base
            .saturating_mul(1u64 << (retry - 1).min(16))
            .min(MAX_BACKOFF_MS);
        let spread = exp / 5;
        let jittered = if spread == 0 {
            exp
        } else {
            rand::rng().random_range(exp - spread..=exp + spread)
        };
        Duration::from_millis(jittered)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_env()
    }
}

pub async fn retry_upstream<F, Fut, T>(
    operation: &'static str,
    policy: RetryPolicy,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let started = Instant::now();
    let mut retry = 0u32;

    loop {
        match call().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(
                        target = "stylist.gateway",
                        operation,
                        retries = retry,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "gateway call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    target = "stylist.gateway",
                    operation,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "gateway call failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable(status: Option<u16>) -> GatewayError {
        GatewayError::UpstreamUnavailable {
            status,
            detail: String::new(),
        }
    }

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let out = retry_upstream("test", instant(2), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(unavailable(Some(503)))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(out, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = retry_upstream("test", instant(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable(None)) }
        })
        .await;
        assert_eq!(out, Err(unavailable(None)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        for err in [
            GatewayError::MissingCredential,
            GatewayError::InvalidResponse("bad".into()),
            unavailable(Some(401)),
        ] {
            let calls = AtomicU32::new(0);
            let expected = err.clone();
            let out: Result<(), _> = retry_upstream("test", instant(3), || {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = err.clone();
                async move { Err(err) }
            })
            .await;
            assert_eq!(out, Err(expected));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(1_000),
        };
        let first = policy.delay_for(1).as_millis() as u64;
        assert!((800..=1_200).contains(&first));
        let second = policy.delay_for(2).as_millis() as u64;
        assert!((1_600..=2_400).contains(&second));
        let capped = policy.delay_for(8).as_millis() as u64;
        assert!(capped <= MAX_BACKOFF_MS + MAX_BACKOFF_MS / 5);
    }
}
