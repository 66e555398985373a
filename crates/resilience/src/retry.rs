//! Exponential backoff with jitter for transient infrastructure failures.
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// `max_retries` attempts after the first try; `base_ms`/`cap_ms` bound the
/// exponential curve, `jitter_factor` is the ± fraction applied on top.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_ms: 100,
            cap_ms: 5_000,
            jitter_factor: 0.3,
        }
    }
}

/// Outcome of a `with_retry` call. `error` carries the last failure when
/// `success` is false; callers decide whether that means dead-lettering the
/// batch or failing the request, `with_retry` itself never decides.
#[derive(Debug, PartialEq)]
pub struct RetryOutcome<T, E> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<E>,
    pub attempts: u32,
}

/// Runs `f` until it succeeds or `config.max_retries` extra attempts are
/// exhausted, sleeping `delay(attempt)` between attempts:
/// `min(cap_ms, base_ms * 2^attempt) * (1 + U(-jitter_factor, jitter_factor))`.
pub async fn with_retry<F, Fut, T, E>(name: &str, config: &RetryConfig, mut f: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut last_error = None;

    loop {
        match f().await {
            Ok(result) => {
                return RetryOutcome {
                    success: true,
                    result: Some(result),
                    error: None,
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                warn!(operation = name, attempt, error = %e, "operation failed");
                last_error = Some(e);
                if attempt >= config.max_retries {
                    return RetryOutcome {
                        success: false,
                        result: None,
                        error: last_error,
                        attempts: attempt + 1,
                    };
                }
                let delay = delay_for_attempt(config, attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_ms.saturating_mul(1u64 << attempt.min(32));
    let bounded = exp.min(config.cap_ms) as f64;
    let jitter = rand::rng().random_range(-config.jitter_factor..=config.jitter_factor);
    let millis = (bounded * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = with_retry("noop", &config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.result, Some(42));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let config = RetryConfig {
            max_retries: 3,
            base_ms: 1,
            cap_ms: 10,
            jitter_factor: 0.0,
        };
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = with_retry("flaky", &config, move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_last_error() {
        let config = RetryConfig {
            max_retries: 2,
            base_ms: 1,
            cap_ms: 10,
            jitter_factor: 0.0,
        };
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let outcome = with_retry("always-fails", &config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("persistent error") }
        })
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error, Some("persistent error"));
        assert_eq!(outcome.attempts, 3); // initial + 2 retries
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_respects_cap() {
        let config = RetryConfig {
            max_retries: 10,
            base_ms: 100,
            cap_ms: 500,
            jitter_factor: 0.0,
        };
        assert_eq!(delay_for_attempt(&config, 0).as_millis(), 100);
        assert_eq!(delay_for_attempt(&config, 1).as_millis(), 200);
        assert_eq!(delay_for_attempt(&config, 2).as_millis(), 400);
        assert_eq!(delay_for_attempt(&config, 3).as_millis(), 500); // capped
        assert_eq!(delay_for_attempt(&config, 10).as_millis(), 500);
    }
}
