//! Bounded exponential backoff for transient orchestrator failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::errors::KataboxResult;
use crate::options::RetryPolicy;

/// Run `op`, retrying transient failures with jittered exponential
/// backoff up to the policy's attempt ceiling. Non-transient errors
/// surface immediately.
pub(crate) async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> KataboxResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = KataboxResult<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let jittered = jitter(delay);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = jittered.as_millis() as u64,
                    error = %err,
                    "transient orchestrator failure, backing off"
                );
                tokio::time::sleep(jittered).await;
                delay = (delay * 2).min(policy.max_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Half the delay fixed, half random, so synchronized retries spread out.
fn jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    half + rand::rng().random_range(Duration::ZERO..=half)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KataboxError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast_policy(5), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, KataboxError>(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast_policy(5), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(KataboxError::Unavailable("flap".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_surfaces_error() {
        let calls = AtomicU32::new(0);
        let result: KataboxResult<()> = with_backoff(&fast_policy(3), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(KataboxError::Unavailable("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(KataboxError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_never_retried() {
        let calls = AtomicU32::new(0);
        let result: KataboxResult<()> = with_backoff(&fast_policy(5), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(KataboxError::Conflict("t1".into())) }
        })
        .await;
        assert!(matches!(result, Err(KataboxError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
