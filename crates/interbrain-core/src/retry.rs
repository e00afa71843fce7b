use std::future::Future;
use std::time::Duration;

use interbrain_vcs::GatewayError;
use rand::Rng;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{InterbrainError, Result};

/// Bound one unit of work by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(InterbrainError::Timeout(limit)),
    }
}

/// Bound an external call and lift its error into the domain taxonomy.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, GatewayError>>,
{
    with_timeout(limit, async { fut.await.map_err(InterbrainError::from_gateway) }).await
}

/// Run `op` until it succeeds, fails with an unrecoverable error, or the
/// policy runs out of attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_recoverable() && attempt + 1 < attempts => {
                let delay = jitter(policy.delay_for(attempt));
                warn!(op = label, attempt = attempt + 1, ?delay, error = %e, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 4;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_recoverable_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = with_retry(&fast(3), "flaky", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(InterbrainError::NodeUnavailable("later".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unrecoverable_fails_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_retry(&fast(5), "denied", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(InterbrainError::AuthorizationDenied("no".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(InterbrainError::Timeout(_))));
    }
}
