use std::future::Future;

use rocket::tokio::time::{sleep, timeout, Duration};

use crate::error::{Error, Result};

/// How hard to try before declaring a peer or collector unreachable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    /// Pause after the first failure. Doubles after every further failure.
    pub initial_backoff: Duration,
    /// Limit on each individual attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(250),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts run out.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        let outcome = match timeout(policy.timeout, op()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Network(format!(
                "{what} timed out after {}ms",
                policy.timeout.as_millis()
            ))),
        };
        match outcome {
            Err(err) if err.is_retryable() && attempt < policy.attempts => {
                warn!("{what} failed (attempt {attempt}/{}): {err}", policy.attempts);
                sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(err) if err.is_retryable() => {
                return Err(Error::Network(format!(
                    "{what} gave up after {attempt} attempts: {err}"
                )));
            }
            other => return other,
        }
    }
}
