use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// How many times and how patiently to retry a failing external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay after the first failure. Doubles after each further failure.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failed_attempts` failures.
    #[must_use]
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempts.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the attempts run out, sleeping with exponential
/// backoff in between. Returns the last error on final failure.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut failed = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                failed += 1;
                if failed >= attempts {
                    log::error!("{what} failed after {failed} attempts: {e}");
                    return Err(e);
                }
                let delay = policy.delay_after(failed);
                log::warn!("{what} failed (attempt {failed}/{attempts}), retrying in {delay:?}: {e}");
                sleep(delay).await;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("gave up waiting after {0:?}")]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Check(E),
}

/// Repeatedly call `check` every `interval` until it yields `Some`.
///
/// Stops with [`PollError::TimedOut`] once `timeout` has passed, with
/// [`PollError::Cancelled`] as soon as `cancel` fires, or with the check's own
/// error if it fails.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let checked = tokio::select! {
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            checked = check() => checked,
        };

        if let Some(value) = checked.map_err(PollError::Check)? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut(timeout));
        }

        let wait = interval.min(deadline - now);
        tokio::select! {
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            () = sleep(wait) => (),
        }
    }
}
