//! Fixed-interval polling bounded by a timeout and a cancellation token.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("check failed: {0}")]
    Failed(E),
}

/// Runs `check` immediately and then every `interval` until it yields a value.
///
/// The last check happens at the deadline. Cancellation interrupts the wait
/// between checks.
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
        if let Some(value) = check().await.map_err(PollError::Failed)? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout(timeout));
        }
        let wait = interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
