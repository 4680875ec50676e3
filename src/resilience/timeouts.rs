//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - On expiry the wrapped future is dropped and the attempt's
//!   cancellation token is fired, so transports holding their own
//!   resources observe the cancellation too
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The attempt did not finish within its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {}ms exceeded", .0.as_millis())]
pub struct DeadlineExceeded(pub Duration);

/// Run `fut` with a deadline, cancelling `cancel` if it expires.
pub async fn with_deadline<F>(
    deadline: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(output) => Ok(output),
        Err(_) => {
            cancel.cancel();
            Err(DeadlineExceeded(deadline))
        }
    }
}
