//! Bounded timeouts for backing-store round trips.
//!
//! # Example
//!
//! ```no_run
//! use shopsearch_api::resilience::timeout::with_timeout;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let result = with_timeout(
//!     Duration::from_millis(50),
//!     async { Ok::<_, std::io::Error>(42) }
//! ).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use shopsearch_core::StoreError;
use thiserror::Error;
use tokio::time::timeout;

/// Timeout errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError<E> {
    /// Operation timed out
    #[error("Operation timed out after {elapsed:?}")]
    Elapsed { elapsed: Duration },

    /// Inner operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed { .. })
    }
}

impl From<TimeoutError<StoreError>> for StoreError {
    fn from(err: TimeoutError<StoreError>) -> Self {
        match err {
            TimeoutError::Elapsed { elapsed } => {
                StoreError::Timeout(elapsed.as_millis().min(u64::MAX as u128) as u64)
            }
            TimeoutError::Inner(e) => e,
        }
    }
}

/// Apply a timeout to an async operation.
///
/// The future is dropped when the timeout fires.
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed { elapsed: duration }),
    }
}
