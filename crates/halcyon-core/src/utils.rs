/*!
 * Utility functions and helpers for Halcyon.
 */
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::Error;

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `what` - A short description of the operation, used in the timeout error
/// * `future` - The future to run
///
/// # Returns
///
/// The result of the future, or a timeout error if the deadline passes first.
/// Any error type that can absorb a core [`Error`] may be used.
pub async fn with_timeout<F, T, E>(duration: Duration, what: &str, future: F) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: From<Error>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!("{} timed out after {:?}", what, duration)).into()),
    }
}

/// Convert milliseconds to a Duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
