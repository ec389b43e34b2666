use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

/// Drive `fut` until it completes or `cancel` fires.
///
/// Every I/O suspension point in the pixel sources goes through here, so a
/// superseded request stops at its next read and reports
/// [`SourceError::Cancelled`] instead of a failure.
pub async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, E>>,
    SourceError: From<E>,
{
    if cancel.is_cancelled() {
        return Err(SourceError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        result = fut => result.map_err(SourceError::from),
    }
}

/// Fail fast if the token already fired.
#[inline]
pub fn check_cancelled(cancel: &CancellationToken) -> Result<(), SourceError> {
    if cancel.is_cancelled() {
        Err(SourceError::Cancelled)
    } else {
        Ok(())
    }
}
