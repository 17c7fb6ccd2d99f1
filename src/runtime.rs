mod acknowledged_message;
pub(crate) mod stream;
mod sync_read_ext;

use std::{future::Future, time::Duration};

pub(crate) use self::{
    acknowledged_message::AcknowledgedMessage,
    sync_read_ext::SyncLittleEndianRead,
};
use crate::error::Result;

/// Spawn a task in the background to run a future.
///
/// Note: this must only be called from an async block or function running on a runtime.
pub(crate) fn execute<F, O>(fut: F)
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    tokio::spawn(fut);
}

/// Await on a future for a maximum amount of time before returning an error.
pub(crate) async fn timeout<F: Future>(timeout: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| std::io::ErrorKind::TimedOut.into())
}

/// Suspend the current task for the given duration.
pub(crate) async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await
}
