//! Storage services

mod record;

pub use record::RecordStore;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use certstore_common::{StorageError, StorageResult};

/// Run `fut` unless `cancel` fires first
///
/// A token that is already cancelled never polls `fut`.
pub(crate) async fn run_cancellable<T, F>(
    op: &'static str,
    key: &str,
    cancel: &CancellationToken,
    fut: F,
) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(StorageError::cancelled(op, key));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::cancelled(op, key)),
        result = fut => result,
    }
}
