//! Record store over the certificate storage collection
//!
//! Keys form a flat namespace: `/` carries no meaning beyond being part of
//! the string, so listing is a plain prefix match and every key is terminal.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use certstore_common::{StorageError, StorageResult};
use certstore_persistence::RecordPersistence;

use super::run_cancellable;
use crate::model::{KeyInfo, Presence};

/// Certificate record operations
#[derive(Clone)]
pub struct RecordStore {
    persistence: Arc<dyn RecordPersistence>,
}

impl RecordStore {
    pub fn new(persistence: Arc<dyn RecordPersistence>) -> Self {
        Self { persistence }
    }

    /// Insert or overwrite `key`, stamping the modification time
    pub async fn store(
        &self,
        key: &str,
        value: &[u8],
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        run_cancellable("store", key, cancel, async {
            self.persistence
                .record_upsert(key, value, Utc::now())
                .await
                .map_err(|e| StorageError::medium("store", key, e))?;
            debug!(key = %key, size = value.len(), "Record stored");
            Ok(())
        })
        .await
    }

    /// Value stored under `key`
    pub async fn load(&self, key: &str, cancel: &CancellationToken) -> StorageResult<Vec<u8>> {
        run_cancellable("load", key, cancel, async {
            match self.persistence.record_find_one(key).await {
                Ok(Some(record)) => Ok(record.value),
                Ok(None) => Err(StorageError::not_found("load", key)),
                Err(e) => Err(StorageError::medium("load", key, e)),
            }
        })
        .await
    }

    /// Remove `key`; removing an absent key succeeds
    pub async fn delete(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()> {
        run_cancellable("delete", key, cancel, async {
            let deleted = self
                .persistence
                .record_delete(key)
                .await
                .map_err(|e| StorageError::medium("delete", key, e))?;
            if deleted == 0 {
                debug!(key = %key, "Delete of absent record");
            }
            Ok(())
        })
        .await
    }

    /// Whether `key` exists
    ///
    /// Medium failures and cancellation read as absent. Use [`Self::probe`]
    /// to tell the two apart.
    pub async fn exists(&self, key: &str, cancel: &CancellationToken) -> bool {
        self.probe(key, cancel).await.is_present()
    }

    pub async fn probe(&self, key: &str, cancel: &CancellationToken) -> Presence {
        let result = run_cancellable("exists", key, cancel, async {
            self.persistence
                .record_count(key)
                .await
                .map_err(|e| StorageError::medium("exists", key, e))
        })
        .await;

        match result {
            Ok(0) => Presence::Absent,
            Ok(_) => Presence::Present,
            Err(e) => {
                warn!(key = %key, error = %e, "Existence check failed");
                Presence::Unknown
            }
        }
    }

    /// Keys starting with `prefix`, sorted
    ///
    /// `recursive` is accepted for interface compatibility and has no effect.
    pub async fn list(
        &self,
        prefix: &str,
        _recursive: bool,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<String>> {
        run_cancellable("list", prefix, cancel, async {
            let mut keys = self
                .persistence
                .record_keys_with_prefix(prefix)
                .await
                .map_err(|e| StorageError::medium("list", prefix, e))?;
            keys.sort_unstable();
            Ok(keys)
        })
        .await
    }

    pub async fn stat(&self, key: &str, cancel: &CancellationToken) -> StorageResult<KeyInfo> {
        run_cancellable("stat", key, cancel, async {
            match self.persistence.record_find_one(key).await {
                Ok(Some(record)) => Ok(KeyInfo {
                    key: record.key,
                    modified: record.modified_at,
                    size: record.value.len() as u64,
                    is_terminal: true,
                }),
                Ok(None) => Err(StorageError::not_found("stat", key)),
                Err(e) => Err(StorageError::medium("stat", key, e)),
            }
        })
        .await
    }
}
