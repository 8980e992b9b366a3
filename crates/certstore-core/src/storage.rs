//! Certificate storage facade
//!
//! Combines the record store and the lease lock manager behind one handle
//! sharing a single persistence backend.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certstore_common::{StorageError, StorageResult};
use certstore_consistency::{DistributedLockService, LeaseLockService, LockState};
use certstore_persistence::memory::DEFAULT_SWEEP_INTERVAL;
use certstore_persistence::{
    LockPersistence, MemoryPersistService, PersistenceService, RecordPersistence, StorageMode,
};

use crate::model::{KeyInfo, Presence};
use crate::options::StorageOptions;
use crate::service::RecordStore;

/// Storage interface consumed by certificate management clients
#[async_trait]
pub trait Storage: Send + Sync {
    async fn store(&self, key: &str, value: &[u8], cancel: &CancellationToken)
    -> StorageResult<()>;

    async fn load(&self, key: &str, cancel: &CancellationToken) -> StorageResult<Vec<u8>>;

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()>;

    /// Errors read as `false`
    async fn exists(&self, key: &str, cancel: &CancellationToken) -> bool;

    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<String>>;

    async fn stat(&self, key: &str, cancel: &CancellationToken) -> StorageResult<KeyInfo>;

    /// Block until the lock on `key` is held or `cancel` fires
    async fn lock(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()>;

    /// Release the lock on `key`; `cancel` is not consulted
    async fn unlock(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()>;
}

/// Storage backed by a [`PersistenceService`]
pub struct CertificateStorage {
    persistence: Arc<dyn PersistenceService>,
    records: RecordStore,
    locks: Arc<LeaseLockService>,
    database: String,
}

impl CertificateStorage {
    /// Build over `persistence`, ensuring its indexes first
    pub async fn new<P>(persistence: Arc<P>, options: StorageOptions) -> StorageResult<Self>
    where
        P: PersistenceService + 'static,
    {
        persistence
            .ensure_indexes()
            .await
            .map_err(|e| StorageError::medium("init", options.database.as_str(), e))?;

        let record_persistence: Arc<dyn RecordPersistence> = persistence.clone();
        let lock_persistence: Arc<dyn LockPersistence> = persistence.clone();
        let instance_id = options.resolve_instance_id();
        let locks = Arc::new(LeaseLockService::new(
            lock_persistence,
            instance_id,
            options.lock,
        ));

        info!(
            mode = %persistence.storage_mode(),
            database = %options.database,
            instance = %locks.instance_id(),
            "Certificate storage ready"
        );

        Ok(Self {
            persistence,
            records: RecordStore::new(record_persistence),
            locks,
            database: options.database,
        })
    }

    /// In-process storage with a background lock expiry sweeper
    pub async fn in_memory(options: StorageOptions) -> StorageResult<Self> {
        let persistence = MemoryPersistService::new().with_expiry_sweeper(DEFAULT_SWEEP_INTERVAL);
        Self::new(Arc::new(persistence), options).await
    }

    /// Connect to MongoDB at `uri` and use `options.database`
    #[cfg(feature = "mongo")]
    pub async fn connect_mongo(uri: &str, options: StorageOptions) -> StorageResult<Self> {
        let persistence = certstore_persistence::MongoPersistService::connect(uri, &options.database)
            .await
            .map_err(|e| StorageError::medium("connect", options.database.as_str(), e))?;
        Self::new(Arc::new(persistence), options).await
    }

    /// Use an existing client handle and `options.database`
    #[cfg(feature = "mongo")]
    pub async fn from_mongo_client(
        client: &certstore_persistence::mongodb::Client,
        options: StorageOptions,
    ) -> StorageResult<Self> {
        let persistence = certstore_persistence::MongoPersistService::new(client, &options.database);
        Self::new(Arc::new(persistence), options).await
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.persistence.storage_mode()
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn instance_id(&self) -> &str {
        self.locks.instance_id()
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn locks(&self) -> &LeaseLockService {
        &self.locks
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.persistence
            .health_check()
            .await
            .map_err(|e| StorageError::medium("health", self.database.as_str(), e))
    }

    /// Three-state existence check
    pub async fn probe(&self, key: &str, cancel: &CancellationToken) -> Presence {
        self.records.probe(key, cancel).await
    }

    /// Single acquisition attempt; `false` when the key is held elsewhere
    pub async fn try_lock(&self, key: &str, cancel: &CancellationToken) -> StorageResult<bool> {
        // The insert is never abandoned midway, so only check up front.
        if cancel.is_cancelled() {
            return Err(StorageError::cancelled("lock", key));
        }
        self.locks.try_acquire(key).await
    }

    pub async fn lock_state(&self, key: &str) -> StorageResult<LockState> {
        self.locks.state(key).await
    }

    /// Run `f` while holding the lock on `key`
    ///
    /// A release mismatch after `f` is logged and does not replace its result.
    pub async fn with_lock<T, F, Fut>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> StorageResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = StorageResult<T>> + Send,
        T: Send,
    {
        self.locks.acquire(key, cancel).await?;
        let mut hold = ReleaseOnDrop {
            locks: self.locks.clone(),
            key: Some(key.to_string()),
        };
        let result = f().await;
        hold.disarm();
        match self.locks.release(key).await {
            Ok(()) => {}
            Err(e) if e.is_release_mismatch() => {
                warn!(key = %key, "Lock lease lapsed before release");
            }
            Err(e) if result.is_ok() => return Err(e),
            Err(e) => warn!(key = %key, error = %e, "Unlock failed after error"),
        }
        result
    }
}

/// Releases a lock from a spawned task if the holder unwinds or is dropped
struct ReleaseOnDrop {
    locks: Arc<LeaseLockService>,
    key: Option<String>,
}

impl ReleaseOnDrop {
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let locks = self.locks.clone();
                handle.spawn(async move {
                    match locks.release(&key).await {
                        Ok(()) => debug!(key = %key, "Released lock of abandoned holder"),
                        Err(e) => warn!(key = %key, error = %e, "Release of abandoned holder failed"),
                    }
                });
            }
            // The lease still expires on its own
            Err(_) => warn!(key = %key, "No runtime to release abandoned lock"),
        }
    }
}

#[async_trait]
impl Storage for CertificateStorage {
    async fn store(
        &self,
        key: &str,
        value: &[u8],
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        self.records.store(key, value, cancel).await
    }

    async fn load(&self, key: &str, cancel: &CancellationToken) -> StorageResult<Vec<u8>> {
        self.records.load(key, cancel).await
    }

    async fn delete(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()> {
        self.records.delete(key, cancel).await
    }

    async fn exists(&self, key: &str, cancel: &CancellationToken) -> bool {
        self.records.exists(key, cancel).await
    }

    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<String>> {
        self.records.list(prefix, recursive, cancel).await
    }

    async fn stat(&self, key: &str, cancel: &CancellationToken) -> StorageResult<KeyInfo> {
        self.records.stat(key, cancel).await
    }

    async fn lock(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()> {
        self.locks.acquire(key, cancel).await
    }

    async fn unlock(&self, key: &str, _cancel: &CancellationToken) -> StorageResult<()> {
        self.locks.release(key).await
    }
}
