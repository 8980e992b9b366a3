// Shared fixtures for storage integration tests

use std::sync::Arc;
use std::time::Duration;

use certstore_core::{CertificateStorage, LockOptions, RetryPolicy, StorageOptions};
use certstore_persistence::MemoryPersistService;

pub const FAST_RETRY: Duration = Duration::from_millis(20);

pub fn fast_options(instance: &str) -> StorageOptions {
    StorageOptions::default()
        .with_instance_id(instance)
        .with_lock(LockOptions::default().with_retry(RetryPolicy::fixed(FAST_RETRY)))
}

/// Backend shared by several simulated processes
pub fn shared_backend(sweep: Duration) -> Arc<MemoryPersistService> {
    Arc::new(MemoryPersistService::new().with_expiry_sweeper(sweep))
}

pub async fn process(
    backend: &Arc<MemoryPersistService>,
    options: StorageOptions,
) -> CertificateStorage {
    CertificateStorage::new(backend.clone(), options)
        .await
        .expect("memory storage should initialize")
}
