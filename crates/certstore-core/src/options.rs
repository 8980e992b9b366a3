//! Storage facade options

use certstore_common::{DEFAULT_DATABASE, generate_instance_id};
use certstore_consistency::LockOptions;

/// Options for [`crate::CertificateStorage`]
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Database holding both collections
    pub database: String,
    /// Holder identity for locks; generated when unset
    pub instance_id: Option<String>,
    pub lock: LockOptions,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            instance_id: None,
            lock: LockOptions::default(),
        }
    }
}

impl StorageOptions {
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_lock(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    /// The configured instance id, or a fresh `hostname-uuid` one
    pub fn resolve_instance_id(&self) -> String {
        match self.instance_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => generate_instance_id(),
        }
    }
}
