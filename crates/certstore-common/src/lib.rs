//! Certstore Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all certstore components:
//! - Error taxonomy for storage and locking
//! - Collection names and default lock timings
//! - Instance identity helpers

use std::time::Duration;

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{BoxError, StorageError, StorageResult};
pub use utils::{generate_instance_id, local_hostname};

/// Collection holding certificate records
pub const STORAGE_COLLECTION: &str = "certificate-storage";

/// Collection holding lock documents
pub const LOCKS_COLLECTION: &str = "certificate-locks";

/// Default lease length of an acquired lock
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default wait between lock acquisition attempts
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default database name
pub const DEFAULT_DATABASE: &str = "certstore";
