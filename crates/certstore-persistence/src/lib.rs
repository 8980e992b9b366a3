//! Certstore Persistence - Document model and storage backends
//!
//! This crate provides:
//! - Document types for the storage and lock collections
//! - Persistence trait abstractions consumed by the record and lock services
//! - An in-memory backend with a background expiry sweeper
//! - A MongoDB backend (feature `mongo`)

pub mod memory;
pub mod model;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod traits;

// Re-export persistence traits
pub use traits::{LockPersistence, PersistenceService, RecordPersistence};

// Re-export backends
pub use memory::MemoryPersistService;
#[cfg(feature = "mongo")]
pub use mongo::MongoPersistService;

// Re-export the driver for callers that construct their own client
#[cfg(feature = "mongo")]
pub use mongodb;

// Re-export model types
pub use model::{InsertOutcome, LockDocument, RecordDocument, StorageMode};
