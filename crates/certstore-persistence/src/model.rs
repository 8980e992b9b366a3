//! Document model types for the persistence abstraction layer
//!
//! These types mirror the documents kept in the two collections, decoupled
//! from any specific storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored certificate blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDocument {
    pub key: String,
    pub value: Vec<u8>,
    /// Last write time (`ts` in the storage collection)
    pub modified_at: DateTime<Utc>,
}

/// A lease held on a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDocument {
    pub key: String,
    /// Holder identity of the process that inserted the document
    pub instance: String,
    pub expires_at: DateTime<Utc>,
}

impl LockDocument {
    pub fn new(key: impl Into<String>, instance: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            instance: instance.into(),
            expires_at,
        }
    }

    /// Check whether the lease has run out at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_held_by(&self, instance: &str) -> bool {
        self.instance == instance
    }
}

/// Outcome of a unique insert into the lock collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The document was written; the caller now holds the key
    Inserted,
    /// A document with the same key already exists
    Conflict,
}

/// Storage backend in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// In-process maps, single node only
    Memory,
    /// MongoDB collections shared by every cooperating process
    Mongo,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Memory => write!(f, "memory"),
            StorageMode::Mongo => write!(f, "mongo"),
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageMode::Memory),
            "mongo" | "mongodb" => Ok(StorageMode::Mongo),
            _ => Err(format!("Invalid storage mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lock_document_expiry() {
        let now = Utc::now();
        let lock = LockDocument::new("cert-x", "node-a", now + Duration::seconds(60));
        assert!(!lock.is_expired_at(now));
        assert!(lock.is_expired_at(now + Duration::seconds(60)));
        assert!(lock.is_held_by("node-a"));
        assert!(!lock.is_held_by("node-b"));
    }

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!("memory".parse::<StorageMode>().unwrap(), StorageMode::Memory);
        assert_eq!("MongoDB".parse::<StorageMode>().unwrap(), StorageMode::Mongo);
        assert!("redis".parse::<StorageMode>().is_err());
        assert_eq!(StorageMode::Mongo.to_string(), "mongo");
    }
}
