//! Result types returned by the storage facade

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of a stored key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub key: String,
    pub modified: DateTime<Utc>,
    /// Value length in bytes
    pub size: u64,
    /// Always true: keys are never directories in the flat namespace
    pub is_terminal: bool,
}

/// Three-state existence answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
    /// The medium could not be queried
    Unknown,
}

impl Presence {
    pub fn is_present(self) -> bool {
        self == Presence::Present
    }
}
