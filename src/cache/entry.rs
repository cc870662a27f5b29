//! Cache Entry Module
//!
//! Defines cache entries and the payload-free view used for sweeps.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Caller-supplied metadata stored next to a payload.
pub type EntryMetadata = HashMap<String, String>;

// == Cache Entry ==
/// A stored payload with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Unique key, e.g. an image id
    pub key: String,
    /// The binary payload
    pub payload: Vec<u8>,
    /// Metadata supplied on put
    pub metadata: EntryMetadata,
    /// First insertion time (Unix milliseconds), kept across overwrites
    pub created_at: u64,
    /// Last successful put or get (Unix milliseconds)
    pub last_accessed: u64,
    /// Insertion order, used to break `last_accessed` ties
    pub sequence: u64,
}

impl CacheEntry {
    /// Size in bytes, always the payload length.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Payload-free view of this entry.
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            size: self.size(),
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            sequence: self.sequence,
        }
    }
}

// == Entry Meta ==
/// Snapshot record of one entry: everything a sweep needs, no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: String,
    pub size: u64,
    pub created_at: u64,
    pub last_accessed: u64,
    pub sequence: u64,
}

impl EntryMeta {
    /// Eviction order: least recently accessed first, then insertion
    /// order, then key.
    pub fn eviction_order(&self, other: &Self) -> Ordering {
        self.last_accessed
            .cmp(&other.last_accessed)
            .then(self.sequence.cmp(&other.sequence))
            .then_with(|| self.key.cmp(&other.key))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
///
/// A clock set before the epoch reads as 0.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
