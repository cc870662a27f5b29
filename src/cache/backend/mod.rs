//! Storage backends for [`CacheStore`](crate::cache::CacheStore).
//!
//! A backend owns the bytes; the store above it owns validation and the
//! lifecycle. Every backend must make a single put, touch or delete atomic
//! from a reader's point of view.

mod fs;
mod memory;

use async_trait::async_trait;

use crate::cache::{CacheEntry, EntryMeta, EntryMetadata};
use crate::error::Result;

pub use fs::FsBackend;
pub use memory::MemoryBackend;

/// Durable or volatile key -> blob storage.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Inserts or replaces `key`. An existing entry keeps its creation
    /// time and insertion sequence; `last_accessed` becomes `now`.
    async fn put(&self, key: &str, payload: Vec<u8>, metadata: EntryMetadata, now: u64)
        -> Result<()>;

    /// Reads `key` and, on a hit, sets its `last_accessed` to `now`.
    async fn get(&self, key: &str, now: u64) -> Result<Option<CacheEntry>>;

    /// Metadata stored with `key`, without touching it.
    async fn metadata(&self, key: &str) -> Result<Option<EntryMetadata>>;

    /// Removes `key`. Returns whether an entry was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Point-in-time metadata of every live entry.
    async fn snapshot(&self) -> Result<Vec<EntryMeta>>;

    /// Releases backend resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
