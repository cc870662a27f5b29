//! Cache Module
//!
//! Persistent content store for image payloads with size- and age-bounded
//! eviction.

pub mod backend;
mod entry;
mod eviction;
mod stats;
mod store;


// Re-export public types
pub use backend::{BlobBackend, FsBackend, MemoryBackend};
pub use entry::{current_timestamp_ms, CacheEntry, EntryMeta, EntryMetadata};
pub use eviction::{EvictionPolicy, SweepOutcome, SweepPlan, NO_AGE_LIMIT};
pub use stats::{CacheStats, NEAR_CAPACITY_PERCENT};
pub use store::{validate_key, CacheStore};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
