//! Cache Statistics Module
//!
//! Aggregate size figures, always derived from a snapshot of live entries.

use serde::Serialize;

use crate::cache::EntryMeta;

/// Usage percentage above which the cache counts as near capacity.
pub const NEAR_CAPACITY_PERCENT: f64 = 80.0;

// == Cache Stats ==
/// Size statistics of the live entries.
///
/// There is no running counter behind these numbers: every instance is
/// built from a scan, so `total_size` is exactly the sum of live sizes at
/// scan time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Sum of all live entry sizes in bytes
    pub total_size: u64,
    /// Number of live entries
    pub count: u64,
    /// `total_size / count`, or 0.0 when empty
    pub average_size: f64,
}

impl CacheStats {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregates a snapshot.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a EntryMeta>,
    {
        let (total_size, count) = entries
            .into_iter()
            .fold((0u64, 0u64), |(size, count), e| (size + e.size, count + 1));
        let average_size = if count == 0 {
            0.0
        } else {
            total_size as f64 / count as f64
        };
        Self {
            total_size,
            count,
            average_size,
        }
    }

    // == Usage ==
    /// Percentage of `max_size_bytes` in use; 0.0 for a zero budget.
    pub fn usage_percentage(&self, max_size_bytes: u64) -> f64 {
        if max_size_bytes == 0 {
            0.0
        } else {
            self.total_size as f64 / max_size_bytes as f64 * 100.0
        }
    }

    pub fn is_near_capacity(&self, max_size_bytes: u64) -> bool {
        self.usage_percentage(max_size_bytes) > NEAR_CAPACITY_PERCENT
    }
}
