//! Eviction Policy Module
//!
//! Size- and age-bounded sweep over a snapshot of cache entries.
//!
//! A sweep runs in two phases over one snapshot:
//! 1. Age pass: every entry last accessed before `now - max_age_ms` goes,
//!    whatever the total size.
//! 2. Size pass: while the survivors exceed `max_size_bytes`, the least
//!    recently accessed entry goes (ties by insertion order, then key).
//!
//! Planning is a pure function of the snapshot and `now`, so the deleted
//! set is deterministic. Applying the plan deletes one key at a time; a
//! failed delete is logged and skipped.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{current_timestamp_ms, CacheStore, EntryMeta};
use crate::error::Result;

/// `max_age_ms` value meaning "no age bound".
pub const NO_AGE_LIMIT: u64 = u64::MAX;

// == Sweep Plan ==
/// Keys a sweep will delete, in deletion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepPlan {
    /// Deleted by the age pass
    pub expired: Vec<EntryMeta>,
    /// Deleted by the size pass
    pub evicted: Vec<EntryMeta>,
    /// Total size left if every delete succeeds
    pub remaining_size: u64,
}

impl SweepPlan {
    /// All deletions in order: age pass first, then size pass.
    pub fn deletions(&self) -> impl Iterator<Item = &EntryMeta> {
        self.expired.iter().chain(self.evicted.iter())
    }

    pub fn len(&self) -> usize {
        self.expired.len() + self.evicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Sweep Outcome ==
/// Best-effort result of applying a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepOutcome {
    /// Entries removed by this sweep
    pub deleted_count: u64,
    /// Snapshot size minus what was actually removed
    pub remaining_size: u64,
    /// Deletes that failed and were skipped
    pub failed_count: u64,
}

// == Eviction Policy ==
/// Capacity and age constraints for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_size_bytes: u64,
    pub max_age_ms: u64,
}

impl EvictionPolicy {
    pub fn new(max_size_bytes: u64, max_age_ms: u64) -> Self {
        Self {
            max_size_bytes,
            max_age_ms,
        }
    }

    /// Policy that only bounds size.
    pub fn size_only(max_size_bytes: u64) -> Self {
        Self::new(max_size_bytes, NO_AGE_LIMIT)
    }

    // == Plan ==
    /// Decides which entries of `snapshot` to delete at time `now`.
    pub fn plan(&self, snapshot: &[EntryMeta], now: u64) -> SweepPlan {
        let mut ordered: Vec<&EntryMeta> = snapshot.iter().collect();
        ordered.sort_by(|a, b| a.eviction_order(b));

        let cutoff = now.saturating_sub(self.max_age_ms);
        let (expired, survivors): (Vec<&EntryMeta>, Vec<&EntryMeta>) =
            ordered.into_iter().partition(|e| e.last_accessed < cutoff);

        let mut remaining_size: u64 = survivors.iter().map(|e| e.size).sum();
        let mut evicted = Vec::new();
        for entry in survivors {
            if remaining_size <= self.max_size_bytes {
                break;
            }
            remaining_size -= entry.size;
            evicted.push(entry.clone());
        }

        SweepPlan {
            expired: expired.into_iter().cloned().collect(),
            evicted,
            remaining_size,
        }
    }

    // == Sweep ==
    /// Snapshots `store`, plans and applies the deletions.
    ///
    /// Only a failed snapshot is an error; individual delete failures are
    /// counted in [`SweepOutcome::failed_count`].
    pub async fn sweep(&self, store: &CacheStore) -> Result<SweepOutcome> {
        self.sweep_at(store, current_timestamp_ms()).await
    }

    pub(crate) async fn sweep_at(&self, store: &CacheStore, now: u64) -> Result<SweepOutcome> {
        let snapshot = store.snapshot().await?;
        let total_size: u64 = snapshot.iter().map(|e| e.size).sum();
        let plan = self.plan(&snapshot, now);

        if plan.is_empty() {
            debug!(
                total_size,
                max_size_bytes = self.max_size_bytes,
                "Sweep found nothing to delete"
            );
            return Ok(SweepOutcome {
                deleted_count: 0,
                remaining_size: total_size,
                failed_count: 0,
            });
        }

        let mut outcome = SweepOutcome {
            remaining_size: total_size,
            ..SweepOutcome::default()
        };
        for entry in plan.deletions() {
            match store.delete(&entry.key).await {
                Ok(removed) => {
                    // An absent key was removed by a concurrent sweep; its
                    // bytes are gone but the deletion is not ours.
                    if removed {
                        outcome.deleted_count += 1;
                    }
                    outcome.remaining_size = outcome.remaining_size.saturating_sub(entry.size);
                }
                Err(e) => {
                    outcome.failed_count += 1;
                    warn!(key = %entry.key, error = %e, "Sweep failed to delete entry");
                }
            }
        }

        info!(
            expired = plan.expired.len(),
            evicted = plan.evicted.len(),
            deleted = outcome.deleted_count,
            failed = outcome.failed_count,
            remaining_mb = outcome.remaining_size / 1024 / 1024,
            "Cache sweep finished"
        );
        Ok(outcome)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryMetadata;

    fn meta(key: &str, size: u64, last_accessed: u64, sequence: u64) -> EntryMeta {
        EntryMeta {
            key: key.to_string(),
            size,
            created_at: last_accessed,
            last_accessed,
            sequence,
        }
    }

    fn keys(entries: &[EntryMeta]) -> Vec<&str> {
        entries.iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn test_plan_size_eviction_scenario() {
        let snapshot = vec![
            meta("C", 300, 3, 2),
            meta("A", 100, 1, 0),
            meta("B", 200, 2, 1),
        ];
        let plan = EvictionPolicy::size_only(450).plan(&snapshot, 10);

        assert!(plan.expired.is_empty());
        assert_eq!(keys(&plan.evicted), vec!["A", "B"]);
        assert_eq!(plan.remaining_size, 300);
    }

    #[test]
    fn test_plan_under_budget_deletes_nothing() {
        let snapshot = vec![meta("A", 100, 1, 0), meta("B", 200, 2, 1)];
        let plan = EvictionPolicy::size_only(300).plan(&snapshot, 10);
        assert!(plan.is_empty());
        assert_eq!(plan.remaining_size, 300);
    }

    #[test]
    fn test_plan_age_pass_runs_under_budget() {
        let snapshot = vec![meta("old", 1, 100, 0), meta("fresh", 1, 950, 1)];
        let plan = EvictionPolicy::new(u64::MAX, 500).plan(&snapshot, 1_000);

        assert_eq!(keys(&plan.expired), vec!["old"]);
        assert!(plan.evicted.is_empty());
        assert_eq!(plan.remaining_size, 1);
    }

    #[test]
    fn test_plan_age_boundary_is_exclusive() {
        let snapshot = vec![meta("edge", 1, 500, 0)];
        let plan = EvictionPolicy::new(u64::MAX, 500).plan(&snapshot, 1_000);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_zero_age_expires_everything_older_than_now() {
        let snapshot = vec![meta("a", 1, 999, 0), meta("b", 1, 1_000, 1)];
        let plan = EvictionPolicy::new(u64::MAX, 0).plan(&snapshot, 1_000);
        assert_eq!(keys(&plan.expired), vec!["a"]);
    }

    #[test]
    fn test_plan_age_then_size() {
        let snapshot = vec![
            meta("stale", 500, 10, 0),
            meta("a", 100, 900, 1),
            meta("b", 100, 950, 2),
            meta("c", 100, 990, 3),
        ];
        let plan = EvictionPolicy::new(150, 500).plan(&snapshot, 1_000);

        assert_eq!(keys(&plan.expired), vec!["stale"]);
        assert_eq!(keys(&plan.evicted), vec!["a", "b"]);
        assert_eq!(plan.remaining_size, 100);
    }

    #[test]
    fn test_plan_ties_break_on_sequence() {
        let snapshot = vec![meta("second", 100, 5, 1), meta("first", 100, 5, 0)];
        let plan = EvictionPolicy::size_only(100).plan(&snapshot, 10);
        assert_eq!(keys(&plan.evicted), vec!["first"]);
    }

    #[test]
    fn test_plan_zero_budget_empties_cache() {
        let snapshot = vec![meta("a", 1, 1, 0), meta("b", 1, 2, 1)];
        let plan = EvictionPolicy::size_only(0).plan(&snapshot, 10);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.remaining_size, 0);
    }

    #[tokio::test]
    async fn test_sweep_size_eviction_scenario() {
        let store = CacheStore::in_memory();
        store.put_at("A", vec![0; 100], EntryMetadata::new(), 1).await.unwrap();
        store.put_at("B", vec![0; 200], EntryMetadata::new(), 2).await.unwrap();
        store.put_at("C", vec![0; 300], EntryMetadata::new(), 3).await.unwrap();

        let outcome = EvictionPolicy::size_only(450).sweep_at(&store, 10).await.unwrap();

        assert_eq!(outcome.deleted_count, 2);
        assert_eq!(outcome.remaining_size, 300);
        assert_eq!(outcome.failed_count, 0);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_size, 300);
        assert_eq!(stats.count, 1);
        assert!(store.get("C").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_twice_is_idempotent() {
        let store = CacheStore::in_memory();
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            store
                .put_at(key, vec![0; 100], EntryMetadata::new(), i as u64 * 100)
                .await
                .unwrap();
        }

        let policy = EvictionPolicy::new(150, 250);
        let first = policy.sweep_at(&store, 400).await.unwrap();
        let second = policy.sweep_at(&store, 400).await.unwrap();

        assert!(first.deleted_count > 0);
        assert_eq!(second.deleted_count, 0);
        assert_eq!(second.remaining_size, first.remaining_size);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_converge() {
        let store = std::sync::Arc::new(CacheStore::in_memory());
        for i in 0..20u64 {
            store
                .put_at(&format!("k{}", i), vec![0; 10], EntryMetadata::new(), i)
                .await
                .unwrap();
        }

        let policy = EvictionPolicy::size_only(55);
        let (a, b) = tokio::join!(policy.sweep_at(&store, 100), policy.sweep_at(&store, 100));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.deleted_count + b.deleted_count, 15);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_size, 50);
        let mut remaining: Vec<String> =
            store.snapshot().await.unwrap().into_iter().map(|e| e.key).collect();
        remaining.sort();
        assert_eq!(remaining, vec!["k15", "k16", "k17", "k18", "k19"]);
    }

    /// Memory backend whose deletes fail for one key.
    struct FlakyBackend {
        inner: crate::cache::MemoryBackend,
        poisoned_key: &'static str,
    }

    #[async_trait::async_trait]
    impl crate::cache::BlobBackend for FlakyBackend {
        async fn put(
            &self,
            key: &str,
            payload: Vec<u8>,
            metadata: EntryMetadata,
            now: u64,
        ) -> Result<()> {
            self.inner.put(key, payload, metadata, now).await
        }

        async fn get(&self, key: &str, now: u64) -> Result<Option<crate::cache::CacheEntry>> {
            self.inner.get(key, now).await
        }

        async fn metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
            self.inner.metadata(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            if key == self.poisoned_key {
                return Err(crate::error::CacheError::Storage("disk on fire".to_string()));
            }
            self.inner.delete(key).await
        }

        async fn snapshot(&self) -> Result<Vec<EntryMeta>> {
            self.inner.snapshot().await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failed_delete() {
        let store = CacheStore::open(std::sync::Arc::new(FlakyBackend {
            inner: crate::cache::MemoryBackend::new(),
            poisoned_key: "A",
        }));
        store.put_at("A", vec![0; 100], EntryMetadata::new(), 1).await.unwrap();
        store.put_at("B", vec![0; 100], EntryMetadata::new(), 2).await.unwrap();
        store.put_at("C", vec![0; 100], EntryMetadata::new(), 3).await.unwrap();

        let outcome = EvictionPolicy::size_only(100).sweep_at(&store, 10).await.unwrap();

        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.deleted_count, 1);
        assert_eq!(outcome.remaining_size, 200);
        assert!(store.get("A").await.unwrap().is_some());
        assert!(store.get("B").await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().total_size, 200);
    }

    /// Memory backend whose snapshot still lists an entry another sweep
    /// already removed.
    struct StaleSnapshotBackend {
        inner: crate::cache::MemoryBackend,
    }

    #[async_trait::async_trait]
    impl crate::cache::BlobBackend for StaleSnapshotBackend {
        async fn put(
            &self,
            key: &str,
            payload: Vec<u8>,
            metadata: EntryMetadata,
            now: u64,
        ) -> Result<()> {
            self.inner.put(key, payload, metadata, now).await
        }

        async fn get(&self, key: &str, now: u64) -> Result<Option<crate::cache::CacheEntry>> {
            self.inner.get(key, now).await
        }

        async fn metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
            self.inner.metadata(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        async fn snapshot(&self) -> Result<Vec<EntryMeta>> {
            let mut entries = self.inner.snapshot().await?;
            entries.push(meta("ghost", 100, 0, 99));
            Ok(entries)
        }

        fn name(&self) -> &'static str {
            "stale"
        }
    }

    #[tokio::test]
    async fn test_sweep_does_not_count_already_removed_keys() {
        let store = CacheStore::open(std::sync::Arc::new(StaleSnapshotBackend {
            inner: crate::cache::MemoryBackend::new(),
        }));
        store.put_at("A", vec![0; 100], EntryMetadata::new(), 1).await.unwrap();
        store.put_at("B", vec![0; 100], EntryMetadata::new(), 2).await.unwrap();

        let outcome = EvictionPolicy::size_only(0).sweep_at(&store, 10).await.unwrap();

        assert_eq!(outcome.deleted_count, 2);
        assert_eq!(outcome.remaining_size, 0);
        assert_eq!(outcome.failed_count, 0);
    }

    #[tokio::test]
    async fn test_sweep_on_closed_store_errors() {
        let store = CacheStore::in_memory();
        store.close().await.unwrap();
        assert!(EvictionPolicy::size_only(0).sweep(&store).await.is_err());
    }
}
