//! Cache Coordinator
//!
//! The cache API used by callers, and the bridge from memory pressure to
//! eviction.
//!
//! Storage failures never reach the caller as errors here: the cache is
//! advisory, so a failed put reports `false` and a failed get is a miss.
//!
//! # Pressure Mapping
//! - `warning`: sweep down to half the size budget, normal TTL
//! - `critical`: sweep to the size budget with a zero age bound, which
//!   drops everything not touched in the current millisecond

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheEntry, CacheStats, CacheStore, EntryMetadata, EvictionPolicy, SweepOutcome,
};
use crate::config::CacheSettings;
use crate::error::{CacheError, Result};
use crate::memory::Urgency;

/// Clears the pressure-sweep flag when the sweep ends.
struct SweepGuard(Arc<AtomicBool>);

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// == Cache Coordinator ==
/// Cheap to clone; clones share the store and the pressure guard.
#[derive(Debug, Clone)]
pub struct CacheCoordinator {
    store: Arc<CacheStore>,
    max_size_bytes: u64,
    ttl_ms: u64,
    pressure_sweep_running: Arc<AtomicBool>,
}

impl CacheCoordinator {
    pub fn new(store: Arc<CacheStore>, max_size_bytes: u64, ttl_ms: u64) -> Self {
        Self {
            store,
            max_size_bytes,
            ttl_ms,
            pressure_sweep_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(store: Arc<CacheStore>, settings: &CacheSettings) -> Self {
        Self::new(store, settings.max_size_bytes(), settings.ttl_ms())
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    // == Cache API ==

    pub async fn put(&self, key: &str, payload: Vec<u8>, metadata: EntryMetadata) -> bool {
        match self.store.put(key, payload, metadata).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache put failed");
                false
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.get_entry(key).await.map(|entry| entry.payload)
    }

    /// Payload plus metadata and timestamps; `None` on a miss or failure.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        match self.store.get_entry(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed");
                None
            }
        }
    }

    /// Returns false only when the delete failed; removing an absent key
    /// succeeds.
    pub async fn delete(&self, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(_) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.store.stats().await
    }

    /// Share of the size budget in use, as a percentage.
    pub async fn usage_percentage(&self) -> Result<f64> {
        Ok(self.stats().await?.usage_percentage(self.max_size_bytes))
    }

    pub async fn is_near_capacity(&self) -> Result<bool> {
        Ok(self.stats().await?.is_near_capacity(self.max_size_bytes))
    }

    // == Sweeps ==

    /// Sweeps with explicit bounds and reports what happened.
    pub async fn sweep_outcome(&self, max_size_bytes: u64, max_age_ms: u64) -> Result<SweepOutcome> {
        EvictionPolicy::new(max_size_bytes, max_age_ms)
            .sweep(&self.store)
            .await
    }

    /// Sweeps with explicit bounds; false if the snapshot could not be taken.
    pub async fn sweep(&self, max_size_bytes: u64, max_age_ms: u64) -> bool {
        match self.sweep_outcome(max_size_bytes, max_age_ms).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Cache sweep failed");
                false
            }
        }
    }

    /// Routine housekeeping with the configured size budget and TTL.
    pub async fn maintenance_sweep(&self) -> bool {
        debug!("Running routine cache sweep");
        self.sweep(self.max_size_bytes, self.ttl_ms).await
    }

    /// Removes every entry.
    pub async fn clear(&self) -> bool {
        info!("Clearing cache");
        self.sweep(0, 0).await
    }

    // == Memory Pressure ==

    /// Runs the sweep matching `urgency`.
    pub async fn handle_pressure(&self, urgency: Urgency) -> Result<SweepOutcome> {
        let (max_size, max_age) = match urgency {
            Urgency::Warning => (self.max_size_bytes / 2, self.ttl_ms),
            Urgency::Critical => (self.max_size_bytes, 0),
        };
        info!(
            %urgency,
            max_size_mb = max_size / 1024 / 1024,
            max_age_ms = max_age,
            "Memory pressure sweep"
        );
        self.sweep_outcome(max_size, max_age).await
    }

    /// Builds a [`MemoryMonitor`](crate::memory::MemoryMonitor) callback
    /// that spawns a pressure sweep on the current runtime. At most one
    /// pressure sweep runs at a time; callbacks arriving meanwhile are
    /// dropped.
    pub fn memory_callback(&self) -> Result<impl Fn(Urgency) -> anyhow::Result<()> + Send + Sync> {
        let runtime = Handle::try_current()
            .map_err(|e| CacheError::Internal(format!("no Tokio runtime for callback: {}", e)))?;
        let coordinator = self.clone();

        Ok(move |urgency: Urgency| {
            if coordinator.pressure_sweep_running.swap(true, Ordering::AcqRel) {
                debug!(%urgency, "Pressure sweep already running");
                return Ok(());
            }
            let guard = SweepGuard(Arc::clone(&coordinator.pressure_sweep_running));
            let coordinator = coordinator.clone();
            runtime.spawn(async move {
                let _guard = guard;
                if let Err(e) = coordinator.handle_pressure(urgency).await {
                    warn!(%urgency, error = %e, "Pressure sweep failed");
                }
            });
            Ok(())
        })
    }
}
