//! Volatile in-process backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::BlobBackend;
use crate::cache::{CacheEntry, EntryMeta, EntryMetadata};
use crate::error::{CacheError, Result};

struct Slot {
    payload: Arc<Vec<u8>>,
    metadata: EntryMetadata,
    created_at: u64,
    last_accessed: AtomicU64,
    sequence: u64,
}

/// HashMap-backed storage.
///
/// Writers swap whole slots under the write lock, so a reader sees either
/// the old payload or the new one. Reads only take the read lock; the
/// access time is an atomic inside the slot.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Slot>>,
    next_sequence: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> CacheError {
    CacheError::Internal("memory backend lock poisoned".to_string())
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: EntryMetadata,
        now: u64,
    ) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let (created_at, sequence) = match entries.get(key) {
            Some(existing) => (existing.created_at, existing.sequence),
            None => (now, self.next_sequence.fetch_add(1, Ordering::Relaxed)),
        };
        entries.insert(
            key.to_string(),
            Slot {
                payload: Arc::new(payload),
                metadata,
                created_at,
                last_accessed: AtomicU64::new(now),
                sequence,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str, now: u64) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).map(|slot| {
            slot.last_accessed.store(now, Ordering::Relaxed);
            CacheEntry {
                key: key.to_string(),
                payload: slot.payload.as_ref().clone(),
                metadata: slot.metadata.clone(),
                created_at: slot.created_at,
                last_accessed: now,
                sequence: slot.sequence,
            }
        }))
    }

    async fn metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).map(|slot| slot.metadata.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn snapshot(&self) -> Result<Vec<EntryMeta>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .iter()
            .map(|(key, slot)| EntryMeta {
                key: key.clone(),
                size: slot.payload.len() as u64,
                created_at: slot.created_at,
                last_accessed: slot.last_accessed.load(Ordering::Relaxed),
                sequence: slot.sequence,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
