//! Cache Store Module
//!
//! Validated, lifecycle-managed access to a [`BlobBackend`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::backend::{BlobBackend, FsBackend, MemoryBackend};
use crate::cache::{
    current_timestamp_ms, CacheEntry, CacheStats, EntryMeta, EntryMetadata, MAX_KEY_LENGTH,
};
use crate::error::{CacheError, Result};

// == Cache Store ==
/// Durable key -> blob map with per-entry size and timestamps.
///
/// The store is an explicitly owned handle; share it as `Arc<CacheStore>`.
/// All operations are safe to call concurrently. After [`close`] every
/// operation fails with [`CacheError::Closed`].
///
/// [`close`]: CacheStore::close
pub struct CacheStore {
    backend: Arc<dyn BlobBackend>,
    closed: AtomicBool,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl CacheStore {
    // == Constructors ==
    /// Opens a store over an existing backend.
    pub fn open(backend: Arc<dyn BlobBackend>) -> Self {
        info!(backend = backend.name(), "Cache store opened");
        Self {
            backend,
            closed: AtomicBool::new(false),
        }
    }

    /// Opens a volatile in-memory store.
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryBackend::new()))
    }

    /// Opens the persistent store rooted at `dir`.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let backend = FsBackend::open(dir).await?;
        Ok(Self::open(Arc::new(backend)))
    }

    // == Put ==
    /// Inserts or overwrites `key`.
    ///
    /// `created_at` is kept from the first insertion; `last_accessed` is
    /// refreshed.
    pub async fn put(&self, key: &str, payload: Vec<u8>, metadata: EntryMetadata) -> Result<()> {
        self.put_at(key, payload, metadata, current_timestamp_ms()).await
    }

    pub(crate) async fn put_at(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: EntryMetadata,
        now: u64,
    ) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        let size = payload.len();
        self.backend.put(key, payload, metadata, now).await?;
        debug!(key = %key, size, "Stored entry");
        Ok(())
    }

    // == Get ==
    /// Returns the payload of `key`, touching it on a hit. A miss is
    /// `Ok(None)`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.payload))
    }

    /// Like [`get`](CacheStore::get) but returns the whole entry.
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.get_at(key, current_timestamp_ms()).await
    }

    pub(crate) async fn get_at(&self, key: &str, now: u64) -> Result<Option<CacheEntry>> {
        self.ensure_open()?;
        validate_key(key)?;
        self.backend.get(key, now).await
    }

    /// Metadata stored with `key`. Does not count as an access.
    pub async fn metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        self.ensure_open()?;
        validate_key(key)?;
        self.backend.metadata(key).await
    }

    // == Delete ==
    /// Removes `key`. Returns whether it was present; an absent key is
    /// not an error.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        validate_key(key)?;
        self.backend.delete(key).await
    }

    // == Snapshot / Stats ==
    /// Point-in-time metadata of all live entries.
    pub async fn snapshot(&self) -> Result<Vec<EntryMeta>> {
        self.ensure_open()?;
        self.backend.snapshot().await
    }

    /// Aggregate statistics computed from a fresh snapshot.
    pub async fn stats(&self) -> Result<CacheStats> {
        let snapshot = self.snapshot().await?;
        Ok(CacheStats::from_entries(&snapshot))
    }

    // == Lifecycle ==
    /// Closes the store. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(backend = self.backend.name(), "Cache store closed");
        self.backend.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Rejects empty keys and keys longer than [`MAX_KEY_LENGTH`] bytes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> EntryMetadata {
        EntryMetadata::new()
    }

    #[tokio::test]
    async fn test_store_new_is_empty() {
        let store = CacheStore::in_memory();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_store_put_and_get() {
        let store = CacheStore::in_memory();

        store.put("key1", b"value1".to_vec(), meta()).await.unwrap();
        let value = store.get("key1").await.unwrap();

        assert_eq!(value, Some(b"value1".to_vec()));
    }

    #[tokio::test]
    async fn test_store_get_nonexistent_is_a_miss() {
        let store = CacheStore::in_memory();
        assert_eq!(store.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_delete() {
        let store = CacheStore::in_memory();

        store.put("key1", b"value1".to_vec(), meta()).await.unwrap();
        assert!(store.delete("key1").await.unwrap());

        assert_eq!(store.get("key1").await.unwrap(), None);
        assert_eq!(store.stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_store_delete_nonexistent_is_ok() {
        let store = CacheStore::in_memory();
        assert!(!store.delete("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_overwrite() {
        let store = CacheStore::in_memory();

        store.put_at("key1", vec![1; 10], meta(), 100).await.unwrap();
        store.put_at("key1", vec![2; 30], meta(), 200).await.unwrap();

        assert_eq!(store.get("key1").await.unwrap(), Some(vec![2; 30]));
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].created_at, 100);
        assert_eq!(store.stats().await.unwrap().total_size, 30);
    }

    #[tokio::test]
    async fn test_store_get_touches_last_accessed() {
        let store = CacheStore::in_memory();

        store.put_at("key1", vec![1], meta(), 100).await.unwrap();
        store.get_at("key1", 500).await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot[0].last_accessed, 500);
        assert_eq!(snapshot[0].created_at, 100);
    }

    #[tokio::test]
    async fn test_store_stats_track_live_entries() {
        let store = CacheStore::in_memory();

        store.put("a", vec![0; 100], meta()).await.unwrap();
        store.put("b", vec![0; 300], meta()).await.unwrap();
        store.put("a", vec![0; 50], meta()).await.unwrap();
        store.delete("missing").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 350);
        assert_eq!(stats.average_size, 175.0);
    }

    #[tokio::test]
    async fn test_store_key_validation() {
        let store = CacheStore::in_memory();
        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);

        let result = store.put(&long_key, vec![1], meta()).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));

        let result = store.put("", vec![1], meta()).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_store_closed_rejects_operations() {
        let store = CacheStore::in_memory();
        store.put("a", vec![1], meta()).await.unwrap();

        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.get("a").await, Err(CacheError::Closed)));
        assert!(matches!(
            store.put("a", vec![1], meta()).await,
            Err(CacheError::Closed)
        ));
        assert!(matches!(store.stats().await, Err(CacheError::Closed)));
    }

    #[tokio::test]
    async fn test_store_open_dir_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CacheStore::open_dir(dir.path()).await.unwrap();
            store.put("img", vec![9; 64], meta()).await.unwrap();
            store.close().await.unwrap();
        }

        let store = CacheStore::open_dir(dir.path()).await.unwrap();
        assert_eq!(store.backend_name(), "disk");
        assert_eq!(store.get("img").await.unwrap(), Some(vec![9; 64]));
        assert_eq!(store.stats().await.unwrap().total_size, 64);
    }

    #[tokio::test]
    async fn test_concurrent_puts_to_same_key_never_mix() {
        let store = Arc::new(CacheStore::in_memory());
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put("shared", vec![i; 1024], EntryMetadata::new()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let value = store.get("shared").await.unwrap().unwrap();
        assert_eq!(value.len(), 1024);
        assert!(value.iter().all(|b| *b == value[0]));
        assert_eq!(store.stats().await.unwrap().count, 1);
    }
}
