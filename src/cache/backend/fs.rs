//! On-disk backend: one file per entry.
//!
//! # File Layout
//!
//! ```text
//! {root}/{sha256(key)}.entry
//! ```
//!
//! Each file is a little-endian `u32` header length, a bincode
//! [`EntryHeader`], then the raw payload. The file mtime is the entry's
//! `last_accessed`, so a read only has to touch the timestamp instead of
//! rewriting the payload.
//!
//! Writes go to a temporary sibling that is renamed over the entry file,
//! which makes every put atomic for concurrent readers.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::BlobBackend;
use crate::cache::{CacheEntry, EntryMeta, EntryMetadata};
use crate::error::{CacheError, Result};

const ENTRY_EXTENSION: &str = "entry";
const TMP_MARKER: &str = ".tmp.";

/// Headers larger than this are treated as corruption.
const MAX_HEADER_LEN: u32 = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    size: u64,
    created_at: u64,
    sequence: u64,
    metadata: EntryMetadata,
}

/// Persistent storage rooted at a directory.
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
    next_sequence: AtomicU64,
    tmp_counter: AtomicU64,
}

impl FsBackend {
    /// Opens (creating if needed) the store at `root`.
    ///
    /// Leftover temporary files from an interrupted write are removed and
    /// the insertion sequence resumes after the highest one on disk.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let scan_root = root.clone();
        let max_sequence = blocking(move || {
            fs::create_dir_all(&scan_root)?;
            remove_stale_tmp_files(&scan_root)?;
            let entries = scan_entries(&scan_root)?;
            Ok(entries.iter().map(|e| e.sequence).max())
        })
        .await?;

        debug!(root = %root.display(), "Opened disk cache directory");
        Ok(Self {
            root,
            next_sequence: AtomicU64::new(max_sequence.map_or(0, |s| s + 1)),
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    fn tmp_path(&self, entry_path: &Path) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let mut name = entry_path.as_os_str().to_owned();
        name.push(format!("{}{}.{}", TMP_MARKER, std::process::id(), n));
        PathBuf::from(name)
    }
}

#[async_trait]
impl BlobBackend for FsBackend {
    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: EntryMetadata,
        now: u64,
    ) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = self.tmp_path(&path);
        let fresh_sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let key = key.to_string();

        blocking(move || {
            let existing = match open_header(&path, &key) {
                Ok(existing) => existing,
                Err(e @ (CacheError::Storage(_) | CacheError::Encoding(_))) => {
                    warn!(path = %path.display(), error = %e, "Overwriting unreadable entry");
                    None
                }
                Err(e) if is_truncated(&e) => {
                    warn!(path = %path.display(), error = %e, "Overwriting truncated entry");
                    None
                }
                Err(e) => return Err(e),
            };
            let (created_at, sequence) = match existing {
                Some((_, existing)) => (existing.created_at, existing.sequence),
                None => (now, fresh_sequence),
            };
            let header = EntryHeader {
                key,
                size: payload.len() as u64,
                created_at,
                sequence,
                metadata,
            };
            write_entry(&path, &tmp, &header, &payload, now)
        })
        .await
    }

    async fn get(&self, key: &str, now: u64) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let key = key.to_string();

        blocking(move || {
            let Some((mut file, header)) = open_header(&path, &key)? else {
                return Ok(None);
            };
            let stored = file.metadata()?.len().saturating_sub(file.stream_position()?);
            if stored != header.size {
                return Err(CacheError::Storage(format!(
                    "entry {} holds {} bytes, header says {}",
                    path.display(),
                    stored,
                    header.size
                )));
            }
            let mut payload = Vec::with_capacity(stored as usize);
            file.read_to_end(&mut payload)?;
            if payload.len() as u64 != header.size {
                return Err(CacheError::Storage(format!(
                    "entry {} holds {} bytes, header says {}",
                    path.display(),
                    payload.len(),
                    header.size
                )));
            }
            drop(file);

            match OpenOptions::new().write(true).open(&path) {
                Ok(file) => file.set_modified(millis_to_system_time(now))?,
                // Deleted between read and touch: the read still succeeded.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            Ok(Some(CacheEntry {
                key: header.key,
                payload,
                metadata: header.metadata,
                created_at: header.created_at,
                last_accessed: now,
                sequence: header.sequence,
            }))
        })
        .await
    }

    async fn metadata(&self, key: &str) -> Result<Option<EntryMetadata>> {
        let path = self.entry_path(key);
        let key = key.to_string();
        blocking(move || Ok(open_header(&path, &key)?.map(|(_, header)| header.metadata))).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key);
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn snapshot(&self) -> Result<Vec<EntryMeta>> {
        let root = self.root.clone();
        blocking(move || scan_entries(&root)).await
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}

// == Blocking Helpers ==

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Internal(format!("blocking task failed: {}", e)))?
}

fn millis_to_system_time(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

fn system_time_to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A header cut short by a crash mid-write or by outside tampering.
fn is_truncated(error: &CacheError) -> bool {
    matches!(error, CacheError::Io(e) if e.kind() == ErrorKind::UnexpectedEof)
}

fn read_header(file: &mut File) -> Result<EntryHeader> {
    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_HEADER_LEN {
        return Err(CacheError::Storage(format!(
            "entry header of {} bytes exceeds limit",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

/// Opens an entry file and decodes its header. `None` when the file does
/// not exist or belongs to a different key (digest collision).
fn open_header(path: &Path, key: &str) -> Result<Option<(File, EntryHeader)>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let header = read_header(&mut file)?;
    if header.key != key {
        warn!(path = %path.display(), "Entry file belongs to a different key");
        return Ok(None);
    }
    Ok(Some((file, header)))
}

fn write_entry(
    path: &Path,
    tmp: &Path,
    header: &EntryHeader,
    payload: &[u8],
    now: u64,
) -> Result<()> {
    let result = (|| -> Result<()> {
        let encoded = bincode::serialize(header)?;
        let mut file = File::create(tmp)?;
        file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.write_all(payload)?;
        file.sync_all()?;
        file.set_modified(millis_to_system_time(now))?;
        drop(file);
        fs::rename(tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    result
}

fn is_tmp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains(TMP_MARKER))
        .unwrap_or(false)
}

fn remove_stale_tmp_files(root: &Path) -> Result<()> {
    for dir_entry in fs::read_dir(root)? {
        let path = dir_entry?.path();
        if is_tmp_file(&path) {
            debug!(path = %path.display(), "Removing interrupted write");
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

fn scan_entries(root: &Path) -> Result<Vec<EntryMeta>> {
    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(root)? {
        let path = dir_entry?.path();
        if is_tmp_file(&path)
            || path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION)
        {
            continue;
        }

        let mut file = match File::open(&path) {
            Ok(file) => file,
            // Deleted by a concurrent sweep while scanning.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let modified = file.metadata()?.modified()?;
        match read_header(&mut file) {
            Ok(header) => entries.push(EntryMeta {
                key: header.key,
                size: header.size,
                created_at: header.created_at,
                last_accessed: system_time_to_millis(modified),
                sequence: header.sequence,
            }),
            Err(e @ (CacheError::Storage(_) | CacheError::Encoding(_))) => {
                remove_unreadable(&path, &e);
            }
            Err(e) if is_truncated(&e) => remove_unreadable(&path, &e),
            Err(e) => return Err(e),
        }
    }
    Ok(entries)
}

/// Unreadable entries can never be planned for eviction, so they are
/// dropped as soon as a scan finds them.
fn remove_unreadable(path: &Path, error: &CacheError) {
    warn!(path = %path.display(), error = %error, "Removing unreadable entry");
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove unreadable entry");
        }
    }
}
