// content_cache.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

const INDEX_FILE: &str = "list.txt";

/// Source of payloads for keys missing from the cache.
///
/// Implementations swallow every failure (network error, timeout, bad status)
/// and report it as `None`; the cache records that as a failed entry.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, key: &str) -> Option<Vec<u8>>;
}

/// Stored outcome of a retrieval attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    Payload(Vec<u8>),
    /// The attempt failed; kept so reruns do not hit the resource again.
    RecordedFailure,
}

impl CacheEntry {
    // An empty file on disk is a recorded failure.
    fn from_stored(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            CacheEntry::RecordedFailure
        } else {
            CacheEntry::Payload(bytes)
        }
    }

    fn stored_bytes(&self) -> &[u8] {
        match self {
            CacheEntry::Payload(bytes) => bytes,
            CacheEntry::RecordedFailure => &[],
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            CacheEntry::Payload(bytes) => Some(bytes),
            CacheEntry::RecordedFailure => None,
        }
    }

    pub fn into_payload(self) -> Option<Vec<u8>> {
        match self {
            CacheEntry::Payload(bytes) => Some(bytes),
            CacheEntry::RecordedFailure => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CacheEntry::RecordedFailure)
    }
}

/// Hex SHA-256 of the key's UTF-8 bytes; the cache file stem.
pub fn hash_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Content-addressed disk cache: `<dir>/<hash>.<ext>` per key plus an
/// append-only `<dir>/list.txt` of `<hash>\t<key>` lines.
///
/// Check, retrieve and write for one key happen under that key's lock, and
/// index appends are serialised, so the cache may be shared by concurrent
/// fetch tasks within one process. Nothing guards against other processes.
pub struct ContentCache<R> {
    dir: PathBuf,
    extension: String,
    index_path: PathBuf,
    retriever: R,
    key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    index_lock: AsyncMutex<()>,
}

impl<R: Retriever> ContentCache<R> {
    /// Opens (creating if needed) a cache directory whose entries use `extension`.
    pub fn open(dir: impl Into<PathBuf>, extension: &str, retriever: R) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {:?}", dir))?;
        let index_path = dir.join(INDEX_FILE);
        info!("Opened content cache at {:?} (*.{})", dir, extension);
        Ok(Self {
            dir,
            extension: extension.trim_start_matches('.').to_string(),
            index_path,
            retriever,
            key_locks: Mutex::new(HashMap::new()),
            index_lock: AsyncMutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn retriever(&self) -> &R {
        &self.retriever
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", hash_key(key), self.extension))
    }

    /// Returns the stored entry, fetching and recording it on a miss.
    ///
    /// Retrieval failures come back as `CacheEntry::RecordedFailure`; only
    /// local I/O problems are errors.
    pub async fn fetch(&self, key: &str) -> Result<CacheEntry> {
        let lock = self.key_lock(key);
        let entry = {
            let _guard = lock.lock().await;
            self.fetch_locked(key).await
        };
        self.release_key_lock(key, lock);
        entry
    }

    async fn fetch_locked(&self, key: &str) -> Result<CacheEntry> {
        if let Some(entry) = self.load(key).await? {
            debug!("Cache hit for {}", key);
            return Ok(entry);
        }

        debug!("Cache miss for {}, retrieving", key);
        let entry = match self.retriever.retrieve(key).await {
            Some(bytes) if !bytes.is_empty() => CacheEntry::Payload(bytes),
            _ => {
                warn!("Retrieval failed for {}; recording the failure", key);
                CacheEntry::RecordedFailure
            }
        };
        self.store(key, &entry).await?;
        Ok(entry)
    }

    /// Reads a stored entry without retrieving; `None` when the key was never fetched.
    pub async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(CacheEntry::from_stored(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read cache file {:?}", path)),
        }
    }

    /// Replays the index; lines without a tab are skipped, repeated keys reported once.
    pub async fn list_cached(&self) -> Result<Vec<String>> {
        let text = match tokio::fs::read_to_string(&self.index_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache index {:?}", self.index_path))
            }
        };

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once('\t') {
                Some((_hash, key)) => {
                    if seen.insert(key.to_string()) {
                        keys.push(key.to_string());
                    }
                }
                None => warn!(
                    "Skipping malformed line {} in {:?}",
                    line_no + 1,
                    self.index_path
                ),
            }
        }
        Ok(keys)
    }

    /// Deletes the stored entry and drops the key from the index so the next
    /// fetch retrieves it again. Returns whether an entry existed.
    pub async fn purge(&self, key: &str) -> Result<bool> {
        let lock = self.key_lock(key);
        let purged = {
            let _guard = lock.lock().await;
            self.purge_locked(key).await
        };
        self.release_key_lock(key, lock);
        purged
    }

    async fn purge_locked(&self, key: &str) -> Result<bool> {
        let _index_guard = self.index_lock.lock().await;

        let path = self.path_for(key);
        let existed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove cache file {:?}", path))
            }
        };

        let text = match tokio::fs::read_to_string(&self.index_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(existed),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cache index {:?}", self.index_path))
            }
        };
        let kept: String = text
            .lines()
            .filter(|line| matches!(line.split_once('\t'), Some((_, k)) if k != key))
            .map(|line| format!("{}\n", line))
            .collect();

        let tmp_path = self.index_path.with_extension("txt.tmp");
        tokio::fs::write(&tmp_path, kept)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        tokio::fs::rename(&tmp_path, &self.index_path)
            .await
            .with_context(|| format!("Failed to replace cache index {:?}", self.index_path))?;

        info!("Purged cache entry for {} (existed: {})", key, existed);
        Ok(existed)
    }

    async fn store(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let path = self.path_for(key);
        tokio::fs::write(&path, entry.stored_bytes())
            .await
            .with_context(|| format!("Failed to write cache file {:?}", path))?;

        let _index_guard = self.index_lock.lock().await;
        let mut index = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)
            .await
            .with_context(|| format!("Failed to open cache index {:?}", self.index_path))?;
        let line = format!("{}\t{}\n", hash_key(key), key);
        index
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to cache index {:?}", self.index_path))?;
        index.flush().await?;
        Ok(())
    }

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // Clones are only handed out under the map lock, so a count of two
    // (map + ours) means no other task is waiting on this key.
    fn release_key_lock(&self, key: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.key_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
