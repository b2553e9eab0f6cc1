//! Key-value blob stores used to persist the route table.
//!
//! # Responsibilities
//! - Define the cache collaborator interface (`get` / `put` with TTL)
//! - In-process store for single-node deployments and tests
//! - File store that survives restarts
//!
//! # Design Decisions
//! - Expired entries read as a miss and are evicted lazily
//! - A TTL too large to represent never expires
//! - File entries are named by the SHA-256 of the key
//! - Values are opaque bytes; encoding is the caller's concern

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key under which the route table is stored.
pub const ROUTE_CACHE_KEY: &str = "Route::cache()";

/// Errors from a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode cache value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Blob store consulted by [`RouteTable`](crate::routing::RouteTable).
#[async_trait]
pub trait RouteCache: Send + Sync {
    /// Fetch a value; `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value for `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
}

/// Concurrent in-memory cache.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl RouteCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let expired = match self.inner.get(key) {
            Some(entry) if entry.1.map_or(true, |at| at > Instant::now()) => {
                return Ok(Some(entry.0.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.inner.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let expires = Instant::now().checked_add(ttl);
        self.inner.insert(key.to_string(), (value, expires));
        Ok(())
    }
}

/// Cache stored as one file per key under a directory.
///
/// File layout: expiry as unix seconds on the first line, then the raw value.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.cache", hex::encode(digest)))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl RouteCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(key);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let newline = contents
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| CacheError::Corrupt(path.display().to_string()))?;
        let expires: u64 = std::str::from_utf8(&contents[..newline])
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| CacheError::Corrupt(path.display().to_string()))?;

        if expires <= unix_now() {
            // stale entry; removal failure only delays cleanup
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(contents[newline + 1..].to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let expires = unix_now().saturating_add(ttl.as_secs());
        let mut contents = format!("{expires}\n").into_bytes();
        contents.extend_from_slice(&value);
        tokio::fs::write(self.path_for(key), contents).await?;
        Ok(())
    }
}
