//! Restart persistence (§6 restart files).
//!
//! ## Table of Contents
//! - **RestartStore**: Trait for restart/snapshot-manifest storage backends
//! - **MemoryStore**: In-memory store (tests)
//! - **FileStore**: File-based persistent storage (one JSON blob per key)

use crate::error::{Result, SwiftError};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Trait for restart-state storage backends.
#[async_trait]
pub trait RestartStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys with a prefix.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Store name for logging.
    fn name(&self) -> &str;
}

/// Check if a key exists in the store.
pub async fn store_exists(store: &dyn RestartStore, key: &str) -> Result<bool> {
    Ok(store.get(key).await?.is_some())
}

/// Get and deserialize JSON from the store.
pub async fn store_get_json<T: DeserializeOwned>(
    store: &dyn RestartStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serialize and set JSON in the store.
pub async fn store_set_json<T: Serialize>(
    store: &dyn RestartStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, bytes).await
}

/// In-memory store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self { data: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl RestartStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// File-based restart store: one rank's restart data as a JSON blob per key
/// (§6 "one per rank, raw serialization of engine state plus particle
/// arrays").
pub struct FileStore {
    path: PathBuf,
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl FileStore {
    /// Open or create a file store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| SwiftError::storage(format!("failed to read store: {e}")))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            HashMap::new()
        };

        info!(path = %path.display(), "restart store opened");
        Ok(Self { path, data: RwLock::new(data) })
    }

    /// Persist all in-memory data to disk.
    pub async fn flush(&self) -> Result<()> {
        let data = self.data.read().await;
        let contents = serde_json::to_string_pretty(&*data)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SwiftError::storage(format!("failed to create dir: {e}")))?;
        }

        std::fs::write(&self.path, contents)
            .map_err(|e| SwiftError::storage(format!("failed to write store: {e}")))?;

        debug!(path = %self.path.display(), "restart store flushed");
        Ok(())
    }
}

#[async_trait]
impl RestartStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Boxed store for dynamic dispatch.
pub type BoxedRestartStore = Arc<dyn RestartStore>;

/// Build an in-memory store.
pub fn memory_store() -> BoxedRestartStore {
    Arc::new(MemoryStore::new()) as BoxedRestartStore
}

/// Key prefixes for restart-state namespaces (§6).
pub mod keys {
    /// Per-rank engine state (time, step counters, coloring).
    pub const ENGINE: &str = "swift/engine";
    /// Particle array blobs.
    pub const PARTICLES: &str = "swift/particles";
    /// Snapshot manifest entries.
    pub const SNAPSHOTS: &str = "swift/snapshots";

    /// Build an engine-state key for `rank`.
    pub fn engine(rank: i32) -> String {
        format!("{ENGINE}/{rank}")
    }

    /// Build a particle-array key for `rank`.
    pub fn particles(rank: i32) -> String {
        format!("{PARTICLES}/{rank}")
    }

    /// Build a snapshot manifest key for step `step`.
    pub fn snapshot(step: u64) -> String {
        format!("{SNAPSHOTS}/{step}")
    }
}
