use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by storage adapter implementations.
///
/// A missing record is *not* an error: `get_item` reports it as `Ok(None)`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying medium I/O failure.
    #[error("storage failure: {reason}")]
    Io { reason: String },
}

/// Namespaced key-value persistence capability used by the secure store to
/// hold its key record. All operations may suspend on I/O.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fetch the value for a record name, or `None` if absent.
    async fn get_item(&self, name: &str) -> Result<Option<String>, StorageError>;

    /// Persist a value under a record name, overwriting any existing entry.
    async fn set_item(&self, name: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a record (idempotent).
    async fn remove_item(&self, name: &str) -> Result<(), StorageError>;

    /// Remove every record this adapter instance owns. Must never touch
    /// unrelated data sharing the same underlying medium.
    async fn clear_all(&self) -> Result<(), StorageError>;
}

/// Shared in-process key-value medium. Several adapters (and unrelated code)
/// may hold entries in the same medium; each adapter only owns the subset
/// under its prefix.
pub type SharedMedium = Arc<Mutex<HashMap<String, String>>>;

const DEFAULT_PREFIX: &str = "__secure_client_store__";

/// In-memory adapter that namespaces its records under a fixed string prefix
/// within a shared medium, so `clear_all` can wipe its own records without
/// disturbing neighbours.
#[derive(Debug, Clone)]
pub struct MemoryStorageAdapter {
    prefix: String,
    medium: SharedMedium,
}

impl Default for MemoryStorageAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageAdapter {
    /// Adapter over a private medium with the default prefix.
    pub fn new() -> Self {
        Self::with_medium(DEFAULT_PREFIX, Arc::new(Mutex::new(HashMap::new())))
    }

    /// Adapter over an existing medium, owning only entries under `prefix`.
    pub fn with_medium(prefix: impl Into<String>, medium: SharedMedium) -> Self {
        Self {
            prefix: prefix.into(),
            medium,
        }
    }

    pub fn medium(&self) -> SharedMedium {
        Arc::clone(&self.medium)
    }

    fn namespaced(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.medium.lock().map_err(|err| StorageError::Io {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn get_item(&self, name: &str) -> Result<Option<String>, StorageError> {
        let map = self.lock()?;
        Ok(map.get(&self.namespaced(name)).cloned())
    }

    async fn set_item(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.lock()?;
        map.insert(self.namespaced(name), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<(), StorageError> {
        let mut map = self.lock()?;
        map.remove(&self.namespaced(name));
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let mut map = self.lock()?;
        map.retain(|key, _| !key.starts_with(&self.prefix));
        Ok(())
    }
}
