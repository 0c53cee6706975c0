use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use sealbox_core::adapter::{StorageAdapter, StorageError};
use tempfile::NamedTempFile;
use tracing::{instrument, warn};

const DEFAULT_FILE_NAME: &str = "sealbox-store.json";

/// Filesystem-backed adapter holding every record in one JSON document that
/// is read-modify-written per operation.
///
/// A missing or corrupt document reads as an empty record set. Writes replace
/// the document atomically, but there is no cross-process locking: concurrent
/// processes sharing the same path can lose updates. Known limitation.
pub struct FsStorageAdapter {
    path: PathBuf,
}

impl FsStorageAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Adapter rooted in the OS temp dir under the default document name.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join(DEFAULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_records(&self) -> Result<HashMap<String, String>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(io_err(err)),
        };
        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(err) => {
                // A damaged document must not brick the store.
                warn!(path = %self.path.display(), "corrupt record document, treating as empty: {err}");
                Ok(HashMap::new())
            }
        }
    }

    fn write_records(&self, records: &HashMap<String, String>) -> Result<(), StorageError> {
        let parent = self.path.parent().ok_or_else(|| StorageError::Io {
            reason: "invalid storage path".to_string(),
        })?;
        fs::create_dir_all(parent).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        let json = serde_json::to_vec(records).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FsStorageAdapter {
    #[instrument(skip_all, fields(name))]
    async fn get_item(&self, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_records()?.get(name).cloned())
    }

    #[instrument(skip_all, fields(name))]
    async fn set_item(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let mut records = self.read_records()?;
        records.insert(name.to_string(), value.to_string());
        self.write_records(&records)
    }

    #[instrument(skip_all, fields(name))]
    async fn remove_item(&self, name: &str) -> Result<(), StorageError> {
        let mut records = self.read_records()?;
        records.remove(name);
        self.write_records(&records)
    }

    #[instrument(skip_all)]
    async fn clear_all(&self) -> Result<(), StorageError> {
        self.write_records(&HashMap::new())
    }
}

fn io_err<E: ToString>(err: E) -> StorageError {
    StorageError::Io {
        reason: err.to_string(),
    }
}
