use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use dirs::data_dir;
use sealbox_core::{SecureStore, SecureStoreOptions, StorageAdapter};
use sealbox_storage::FsStorageAdapter;
use tracing::debug;

use crate::config::Config;

/// Resolve the default record document path.
pub fn default_store_path() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("sealbox").join("store.json"))
}

/// Build a secure store from config, with an optional command-line key
/// override taking precedence over the config's `user_key`.
pub fn store_from_config(config: &Config, key_override: Option<String>) -> Result<SecureStore> {
    let path = match &config.store_path {
        Some(path) => path.clone(),
        None => default_store_path()?,
    };
    debug!(?path, "initializing secure store");

    let adapter: Arc<dyn StorageAdapter> = Arc::new(FsStorageAdapter::new(path));
    Ok(SecureStore::new(SecureStoreOptions {
        storage_adapter: Some(adapter),
        storage_key_name: config.storage_key_name.clone(),
        user_key: key_override.or_else(|| config.user_key.clone()),
        ..Default::default()
    }))
}

/// Helper for tests: a store whose document lives under a temp dir.
#[cfg(test)]
pub fn test_store(root: impl Into<PathBuf>) -> SecureStore {
    let adapter: Arc<dyn StorageAdapter> =
        Arc::new(FsStorageAdapter::new(root.into().join("store.json")));
    SecureStore::new(SecureStoreOptions {
        storage_adapter: Some(adapter),
        ..Default::default()
    })
}
