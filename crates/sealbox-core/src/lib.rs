//! Core abstractions for Sealbox: the secure store, its crypto provider,
//! and the pluggable storage adapter contract.

pub mod adapter;
pub mod crypto;
pub mod envelope;
pub mod store;

pub use adapter::{MemoryStorageAdapter, StorageAdapter, StorageError};
pub use crypto::{AesGcmProvider, CryptoProvider, KeyHandle, KeyOrigin};
pub use store::{SecureStore, SecureStoreError, SecureStoreOptions};
