//! Concrete storage adapters for Sealbox.
//! The filesystem variant keeps all records in a single JSON document.

pub mod fs_adapter;

pub use fs_adapter::FsStorageAdapter;
