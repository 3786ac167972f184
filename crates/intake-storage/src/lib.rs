//! Intake Storage Library
//!
//! This crate provides the storage collaborator used by the intake pipeline:
//! the `Storage` and `WritableHandle` traits and their filesystem and
//! in-memory implementations.
//!
//! # Object names
//!
//! Objects are addressed by a flat name generated by the pipeline. Names must
//! not contain path separators, `..`, or start with `.`; validation is
//! centralized in the `keys` module so all backends agree.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use intake_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
pub use traits::{Storage, StorageError, StorageResult, StoredObject, WritableHandle};
