//! Storage abstraction trait
//!
//! This module defines the traits every storage backend implements.

use crate::StorageBackend;
use async_trait::async_trait;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid object name: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable object produced by closing a [`WritableHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    /// Backend-specific location (filesystem path, `memory://` URI).
    pub location: String,
    pub size_bytes: u64,
}

/// An object being written.
///
/// Bytes become visible under the object's name only after `close` returns
/// successfully. Dropping a handle without closing it discards what was
/// written.
#[async_trait]
pub trait WritableHandle: Send {
    fn name(&self) -> &str;

    async fn write(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Flush to stable storage and publish the object.
    async fn close(self: Box<Self>) -> StorageResult<StoredObject>;
}

/// Storage abstraction trait
///
/// The intake pipeline only depends on this trait, so backends can be swapped
/// (filesystem in production, memory in tests) without touching it.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Start a new object. Fails if the name is invalid or already taken.
    async fn create(&self, name: &str) -> StorageResult<Box<dyn WritableHandle>>;

    /// Remove an object, including any unfinished upload under the same name.
    /// Deleting a missing object succeeds.
    async fn delete(&self, name: &str) -> StorageResult<()>;

    /// Check if a published object exists
    async fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Size in bytes of a published object.
    async fn content_length(&self, name: &str) -> StorageResult<u64>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
