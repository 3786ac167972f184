//! In-memory storage backend, used for tests and local experiments.

use crate::keys::validate_name;
use crate::traits::{Storage, StorageError, StorageResult, StoredObject, WritableHandle};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Objects = Arc<RwLock<HashMap<String, Bytes>>>;

/// Storage that keeps published objects in a shared map.
///
/// Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Objects,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a published object.
    pub async fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

pub struct MemoryWriteHandle {
    name: String,
    buffer: BytesMut,
    objects: Objects,
}

#[async_trait]
impl WritableHandle for MemoryWriteHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> StorageResult<StoredObject> {
        let MemoryWriteHandle {
            name,
            buffer,
            objects,
        } = *self;
        let size_bytes = buffer.len() as u64;

        let mut objects = objects.write().await;
        if objects.contains_key(&name) {
            return Err(StorageError::AlreadyExists(name));
        }
        objects.insert(name.clone(), buffer.freeze());

        tracing::debug!(name = %name, size_bytes, "Memory storage upload successful");

        Ok(StoredObject {
            location: format!("memory://{}", name),
            name,
            size_bytes,
        })
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create(&self, name: &str) -> StorageResult<Box<dyn WritableHandle>> {
        validate_name(name)?;
        if self.objects.read().await.contains_key(name) {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        Ok(Box::new(MemoryWriteHandle {
            name: name.to_string(),
            buffer: BytesMut::new(),
            objects: self.objects.clone(),
        }))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        validate_name(name)?;
        self.objects.write().await.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.objects.read().await.contains_key(name))
    }

    async fn content_length(&self, name: &str) -> StorageResult<u64> {
        validate_name(name)?;
        self.objects
            .read()
            .await
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
