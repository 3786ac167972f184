use crate::keys::validate_name;
use crate::traits::{Storage, StorageError, StorageResult, StoredObject, WritableHandle};
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
///
/// Objects are written to a hidden `.{name}.part` file next to their final
/// location and renamed into place on close, so readers never observe a
/// partially written upload under its real name.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for uploads (e.g., "/var/lib/intake/uploads")
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert an object name to its final filesystem path.
    fn name_to_path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.base_path.join(name))
    }

    fn partial_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!(".{}.part", name))
    }
}

/// In-progress write to a [`LocalStorage`] object.
pub struct LocalWriteHandle {
    name: String,
    final_path: PathBuf,
    partial_path: PathBuf,
    file: Option<fs::File>,
    written: u64,
    published: bool,
    started: Instant,
}

impl LocalWriteHandle {
    fn file_mut(&mut self) -> StorageResult<&mut fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| StorageError::WriteFailed(format!("Handle for {} is closed", self.name)))
    }
}

#[async_trait]
impl WritableHandle for LocalWriteHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        let path = self.partial_path.clone();
        self.file_mut()?.write_all(data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn close(self: Box<Self>) -> StorageResult<StoredObject> {
        let mut this = self;
        let mut file = this
            .file
            .take()
            .ok_or_else(|| StorageError::WriteFailed(format!("Handle for {} is closed", this.name)))?;

        file.flush().await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to flush file {}: {}",
                this.partial_path.display(),
                e
            ))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to sync file {}: {}",
                this.partial_path.display(),
                e
            ))
        })?;
        drop(file);

        fs::rename(&this.partial_path, &this.final_path)
            .await
            .map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to publish file {}: {}",
                    this.final_path.display(),
                    e
                ))
            })?;
        this.published = true;

        tracing::info!(
            path = %this.final_path.display(),
            name = %this.name,
            size_bytes = this.written,
            duration_ms = this.started.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(StoredObject {
            name: this.name.clone(),
            location: this.final_path.display().to_string(),
            size_bytes: this.written,
        })
    }
}

impl Drop for LocalWriteHandle {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.partial_path) {
            Ok(()) => {
                tracing::debug!(
                    path = %self.partial_path.display(),
                    "Discarded unfinished upload"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.partial_path.display(),
                    error = %e,
                    "Failed to remove unfinished upload"
                );
            }
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn create(&self, name: &str) -> StorageResult<Box<dyn WritableHandle>> {
        let final_path = self.name_to_path(name)?;
        let partial_path = self.partial_path(name);

        if fs::try_exists(&final_path).await.unwrap_or(false) {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(name.to_string()),
                _ => StorageError::WriteFailed(format!(
                    "Failed to create file {}: {}",
                    partial_path.display(),
                    e
                )),
            })?;

        Ok(Box::new(LocalWriteHandle {
            name: name.to_string(),
            final_path,
            partial_path,
            file: Some(file),
            written: 0,
            published: false,
            started: Instant::now(),
        }))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.name_to_path(name)?;
        let start = Instant::now();
        let mut removed = false;

        for candidate in [path.clone(), self.partial_path(name)] {
            match fs::remove_file(&candidate).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::DeleteFailed(format!(
                        "Failed to delete file {}: {}",
                        candidate.display(),
                        e
                    )));
                }
            }
        }

        if removed {
            tracing::info!(
                path = %path.display(),
                name = %name,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Local storage delete successful"
            );
        }

        Ok(())
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let path = self.name_to_path(name)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn content_length(&self, name: &str) -> StorageResult<u64> {
        let path = self.name_to_path(name)?;
        let meta = fs::metadata(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::BackendError(e.to_string()),
        })?;
        Ok(meta.len())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
