//! Intake pipeline: parse → check policy → stream to storage.
//!
//! One [`IntakePipeline::run`] call handles one request body. Parts are
//! checked against the policy as soon as their headers are known, file bytes
//! are copied to storage chunk by chunk, and the first rejection aborts the
//! whole request. A rejected request leaves no stored files behind.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures::Stream;

use intake_core::models::mime_essence;
use intake_core::{
    AcceptedUpload, FormField, IntakeResult, Rejection, RejectionKind, StoredFile, UploadPolicy,
};
use intake_storage::{Storage, StorageError};

use crate::multipart::{MultipartStream, PartHeader};
use crate::naming::stored_name;

/// Applies an [`UploadPolicy`] to multipart request bodies.
#[derive(Clone)]
pub struct IntakePipeline {
    policy: Arc<UploadPolicy>,
    storage: Arc<dyn Storage>,
}

impl IntakePipeline {
    pub fn new(policy: Arc<UploadPolicy>, storage: Arc<dyn Storage>) -> Self {
        Self { policy, storage }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Consume one multipart body.
    ///
    /// Returns every stored file and plain field in arrival order, or the
    /// first rejection. On rejection every file stored for this body has been
    /// deleted before this returns.
    pub async fn run<S, E>(&self, boundary: &str, body: S) -> IntakeResult
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let start = Instant::now();
        let mut cleanup = CleanupGuard::new(self.storage.clone());

        match self.intake(boundary, body, &mut cleanup).await {
            Ok(upload) => {
                cleanup.disarm();
                tracing::info!(
                    files = upload.files.len(),
                    fields = upload.fields.len(),
                    total_bytes = upload.total_bytes(),
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Upload accepted"
                );
                Ok(upload)
            }
            Err(rejection) => {
                let removed = cleanup.rollback().await;
                if rejection.reason.is_client_fault() {
                    tracing::warn!(
                        reason = %rejection.reason,
                        detail = %rejection.detail,
                        removed_files = removed,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Upload rejected"
                    );
                } else {
                    tracing::error!(
                        reason = %rejection.reason,
                        detail = %rejection.detail,
                        removed_files = removed,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Upload failed"
                    );
                }
                Err(rejection)
            }
        }
    }

    async fn intake<S, E>(
        &self,
        boundary: &str,
        body: S,
        cleanup: &mut CleanupGuard,
    ) -> IntakeResult
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let limits = &self.policy.limits;
        let mut parts = MultipartStream::new(body, boundary, limits.max_header_bytes);
        let mut accepted = AcceptedUpload::default();
        let mut file_counts: HashMap<String, u32> = HashMap::new();
        let mut part_count = 0usize;

        while let Some(header) = parts.next_part().await? {
            part_count += 1;
            if part_count > limits.max_parts {
                return Err(Rejection::new(
                    RejectionKind::TooManyParts,
                    format!("Request has more than {} parts", limits.max_parts),
                ));
            }

            if !header.is_file() {
                let value =
                    read_field_value(&mut parts, &header, limits.max_field_value_bytes).await?;
                accepted.fields.push(FormField {
                    name: header.field_name,
                    value,
                });
                continue;
            }

            if header.is_empty_file_input() {
                skip_empty_file_input(&mut parts, &header, limits.max_field_value_bytes).await?;
                continue;
            }

            let file = self
                .store_file(&mut parts, &header, &mut file_counts, cleanup)
                .await?;
            accepted.files.push(file);
        }

        Ok(accepted)
    }

    async fn store_file<S, E>(
        &self,
        parts: &mut MultipartStream<S>,
        header: &PartHeader,
        file_counts: &mut HashMap<String, u32>,
        cleanup: &mut CleanupGuard,
    ) -> Result<StoredFile, Rejection>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let field_name = header.field_name.as_str();
        let field_policy = self.policy.field(field_name).ok_or_else(|| {
            Rejection::new(
                RejectionKind::UnexpectedField,
                format!("Files are not accepted for field '{}'", field_name),
            )
        })?;

        let mime_type = mime_essence(header.mime_type());
        if !field_policy.allows_mime(&mime_type) {
            return Err(Rejection::new(
                RejectionKind::UnsupportedMediaType,
                format!(
                    "File type '{}' is not allowed for field '{}'",
                    mime_type, field_name
                ),
            ));
        }

        let count = file_counts.entry(field_name.to_string()).or_insert(0);
        if *count >= field_policy.max_count {
            return Err(Rejection::new(
                RejectionKind::TooManyFiles,
                format!(
                    "Field '{}' accepts at most {} file(s)",
                    field_name, field_policy.max_count
                ),
            ));
        }
        *count += 1;

        let name = stored_name(header.original_filename.as_deref());
        let mut handle = self
            .storage
            .create(&name)
            .await
            .map_err(|e| storage_rejection(&name, e))?;
        cleanup.track(name.clone());

        let mut size_bytes: u64 = 0;
        while let Some(chunk) = parts.next_chunk().await? {
            size_bytes += chunk.len() as u64;
            if size_bytes > field_policy.max_bytes_per_file {
                drop(handle);
                if let Err(e) = self.storage.delete(&name).await {
                    tracing::warn!(stored_name = %name, error = %e, "Failed to delete oversized upload");
                }
                return Err(Rejection::new(
                    RejectionKind::FileTooLarge,
                    format!(
                        "File exceeds the limit of {} bytes for field '{}'",
                        field_policy.max_bytes_per_file, field_name
                    ),
                ));
            }
            handle
                .write(&chunk)
                .await
                .map_err(|e| storage_rejection(&name, e))?;
        }

        let object = handle
            .close()
            .await
            .map_err(|e| storage_rejection(&name, e))?;

        tracing::debug!(
            field_name = %field_name,
            stored_name = %object.name,
            size_bytes = object.size_bytes,
            "Stored uploaded file"
        );

        Ok(StoredFile {
            field_name: field_name.to_string(),
            stored_name: object.name,
            original_filename: header.original_filename.clone().unwrap_or_default(),
            mime_type,
            size_bytes: object.size_bytes,
            storage_path: object.location,
        })
    }
}

async fn read_field_value<S, E>(
    parts: &mut MultipartStream<S>,
    header: &PartHeader,
    max_bytes: usize,
) -> Result<String, Rejection>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut value = BytesMut::new();
    while let Some(chunk) = parts.next_chunk().await? {
        if value.len() + chunk.len() > max_bytes {
            return Err(Rejection::new(
                RejectionKind::FieldValueTooLarge,
                format!(
                    "Value of field '{}' exceeds {} bytes",
                    header.field_name, max_bytes
                ),
            ));
        }
        value.extend_from_slice(&chunk);
    }

    String::from_utf8(value.to_vec()).map_err(|_| {
        Rejection::malformed(format!(
            "Value of field '{}' is not valid UTF-8",
            header.field_name
        ))
    })
}

/// Drain the body of a file input sent without a file (`filename=""`).
///
/// Browsers send these with an empty body; anything larger than a plain field
/// value is refused.
async fn skip_empty_file_input<S, E>(
    parts: &mut MultipartStream<S>,
    header: &PartHeader,
    max_bytes: usize,
) -> Result<(), Rejection>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut skipped = 0usize;
    while let Some(chunk) = parts.next_chunk().await? {
        skipped += chunk.len();
        if skipped > max_bytes {
            return Err(Rejection::new(
                RejectionKind::FieldValueTooLarge,
                format!(
                    "File input '{}' has no filename but carries more than {} bytes",
                    header.field_name, max_bytes
                ),
            ));
        }
    }

    tracing::debug!(field_name = %header.field_name, skipped_bytes = skipped, "Skipped empty file input");
    Ok(())
}

fn storage_rejection(name: &str, err: StorageError) -> Rejection {
    tracing::error!(stored_name = %name, error = %err, "Storage write failed");
    Rejection::storage_failed(format!("Failed to store '{}': {}", name, err))
}

/// Tracks names created during one request so they can be removed if the
/// request does not complete.
///
/// `rollback` deletes them inline. If the guard is dropped while still armed
/// (the request future was cancelled), deletion is spawned on the current
/// tokio runtime.
struct CleanupGuard {
    storage: Arc<dyn Storage>,
    names: Vec<String>,
}

impl CleanupGuard {
    fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            names: Vec::new(),
        }
    }

    fn track(&mut self, name: String) {
        self.names.push(name);
    }

    fn disarm(&mut self) {
        self.names.clear();
    }

    /// Delete every tracked name. Returns how many deletions succeeded.
    async fn rollback(&mut self) -> usize {
        let names = std::mem::take(&mut self.names);
        delete_all(self.storage.as_ref(), &names).await
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.names.is_empty() {
            return;
        }
        let names = std::mem::take(&mut self.names);
        let storage = self.storage.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(
                    files = names.len(),
                    "Upload cancelled, scheduling cleanup of stored files"
                );
                runtime.spawn(async move {
                    delete_all(storage.as_ref(), &names).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    files = ?names,
                    "Upload cancelled outside a runtime, stored files were not removed"
                );
            }
        }
    }
}

async fn delete_all(storage: &dyn Storage, names: &[String]) -> usize {
    let mut removed = 0;
    for name in names {
        match storage.delete(name).await {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::error!(stored_name = %name, error = %e, "Failed to delete stored file during cleanup");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use intake_core::{FieldPolicy, IntakeLimits, StorageBackend};
    use intake_storage::{LocalStorage, MemoryStorage, StorageResult, WritableHandle};
    use std::io;
    use std::time::Duration;

    const BOUNDARY: &str = "----intake-test-boundary";

    enum Part<'a> {
        Field(&'a str, &'a str),
        File(&'a str, &'a str, &'a str, &'a [u8]),
    }

    fn body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Field(name, value) => {
                    out.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    out.extend_from_slice(value.as_bytes());
                }
                Part::File(name, filename, mime, data) => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            name, filename, mime
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(data);
                }
            }
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        out
    }

    fn chunked(body: Vec<u8>, size: usize) -> impl Stream<Item = Result<Bytes, io::Error>> + Unpin {
        let chunks: Vec<Result<Bytes, io::Error>> = body
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    fn memory_pipeline(policy: UploadPolicy) -> (IntakePipeline, MemoryStorage) {
        let storage = MemoryStorage::new();
        let pipeline = IntakePipeline::new(Arc::new(policy), Arc::new(storage.clone()));
        (pipeline, storage)
    }

    #[tokio::test]
    async fn test_accepts_valid_parts_in_order() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let png = vec![7u8; 1000];
        let data = body(&[
            Part::Field("comment", "quarterly scans"),
            Part::File("userfile", "avatar.PNG", "image/png", &png),
            Part::File("userdocuments", "a.pdf", "application/pdf", b"%PDF-1.4 a"),
            Part::File("userdocuments", "b.pdf", "application/pdf; name=b", b"%PDF-1.4 bb"),
        ]);

        let upload = pipeline.run(BOUNDARY, chunked(data, 37)).await.unwrap();

        assert_eq!(upload.files.len(), 3);
        assert_eq!(upload.files[0].field_name, "userfile");
        assert_eq!(upload.files[0].original_filename, "avatar.PNG");
        assert!(upload.files[0].stored_name.ends_with(".png"));
        assert_eq!(upload.files[0].size_bytes, 1000);
        assert_eq!(upload.files[1].original_filename, "a.pdf");
        assert_eq!(upload.files[2].original_filename, "b.pdf");
        assert_eq!(upload.files[2].mime_type, "application/pdf");
        assert_eq!(
            upload.fields,
            vec![FormField {
                name: "comment".to_string(),
                value: "quarterly scans".to_string()
            }]
        );

        for file in &upload.files {
            let stored = storage.get(&file.stored_name).await.unwrap();
            assert_eq!(stored.len() as u64, file.size_bytes);
        }
        assert_eq!(&storage.get(&upload.files[2].stored_name).await.unwrap()[..], b"%PDF-1.4 bb");
    }

    #[tokio::test]
    async fn test_image_with_one_document_is_accepted() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let data = body(&[
            Part::File("userfile", "me.jpg", "image/jpeg", &vec![1u8; 2 * 1024 * 1024]),
            Part::File("userdocuments", "cv.pdf", "application/pdf", &vec![2u8; 1024 * 1024]),
        ]);

        let upload = pipeline.run(BOUNDARY, chunked(data, 64 * 1024)).await.unwrap();
        assert_eq!(upload.count_by_field().get("userfile"), Some(&1));
        assert_eq!(upload.count_by_field().get("userdocuments"), Some(&1));
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_unsupported_media_type_leaves_nothing() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let data = body(&[
            Part::File("userdocuments", "ok.pdf", "application/pdf", b"%PDF"),
            Part::File("userfile", "anim.gif", "image/gif", b"GIF89a"),
        ]);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 11)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::UnsupportedMediaType);
        assert!(rejection.detail.contains("image/gif"));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_too_many_files_for_field() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let data = body(&[
            Part::File("userdocuments", "1.pdf", "application/pdf", b"1"),
            Part::File("userdocuments", "2.pdf", "application/pdf", b"2"),
            Part::File("userdocuments", "3.pdf", "application/pdf", b"3"),
            Part::File("userdocuments", "4.pdf", "application/pdf", b"4"),
        ]);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 100)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::TooManyFiles);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let pipeline = IntakePipeline::new(Arc::new(UploadPolicy::default()), storage);
        let data = body(&[
            Part::File("userdocuments", "small.pdf", "application/pdf", b"%PDF"),
            Part::File(
                "userdocuments",
                "huge.pdf",
                "application/pdf",
                &vec![0u8; 4 * 1024 * 1024],
            ),
        ]);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 8192)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::FileTooLarge);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_file_exactly_at_limit_is_accepted() {
        let policy = UploadPolicy::empty().with_field("blob", FieldPolicy::new(["application/octet-stream"], 1, 64));
        let (pipeline, _storage) = memory_pipeline(policy);
        let data = body(&[Part::File("blob", "x.bin", "application/octet-stream", &[9u8; 64])]);

        let upload = pipeline.run(BOUNDARY, chunked(data, 3)).await.unwrap();
        assert_eq!(upload.files[0].size_bytes, 64);
    }

    #[tokio::test]
    async fn test_unexpected_file_field() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let data = body(&[Part::File("avatar", "a.png", "image/png", b"png")]);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 100)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::UnexpectedField);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_structural_limits() {
        let limits = IntakeLimits {
            max_header_bytes: 1024,
            max_field_value_bytes: 8,
            max_parts: 2,
        };
        let (pipeline, _storage) = memory_pipeline(UploadPolicy::default().with_limits(limits));

        let data = body(&[Part::Field("note", "way too long")]);
        let rejection = pipeline.run(BOUNDARY, chunked(data, 5)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::FieldValueTooLarge);

        let data = body(&[
            Part::Field("a", "1"),
            Part::Field("b", "2"),
            Part::Field("c", "3"),
        ]);
        let rejection = pipeline.run(BOUNDARY, chunked(data, 5)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::TooManyParts);
    }

    #[tokio::test]
    async fn test_empty_file_input_is_skipped() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let data = body(&[
            Part::File("userfile", "", "application/octet-stream", b""),
            Part::File("userdocuments", "a.pdf", "application/pdf", b"%PDF"),
        ]);

        let upload = pipeline.run(BOUNDARY, chunked(data, 100)).await.unwrap();
        assert_eq!(upload.files.len(), 1);
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_file_input_with_body_is_capped() {
        let limits = IntakeLimits {
            max_header_bytes: 1024,
            max_field_value_bytes: 16,
            max_parts: 10,
        };
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default().with_limits(limits));
        let data = body(&[
            Part::File("userdocuments", "a.pdf", "application/pdf", b"%PDF"),
            Part::File("userfile", "", "image/png", &[0u8; 4096]),
        ]);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 100)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::FieldValueTooLarge);
        assert!(rejection.detail.contains("userfile"));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_local_round_trip_matches_stored_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let pipeline = IntakePipeline::new(Arc::new(UploadPolicy::default()), storage);
        let png: Vec<u8> = (0..12_345u32).map(|i| (i % 251) as u8).collect();
        let data = body(&[
            Part::File("userfile", "scan.png", "image/png", &png),
            Part::File("userdocuments", "a.pdf", "application/pdf", b"%PDF-1.4 a"),
        ]);

        let upload = pipeline.run(BOUNDARY, chunked(data, 1)).await.unwrap();

        assert_eq!(upload.files.len(), 2);
        for file in &upload.files {
            let on_disk = std::fs::metadata(&file.storage_path).unwrap().len();
            assert_eq!(on_disk, file.size_bytes);
            assert!(file.storage_path.starts_with(dir.path().to_str().unwrap()));
        }
        assert_eq!(std::fs::read(&upload.files[0].storage_path).unwrap(), png);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_truncated_body_rolls_back() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let mut data = body(&[
            Part::File("userdocuments", "a.pdf", "application/pdf", b"%PDF complete"),
            Part::File("userdocuments", "b.pdf", "application/pdf", b"%PDF cut off here"),
        ]);
        data.truncate(data.len() - 30);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 9)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::MalformedMultipart);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_body_stream_error_is_storage_failure() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let data = body(&[Part::File("userdocuments", "a.pdf", "application/pdf", b"%PDF")]);
        let mut chunks: Vec<Result<Bytes, io::Error>> = vec![Ok(Bytes::from(data[..data.len() - 20].to_vec()))];
        chunks.push(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client went away")));

        let rejection = pipeline.run(BOUNDARY, stream::iter(chunks)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::StorageWriteFailed);
        assert!(storage.is_empty().await);
    }

    /// Storage whose handles fail after a number of bytes.
    #[derive(Clone)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_after: u64,
    }

    struct FlakyHandle {
        inner: Box<dyn WritableHandle>,
        written: u64,
        fail_after: u64,
    }

    #[async_trait]
    impl WritableHandle for FlakyHandle {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
            if self.written + data.len() as u64 > self.fail_after {
                return Err(StorageError::WriteFailed("disk full".to_string()));
            }
            self.written += data.len() as u64;
            self.inner.write(data).await
        }

        async fn close(self: Box<Self>) -> StorageResult<intake_storage::StoredObject> {
            self.inner.close().await
        }
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn create(&self, name: &str) -> StorageResult<Box<dyn WritableHandle>> {
            Ok(Box::new(FlakyHandle {
                inner: self.inner.create(name).await?,
                written: 0,
                fail_after: self.fail_after,
            }))
        }

        async fn delete(&self, name: &str) -> StorageResult<()> {
            self.inner.delete(name).await
        }

        async fn exists(&self, name: &str) -> StorageResult<bool> {
            self.inner.exists(name).await
        }

        async fn content_length(&self, name: &str) -> StorageResult<u64> {
            self.inner.content_length(name).await
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::Memory
        }
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_earlier_files() {
        let flaky = FlakyStorage {
            inner: MemoryStorage::new(),
            fail_after: 100,
        };
        let pipeline = IntakePipeline::new(Arc::new(UploadPolicy::default()), Arc::new(flaky.clone()));
        let data = body(&[
            Part::File("userdocuments", "small.pdf", "application/pdf", &[1u8; 50]),
            Part::File("userdocuments", "big.pdf", "application/pdf", &[2u8; 500]),
        ]);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 64)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::StorageWriteFailed);
        assert!(rejection.detail.contains("disk full"));
        assert!(flaky.inner.is_empty().await);
    }

    /// Storage whose `create` always finds the name taken.
    struct TakenNameStorage {
        deleted: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Storage for TakenNameStorage {
        async fn create(&self, name: &str) -> StorageResult<Box<dyn WritableHandle>> {
            Err(StorageError::AlreadyExists(name.to_string()))
        }

        async fn delete(&self, name: &str) -> StorageResult<()> {
            self.deleted.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn exists(&self, _name: &str) -> StorageResult<bool> {
            Ok(true)
        }

        async fn content_length(&self, name: &str) -> StorageResult<u64> {
            Err(StorageError::NotFound(name.to_string()))
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::Memory
        }
    }

    #[tokio::test]
    async fn test_failed_create_does_not_delete_foreign_object() {
        let deleted = Arc::new(std::sync::Mutex::new(Vec::new()));
        let storage = TakenNameStorage {
            deleted: deleted.clone(),
        };
        let pipeline = IntakePipeline::new(Arc::new(UploadPolicy::default()), Arc::new(storage));
        let data = body(&[Part::File("userfile", "a.png", "image/png", b"png")]);

        let rejection = pipeline.run(BOUNDARY, chunked(data, 100)).await.unwrap_err();
        assert_eq!(rejection.reason, RejectionKind::StorageWriteFailed);
        assert!(deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_cleans_up() {
        let (pipeline, storage) = memory_pipeline(UploadPolicy::default());
        let mut data = body(&[
            Part::File("userdocuments", "a.pdf", "application/pdf", b"%PDF first"),
            Part::File("userdocuments", "b.pdf", "application/pdf", b"%PDF second"),
        ]);
        // Stall in the middle of the second file
        data.truncate(data.len() - 30);
        let chunks: Vec<Result<Bytes, io::Error>> = vec![Ok(Bytes::from(data))];
        let body = stream::iter(chunks).chain(stream::pending());

        let result = tokio::time::timeout(Duration::from_millis(50), pipeline.run(BOUNDARY, body)).await;
        assert!(result.is_err());
        assert_eq!(storage.len().await, 1);

        for _ in 0..50 {
            if storage.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(storage.is_empty().await);
    }
}
