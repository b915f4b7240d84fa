//! Ingestion: validated files in, stored objects (and optionally read URLs) out.
//!
//! [`IngestionPipeline`] composes the [`UploadValidator`] with an [`ObjectStore`]. It holds no
//! per-request state, so one instance is shared across all handlers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::errors::Result;
use crate::limits::CompressionSlots;
use crate::media::{CompressionPolicy, NormalizedFile, UploadValidator, UploadedFile};
use crate::storage::{ObjectStore, PresignedAccessGrant, StoredObject, StoredObjectKey};

/// Per-call knobs.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Bucket to write to instead of the store's default
    pub bucket: Option<String>,
    /// When set, a read URL valid for this long is issued for each stored object
    pub presign_ttl: Option<Duration>,
}

/// A file that made it into storage.
#[derive(Debug, Clone)]
pub struct IngestedObject {
    pub object: StoredObject,
    pub filename: String,
    pub original_size_bytes: u64,
    pub access: Option<PresignedAccessGrant>,
}

#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    validator: UploadValidator,
    store: Arc<dyn ObjectStore>,
    default_url_ttl: Duration,
    rollback_partial_batches: bool,
}

impl IngestionPipeline {
    pub fn new(validator: UploadValidator, store: Arc<dyn ObjectStore>, default_url_ttl: Duration) -> Self {
        Self {
            validator,
            store,
            default_url_ttl,
            rollback_partial_batches: false,
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn ObjectStore>) -> Self {
        let validator = UploadValidator::new(CompressionPolicy::from_config(&config.uploads))
            .with_compression_slots(CompressionSlots::from_config(&config.limits));
        Self::new(validator, store, config.storage.default_url_ttl)
            .with_rollback_partial_batches(config.uploads.rollback_partial_batches)
    }

    /// Delete already-written objects when a batch fails part way through.
    pub fn with_rollback_partial_batches(mut self, enabled: bool) -> Self {
        self.rollback_partial_batches = enabled;
        self
    }

    pub fn validator(&self) -> &UploadValidator {
        &self.validator
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Write one validated file. If a read URL was requested and signing fails, the object
    /// is deleted again before the error is returned, so a failed call leaves nothing behind.
    #[instrument(skip_all, fields(filename = %file.filename, size_bytes = file.size_bytes()), err)]
    pub async fn store(&self, file: NormalizedFile, options: &IngestOptions) -> Result<IngestedObject> {
        let object = self
            .store
            .put(file.buffer, &file.filename, file.kind.mime_type(), options.bucket.as_deref())
            .await?;

        let access = match options.presign_ttl {
            Some(ttl) => match self.store.presign(&object.key, Some(&object.bucket), ttl).await {
                Ok(grant) => Some(grant),
                Err(e) => {
                    self.rollback(std::slice::from_ref(&object)).await;
                    return Err(e.into());
                }
            },
            None => None,
        };

        Ok(IngestedObject {
            object,
            filename: file.filename,
            original_size_bytes: file.original_size_bytes,
            access,
        })
    }

    /// Write a batch concurrently. Every write is awaited before returning; if any failed the
    /// whole call fails with the first error in input order.
    #[instrument(skip_all, fields(count = files.len()), err)]
    pub async fn store_all(&self, files: Vec<NormalizedFile>, options: &IngestOptions) -> Result<Vec<IngestedObject>> {
        let results = join_all(files.into_iter().map(|file| self.store(file, options))).await;

        let mut written = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(ingested) => written.push(ingested),
                Err(e) => errors.push(e),
            }
        }

        let mut errors = errors.into_iter();
        let Some(first_error) = errors.next() else {
            return Ok(written);
        };
        for e in errors {
            warn!(error = %e, "Additional failure in batch");
        }

        let written: Vec<StoredObject> = written.into_iter().map(|ingested| ingested.object).collect();
        if self.rollback_partial_batches {
            self.rollback(&written).await;
        } else if !written.is_empty() {
            warn!(
                written = written.len(),
                "Batch failed part way through; written objects are left in place"
            );
        }

        Err(first_error)
    }

    async fn rollback(&self, written: &[StoredObject]) {
        let deletes = written
            .iter()
            .map(|object| async move { (object, self.store.delete(&object.key, Some(&object.bucket)).await) });

        for (object, result) in join_all(deletes).await {
            match result {
                Ok(()) => info!(bucket = %object.bucket, key = %object.key, "Rolled back object from failed write"),
                Err(e) => warn!(bucket = %object.bucket, key = %object.key, error = %e, "Failed to roll back object"),
            }
        }
    }

    /// Validate then store a single upload.
    pub async fn ingest(&self, file: Option<UploadedFile>, options: &IngestOptions) -> Result<IngestedObject> {
        let normalized = self.validator.validate(file).await?;
        self.store(normalized, options).await
    }

    /// Validate then store a batch. Nothing is written unless every file validates.
    pub async fn ingest_all(&self, files: Vec<UploadedFile>, options: &IngestOptions) -> Result<Vec<IngestedObject>> {
        let normalized = self.validator.validate_all(files).await?;
        self.store_all(normalized, options).await
    }

    /// Issue a read URL for an existing object. `ttl` defaults to `storage.default_url_ttl`.
    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn presign(&self, key: &StoredObjectKey, bucket: Option<&str>, ttl: Option<Duration>) -> Result<PresignedAccessGrant> {
        let ttl = ttl.unwrap_or(self.default_url_ttl);
        Ok(self.store.presign(key, bucket, ttl).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::Error;
    use crate::media::ImageKind;
    use crate::storage::{InMemoryObjectStore, StorageError};
    use crate::test_utils::{jpeg_fixture, noise_jpeg_fixture, png_fixture};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{DateTime, Utc};

    /// Delegates to an in-memory store but refuses to write files whose name contains "fail"
    /// and refuses to sign keys containing "nosign".
    #[derive(Debug)]
    struct FlakyStore {
        inner: InMemoryObjectStore,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        fn default_bucket(&self) -> &str {
            self.inner.default_bucket()
        }

        async fn put(&self, body: Bytes, filename: &str, content_type: &str, bucket: Option<&str>) -> std::result::Result<StoredObject, StorageError> {
            if filename.contains("fail") {
                return Err(StorageError::WriteFailed {
                    bucket: bucket.unwrap_or("media").to_string(),
                    key: filename.to_string(),
                    source: anyhow::anyhow!("connection reset"),
                });
            }
            self.inner.put(body, filename, content_type, bucket).await
        }

        async fn presign(
            &self,
            key: &StoredObjectKey,
            bucket: Option<&str>,
            ttl: Duration,
        ) -> std::result::Result<PresignedAccessGrant, StorageError> {
            if key.as_str().contains("nosign") {
                return Err(StorageError::PresignFailed {
                    bucket: bucket.unwrap_or("media").to_string(),
                    key: key.to_string(),
                    source: anyhow::anyhow!("signer down"),
                });
            }
            self.inner.presign(key, bucket, ttl).await
        }

        async fn delete(&self, key: &StoredObjectKey, bucket: Option<&str>) -> std::result::Result<(), StorageError> {
            self.inner.delete(key, bucket).await
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn memory_store(clock: Arc<ManualClock>) -> Arc<InMemoryObjectStore> {
        Arc::new(InMemoryObjectStore::new("media", "http://localhost:3001/api/v1/objects", b"k".to_vec(), clock))
    }

    fn pipeline(store: Arc<dyn ObjectStore>, policy: CompressionPolicy) -> IngestionPipeline {
        IngestionPipeline::new(UploadValidator::new(policy), store, Duration::from_secs(3600))
    }

    fn flaky() -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: InMemoryObjectStore::new("media", "http://localhost", b"k".to_vec(), Arc::new(ManualClock::new(start()))),
        })
    }

    #[tokio::test]
    async fn test_oversized_jpeg_end_to_end() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = memory_store(clock.clone());
        let jpeg = noise_jpeg_fixture(640, 480);
        let ceiling = (jpeg.len() / 2) as u64;
        let policy = CompressionPolicy {
            max_size_bytes: ceiling,
            ..CompressionPolicy::default()
        };
        let pipeline = pipeline(store.clone(), policy);

        let options = IngestOptions {
            bucket: None,
            presign_ttl: Some(Duration::from_secs(1800)),
        };
        let ingested = pipeline
            .ingest(Some(UploadedFile::new("photo.jpg", Some("image/jpeg".to_string()), jpeg.clone())), &options)
            .await
            .unwrap();

        // Stored under <uuid>-<filename>, within the ceiling
        let key = ingested.object.key.as_str();
        assert!(uuid::Uuid::parse_str(&key[..36]).is_ok());
        assert_eq!(&key[36..], "-photo.jpg");
        assert!(ingested.object.size_bytes <= ceiling);
        assert_eq!(ingested.object.content_type, "image/jpeg");
        assert_eq!(ingested.original_size_bytes, jpeg.len() as u64);

        let stored = store.get("media", key).unwrap();
        assert!(stored.body.len() as u64 <= ceiling);

        // The grant honours the requested TTL
        let grant = ingested.access.unwrap();
        assert_eq!(grant.expires_at, start() + chrono::Duration::seconds(1800));
        let expires = grant.expires_at.timestamp();
        let signature = grant.url.rsplit_once("X-Signature=").unwrap().1.to_string();

        clock.advance(chrono::Duration::seconds(1799));
        assert!(store.open("media", key, expires, &signature).is_ok());
        clock.advance(chrono::Duration::seconds(2));
        assert!(matches!(
            store.open("media", key, expires, &signature),
            Err(StorageError::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_file_never_reaches_storage() {
        let store = memory_store(Arc::new(ManualClock::new(start())));
        let pipeline = pipeline(store.clone(), CompressionPolicy::default());

        let err = pipeline.ingest(None, &IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::NoFileProvided));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_member_stores_nothing() {
        let store = memory_store(Arc::new(ManualClock::new(start())));
        let pipeline = pipeline(store.clone(), CompressionPolicy::default());

        let files = vec![
            UploadedFile::new("a.png", None, png_fixture(8, 8)),
            UploadedFile::new("b.png", None, Bytes::from_static(b"#!/bin/sh\necho definitely an image\n")),
            UploadedFile::new("c.jpg", None, jpeg_fixture(8, 8)),
        ];
        let err = pipeline.ingest_all(files, &IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidFileType { .. }));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_bucket() {
        let store = memory_store(Arc::new(ManualClock::new(start())));
        let pipeline = pipeline(store.clone(), CompressionPolicy::default());

        let files = vec![
            UploadedFile::new("a.png", None, png_fixture(8, 8)),
            UploadedFile::new("b.jpg", None, jpeg_fixture(8, 8)),
        ];
        let options = IngestOptions {
            bucket: Some("avatars".to_string()),
            presign_ttl: None,
        };
        let ingested = pipeline.ingest_all(files, &options).await.unwrap();

        assert_eq!(ingested.len(), 2);
        assert_eq!(ingested[0].filename, "a.png");
        assert_eq!(ingested[1].object.content_type, ImageKind::Jpeg.mime_type());
        assert!(ingested.iter().all(|i| i.object.bucket == "avatars" && i.access.is_none()));
        assert_eq!(store.object_count(), 2);
    }

    fn mixed_batch() -> Vec<UploadedFile> {
        vec![
            UploadedFile::new("a.png", None, png_fixture(8, 8)),
            UploadedFile::new("fail.png", None, png_fixture(8, 8)),
            UploadedFile::new("c.png", None, png_fixture(8, 8)),
        ]
    }

    #[tokio::test]
    async fn test_partial_batch_failure_leaves_objects_by_default() {
        let store = flaky();
        let pipeline = pipeline(store.clone(), CompressionPolicy::default());

        let err = pipeline.ingest_all(mixed_batch(), &IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::WriteFailed { .. })));
        assert_eq!(store.inner.object_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_rolls_back_when_enabled() {
        let store = flaky();
        let pipeline = pipeline(store.clone(), CompressionPolicy::default()).with_rollback_partial_batches(true);

        let err = pipeline.ingest_all(mixed_batch(), &IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::WriteFailed { .. })));
        assert_eq!(store.inner.object_count(), 0);
    }

    fn presigned() -> IngestOptions {
        IngestOptions {
            bucket: None,
            presign_ttl: Some(Duration::from_secs(600)),
        }
    }

    #[tokio::test]
    async fn test_failed_signing_removes_the_written_object() {
        let store = flaky();
        let pipeline = pipeline(store.clone(), CompressionPolicy::default());

        let file = UploadedFile::new("nosign.png", None, png_fixture(8, 8));
        let err = pipeline.ingest(Some(file), &presigned()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::PresignFailed { .. })));
        assert_eq!(store.inner.object_count(), 0);
    }

    #[tokio::test]
    async fn test_rollback_covers_objects_whose_signing_failed() {
        let store = flaky();
        let pipeline = pipeline(store.clone(), CompressionPolicy::default()).with_rollback_partial_batches(true);

        let files = vec![
            UploadedFile::new("a.png", None, png_fixture(8, 8)),
            UploadedFile::new("nosign.png", None, png_fixture(8, 8)),
        ];
        let err = pipeline.ingest_all(files, &presigned()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::PresignFailed { .. })));
        assert_eq!(store.inner.object_count(), 0);
    }

    #[tokio::test]
    async fn test_signing_failure_without_rollback_keeps_only_signed_objects() {
        let store = flaky();
        let pipeline = pipeline(store.clone(), CompressionPolicy::default());

        let files = vec![
            UploadedFile::new("a.png", None, png_fixture(8, 8)),
            UploadedFile::new("nosign.png", None, png_fixture(8, 8)),
        ];
        pipeline.ingest_all(files, &presigned()).await.unwrap_err();
        assert_eq!(store.inner.object_count(), 1);
    }

    #[tokio::test]
    async fn test_presign_rejects_ttl_past_the_end_of_time() {
        let store = memory_store(Arc::new(ManualClock::new(start())));
        let pipeline = pipeline(store, CompressionPolicy::default());
        let key = StoredObjectKey::generate("a.png");

        let err = pipeline
            .presign(&key, None, Some(Duration::from_secs(9_000_000_000_000)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::PresignFailed { .. })));
    }

    #[tokio::test]
    async fn test_presign_defaults_ttl() {
        let store = memory_store(Arc::new(ManualClock::new(start())));
        let pipeline = pipeline(store, CompressionPolicy::default());
        let key = StoredObjectKey::generate("a.png");

        let grant = pipeline.presign(&key, None, None).await.unwrap();
        assert_eq!(grant.expires_at, start() + chrono::Duration::hours(1));

        let grant = pipeline.presign(&key, None, Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(grant.expires_at, start() + chrono::Duration::minutes(1));
    }
}
