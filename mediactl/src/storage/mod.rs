//! Object storage abstraction.
//!
//! The [`ObjectStore`] trait covers the three operations ingestion needs: write an object under a
//! freshly generated key, issue a time-limited read URL for it, and delete it. Two backends are
//! provided:
//!
//! - [`s3::S3ObjectStore`]: any S3-compatible service via the AWS SDK
//! - [`memory::InMemoryObjectStore`]: a process-local map with HMAC-signed URLs, for development
//!   and tests

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod memory;
pub mod s3;

pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;

/// Every object is written with this disposition so browsers render rather than download it.
pub const CONTENT_DISPOSITION: &str = "inline";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to write object {bucket}/{key}: {source:#}")]
    WriteFailed {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to presign object {bucket}/{key}: {source:#}")]
    PresignFailed {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to delete object {bucket}/{key}: {source:#}")]
    DeleteFailed {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("object {bucket}/{key} not found")]
    ObjectNotFound { bucket: String, key: String },

    #[error("access denied: {reason}")]
    AccessDenied { reason: String },
}

/// Key an object is stored under: `<uuid-v4>-<filename>`.
///
/// Only the final path component of the client filename is kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "0b9f7c1e-6a43-4f2e-9a57-3f1f2b1c9d10-cat.png")]
pub struct StoredObjectKey(String);

impl StoredObjectKey {
    pub fn generate(filename: &str) -> Self {
        Self(format!("{}-{}", Uuid::new_v4(), base_name(filename)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for StoredObjectKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for StoredObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn base_name(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match name {
        "" | "." | ".." => "file",
        name => name,
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StoredObject {
    pub key: StoredObjectKey,
    pub bucket: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
}

/// A time-limited URL granting read access to one object. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PresignedAccessGrant {
    pub url: String,
    pub bucket: String,
    pub key: StoredObjectKey,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Bucket used when callers don't name one.
    fn default_bucket(&self) -> &str;

    /// Write `body` under a newly generated key derived from `filename`.
    async fn put(
        &self,
        body: Bytes,
        filename: &str,
        content_type: &str,
        bucket: Option<&str>,
    ) -> Result<StoredObject, StorageError>;

    /// Issue a GET URL for `key` valid for `ttl` from now. Does not touch stored data.
    async fn presign(&self, key: &StoredObjectKey, bucket: Option<&str>, ttl: Duration) -> Result<PresignedAccessGrant, StorageError>;

    async fn delete(&self, key: &StoredObjectKey, bucket: Option<&str>) -> Result<(), StorageError>;
}
