use crate::storage::StoredObjectKey;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub type MediaId = Uuid;

/// Request for recording a newly stored object
#[derive(Debug, Clone)]
pub struct MediaCreateDBRequest {
    pub key: StoredObjectKey,
    pub bucket: String,
    /// Filename as uploaded by the client
    pub filename: String,
    /// Detected content type the object was stored with
    pub content_type: String,
    pub size_bytes: u64,
    /// Size before compression
    pub original_size_bytes: u64,
    pub etag: Option<String>,
}

/// Request for updating record metadata
#[derive(Debug, Clone, Default)]
pub struct MediaUpdateDBRequest {
    pub filename: Option<String>,
}

/// A stored media object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDBResponse {
    pub id: MediaId,
    pub key: StoredObjectKey,
    pub bucket: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub original_size_bytes: u64,
    pub etag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
