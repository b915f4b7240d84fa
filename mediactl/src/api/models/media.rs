use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::media::{MediaDBResponse, MediaId};
use crate::storage::{PresignedAccessGrant, StoredObjectKey};

/// Query parameters for single uploads.
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Issue a read URL for each stored object
    #[serde(default)]
    pub presign: bool,
    /// Validity of the issued URL in seconds (default: `storage.default_url_ttl`)
    pub ttl_seconds: Option<u64>,
}

/// Query parameters for URL issuance.
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct UrlQuery {
    /// Validity of the URL in seconds (default: `storage.default_url_ttl`)
    #[param(minimum = 1)]
    pub ttl_seconds: Option<u64>,
}

/// A read URL for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MediaUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl From<PresignedAccessGrant> for MediaUrl {
    fn from(grant: PresignedAccessGrant) -> Self {
        Self {
            url: grant.url,
            expires_at: grant.expires_at,
        }
    }
}

/// A stored media object.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MediaResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MediaId,
    pub key: StoredObjectKey,
    pub bucket: String,
    /// Filename as uploaded
    pub filename: String,
    /// Detected content type the object was stored with
    pub content_type: String,
    pub size_bytes: u64,
    /// Size of the upload before compression
    pub original_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Present when a URL was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<MediaUrl>,
}

impl From<MediaDBResponse> for MediaResponse {
    fn from(db: MediaDBResponse) -> Self {
        Self {
            id: db.id,
            key: db.key,
            bucket: db.bucket,
            filename: db.filename,
            content_type: db.content_type,
            size_bytes: db.size_bytes,
            original_size_bytes: db.original_size_bytes,
            etag: db.etag,
            created_at: db.created_at,
            access: None,
        }
    }
}

impl MediaResponse {
    pub fn with_access(mut self, access: Option<PresignedAccessGrant>) -> Self {
        self.access = access.map(MediaUrl::from);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkUploadResponse {
    /// Stored objects in upload order
    pub data: Vec<MediaResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MediaDeleteResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MediaId,
    pub deleted: bool,
}
