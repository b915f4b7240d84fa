//! Process-local object store.
//!
//! Objects live in a concurrent map keyed by `(bucket, key)`. Presigned URLs point back at this
//! service's `/objects/{bucket}/{key}` route and carry an expiry plus an HMAC-SHA256 signature
//! over `GET\n{bucket}\n{key}\n{expires}`, which [`InMemoryObjectStore::open`] checks before
//! handing out the body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use tracing::{debug, instrument};

use super::{CONTENT_DISPOSITION, ObjectStore, PresignedAccessGrant, StorageError, StoredObject, StoredObjectKey};
use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the unix expiry time.
pub const EXPIRES_PARAM: &str = "X-Expires";
/// Query parameter carrying the URL signature.
pub const SIGNATURE_PARAM: &str = "X-Signature";

/// Unreserved characters (RFC 3986) stay as-is in the key path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// A stored body and the headers it is served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectContent {
    pub body: Bytes,
    pub content_type: String,
    pub content_disposition: String,
}

pub struct InMemoryObjectStore {
    bucket: String,
    /// Absolute URL of the object route, without a trailing slash
    url_base: String,
    signing_key: Vec<u8>,
    clock: Arc<dyn Clock>,
    objects: DashMap<(String, String), ObjectContent>,
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("bucket", &self.bucket)
            .field("url_base", &self.url_base)
            .field("signing_key", &"<redacted>")
            .field("objects", &self.objects.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>, url_base: impl Into<String>, signing_key: Vec<u8>, clock: Arc<dyn Clock>) -> Self {
        let url_base: String = url_base.into();
        Self {
            bucket: bucket.into(),
            url_base: url_base.trim_end_matches('/').to_string(),
            signing_key,
            clock,
            objects: DashMap::new(),
        }
    }

    /// A store whose signing key is fresh random bytes. URLs don't survive a restart.
    pub fn with_random_key(bucket: impl Into<String>, url_base: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self::new(bucket, url_base, rand::random::<[u8; 32]>().to_vec(), clock)
    }

    /// Resolve a presigned URL's parts into the object it grants access to.
    ///
    /// The signature is checked first (in constant time), then the expiry, then existence, so a
    /// forged URL never reveals whether an object exists.
    pub fn open(&self, bucket: &str, key: &str, expires: i64, signature: &str) -> Result<ObjectContent, StorageError> {
        let provided = URL_SAFE_NO_PAD.decode(signature).map_err(|_| StorageError::AccessDenied {
            reason: "malformed signature".to_string(),
        })?;

        self.mac(bucket, key, expires)
            .verify_slice(&provided)
            .map_err(|_| StorageError::AccessDenied {
                reason: "signature mismatch".to_string(),
            })?;

        if self.clock.now().timestamp() >= expires {
            return Err(StorageError::AccessDenied {
                reason: "URL expired".to_string(),
            });
        }

        self.get(bucket, key).ok_or_else(|| StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<ObjectContent> {
        self.objects.get(&(bucket.to_string(), key.to_string())).map(|entry| entry.value().clone())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn mac(&self, bucket: &str, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key).expect("HMAC can take key of any size");
        mac.update(format!("GET\n{bucket}\n{key}\n{expires}").as_bytes());
        mac
    }

    fn sign(&self, bucket: &str, key: &str, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(bucket, key, expires).finalize().into_bytes())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()), err)]
    async fn put(&self, body: Bytes, filename: &str, content_type: &str, bucket: Option<&str>) -> Result<StoredObject, StorageError> {
        let bucket = bucket.unwrap_or(&self.bucket).to_string();
        let key = StoredObjectKey::generate(filename);
        let size_bytes = body.len() as u64;

        self.objects.insert(
            (bucket.clone(), key.to_string()),
            ObjectContent {
                body,
                content_type: content_type.to_string(),
                content_disposition: CONTENT_DISPOSITION.to_string(),
            },
        );

        debug!(bucket, key = %key, size_bytes, "Stored object in memory");
        Ok(StoredObject {
            key,
            bucket,
            content_type: content_type.to_string(),
            size_bytes,
            etag: None,
        })
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn presign(&self, key: &StoredObjectKey, bucket: Option<&str>, ttl: Duration) -> Result<PresignedAccessGrant, StorageError> {
        let bucket = bucket.unwrap_or(&self.bucket).to_string();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StorageError::PresignFailed {
            bucket: bucket.clone(),
            key: key.to_string(),
            source: e.into(),
        })?;

        let expires_at: DateTime<Utc> =
            self.clock
                .now()
                .trunc_subsecs(0)
                .checked_add_signed(ttl)
                .ok_or_else(|| StorageError::PresignFailed {
                    bucket: bucket.clone(),
                    key: key.to_string(),
                    source: anyhow::anyhow!("expiry out of range for a {}s TTL", ttl.num_seconds()),
                })?;
        let expires = expires_at.timestamp();
        let signature = self.sign(&bucket, key.as_str(), expires);

        let url = format!(
            "{}/{}/{}?{EXPIRES_PARAM}={expires}&{SIGNATURE_PARAM}={signature}",
            self.url_base,
            utf8_percent_encode(&bucket, PATH_SEGMENT),
            utf8_percent_encode(key.as_str(), PATH_SEGMENT),
        );

        Ok(PresignedAccessGrant {
            url,
            bucket,
            key: key.clone(),
            expires_at,
        })
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn delete(&self, key: &StoredObjectKey, bucket: Option<&str>) -> Result<(), StorageError> {
        let bucket = bucket.unwrap_or(&self.bucket);
        // Deleting a missing object succeeds, as it does on S3
        self.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
