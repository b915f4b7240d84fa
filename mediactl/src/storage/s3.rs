//! S3-compatible object storage via the AWS SDK.
//!
//! Small bodies go up with a single `PutObject`; anything over the configured threshold is sent as
//! a sequential multipart upload, aborted if any part fails. Retries are left to the SDK's
//! standard retry strategy (`storage.s3.max_attempts`).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    config::{Builder as S3ConfigBuilder, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::Bytes;
use chrono::SubsecRound;
use tracing::{debug, info, instrument, warn};

use super::{CONTENT_DISPOSITION, ObjectStore, PresignedAccessGrant, StorageError, StoredObject, StoredObjectKey};
use crate::clock::Clock;
use crate::config::{S3Config, StorageConfig};

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    multipart_threshold: u64,
    part_size: u64,
    clock: Arc<dyn Clock>,
}

impl S3ObjectStore {
    /// Build a client from configuration. Static credentials are used when both keys are set;
    /// otherwise the SDK's default provider chain is consulted.
    pub async fn new(config: &StorageConfig, clock: Arc<dyn Clock>) -> Self {
        let s3 = &config.s3;
        let builder = match (&s3.access_key_id, &s3.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => S3ConfigBuilder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new(s3.region.clone()))
                .credentials_provider(Credentials::new(access_key_id, secret_access_key, None, None, "mediactl-config")),
            _ => {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(s3.region.clone()))
                    .load()
                    .await;
                S3ConfigBuilder::from(&sdk_config)
            }
        };

        Self::from_client(Client::from_conf(apply_transport_options(builder, s3).build()), config, clock)
    }

    pub fn from_client(client: Client, config: &StorageConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            multipart_threshold: config.s3.multipart_threshold,
            part_size: config.s3.part_size.max(1),
            clock,
        }
    }

    async fn put_single(&self, bucket: &str, key: &StoredObjectKey, body: Bytes, content_type: &str) -> anyhow::Result<Option<String>> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key.as_str())
            .body(ByteStream::from(body))
            .content_type(content_type)
            .content_disposition(CONTENT_DISPOSITION)
            .send()
            .await
            .map_err(|e| anyhow!("PutObject: {}", DisplayErrorContext(&e)))?;

        Ok(output.e_tag().map(str::to_string))
    }

    async fn put_multipart(&self, bucket: &str, key: &StoredObjectKey, body: Bytes, content_type: &str) -> anyhow::Result<Option<String>> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key.as_str())
            .content_type(content_type)
            .content_disposition(CONTENT_DISPOSITION)
            .send()
            .await
            .map_err(|e| anyhow!("CreateMultipartUpload: {}", DisplayErrorContext(&e)))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| anyhow!("CreateMultipartUpload returned no upload id"))?
            .to_string();

        match self.upload_parts_and_complete(bucket, key, &upload_id, body).await {
            Ok(etag) => Ok(etag),
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key.as_str())
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        bucket,
                        key = %key,
                        upload_id,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts_and_complete(
        &self,
        bucket: &str,
        key: &StoredObjectKey,
        upload_id: &str,
        body: Bytes,
    ) -> anyhow::Result<Option<String>> {
        let mut parts = Vec::new();

        for (index, range) in part_ranges(body.len() as u64, self.part_size).into_iter().enumerate() {
            let part_number = i32::try_from(index + 1).map_err(|_| anyhow!("too many parts"))?;
            let chunk = body.slice(range.start as usize..range.end as usize);

            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key.as_str())
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| anyhow!("UploadPart {part_number}: {}", DisplayErrorContext(&e)))?;

            debug!(part_number, "Uploaded part");
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
        }

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| anyhow!("CompleteMultipartUpload: {}", DisplayErrorContext(&e)))?;

        Ok(output.e_tag().map(str::to_string))
    }
}

fn apply_transport_options(builder: S3ConfigBuilder, s3: &S3Config) -> S3ConfigBuilder {
    let builder = builder
        .retry_config(RetryConfig::standard().with_max_attempts(s3.max_attempts.max(1)))
        .force_path_style(s3.force_path_style);

    match &s3.endpoint_url {
        Some(endpoint) => builder.endpoint_url(endpoint.as_str()),
        None => builder,
    }
}

/// Byte ranges of each part, in order. Every part is `part_size` long except the last.
fn part_ranges(len: u64, part_size: u64) -> Vec<std::ops::Range<u64>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + part_size).min(len);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()), err)]
    async fn put(&self, body: Bytes, filename: &str, content_type: &str, bucket: Option<&str>) -> Result<StoredObject, StorageError> {
        let bucket = bucket.unwrap_or(&self.bucket).to_string();
        let key = StoredObjectKey::generate(filename);
        let size_bytes = body.len() as u64;

        let result = if size_bytes > self.multipart_threshold {
            self.put_multipart(&bucket, &key, body, content_type).await
        } else {
            self.put_single(&bucket, &key, body, content_type).await
        };

        let etag = result.map_err(|source| StorageError::WriteFailed {
            bucket: bucket.clone(),
            key: key.to_string(),
            source,
        })?;

        info!(bucket, key = %key, size_bytes, "Stored object");
        Ok(StoredObject {
            key,
            bucket,
            content_type: content_type.to_string(),
            size_bytes,
            etag,
        })
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn presign(&self, key: &StoredObjectKey, bucket: Option<&str>, ttl: Duration) -> Result<PresignedAccessGrant, StorageError> {
        let bucket = bucket.unwrap_or(&self.bucket).to_string();
        let presign_failed = |source: anyhow::Error| StorageError::PresignFailed {
            bucket: bucket.clone(),
            key: key.to_string(),
            source,
        };

        // SigV4 timestamps have whole-second precision
        let signed_at = self.clock.now().trunc_subsecs(0);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| signed_at.checked_add_signed(ttl))
            .ok_or_else(|| presign_failed(anyhow!("expiry out of range for a {}s TTL", ttl.as_secs())))?;

        let presigning = PresigningConfig::builder()
            .start_time(SystemTime::from(signed_at))
            .expires_in(ttl)
            .build()
            .map_err(|e| presign_failed(e.into()))?;

        let request = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(key.as_str())
            .presigned(presigning)
            .await
            .map_err(|e| presign_failed(anyhow!("GetObject presign: {}", DisplayErrorContext(&e))))?;

        Ok(PresignedAccessGrant {
            url: request.uri().to_string(),
            bucket: bucket.clone(),
            key: key.clone(),
            expires_at,
        })
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn delete(&self, key: &StoredObjectKey, bucket: Option<&str>) -> Result<(), StorageError> {
        let bucket = bucket.unwrap_or(&self.bucket);
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: anyhow!("DeleteObject: {}", DisplayErrorContext(&e)),
            })?;

        info!(bucket, key = %key, "Deleted object");
        Ok(())
    }
}
