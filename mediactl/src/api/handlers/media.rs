use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::{info, instrument, warn};

use crate::{
    AppState,
    api::{
        extract::{ValidatedFile, ValidatedFiles},
        models::{
            media::{BulkUploadResponse, MediaDeleteResponse, MediaResponse, MediaUrl, UploadQuery, UrlQuery},
            pagination::{PaginatedResponse, Pagination},
        },
    },
    db::{
        handlers::{MediaRecords, Repository, media::MediaFilter},
        models::media::{MediaCreateDBRequest, MediaDBResponse, MediaId},
    },
    errors::{Error, Result},
    pipeline::{IngestOptions, IngestedObject},
};

/// Check a client-supplied TTL against `storage.max_url_ttl`. `None` means "use the default".
fn requested_ttl(state: &AppState, ttl_seconds: Option<u64>) -> Result<Option<Duration>> {
    let Some(seconds) = ttl_seconds else {
        return Ok(None);
    };

    let max = state.config.storage.max_url_ttl;
    if seconds == 0 || Duration::from_secs(seconds) > max {
        return Err(Error::BadRequest {
            message: format!("ttl_seconds must be between 1 and {}", max.as_secs()),
        });
    }
    Ok(Some(Duration::from_secs(seconds)))
}

fn parse_media_id(id: &str) -> Result<MediaId> {
    id.parse::<MediaId>().map_err(|_| Error::BadRequest {
        message: "Invalid media ID format".to_string(),
    })
}

async fn find_record(state: &AppState, id: MediaId) -> Result<MediaDBResponse> {
    let mut repo = MediaRecords::new(&state.records);
    repo.get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Media".to_string(),
        id: id.to_string(),
    })
}

/// Record a stored object. If that fails the object is deleted again so storage never holds
/// something the API can't list.
async fn record(state: &AppState, ingested: IngestedObject) -> Result<MediaResponse> {
    let request = MediaCreateDBRequest {
        key: ingested.object.key.clone(),
        bucket: ingested.object.bucket.clone(),
        filename: ingested.filename,
        content_type: ingested.object.content_type.clone(),
        size_bytes: ingested.object.size_bytes,
        original_size_bytes: ingested.original_size_bytes,
        etag: ingested.object.etag.clone(),
    };

    let mut repo = MediaRecords::new(&state.records);
    match repo.create(&request).await {
        Ok(created) => Ok(MediaResponse::from(created).with_access(ingested.access)),
        Err(e) => {
            let object = &ingested.object;
            if let Err(delete_err) = state.pipeline.object_store().delete(&object.key, Some(&object.bucket)).await {
                warn!(key = %object.key, error = %delete_err, "Failed to delete unrecorded object");
            }
            Err(e.into())
        }
    }
}

/// Undo a bulk upload whose records could not all be written: drop the records made so far
/// and delete every object the request stored.
async fn undo_bulk(state: &AppState, recorded: &[MediaResponse], unrecorded: Vec<IngestedObject>) {
    let mut repo = MediaRecords::new(&state.records);
    let store = state.pipeline.object_store();

    for media in recorded {
        if let Err(e) = repo.delete(media.id).await {
            warn!(id = %media.id, error = %e, "Failed to drop record of failed bulk upload");
        }
        if let Err(e) = store.delete(&media.key, Some(&media.bucket)).await {
            warn!(key = %media.key, error = %e, "Failed to delete object of failed bulk upload");
        }
    }
    for ingested in unrecorded {
        let object = &ingested.object;
        if let Err(e) = store.delete(&object.key, Some(&object.bucket)).await {
            warn!(key = %object.key, error = %e, "Failed to delete object of failed bulk upload");
        }
    }

    warn!(recorded = recorded.len(), "Bulk upload rolled back after a record failure");
}

fn ingest_options(state: &AppState, query: &UploadQuery) -> Result<IngestOptions> {
    let ttl = requested_ttl(state, query.ttl_seconds)?;
    Ok(IngestOptions {
        bucket: None,
        presign_ttl: query.presign.then(|| ttl.unwrap_or(state.config.storage.default_url_ttl)),
    })
}

/// Upload one image.
#[utoipa::path(
    post,
    path = "/media",
    tag = "media",
    summary = "Upload image",
    description = "Upload a single JPEG or PNG image in the `file` multipart field.

The content type is detected from the bytes; the filename and declared type are ignored. Images larger than `uploads.max_size_bytes` are downscaled until they fit.",
    request_body(content_type = "multipart/form-data", description = "Multipart form with a `file` field"),
    params(UploadQuery),
    responses(
        (status = 201, description = "Image stored", body = MediaResponse),
        (status = 400, description = "No file, or not a JPEG/PNG image", body = crate::errors::ErrorResponse),
        (status = 413, description = "Request body too large", body = crate::errors::ErrorResponse),
        (status = 422, description = "Image could not be compressed below the size limit", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many uploads in progress", body = crate::errors::ErrorResponse),
        (status = 500, description = "Storage failure", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip_all, fields(filename = %upload.file.filename))]
pub async fn upload_media(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    upload: ValidatedFile,
) -> Result<(StatusCode, Json<MediaResponse>)> {
    let options = ingest_options(&state, &query)?;
    let ingested = state.pipeline.store(upload.file, &options).await?;
    let response = record(&state, ingested).await?;

    info!(id = %response.id, key = %response.key, size_bytes = response.size_bytes, "Stored upload");
    Ok((StatusCode::CREATED, Json(response)))
}

/// Upload several images at once.
#[utoipa::path(
    post,
    path = "/media/bulk",
    tag = "media",
    summary = "Upload images",
    description = "Upload up to `uploads.max_files` images in repeated `files` multipart fields.

Every file is type-checked before any is compressed or stored: one invalid file rejects the whole request.",
    request_body(content_type = "multipart/form-data", description = "Multipart form with repeated `files` fields"),
    params(UploadQuery),
    responses(
        (status = 201, description = "Images stored, in upload order", body = BulkUploadResponse),
        (status = 400, description = "No files, too many files, or a file that is not a JPEG/PNG image", body = crate::errors::ErrorResponse),
        (status = 413, description = "Request body too large", body = crate::errors::ErrorResponse),
        (status = 422, description = "An image could not be compressed below the size limit", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many uploads in progress", body = crate::errors::ErrorResponse),
        (status = 500, description = "Storage failure", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip_all, fields(count = uploads.files.len()))]
pub async fn upload_media_bulk(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    uploads: ValidatedFiles,
) -> Result<(StatusCode, Json<BulkUploadResponse>)> {
    let options = ingest_options(&state, &query)?;
    let ingested = state.pipeline.store_all(uploads.files, &options).await?;

    let mut data = Vec::with_capacity(ingested.len());
    let mut pending = ingested.into_iter();
    while let Some(object) = pending.next() {
        match record(&state, object).await {
            Ok(media) => data.push(media),
            Err(e) => {
                undo_bulk(&state, &data, pending.collect()).await;
                return Err(e);
            }
        }
    }

    info!(count = data.len(), "Stored bulk upload");
    Ok((StatusCode::CREATED, Json(BulkUploadResponse { data })))
}

/// List stored media, newest first.
#[utoipa::path(
    get,
    path = "/media",
    tag = "media",
    summary = "List media",
    params(Pagination),
    responses(
        (status = 200, description = "A page of stored media", body = PaginatedResponse<MediaResponse>),
    )
)]
#[instrument(skip_all)]
pub async fn list_media(State(state): State<AppState>, Query(pagination): Query<Pagination>) -> Result<Json<PaginatedResponse<MediaResponse>>> {
    let (skip, limit) = (pagination.skip(), pagination.limit());
    let mut repo = MediaRecords::new(&state.records);
    let records = repo.list(&MediaFilter::new(skip, limit)).await?;

    Ok(Json(PaginatedResponse::new(
        records.into_iter().map(MediaResponse::from).collect(),
        state.records.len(),
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/media/{id}",
    tag = "media",
    summary = "Get media",
    params(("id" = String, Path, description = "Media ID")),
    responses(
        (status = 200, description = "Stored media", body = MediaResponse),
        (status = 400, description = "Malformed ID", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip(state))]
pub async fn get_media(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<MediaResponse>> {
    let record = find_record(&state, parse_media_id(&id)?).await?;
    Ok(Json(record.into()))
}

/// Issue a time-limited read URL.
#[utoipa::path(
    get,
    path = "/media/{id}/url",
    tag = "media",
    summary = "Get read URL",
    description = "Returns a presigned GET URL for the stored object. The URL stops working once `expires_at` has passed.",
    params(("id" = String, Path, description = "Media ID"), UrlQuery),
    responses(
        (status = 200, description = "Presigned URL", body = MediaUrl),
        (status = 400, description = "Malformed ID or TTL out of range", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Signing failure", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip(state))]
pub async fn get_media_url(State(state): State<AppState>, Path(id): Path<String>, Query(query): Query<UrlQuery>) -> Result<Json<MediaUrl>> {
    let ttl = requested_ttl(&state, query.ttl_seconds)?;
    let record = find_record(&state, parse_media_id(&id)?).await?;

    let grant = state.pipeline.presign(&record.key, Some(&record.bucket), ttl).await?;
    Ok(Json(grant.into()))
}

#[utoipa::path(
    delete,
    path = "/media/{id}",
    tag = "media",
    summary = "Delete media",
    description = "Deletes the stored object and its record.",
    params(("id" = String, Path, description = "Media ID")),
    responses(
        (status = 200, description = "Deleted", body = MediaDeleteResponse),
        (status = 400, description = "Malformed ID", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Storage failure", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip(state))]
pub async fn delete_media(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<MediaDeleteResponse>> {
    let id = parse_media_id(&id)?;
    let record = find_record(&state, id).await?;

    state.pipeline.object_store().delete(&record.key, Some(&record.bucket)).await?;

    let mut repo = MediaRecords::new(&state.records);
    let deleted = repo.delete(id).await?;

    info!(id = %id, key = %record.key, "Deleted media");
    Ok(Json(MediaDeleteResponse { id, deleted }))
}
