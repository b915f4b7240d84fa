//! Upload extractors.
//!
//! [`ValidatedFile`] and [`ValidatedFiles`] read a multipart body, run the
//! [`UploadValidator`](crate::media::UploadValidator) over it and hand the handler only
//! [`NormalizedFile`]s. A handler taking one of these never sees an unsniffed or oversized
//! upload. Both hold an upload slot from [`crate::limits`] for as long as they live.

use axum::{
    body::Body,
    extract::{FromRequest, Multipart, multipart::MultipartError},
    http::{Request, StatusCode},
};
use tracing::{debug, instrument};

use crate::AppState;
use crate::errors::{Error, Result};
use crate::limits::UploadPermit;
use crate::media::{NormalizedFile, UploadedFile};

/// Multipart field carrying a single upload.
pub const FILE_FIELD: &str = "file";
/// Multipart field carrying a batch upload (repeated).
pub const FILES_FIELD: &str = "files";

/// One validated upload from the `file` field.
pub struct ValidatedFile {
    pub file: NormalizedFile,
    _permit: Option<UploadPermit>,
}

/// All validated uploads from the `files` field, in the order they were sent.
pub struct ValidatedFiles {
    pub files: Vec<NormalizedFile>,
    _permit: Option<UploadPermit>,
}

impl FromRequest<AppState> for ValidatedFile {
    type Rejection = Error;

    #[instrument(skip_all, err)]
    async fn from_request(req: Request<Body>, state: &AppState) -> Result<Self> {
        let permit = acquire_slot(state).await?;
        let Some(multipart) = open_multipart(req, state).await else {
            return Err(Error::NoFileProvided);
        };

        let mut files = read_files(multipart, |name| name == FILE_FIELD, 1).await?;
        let upload = if files.is_empty() { None } else { Some(files.swap_remove(0)) };

        let file = state.pipeline.validator().validate(upload).await?;
        Ok(Self { file, _permit: permit })
    }
}

impl FromRequest<AppState> for ValidatedFiles {
    type Rejection = Error;

    #[instrument(skip_all, err)]
    async fn from_request(req: Request<Body>, state: &AppState) -> Result<Self> {
        let permit = acquire_slot(state).await?;
        let Some(multipart) = open_multipart(req, state).await else {
            return Err(Error::NoFilesProvided);
        };

        let max_files = state.config.uploads.max_files;
        let uploads = read_files(multipart, |name| name == FILES_FIELD || name == "files[]", max_files).await?;

        let files = state.pipeline.validator().validate_all(uploads).await?;
        Ok(Self { files, _permit: permit })
    }
}

async fn acquire_slot(state: &AppState) -> Result<Option<UploadPermit>> {
    match &state.limiters.uploads {
        Some(limiter) => Ok(Some(limiter.acquire().await?)),
        None => Ok(None),
    }
}

/// A request that isn't multipart at all carries no file.
async fn open_multipart(req: Request<Body>, state: &AppState) -> Option<Multipart> {
    match Multipart::from_request(req, state).await {
        Ok(multipart) => Some(multipart),
        Err(rejection) => {
            debug!(reason = %rejection.body_text(), "Upload request is not multipart");
            None
        }
    }
}

/// Collect the file fields accepted by `wanted`, failing once more than `max_files` arrive.
/// Other fields are skipped.
async fn read_files(mut multipart: Multipart, wanted: impl Fn(&str) -> bool, max_files: usize) -> Result<Vec<UploadedFile>> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if !wanted(&name) {
            debug!(field = %name, "Skipping multipart field");
            continue;
        }

        if files.len() >= max_files {
            return Err(Error::BadRequest {
                message: format!("Too many files. At most {max_files} can be uploaded at once."),
            });
        }

        let filename = field.file_name().unwrap_or("file").to_string();
        let content_type = field.content_type().map(str::to_string);
        let buffer = field.bytes().await.map_err(multipart_error)?;

        debug!(filename = %filename, content_type = ?content_type, size_bytes = buffer.len(), "Received upload");
        files.push(UploadedFile::new(filename, content_type, buffer));
    }

    Ok(files)
}

fn multipart_error(err: MultipartError) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: "Request body exceeds the maximum allowed size".to_string(),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", err.body_text()),
        }
    }
}
