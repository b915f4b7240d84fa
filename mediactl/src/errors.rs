use crate::db::errors::DbError;
use crate::media::CompressError;
use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Single-file upload arrived without a file (or with an empty one)
    #[error("No file found for field")]
    NoFileProvided,

    /// Bulk upload arrived without any files
    #[error("No files found for field")]
    NoFilesProvided,

    /// Sniffed content type is not in the allowlist, or the bytes could not be decoded as the
    /// type they claim to be
    #[error("Invalid file type (detected: {})", detected.as_deref().unwrap_or("unknown"))]
    InvalidFileType { detected: Option<String> },

    /// Image could not be compressed under the size ceiling
    #[error("Could not compress image below {max_size_bytes} bytes: {detail}")]
    ResourceExhausted { max_size_bytes: u64, detail: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body exceeded the configured limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Rate limit or capacity exceeded
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Object storage or URL signing error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Record store error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Body returned for every failed request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status_code: u16,
    /// Always `false`
    pub success: bool,
    pub timestamp: String,
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoFileProvided | Error::NoFilesProvided | Error::InvalidFileType { .. } | Error::BadRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::ResourceExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Storage(storage_err) => match storage_err {
                StorageError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
                StorageError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                StorageError::WriteFailed { .. } | StorageError::PresignFailed { .. } | StorageError::DeleteFailed { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::NoFileProvided => "No file found for field".to_string(),
            Error::NoFilesProvided => "No files found for field".to_string(),
            Error::InvalidFileType { .. } => "Invalid file type. Only JPG, JPEG, and PNG are allowed.".to_string(),
            Error::ResourceExhausted { max_size_bytes, .. } => {
                format!("Image could not be compressed below the {max_size_bytes} byte size limit")
            }
            Error::BadRequest { message } | Error::PayloadTooLarge { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::TooManyRequests { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Storage(storage_err) => match storage_err {
                StorageError::ObjectNotFound { .. } => "Object not found".to_string(),
                StorageError::AccessDenied { .. } => "Access denied".to_string(),
                StorageError::WriteFailed { .. } => "Failed to store file".to_string(),
                StorageError::PresignFailed { .. } => "Failed to generate access URL".to_string(),
                StorageError::DeleteFailed { .. } => "Failed to delete file".to_string(),
            },
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Storage(StorageError::ObjectNotFound { .. } | StorageError::AccessDenied { .. }) => {
                tracing::info!("Storage access error: {}", self);
            }
            Error::Storage(_) | Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Record store error: {}", self);
            }
            Error::ResourceExhausted { .. } | Error::TooManyRequests { .. } => {
                tracing::warn!("Upload rejected: {}", self);
            }
            Error::NoFileProvided
            | Error::NoFilesProvided
            | Error::InvalidFileType { .. }
            | Error::BadRequest { .. }
            | Error::PayloadTooLarge { .. }
            | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorResponse {
            status_code: status.as_u16(),
            success: false,
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            message: self.user_message(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CompressError> for Error {
    fn from(err: CompressError) -> Self {
        match &err {
            // Passed the magic-byte check but is not actually a decodable image
            CompressError::Decode { kind, .. } => Error::InvalidFileType {
                detected: Some(kind.mime_type().to_string()),
            },
            CompressError::Encode { kind, source } => Error::Internal {
                operation: format!("re-encode {kind} image: {source}"),
            },
            CompressError::Exhausted { max_size_bytes, .. } => Error::ResourceExhausted {
                max_size_bytes: *max_size_bytes,
                detail: err.to_string(),
            },
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
