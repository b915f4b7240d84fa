//! Presigned reads for the in-memory storage backend.
//!
//! S3 serves its own presigned URLs. When objects live in process memory, the URLs issued by
//! [`InMemoryObjectStore`](crate::storage::InMemoryObjectStore) point here instead.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::IntoParams;

use crate::{
    AppState,
    errors::{Error, Result},
    storage::{
        StorageError,
        memory::{EXPIRES_PARAM, SIGNATURE_PARAM},
    },
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ObjectAccessQuery {
    /// Unix time after which the URL is no longer valid
    #[serde(rename = "X-Expires")]
    pub expires: Option<i64>,
    /// URL signature
    #[serde(rename = "X-Signature")]
    pub signature: Option<String>,
}

/// Fetch an object through a presigned URL.
#[utoipa::path(
    get,
    path = "/objects/{bucket}/{key}",
    tag = "objects",
    summary = "Read object",
    description = "Serves an object through a URL issued by the media endpoints. Only available with the in-memory storage backend.",
    params(
        ("bucket" = String, Path, description = "Bucket name"),
        ("key" = String, Path, description = "Object key"),
        ObjectAccessQuery
    ),
    responses(
        (status = 200, description = "Object body", content_type = "image/*"),
        (status = 403, description = "Missing, forged or expired signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Object not found", body = crate::errors::ErrorResponse),
    )
)]
#[instrument(skip(state, query))]
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectAccessQuery>,
) -> Result<Response> {
    let Some(store) = state.memory_store.as_ref() else {
        return Err(Error::NotFound {
            resource: "Object".to_string(),
            id: key,
        });
    };

    let (Some(expires), Some(signature)) = (query.expires, query.signature.as_deref()) else {
        return Err(StorageError::AccessDenied {
            reason: format!("missing {EXPIRES_PARAM} or {SIGNATURE_PARAM}"),
        }
        .into());
    };

    let object = store.open(&bucket, &key, expires, signature)?;

    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CONTENT_DISPOSITION, object.content_disposition),
        ],
        object.body,
    )
        .into_response())
}
