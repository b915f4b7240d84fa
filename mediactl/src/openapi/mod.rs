//! OpenAPI documentation for the media API.
//!
//! Served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{Modify, OpenApi};

use crate::api;

/// Points the documented server at the configured route prefix.
struct PrefixAddon {
    prefix: String,
}

impl Modify for PrefixAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new(self.prefix.clone())]);
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "mediactl",
        description = "Media ingestion: content-sniffed, size-bounded image uploads with presigned read access."
    ),
    paths(
        api::handlers::media::upload_media,
        api::handlers::media::upload_media_bulk,
        api::handlers::media::list_media,
        api::handlers::media::get_media,
        api::handlers::media::get_media_url,
        api::handlers::media::delete_media,
        api::handlers::objects::get_object,
    ),
    components(schemas(
        api::models::media::MediaResponse,
        api::models::media::MediaUrl,
        api::models::media::BulkUploadResponse,
        api::models::media::MediaDeleteResponse,
        crate::errors::ErrorResponse,
        crate::storage::StoredObjectKey,
    )),
    tags(
        (name = "media", description = "Upload and manage images"),
        (name = "objects", description = "Presigned object reads (in-memory backend)"),
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// The document with its server URL set to `prefix`.
    pub fn with_prefix(prefix: &str) -> utoipa::openapi::OpenApi {
        let mut doc = Self::openapi();
        PrefixAddon {
            prefix: if prefix.is_empty() { "/".to_string() } else { prefix.to_string() },
        }
        .modify(&mut doc);
        doc
    }
}
