//! HTTP API.
//!
//! - **[`extract`]**: Extractors that validate multipart uploads before a handler runs
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # Routes
//!
//! Everything below is nested under the configured `prefix` (default `/api/v1`):
//!
//! - **Media** (`/media/*`): upload, bulk upload, list, fetch, issue read URLs, delete
//! - **Objects** (`/objects/{bucket}/{*key}`): presigned reads, in-memory backend only
//!
//! API documentation is served at `/docs`.

pub mod extract;
pub mod handlers;
pub mod models;
