//! HTTP request handlers.
//!
//! - [`media`]: upload, list, fetch, presign and delete stored media
//! - [`objects`]: presigned reads when objects are kept in memory
//!
//! Handlers return [`crate::errors::Error`], which renders as the JSON error envelope with a
//! matching status code.

pub mod media;
pub mod objects;
