//! API request and response data models.
//!
//! API models are kept separate from the record models in [`crate::db::models`] so the wire
//! format can change independently of storage. All models carry `utoipa` annotations.

pub mod media;
pub mod pagination;
