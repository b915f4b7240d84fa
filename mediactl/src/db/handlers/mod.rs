//! Repository implementations.
//!
//! - [`repository::Repository`]: the CRUD trait every repository implements
//! - [`media::MediaRecords`]: records of stored media objects

pub mod media;
pub mod repository;

pub use media::{MediaRecords, MediaTable};
pub use repository::Repository;
