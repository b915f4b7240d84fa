//! Record persistence for stored media.
//!
//! Records follow the Repository pattern so handlers never touch the backing table directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - CRUD over records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - record structures)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ MediaTable  │  (process-local concurrent map)
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations for CRUD operations
//! - [`models`]: Record structures and create/update requests
//! - [`errors`]: Record store error types
//!
//! ## Example Usage
//!
//! ```ignore
//! use mediactl::db::handlers::{MediaRecords, MediaTable, Repository};
//!
//! async fn example(table: &MediaTable) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut records = MediaRecords::new(table);
//!
//!     let record = records.create(&create_request).await?;
//!     if let Some(record) = records.get_by_id(record.id).await? {
//!         println!("Stored {} as {}", record.filename, record.key);
//!     }
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
