//! Repository for media records.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::media::{MediaCreateDBRequest, MediaDBResponse, MediaId, MediaUpdateDBRequest},
};

/// Filter for listing media records
#[derive(Debug, Clone)]
pub struct MediaFilter {
    pub skip: usize,
    pub limit: usize,
    pub bucket: Option<String>,
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
            bucket: None,
        }
    }
}

impl MediaFilter {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit,
            ..Default::default()
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }
}

/// Shared backing table for media records. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MediaTable {
    rows: Arc<DashMap<MediaId, MediaDBResponse>>,
    clock: Arc<dyn Clock>,
}

impl Default for MediaTable {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MediaTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct MediaRecords<'c> {
    table: &'c MediaTable,
}

impl<'c> MediaRecords<'c> {
    pub fn new(table: &'c MediaTable) -> Self {
        Self { table }
    }
}

#[async_trait]
impl<'c> Repository for MediaRecords<'c> {
    type CreateRequest = MediaCreateDBRequest;
    type UpdateRequest = MediaUpdateDBRequest;
    type Response = MediaDBResponse;
    type Id = MediaId;
    type Filter = MediaFilter;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let duplicate = self
            .table
            .rows
            .iter()
            .any(|row| row.bucket == request.bucket && row.key == request.key);
        if duplicate {
            return Err(DbError::UniqueViolation {
                constraint: Some("media_bucket_key_unique".to_string()),
                table: Some("media".to_string()),
                message: format!("object {}/{} is already recorded", request.bucket, request.key),
            });
        }

        let now = self.table.clock.now();
        let record = MediaDBResponse {
            id: Uuid::new_v4(),
            key: request.key.clone(),
            bucket: request.bucket.clone(),
            filename: request.filename.clone(),
            content_type: request.content_type.clone(),
            size_bytes: request.size_bytes,
            original_size_bytes: request.original_size_bytes,
            etag: request.etag.clone(),
            created_at: now,
            updated_at: now,
        };

        self.table.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        Ok(self.table.rows.get(&id).map(|row| row.value().clone()))
    }

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut records: Vec<_> = self
            .table
            .rows
            .iter()
            .filter(|row| filter.bucket.as_ref().is_none_or(|bucket| &row.bucket == bucket))
            .map(|row| row.value().clone())
            .collect();

        // Newest first, id as a tiebreak so pagination is stable
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(records.into_iter().skip(filter.skip).take(filter.limit).collect())
    }

    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        Ok(self.table.rows.remove(&id).is_some())
    }

    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let now = self.table.clock.now();
        let mut row = self.table.rows.get_mut(&id).ok_or(DbError::NotFound)?;

        if let Some(filename) = &request.filename {
            row.filename = filename.clone();
        }
        row.updated_at = now;

        Ok(row.value().clone())
    }
}
