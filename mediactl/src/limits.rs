//! Back-pressure for ingestion.
//!
//! Two independent bounds:
//!
//! - [`UploadGate`] admits upload requests. At most `max_running` are processed at once and at
//!   most `max_queued` wait behind them; anything beyond that is turned away with 429 without
//!   waiting at all.
//! - [`CompressionSlots`] caps how many compression jobs occupy the blocking thread pool at
//!   once, across every request. A bulk upload fans out one job per file, so without this a
//!   few large batches could take every blocking thread.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::{LimitsConfig, UploadLimitsConfig};
use crate::errors::{Error, Result};

/// Every limiter the service runs with.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// Upload admission. `None` when `limits.uploads.max_running` is 0.
    pub uploads: Option<Arc<UploadGate>>,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            uploads: UploadGate::new(&config.uploads).map(Arc::new),
        }
    }
}

#[derive(Debug)]
pub struct UploadGate {
    /// Running plus queued capacity. `None` when the queue is unbounded.
    admission: Option<Arc<Semaphore>>,
    running: Arc<Semaphore>,
    max_wait: Duration,
}

impl UploadGate {
    pub fn new(config: &UploadLimitsConfig) -> Option<Self> {
        if config.max_running == 0 {
            return None;
        }

        let admission = (config.max_queued > 0).then(|| Arc::new(Semaphore::new(config.max_running + config.max_queued)));

        Some(Self {
            admission,
            running: Arc::new(Semaphore::new(config.max_running)),
            max_wait: config.max_wait,
        })
    }

    /// Wait for a running slot. Fails with `TooManyRequests` when the queue is already full or
    /// no slot frees up within `max_wait`.
    pub async fn acquire(&self) -> Result<UploadPermit> {
        let admitted = match &self.admission {
            Some(admission) => Some(admission.clone().try_acquire_owned().map_err(|_| busy())?),
            None => None,
        };

        let running = match self.running.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) if self.max_wait.is_zero() => return Err(busy()),
            Err(_) => {
                debug!(max_wait = ?self.max_wait, "Upload queued for a slot");
                tokio::time::timeout(self.max_wait, self.running.clone().acquire_owned())
                    .await
                    .map_err(|_| Error::TooManyRequests {
                        message: "Timed out waiting for an upload slot. Please retry later.".to_string(),
                    })?
                    .map_err(|_| Error::TooManyRequests {
                        message: "Upload service temporarily unavailable.".to_string(),
                    })?
            }
        };

        Ok(UploadPermit {
            _running: running,
            _admitted: admitted,
        })
    }
}

fn busy() -> Error {
    Error::TooManyRequests {
        message: "Too many uploads in progress. Please retry later.".to_string(),
    }
}

/// Holds an upload's place until dropped.
#[must_use]
#[derive(Debug)]
pub struct UploadPermit {
    _running: OwnedSemaphorePermit,
    _admitted: Option<OwnedSemaphorePermit>,
}

/// Shared cap on concurrent compression jobs. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct CompressionSlots {
    semaphore: Arc<Semaphore>,
}

impl CompressionSlots {
    /// `max_concurrent` of 0 means one slot per available CPU.
    pub fn new(max_concurrent: usize) -> Self {
        let slots = NonZeroUsize::new(max_concurrent)
            .or_else(|| std::thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get);
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
        }
    }

    pub fn from_config(config: &LimitsConfig) -> Self {
        Self::new(config.max_concurrent_compressions)
    }

    /// Slots not currently in use.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `job` on the blocking pool once a slot is free. The slot is held until the job
    /// returns.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| Error::Internal {
            operation: "acquire compression slot: semaphore closed".to_string(),
        })?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join compression task: {e}"),
        })
    }
}

impl Default for CompressionSlots {
    fn default() -> Self {
        Self::new(0)
    }
}
