//! Upload concurrency limiting.
//!
//! Each ingestion request holds an [`UploadPermit`] for as long as it streams files to disk.
//! Requests beyond the concurrency limit queue for a slot; when the queue is full or the wait
//! times out they are turned away with HTTP 429 instead of piling onto the disk.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{FileLimitsConfig, LimitsConfig};
use crate::errors::{Error, Result};

/// All limiters used by the application.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// Limiter for concurrent upload requests. None means unlimited.
    pub uploads: Option<Arc<UploadLimiter>>,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            uploads: UploadLimiter::new(&config.files).map(Arc::new),
        }
    }

    /// Take an upload slot if uploads are limited. `None` when unlimited.
    pub async fn acquire_upload(&self) -> Result<Option<UploadPermit>> {
        match &self.uploads {
            Some(limiter) => limiter.acquire().await.map(Some),
            None => Ok(None),
        }
    }
}

/// Bounded-queue semaphore for upload requests.
#[derive(Debug)]
pub struct UploadLimiter {
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    /// None = unlimited queue
    max_waiting: Option<usize>,
    max_wait: Duration,
}

impl UploadLimiter {
    /// Returns `None` when `max_concurrent_uploads` is 0 (unlimited).
    pub fn new(config: &FileLimitsConfig) -> Option<Self> {
        if config.max_concurrent_uploads == 0 {
            return None;
        }

        Some(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            waiting: AtomicUsize::new(0),
            max_waiting: (config.max_waiting_uploads > 0).then_some(config.max_waiting_uploads),
            max_wait: Duration::from_secs(config.max_upload_wait_secs),
        })
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Requests currently queued for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait for an upload slot.
    ///
    /// Fails with [`Error::TooManyRequests`] when the queue is already full, when the wait is
    /// zero and no slot is free, or when `max_wait` elapses first.
    pub async fn acquire(&self) -> Result<UploadPermit> {
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        let _queued = self.join_queue()?;

        // A slot may have been released while we were joining the queue
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        if self.max_wait.is_zero() {
            return Err(too_many("Too many uploads in progress. Please retry later."));
        }

        match tokio::time::timeout(self.max_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(UploadPermit { _permit: permit }),
            Ok(Err(_closed)) => Err(too_many("Upload service temporarily unavailable.")),
            Err(_elapsed) => Err(too_many("Timed out waiting for an upload slot. Please retry later.")),
        }
    }

    fn join_queue(&self) -> Result<QueueSlot<'_>> {
        let ahead = self.waiting.fetch_add(1, Ordering::SeqCst);
        let slot = QueueSlot { waiting: &self.waiting };

        if let Some(max) = self.max_waiting
            && ahead >= max
        {
            // dropping `slot` leaves the queue again
            return Err(too_many("Too many uploads in progress. Please retry later."));
        }
        Ok(slot)
    }
}

fn too_many(message: &str) -> Error {
    Error::TooManyRequests {
        message: message.to_string(),
    }
}

/// Position in the waiting queue; leaving scope leaves the queue.
struct QueueSlot<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// RAII guard holding an upload slot until dropped.
#[must_use]
#[derive(Debug)]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}
