//! Nested write concurrency gates
//!
//! ```text
//!   write()        ──► outer permit ──► pipeline
//!   write_batch()  ──► outer permit (held for the whole batch)
//!                        └─► batch gate permit per packet ──► pipeline
//! ```
//!
//! The outer gate bounds write operations across all streams. Each batch
//! gets its own inner gate, so two concurrent batches do not share packet
//! permits. Reads, deletes and sweeps never touch either gate.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::StorageError;

/// Owner of the outer write gate
#[derive(Debug)]
pub struct WriteLimiter {
    outer: Arc<Semaphore>,
    max_concurrent_writes: usize,
    batch_concurrency: usize,
}

impl WriteLimiter {
    /// Create gates with the given capacities
    pub fn new(max_concurrent_writes: usize, batch_concurrency: usize) -> Self {
        Self {
            outer: Arc::new(Semaphore::new(max_concurrent_writes.max(1))),
            max_concurrent_writes: max_concurrent_writes.max(1),
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// Wait for an outer permit
    ///
    /// Fails only after [`WriteLimiter::close`].
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, StorageError> {
        self.outer
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::GateClosed)
    }

    /// Fresh inner gate for one batch
    pub fn batch_gate(&self) -> BatchGate {
        BatchGate {
            inner: Arc::new(Semaphore::new(self.batch_concurrency)),
        }
    }

    /// Outer permits currently free
    pub fn available(&self) -> usize {
        self.outer.available_permits()
    }

    /// Outer gate capacity
    pub fn capacity(&self) -> usize {
        self.max_concurrent_writes
    }

    /// Reject all pending and future writes
    pub fn close(&self) {
        self.outer.close();
    }
}

/// Per-batch packet gate
#[derive(Debug, Clone)]
pub struct BatchGate {
    inner: Arc<Semaphore>,
}

impl BatchGate {
    /// Wait for a packet permit
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, StorageError> {
        self.inner
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::GateClosed)
    }

    /// Packet permits currently free
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }
}
