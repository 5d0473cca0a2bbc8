//! Admission gate bounding concurrent backend work.
//!
//! Up to `max_concurrency` requests hold a slot at once. Further requests wait
//! in FIFO order (the semaphore queues waiters fairly) until the wait queue
//! holds `max_queue_depth` requests; anything beyond that is refused at once.
//! Slots and queue positions are released by dropping their guards, so a
//! cancelled request never leaks capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::{PipelineError, PipelineResult};

/// Snapshot of gate occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatus {
    /// Requests currently holding a slot
    pub in_flight: usize,
    /// Requests waiting for a slot
    pub queued: usize,
    pub max_concurrency: usize,
    pub max_queue_depth: usize,
}

/// Concurrency limiter with a bounded wait queue.
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    queued: AtomicUsize,
    max_concurrency: usize,
    max_queue_depth: usize,
}

/// A held slot. Dropping it admits the next queued request.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

/// Holds a queue position while waiting for a slot.
struct QueuePosition<'a>(&'a AtomicUsize);

impl Drop for QueuePosition<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionGate {
    pub fn new(max_concurrency: usize, max_queue_depth: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            queued: AtomicUsize::new(0),
            max_concurrency,
            max_queue_depth,
        }
    }

    /// Take a slot, waiting in line if all are busy.
    ///
    /// Fails with [`PipelineError::Overloaded`] without waiting when the queue
    /// is already full.
    pub async fn acquire(&self) -> PipelineResult<GatePermit> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => return Ok(GatePermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => {}
            Err(TryAcquireError::Closed) => return Err(self.overloaded()),
        }

        let depth = self.max_queue_depth;
        if self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| {
                (q < depth).then_some(q + 1)
            })
            .is_err()
        {
            tracing::warn!(
                max_concurrency = self.max_concurrency,
                max_queue_depth = depth,
                "Admission refused, queue full"
            );
            return Err(self.overloaded());
        }
        let _position = QueuePosition(&self.queued);

        tracing::debug!(queued = self.queued(), "Waiting for backend slot");
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.overloaded())?;
        Ok(GatePermit { _permit: permit })
    }

    /// Requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.permits.available_permits())
    }

    /// Requests currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            in_flight: self.in_flight(),
            queued: self.queued(),
            max_concurrency: self.max_concurrency,
            max_queue_depth: self.max_queue_depth,
        }
    }

    fn overloaded(&self) -> PipelineError {
        PipelineError::Overloaded {
            max_concurrency: self.max_concurrency,
            max_queue_depth: self.max_queue_depth,
        }
    }
}
