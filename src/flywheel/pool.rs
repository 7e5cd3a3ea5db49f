//! Bounded, fire-and-forget worker pools.
//!
//! A pool runs at most `workers` jobs at once and holds at most
//! `queue_capacity` more waiting for a worker. Submitting never blocks: when
//! every slot is taken the job is rejected with [`PoolError::Saturated`].
//! Each job is its own tokio task, dropped when it finishes, so nothing stays
//! resident between bursts.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error};

use crate::flywheel::errors::PoolError;

#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    workers: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    capacity: usize,
    tracker: TaskTracker,
    /// Held for reading across check-and-spawn, for writing while closing.
    closed: RwLock<bool>,
}

impl WorkerPool {
    /// A pool of `workers` concurrent jobs plus `queue_capacity` queued ones.
    /// A `queue_capacity` of zero rejects work whenever every worker is busy.
    pub fn new(name: &'static str, workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = workers + queue_capacity;
        Self {
            name,
            workers: Arc::new(Semaphore::new(workers)),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            tracker: TaskTracker::new(),
            closed: RwLock::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently running or queued.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Queue `job` and return immediately. Panics inside the job are caught and
    /// logged; they never reach the submitter or the other jobs.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(PoolError::Closed { pool: self.name });
        }

        let slot = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| PoolError::Saturated {
                pool: self.name,
                capacity: self.capacity,
            })?;

        let workers = self.workers.clone();
        let pool = self.name;
        self.tracker.spawn(
            async move {
                let _slot = slot;
                let Ok(_worker) = workers.acquire_owned().await else {
                    return;
                };
                if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(pool, panic = %message, "Pool job panicked");
                }
            }
            .in_current_span(),
        );
        Ok(())
    }

    /// Stop accepting jobs and wait for everything already accepted to finish.
    pub async fn shutdown(&self) {
        {
            let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
            *closed = true;
            self.tracker.close();
        }
        self.tracker.wait().await;
    }
}
