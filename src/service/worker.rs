//! Bounded worker pool for asynchronous dispatches.
//!
//! The pool is a fixed number of semaphore permits on a tokio runtime. Each
//! ASYNC, TIMEOUT or RETRY dispatch holds one permit for its whole run,
//! including retry backoff sleeps, so at most `size` services execute at once.
//! The size is chosen at construction and never changes.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

#[derive(Debug)]
struct WorkerPoolInner {
    permits: Arc<Semaphore>,
    size: usize,
    runtime: Handle,
}

/// Shared pool of worker slots. Clones refer to the same pool.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<WorkerPoolInner>,
}

impl WorkerPool {
    /// Create a pool with `size` workers on the current tokio runtime.
    pub fn new(size: usize) -> DbResult<Self> {
        if size == 0 {
            return Err(DbError::invalid_argument(
                "Worker pool size must be greater than 0",
            ));
        }
        if size > Semaphore::MAX_PERMITS {
            return Err(DbError::invalid_argument(format!(
                "Worker pool size cannot exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        let runtime = Handle::try_current().map_err(|_| {
            DbError::internal("Worker pool must be created inside a tokio runtime")
        })?;

        debug!(size, "Created worker pool");
        Ok(Self {
            inner: Arc::new(WorkerPoolInner {
                permits: Arc::new(Semaphore::new(size)),
                size,
                runtime,
            }),
        })
    }

    /// Create a pool sized at twice the available hardware parallelism.
    pub fn with_default_size() -> DbResult<Self> {
        Self::new(Self::default_size())
    }

    pub fn default_size() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            * 2
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Number of idle worker slots.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Wait for a free worker slot.
    pub(crate) async fn acquire(&self) -> DbResult<OwnedSemaphorePermit> {
        Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| DbError::ExecutorShutdown)
    }

    /// Spawn a job on the pool's runtime. The job acquires its own slot.
    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(job);
    }

    /// Reject new work and wait until every running job has released its slot.
    ///
    /// Jobs already queued for a slot still run. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        if self.is_shutdown() {
            return;
        }
        let all = u32::try_from(self.inner.size).unwrap_or(u32::MAX);
        if let Ok(permits) = self.inner.permits.acquire_many(all).await {
            self.inner.permits.close();
            drop(permits);
        }
        info!(size = self.inner.size, "Worker pool shut down");
    }
}
