//! Bounded worker pool for concurrent batch writes.
//!
//! [`WorkerPool`] owns a rayon [`ThreadPool`] and a [`Semaphore`] sized to the configured
//! concurrency. The producer acquires a permit *before* handing a batch to the pool, so at most
//! `max_in_flight` batches exist at once and memory stays bounded by
//! `max_in_flight × batch_size`.

mod semaphore;

use rayon::{Scope, ThreadPool, ThreadPoolBuilder};

use crate::error::{LoadError, LoadResult};

pub use semaphore::{Permit, Semaphore};

/// Worker threads plus an in-flight bound.
pub struct WorkerPool {
    pool: ThreadPool,
    permits: Semaphore,
    max_in_flight: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.pool.current_num_threads())
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

impl WorkerPool {
    /// A pool with `max_in_flight` worker threads and as many permits.
    pub fn new(max_in_flight: usize) -> LoadResult<Self> {
        if max_in_flight == 0 {
            return Err(LoadError::config("maxConcurrentBatches must be > 0"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_in_flight)
            .thread_name(|i| format!("claims-loader-writer-{i}"))
            .build()
            .map_err(|e| LoadError::config(format!("failed to build worker pool: {e}")))?;
        Ok(Self {
            pool,
            permits: Semaphore::new(max_in_flight),
            max_in_flight,
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Block until a batch slot is free. Hand the permit to the spawned task; dropping it frees
    /// the slot.
    pub fn reserve(&self) -> Permit<'_> {
        self.permits.acquire()
    }

    /// Run `op` on the calling thread with a scope whose spawned tasks execute on the pool.
    /// Returns once every spawned task has finished.
    pub fn scope<'scope, OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce(&Scope<'scope>) -> R,
    {
        self.pool.in_place_scope(op)
    }
}
