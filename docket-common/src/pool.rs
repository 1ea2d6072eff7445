//! Fixed-capacity task pools.
//!
//! A pool is a counting semaphore in front of `tokio::spawn`. A slot is
//! reserved before the task is spawned and released when the task finishes,
//! so at most `capacity` tasks from one pool are ever in flight. Reserving
//! never blocks indefinitely: callers either get an immediate answer or wait
//! for a bounded time, and must treat refusal as backpressure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

/// Why a pool refused a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("{pool} pool is full ({capacity} tasks in flight)")]
    Exhausted { pool: &'static str, capacity: usize },

    #[error("{pool} pool had no free slot within {waited:?}")]
    Timeout {
        pool: &'static str,
        waited: Duration,
    },

    #[error("{pool} pool is closed")]
    Closed { pool: &'static str },
}

/// A named, bounded pool of tokio tasks.
#[derive(Debug, Clone)]
pub struct TaskPool {
    name: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

/// A reserved slot in a [`TaskPool`].
///
/// Dropping the slot without spawning returns it to the pool.
#[derive(Debug)]
pub struct PoolSlot {
    permit: OwnedSemaphorePermit,
}

impl TaskPool {
    /// Create a pool allowing `capacity` concurrent tasks (at least one).
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Reserve a slot without waiting.
    pub fn try_reserve(&self) -> Result<PoolSlot, PoolError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(PoolSlot { permit }),
            Err(TryAcquireError::NoPermits) => Err(PoolError::Exhausted {
                pool: self.name,
                capacity: self.capacity,
            }),
            Err(TryAcquireError::Closed) => Err(PoolError::Closed { pool: self.name }),
        }
    }

    /// Reserve a slot, waiting at most `wait` for one to free up.
    pub async fn reserve_within(&self, wait: Duration) -> Result<PoolSlot, PoolError> {
        if let Ok(slot) = self.try_reserve() {
            return Ok(slot);
        }
        match tokio::time::timeout(wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(PoolSlot { permit }),
            Ok(Err(_)) => Err(PoolError::Closed { pool: self.name }),
            Err(_) => Err(PoolError::Timeout {
                pool: self.name,
                waited: wait,
            }),
        }
    }

    /// Spawn `fut` if a slot is free right now.
    pub fn try_spawn<F>(&self, fut: F) -> Result<JoinHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(self.try_reserve()?.spawn(fut))
    }

    /// Spawn `fut` once a slot frees up, waiting at most `wait`.
    pub async fn spawn_within<F>(
        &self,
        wait: Duration,
        fut: F,
    ) -> Result<JoinHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(self.reserve_within(wait).await?.spawn(fut))
    }
}

impl PoolSlot {
    /// Spawn `fut` on the runtime; the slot is held until it completes.
    pub fn spawn<F>(self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.permit;
        tokio::spawn(async move {
            let output = fut.await;
            drop(permit);
            output
        })
    }
}
