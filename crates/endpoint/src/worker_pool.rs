//! Bounded worker pool: FIFO fairness across connections via a semaphore.

use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Caps the number of in-flight operations at `worker_count`. A permit is
/// held for the duration of exactly one operation, so a single connection
/// can never hold more than one at a time and cannot monopolize the pool.
pub struct WorkerPool {
    semaphore: Semaphore,
}

impl WorkerPool {
    /// A pool sized to `worker_count` concurrent in-flight operations.
    pub fn new(worker_count: usize) -> Self {
        Self {
            semaphore: Semaphore::new(worker_count.max(1)),
        }
    }

    /// Wait for a free worker slot.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("worker pool semaphore is never closed")
    }
}

/// Convenience constructor for sharing a pool across connection tasks.
pub fn shared(worker_count: usize) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(worker_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_of_one_serializes_acquirers() {
        let pool = WorkerPool::new(1);
        let first = pool.acquire().await;
        let second = tokio::time::timeout(std::time::Duration::from_millis(20), pool.acquire()).await;
        assert!(second.is_err());
        drop(first);
        let third = tokio::time::timeout(std::time::Duration::from_millis(20), pool.acquire()).await;
        assert!(third.is_ok());
    }
}
