//! Bounded dispatch pool.
//!
//! Action execution keeps its fire-and-forget concurrency but is bounded by a
//! semaphore of `max_concurrent_actions` permits plus a bounded overflow
//! queue. Dispatches beyond queue capacity are rejected with `queue_full`
//! until capacity frees.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{MedicError, Result};
use crate::observability::metrics;

#[derive(Debug)]
struct PoolState {
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    max_queue: usize,
    dispatched: AtomicU64,
    rejected: AtomicU64,
    max_workers: usize,
}

/// A reserved right to run one action.
///
/// Either an immediate permit or a queue slot that waits for one; created by
/// [`DispatchPool::try_reserve`] so rejection happens before any state is
/// registered for the action.
#[derive(Debug)]
pub struct DispatchSlot {
    state: Arc<PoolState>,
    permit: Option<OwnedSemaphorePermit>,
    queued: bool,
}

impl DispatchSlot {
    /// Spawn the work unit. The permit (or queue slot) is held for the whole
    /// execution and released when the future finishes.
    pub fn run<F>(mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.state.clone();
        let permit = self.permit.take();
        let queued = self.queued;
        // The spawned task owns the slot bookkeeping now.
        std::mem::forget(self);

        tokio::spawn(async move {
            let _permit = match permit {
                Some(permit) => permit,
                None => {
                    let acquired = state.semaphore.clone().acquire_owned().await;
                    state.queued.fetch_sub(1, Ordering::Relaxed);
                    metrics::set_dispatch_queue_depth(
                        state.queued.load(Ordering::Relaxed) as u64
                    );
                    match acquired {
                        Ok(permit) => permit,
                        Err(_) => return,
                    }
                }
            };
            // `queued` slots decremented above; immediate permits never queued.
            let _ = queued;

            metrics::set_active_actions(
                (state.max_workers - state.semaphore.available_permits()) as u64,
            );
            fut.await;
            metrics::set_active_actions(
                (state.max_workers - state.semaphore.available_permits()).saturating_sub(1) as u64,
            );
        });
    }
}

impl Drop for DispatchSlot {
    fn drop(&mut self) {
        // A reserved-but-unused queue slot frees its place.
        if self.queued && self.permit.is_none() {
            self.state.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Semaphore-bounded pool with a bounded overflow queue.
pub struct DispatchPool {
    state: Arc<PoolState>,
}

impl DispatchPool {
    pub fn new(max_workers: usize, max_queue: usize) -> Self {
        Self {
            state: Arc::new(PoolState {
                semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
                queued: AtomicUsize::new(0),
                max_queue,
                dispatched: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                max_workers: max_workers.max(1),
            }),
        }
    }

    /// Reserve a slot, or fail fast with `queue_full`.
    pub fn try_reserve(&self) -> Result<DispatchSlot> {
        if let Ok(permit) = self.state.semaphore.clone().try_acquire_owned() {
            self.state.dispatched.fetch_add(1, Ordering::Relaxed);
            return Ok(DispatchSlot {
                state: self.state.clone(),
                permit: Some(permit),
                queued: false,
            });
        }

        let queued = self.state.queued.load(Ordering::Relaxed);
        if queued >= self.state.max_queue {
            self.state.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(MedicError::queue_full(queued, self.state.max_queue));
        }

        self.state.queued.fetch_add(1, Ordering::Relaxed);
        metrics::set_dispatch_queue_depth(self.state.queued.load(Ordering::Relaxed) as u64);
        self.state.dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(DispatchSlot {
            state: self.state.clone(),
            permit: None,
            queued: true,
        })
    }

    /// Actions currently holding a permit.
    pub fn active(&self) -> usize {
        self.state.max_workers - self.state.semaphore.available_permits()
    }

    /// Dispatches waiting for a permit.
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::Relaxed)
    }

    pub fn dispatched_total(&self) -> u64 {
        self.state.dispatched.load(Ordering::Relaxed)
    }

    pub fn rejected_total(&self) -> u64 {
        self.state.rejected.load(Ordering::Relaxed)
    }
}
