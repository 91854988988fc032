//! # Bulkhead
//!
//! Per-service concurrency cap with a bounded FIFO wait queue. A caller either gets a
//! slot immediately, waits in line (if the queue has room), or is rejected with
//! [`BulkheadFull`] straight away; there is no unbounded queuing.
//!
//! Slots are represented by [`BulkheadPermit`] guards, released on drop, so every exit
//! path (error, panic unwind, cancellation) returns the slot. Queued callers may abandon
//! their wait at any time by dropping the future; the queue entry (or a slot granted at
//! the same instant) is handed back.
//!
//! Admission is process-local: the counters are not shared between worker processes.

use super::errors::{BulkheadFull, ResilienceError};
use super::service::ServiceIdentity;
use crate::log_resilience;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Monitoring view of a bulkhead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkheadStats {
    pub max_concurrent: u32,
    pub queue_capacity: u32,
    pub active_count: u32,
    pub queue_length: u32,
    pub available_slots: u32,
    pub admitted_total: u64,
    pub rejected_total: u64,
}

impl BulkheadStats {
    /// Queued callers over queue capacity (0.0 when there is no queue)
    pub fn queue_utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        self.queue_length as f64 / self.queue_capacity as f64
    }
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Debug)]
struct BulkheadInner {
    max_concurrent: u32,
    queue_capacity: u32,
    active: u32,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    admitted_total: u64,
    rejected_total: u64,
}

impl BulkheadInner {
    /// Hand free slots to queued callers in arrival order
    fn dispatch(&mut self) {
        while self.active < self.max_concurrent {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };

            self.active += 1;
            if waiter.grant.send(()).is_err() {
                // Receiver already gone: the caller abandoned its wait
                self.active -= 1;
                continue;
            }
            self.admitted_total += 1;
        }
    }

    fn release(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.dispatch();
    }

    fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            max_concurrent: self.max_concurrent,
            queue_capacity: self.queue_capacity,
            active_count: self.active,
            queue_length: self.waiters.len() as u32,
            available_slots: self.max_concurrent.saturating_sub(self.active),
            admitted_total: self.admitted_total,
            rejected_total: self.rejected_total,
        }
    }
}

/// Concurrency limiter for one service
#[derive(Debug)]
pub struct Bulkhead {
    service: ServiceIdentity,
    inner: Arc<Mutex<BulkheadInner>>,
}

impl Bulkhead {
    pub fn new(service: ServiceIdentity, max_concurrent: u32, queue_capacity: u32) -> Self {
        Self {
            service,
            inner: Arc::new(Mutex::new(BulkheadInner {
                max_concurrent: max_concurrent.max(1),
                queue_capacity,
                active: 0,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
                admitted_total: 0,
                rejected_total: 0,
            })),
        }
    }

    pub fn service(&self) -> ServiceIdentity {
        self.service
    }

    /// Wait for a slot
    ///
    /// Returns immediately when a slot is free and nobody is queued ahead; otherwise
    /// queues (FIFO) if there is room, else rejects.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadFull> {
        let waiter = {
            let mut inner = self.inner.lock();

            if inner.active < inner.max_concurrent && inner.waiters.is_empty() {
                inner.active += 1;
                inner.admitted_total += 1;
                return Ok(self.permit());
            }

            if inner.waiters.len() >= inner.queue_capacity as usize {
                inner.rejected_total += 1;
                let rejection = BulkheadFull {
                    service: self.service,
                    active: inner.active,
                    queued: inner.waiters.len() as u32,
                };
                drop(inner);
                log_resilience!(warn, "Bulkhead rejected call",
                    service: self.service,
                    active: rejection.active,
                    queued: rejection.queued
                );
                return Err(rejection);
            }

            let (grant, receiver) = oneshot::channel();
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.waiters.push_back(Waiter { id, grant });
            debug!(
                service = %self.service,
                waiter = id,
                queue_length = inner.waiters.len(),
                "Bulkhead call queued"
            );

            QueuedWaiter {
                id,
                receiver: Some(receiver),
                inner: Arc::clone(&self.inner),
            }
        };

        waiter.wait(self).await
    }

    /// Run `operation` inside a slot
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _permit = self.acquire().await?;
        operation().await.map_err(ResilienceError::OperationFailed)
    }

    pub fn stats(&self) -> BulkheadStats {
        self.inner.lock().stats()
    }

    /// Live-resize the limits, keeping every queued caller
    ///
    /// A larger `max_concurrent` admits waiters immediately. A smaller one lets in-flight
    /// calls finish; no new call is admitted until `active` drops below the new cap. A
    /// queue capacity below the current queue length keeps existing waiters and rejects
    /// newcomers until the queue drains.
    pub fn resize(&self, max_concurrent: Option<u32>, queue_capacity: Option<u32>) -> BulkheadStats {
        let mut inner = self.inner.lock();
        let previous = inner.stats();

        if let Some(max_concurrent) = max_concurrent {
            inner.max_concurrent = max_concurrent.max(1);
        }
        if let Some(queue_capacity) = queue_capacity {
            inner.queue_capacity = queue_capacity;
        }
        inner.dispatch();

        let stats = inner.stats();
        drop(inner);

        log_resilience!(info, "Bulkhead limits adjusted",
            service: self.service,
            max_concurrent: (previous.max_concurrent, stats.max_concurrent),
            queue_capacity: (previous.queue_capacity, stats.queue_capacity),
            queued: stats.queue_length
        );
        stats
    }

    fn permit(&self) -> BulkheadPermit {
        BulkheadPermit {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A held bulkhead slot, returned on drop
#[derive(Debug)]
pub struct BulkheadPermit {
    inner: Arc<Mutex<BulkheadInner>>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.inner.lock().release();
    }
}

/// A queued caller; dropping it before the grant is consumed gives back its place
struct QueuedWaiter {
    id: u64,
    receiver: Option<oneshot::Receiver<()>>,
    inner: Arc<Mutex<BulkheadInner>>,
}

impl QueuedWaiter {
    async fn wait(mut self, bulkhead: &Bulkhead) -> Result<BulkheadPermit, BulkheadFull> {
        let granted = match self.receiver.as_mut() {
            Some(receiver) => receiver.await.is_ok(),
            None => false,
        };

        if granted {
            // Slot accounted by dispatch; ownership moves to the permit
            self.receiver = None;
            return Ok(bulkhead.permit());
        }

        let inner = self.inner.lock();
        Err(BulkheadFull {
            service: bulkhead.service,
            active: inner.active,
            queued: inner.waiters.len() as u32,
        })
    }
}

impl Drop for QueuedWaiter {
    fn drop(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };

        let mut inner = self.inner.lock();
        if let Some(position) = inner.waiters.iter().position(|w| w.id == self.id) {
            inner.waiters.remove(position);
            return;
        }

        // Granted while being cancelled: the slot was counted for us, give it back
        if receiver.try_recv().is_ok() {
            inner.admitted_total = inner.admitted_total.saturating_sub(1);
            inner.release();
        }
    }
}
