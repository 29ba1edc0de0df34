//! Concurrency-bounded FIFO gateway.
//!
//! At most `max_concurrent` submitted tasks run at once; the rest wait in arrival order.
//! When a running task finishes (success, failure or cancellation) its slot is handed
//! directly to the oldest live waiter, so the in-flight counter never drops below the
//! number of running tasks and a finishing task can never let a newcomer jump the queue.

use std::collections::VecDeque;
use std::future::Future;

use parking_lot::Mutex;
use pulse_telemetry::Metrics;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};

/// Default concurrency bound.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// A queued unit of work waiting for a slot.
struct QueuedTask {
    id: u64,
    notify: oneshot::Sender<GatewayResult<()>>,
}

#[derive(Default)]
struct QueueState {
    in_flight: usize,
    queue: VecDeque<QueuedTask>,
    next_id: u64,
}

/// FIFO request gateway.
pub struct RequestGateway {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

impl Default for RequestGateway {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl RequestGateway {
    /// Create a gateway allowing `max_concurrent` (at least 1) tasks at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Run `task` once a slot is free.
    ///
    /// The task future is not polled until the slot is acquired. Fails with
    /// `GatewayError::QueueCleared` if the queue is drained while waiting.
    pub async fn submit<T, Fut>(&self, task: Fut) -> GatewayResult<T>
    where
        Fut: Future<Output = GatewayResult<T>>,
    {
        let _slot = self.acquire().await?;
        task.await
    }

    /// Reject every queued (not yet started) task. Running tasks are unaffected.
    ///
    /// Returns the number of rejected tasks.
    pub fn drain(&self) -> usize {
        let rejected: Vec<QueuedTask> = {
            let mut state = self.state.lock();
            let rejected = state.queue.drain(..).collect();
            Metrics::gateway_load(0, state.in_flight);
            rejected
        };

        let count = rejected.len();
        for task in rejected {
            let _ = task.notify.send(Err(GatewayError::QueueCleared));
        }
        if count > 0 {
            info!(count, "Gateway queue cleared");
            Metrics::gateway_cleared(count);
        }
        count
    }

    async fn acquire(&self) -> GatewayResult<Slot<'_>> {
        let (id, rx) = {
            let mut state = self.state.lock();
            if state.in_flight < self.max_concurrent && state.queue.is_empty() {
                state.in_flight += 1;
                Metrics::gateway_load(state.queue.len(), state.in_flight);
                return Ok(Slot { gateway: self });
            }

            let (tx, rx) = oneshot::channel();
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            state.queue.push_back(QueuedTask { id, notify: tx });
            debug!(
                id,
                queued = state.queue.len(),
                in_flight = state.in_flight,
                "Task queued"
            );
            Metrics::gateway_load(state.queue.len(), state.in_flight);
            (id, rx)
        };

        let mut waiter = Waiter {
            gateway: self,
            id,
            rx,
            settled: false,
        };
        let outcome = (&mut waiter.rx).await;
        waiter.settled = true;

        match outcome {
            Ok(Ok(())) => Ok(Slot { gateway: self }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GatewayError::QueueCleared),
        }
    }

    /// Hand the slot to the oldest live waiter, or free it.
    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(task) = state.queue.pop_front() {
            if task.notify.send(Ok(())).is_ok() {
                Metrics::gateway_load(state.queue.len(), state.in_flight);
                return;
            }
        }
        state.in_flight = state.in_flight.saturating_sub(1);
        Metrics::gateway_load(0, state.in_flight);
    }

    fn forget(&self, id: u64) {
        let mut state = self.state.lock();
        state.queue.retain(|task| task.id != id);
        Metrics::gateway_load(state.queue.len(), state.in_flight);
    }
}

/// Held while a task runs; releases the slot on drop.
struct Slot<'a> {
    gateway: &'a RequestGateway,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.gateway.release();
    }
}

/// A queued acquire. If dropped before settling (caller cancelled), either leaves the
/// queue or passes on a slot that was granted in the meantime.
struct Waiter<'a> {
    gateway: &'a RequestGateway,
    id: u64,
    rx: oneshot::Receiver<GatewayResult<()>>,
    settled: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Ok(())) => self.gateway.release(),
            _ => self.gateway.forget(self.id),
        }
    }
}
