//! Fixed-capacity, closable FIFO used between pipeline stages.
//!
//! The buffer and closed flag live behind a single mutex; two `Notify`
//! handles stand in for the "not full" and "not empty" condition variables.
//! Waiters register their `Notified` future before inspecting the state, so
//! a push, pop, or close that happens between the check and the await is
//! never missed.
//!
//! Once closed, pushes fail immediately while pops keep draining buffered
//! items and then report end-of-stream with `None`.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::error::PipelineError;

/// Returned by `push` on a closed queue, handing the item back
#[derive(Error)]
#[error("queue is closed")]
pub struct QueueClosed<T>(pub T);

impl<T> QueueClosed<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> From<QueueClosed<T>> for PipelineError {
    fn from(_: QueueClosed<T>) -> Self {
        PipelineError::QueueClosed
    }
}

struct QueueState<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

/// Bounded blocking queue with an end-of-stream signal
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::Config(
                "queue capacity must be positive".to_string(),
            ));
        }

        Ok(Self {
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                closed: false,
            }),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        })
    }

    /// Append an item, waiting while the queue is full.
    ///
    /// Fails without waiting once the queue is closed.
    pub async fn push(&self, mut item: T) -> Result<(), QueueClosed<T>> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                Ok(()) => return Ok(()),
                Err(TryPush::Closed(item)) => return Err(QueueClosed(item)),
                Err(TryPush::Full(returned)) => item = returned,
            }

            notified.await;
        }
    }

    /// Remove the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_pop() {
                Ok(item) => return Some(item),
                Err(TryPop::Closed) => return None,
                Err(TryPop::Empty) => {}
            }

            notified.await;
        }
    }

    /// `push` that gives up when `cancel` fires
    pub async fn push_cancellable(
        &self,
        item: T,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = self.push(item) => result.map_err(PipelineError::from),
        }
    }

    /// `pop` that gives up when `cancel` fires
    pub async fn pop_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            item = self.pop() => Ok(item),
        }
    }

    /// Non-waiting push
    pub fn try_push(&self, item: T) -> Result<(), TryPush<T>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TryPush::Closed(item));
        }
        if state.buffer.len() >= self.capacity {
            return Err(TryPush::Full(item));
        }
        state.buffer.push_back(item);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-waiting pop
    pub fn try_pop(&self) -> Result<T, TryPop> {
        let mut state = self.state.lock();
        match state.buffer.pop_front() {
            Some(item) => {
                drop(state);
                self.not_full.notify_one();
                Ok(item)
            }
            None if state.closed => Err(TryPop::Closed),
            None => Err(TryPop::Empty),
        }
    }

    /// Close the queue. Idempotent.
    ///
    /// Waiting pushers fail, waiting poppers drain what is left and then
    /// observe end-of-stream.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Why a non-waiting push did not happen
#[derive(Debug, PartialEq, Eq)]
pub enum TryPush<T> {
    Full(T),
    Closed(T),
}

/// Why a non-waiting pop returned nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPop {
    Empty,
    Closed,
}
