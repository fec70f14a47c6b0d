use std::time::Instant;

use crossbeam::queue::ArrayQueue;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A pooled allocation returned to callers alongside their pending request.
/// Carries no channel state of its own; the result signal is a fresh
/// single-shot channel created per submission, since single-shot channels
/// cannot be reset and reused.
pub(crate) struct TsoSlot {
    pub submitted_at: Instant,
}

/// Free-list of request-record allocations. Acquired on submission, released
/// back once the caller has observed the request's result.
pub(crate) struct FreeList {
    pool: ArrayQueue<Box<TsoSlot>>,
}

impl FreeList {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            pool: ArrayQueue::new(capacity),
        }
    }

    pub(crate) fn acquire(&self) -> Box<TsoSlot> {
        match self.pool.pop() {
            Some(mut slot) => {
                slot.submitted_at = Instant::now();
                slot
            }
            None => Box::new(TsoSlot {
                submitted_at: Instant::now(),
            }),
        }
    }

    pub(crate) fn release(&self, slot: Box<TsoSlot>) {
        let _ = self.pool.push(slot);
    }
}

/// A request in flight inside the submission queue. Only the result sender
/// travels through the queue; the slot stays with the caller's future.
pub(crate) struct QueuedTsoRequest {
    pub result_tx: oneshot::Sender<Result<(i64, i64)>>,
}

/// Returned to a `request_tso` caller. `wait` resolves once the sender loop
/// has assigned and signalled a timestamp, or the pipeline has failed the
/// request.
pub struct TsoRequestFuture {
    result_rx: oneshot::Receiver<Result<(i64, i64)>>,
    free_list: std::sync::Arc<FreeList>,
    slot: Option<Box<TsoSlot>>,
}

impl TsoRequestFuture {
    pub(crate) fn new(
        result_rx: oneshot::Receiver<Result<(i64, i64)>>,
        free_list: std::sync::Arc<FreeList>,
        slot: Box<TsoSlot>,
    ) -> Self {
        Self {
            result_rx,
            free_list,
            slot: Some(slot),
        }
    }

    /// Blocks until the timestamp is assigned or the pipeline fails the
    /// request. Releases the pooled slot before returning in either case.
    pub async fn wait(mut self) -> Result<(i64, i64)> {
        let result = match (&mut self.result_rx).await {
            Ok(result) => result,
            Err(_) => Err(Error::Closing),
        };
        if let Some(slot) = self.slot.take() {
            self.free_list.release(slot);
        }
        result
    }

    /// Like `wait`, but also races the caller's own cancellation handle. If
    /// `cancel` fires first, returns the cancellation error; the queued
    /// request is left to complete (or be revoked) on its own and its
    /// result is simply discarded since nothing observes it.
    pub async fn wait_with_cancel(mut self, cancel: &CancellationToken) -> Result<(i64, i64)> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = &mut self.result_rx => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::Closing),
            },
        };
        if let Some(slot) = self.slot.take() {
            self.free_list.release(slot);
        }
        result
    }
}

impl Drop for TsoRequestFuture {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.free_list.release(slot);
        }
    }
}
