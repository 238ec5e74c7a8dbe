//! Acknowledgements the client is waiting for.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

/// Arguments the server sent back in an ack packet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AckResponse {
    /// Ack arguments (placeholders intact).
    pub args: Vec<Value>,
    /// Binary attachments of a binary ack.
    pub attachments: Vec<Bytes>,
}

impl AckResponse {
    /// First argument, the conventional response value.
    pub fn first(&self) -> Option<&Value> {
        self.args.first()
    }
}

/// Why a wait ended without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AckWaitError {
    /// The timeout passed first.
    #[error("timed out")]
    Timeout,
    /// The connection closed first.
    #[error("cancelled")]
    Cancelled,
}

/// Counters over the lifetime of an [`AckTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckStats {
    /// Requests registered.
    pub total: u64,
    /// Requests answered.
    pub succeeded: u64,
    /// Requests that timed out.
    pub timed_out: u64,
    /// Requests cancelled by a closing connection.
    pub cancelled: u64,
    /// Requests still waiting.
    pub pending: u64,
}

impl AckStats {
    /// Answered share of settled requests, in `0.0..=1.0`.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let settled = self.succeeded + self.timed_out + self.cancelled;
        if settled == 0 {
            return 0.0;
        }
        self.succeeded as f64 / settled as f64
    }
}

/// Tracks outstanding acknowledgements. Each one settles once.
#[derive(Debug, Default)]
pub struct AckTracker {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<AckResponse>>>,
    total: AtomicU64,
    succeeded: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

impl AckTracker {
    /// Empty tracker. Ids start at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ack id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start waiting for the answer to `id`.
    pub fn register(self: &Arc<Self>, id: u64, timeout: Duration) -> PendingAck {
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.lock().insert(id, tx);
        let _ = self.total.fetch_add(1, Ordering::Relaxed);
        PendingAck {
            id,
            timeout,
            rx,
            tracker: Arc::clone(self),
        }
    }

    /// Deliver an answer. Returns `false` when nobody waits for `id`.
    pub fn resolve(&self, id: u64, response: AckResponse) -> bool {
        let Some(tx) = self.pending.lock().remove(&id) else {
            return false;
        };
        let _ = self.succeeded.fetch_add(1, Ordering::Relaxed);
        let _ = tx.send(response);
        true
    }

    /// Cancel every outstanding request.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let _ = self
            .cancelled
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained.len()
    }

    fn forget(&self, id: u64) -> bool {
        if self.pending.lock().remove(&id).is_none() {
            return false;
        }
        let _ = self.timed_out.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Requests still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> AckStats {
        AckStats {
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            pending: self.pending_count() as u64,
        }
    }
}

/// One outstanding request.
#[derive(Debug)]
pub struct PendingAck {
    id: u64,
    timeout: Duration,
    rx: oneshot::Receiver<AckResponse>,
    tracker: Arc<AckTracker>,
}

impl PendingAck {
    /// Ack id to put on the outgoing event.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the answer.
    pub async fn wait(mut self) -> Result<AckResponse, AckWaitError> {
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(AckWaitError::Cancelled),
            Err(_) if self.tracker.forget(self.id) => Err(AckWaitError::Timeout),
            Err(_) => self.rx.try_recv().map_err(|_| AckWaitError::Cancelled),
        }
    }
}
