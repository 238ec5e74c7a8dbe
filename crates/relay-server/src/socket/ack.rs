//! Pending acknowledgements for server-emitted events.
//!
//! Each entry resolves exactly once: answered, cancelled, or timed out.
//! Whichever happens first removes the entry; later attempts find nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::{ACKS_RESOLVED_TOTAL, ACKS_TIMED_OUT_TOTAL};

/// Arguments a peer sent back in an ack packet.
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

/// Why an ack did not arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AckError {
    /// The deadline passed without an answer.
    #[error("acknowledgement timed out")]
    Timeout,
    /// The request was withdrawn (send failure or disconnect).
    #[error("acknowledgement cancelled")]
    Cancelled,
}

/// Outcome delivered to an [`AckReceiver`].
pub type AckResult = Result<AckResponse, AckError>;

/// Counters over the lifetime of an [`AckManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AckStats {
    /// Requests registered.
    pub total: u64,
    /// Requests answered.
    pub succeeded: u64,
    /// Requests that expired.
    pub timed_out: u64,
    /// Requests withdrawn.
    pub cancelled: u64,
    /// Requests still waiting.
    pub pending: u64,
}

struct PendingAck {
    event: String,
    deadline: Instant,
    tx: oneshot::Sender<AckResult>,
}

/// Tracks acknowledgements requested over one engine connection.
pub struct AckManager {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingAck>>,
    total: AtomicU64,
    succeeded: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

impl AckManager {
    /// Create an empty manager. Ids start at 0.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Allocate the next ack id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start waiting for the ack of `id`.
    pub fn register(self: &Arc<Self>, id: u64, event: &str, timeout: Duration) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let previous = self.pending.lock().insert(
            id,
            PendingAck {
                event: event.to_owned(),
                deadline,
                tx,
            },
        );
        if previous.is_some() {
            warn!(ack_id = id, event, "ack id reused while still pending");
        }
        let _ = self.total.fetch_add(1, Ordering::Relaxed);
        AckReceiver {
            id,
            deadline,
            rx,
            manager: Arc::clone(self),
        }
    }

    /// Deliver a peer's answer. Returns `false` for unknown or settled ids.
    pub fn resolve(&self, id: u64, response: AckResponse) -> bool {
        let Some(entry) = self.pending.lock().remove(&id) else {
            debug!(ack_id = id, "ack for unknown id, ignoring");
            return false;
        };
        let _ = self.succeeded.fetch_add(1, Ordering::Relaxed);
        counter!(ACKS_RESOLVED_TOTAL).increment(1);
        debug!(ack_id = id, event = entry.event, "ack resolved");
        let _ = entry.tx.send(Ok(response));
        true
    }

    /// Withdraw a request. Returns `false` if it was already settled.
    pub fn cancel(&self, id: u64) -> bool {
        let Some(entry) = self.pending.lock().remove(&id) else {
            return false;
        };
        let _ = self.cancelled.fetch_add(1, Ordering::Relaxed);
        let _ = entry.tx.send(Err(AckError::Cancelled));
        true
    }

    /// Withdraw every pending request. Returns how many were withdrawn.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingAck> = self.pending.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        let _ = self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
        for entry in drained {
            let _ = entry.tx.send(Err(AckError::Cancelled));
        }
        count
    }

    /// Time out every request whose deadline has passed.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(u64, PendingAck)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|e| (id, e)))
                .collect()
        };
        let count = expired.len();
        for (id, entry) in expired {
            self.record_timeout(id, &entry.event);
            let _ = entry.tx.send(Err(AckError::Timeout));
        }
        count
    }

    fn time_out(&self, id: u64) -> bool {
        let Some(entry) = self.pending.lock().remove(&id) else {
            return false;
        };
        self.record_timeout(id, &entry.event);
        true
    }

    fn record_timeout(&self, id: u64, event: &str) {
        let _ = self.timed_out.fetch_add(1, Ordering::Relaxed);
        counter!(ACKS_TIMED_OUT_TOTAL).increment(1);
        debug!(ack_id = id, event, "ack timed out");
    }

    /// Number of requests still waiting.
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

impl Default for AckManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for one acknowledgement.
pub struct AckReceiver {
    id: u64,
    deadline: Instant,
    rx: oneshot::Receiver<AckResult>,
    manager: Arc<AckManager>,
}

impl AckReceiver {
    /// Ack id carried by the request packet.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the answer, the deadline, or cancellation.
    pub async fn wait(mut self) -> AckResult {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(AckError::Cancelled),
            Err(_elapsed) => {
                if self.manager.time_out(self.id) {
                    Err(AckError::Timeout)
                } else {
                    // Settled between the deadline and the removal.
                    self.rx.try_recv().unwrap_or(Err(AckError::Cancelled))
                }
            }
        }
    }
}
