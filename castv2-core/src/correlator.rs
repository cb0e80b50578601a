//! Request/reply correlation.
//!
//! Every correlated send registers a single-slot waiter under a fresh
//! request id. The reader loop completes the waiter when a reply with
//! that id arrives. Whatever way the wait ends (reply, timeout,
//! cancellation, or the caller dropping the future) the entry is
//! removed from the table.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::CastError;
use crate::message::{RequestId, Response};

type PendingTable = DashMap<RequestId, oneshot::Sender<Response>>;

/// Table of outstanding requests for one link.
#[derive(Debug)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Allocate an id without registering a waiter. Never returns 0.
    pub fn next_request_id(&self) -> RequestId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Allocate an id and register a waiter for it.
    pub fn register(&self) -> PendingReply {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        trace!(id, "pending request registered");
        PendingReply {
            id,
            rx,
            _guard: PendingGuard {
                id,
                pending: Arc::clone(&self.pending),
            },
        }
    }

    /// Hand `response` to the waiter registered under `id`.
    ///
    /// The response comes back as `Err` when nobody is waiting for it,
    /// so the caller can classify it some other way.
    pub fn complete(&self, id: RequestId, response: Response) -> Result<(), Response> {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(response),
            None => Err(response),
        }
    }

    /// Drop every waiter; each one observes `ConnectionClosed`.
    pub fn fail_all(&self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

struct PendingGuard {
    id: RequestId,
    pending: Arc<PendingTable>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.remove(&self.id).is_some() {
            trace!(id = self.id, "pending request abandoned");
        }
    }
}

/// A registered waiter. Dropping it unregisters the id.
pub struct PendingReply {
    id: RequestId,
    rx: oneshot::Receiver<Response>,
    _guard: PendingGuard,
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.id).finish()
    }
}

impl PendingReply {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the reply, bounded by `timeout` and by `cancel`.
    pub async fn wait(
        self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, CastError> {
        let PendingReply { rx, _guard, .. } = self;

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            reply = tokio::time::timeout(timeout, rx) => match reply {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(CastError::ConnectionClosed),
                Err(_) => Err(CastError::Timeout(timeout)),
            },
            _ = cancelled => Err(CastError::Interrupted),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
