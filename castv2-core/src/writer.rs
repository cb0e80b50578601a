//! Shared, serialized write path.
//!
//! Callers, the reader loop (keepalive replies) and the keepalive timer
//! all write to the same stream. Each envelope is encoded and flushed
//! under one lock so frames never interleave. Taking the lock and the
//! write itself share one deadline; a peer that stops reading turns
//! into `Timeout` instead of a stuck caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::SinkExt;
use tokio::io::WriteHalf;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::trace;

use crate::codec::CastCodec;
use crate::envelope::{Envelope, Payload};
use crate::error::CastError;
use crate::message::{Request, RequestId};
use crate::transport::BoxedStream;

type Sink = FramedWrite<WriteHalf<BoxedStream>, CastCodec>;

/// Write deadline until the owner installs its own.
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 30_000;

/// Cloneable handle to the write half of one link.
#[derive(Clone)]
pub struct EnvelopeWriter {
    sink: Arc<Mutex<Sink>>,
    sender_id: Arc<str>,
    timeout_ms: Arc<AtomicU64>,
    /// Set once a write was cut short mid-frame.
    poisoned: Arc<AtomicBool>,
}

impl std::fmt::Debug for EnvelopeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeWriter")
            .field("sender_id", &self.sender_id)
            .finish_non_exhaustive()
    }
}

impl EnvelopeWriter {
    pub fn new(sink: Sink, sender_id: impl Into<Arc<str>>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            sender_id: sender_id.into(),
            timeout_ms: Arc::new(AtomicU64::new(DEFAULT_WRITE_TIMEOUT_MS)),
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bound every write by a deadline the owner can change at runtime.
    pub fn with_timeout(mut self, timeout_ms: Arc<AtomicU64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Source id stamped on every envelope written here.
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Write one envelope and flush, within the write timeout.
    ///
    /// A write cut short by the deadline may leave a partial frame
    /// behind; every later write then fails with `ConnectionClosed`.
    pub async fn write(&self, envelope: Envelope) -> Result<(), CastError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(CastError::ConnectionClosed);
        }
        if let Payload::Text(text) = &envelope.payload {
            trace!(ns = %envelope.namespace, dst = %envelope.destination_id, "--> {text}");
        }
        let limit = self.timeout();
        let write = async { self.sink.lock().await.send(envelope).await };
        match tokio::time::timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => {
                self.poisoned.store(true, Ordering::Release);
                Err(CastError::Timeout(limit))
            }
        }
    }

    /// Serialize `request` and write it from this sender.
    pub async fn write_request(
        &self,
        namespace: &str,
        destination: &str,
        request: &Request,
        request_id: Option<RequestId>,
    ) -> Result<(), CastError> {
        let payload = request.to_payload(request_id)?;
        self.write(Envelope::text(
            self.sender_id.as_ref(),
            destination,
            namespace,
            payload,
        ))
        .await
    }

    /// Shut the write side down. Errors are ignored; the peer may
    /// already be gone.
    pub async fn shutdown(&self) {
        let mut sink = self.sink.lock().await;
        let _ = SinkExt::<Envelope>::close(&mut *sink).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────
