//! Listener registries and event fan-out.
//!
//! Three independent registries: spontaneous payloads, connection
//! state transitions, and raw inbound envelopes. Delivery is
//! synchronous, in registration order, on the task that produced the
//! event. A failing or panicking listener is logged and counted; the
//! remaining listeners still run.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{error, warn};

use crate::envelope::Envelope;
use crate::message::{RequestId, Response, ResponseBody};
use crate::model::{AppEvent, Device, MediaStatus, Status};

/// Outcome of one listener invocation.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Listener<E> = Arc<dyn Fn(&E) -> ListenerResult + Send + Sync + 'static>;

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ── Events ───────────────────────────────────────────────────────

/// A message the peer pushed on its own initiative.
#[derive(Debug, Clone, PartialEq)]
pub enum SpontaneousEvent {
    Status(Status),
    MediaStatus(MediaStatus),
    Close,
    DeviceAdded(Device),
    DeviceUpdated(Device),
    DeviceRemoved { device_id: String },
    AppEvent(AppEvent),
    Unknown(Value),
}

impl SpontaneousEvent {
    /// Split a broadcast into events. A media status push yields one
    /// event per status entry.
    pub fn from_response(response: Response) -> Vec<Self> {
        let body = match response {
            Response::Standard { body, .. } => body,
            Response::Custom(value) => return vec![Self::Unknown(value)],
        };
        match body {
            ResponseBody::ReceiverStatus { status } => vec![Self::Status(status)],
            ResponseBody::MediaStatus { status } => {
                status.into_iter().map(Self::MediaStatus).collect()
            }
            ResponseBody::Close => vec![Self::Close],
            ResponseBody::DeviceAdded { device } => vec![Self::DeviceAdded(device)],
            ResponseBody::DeviceUpdated { device } => vec![Self::DeviceUpdated(device)],
            ResponseBody::DeviceRemoved { device_id } => vec![Self::DeviceRemoved { device_id }],
            other => vec![Self::Unknown(
                serde_json::to_value(&other).unwrap_or(Value::Null),
            )],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
}

/// An inbound envelope as read off the wire, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    pub envelope: Envelope,
    pub request_id: Option<RequestId>,
}

// ── Registry ─────────────────────────────────────────────────────

struct Registry<E> {
    name: &'static str,
    listeners: RwLock<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Registry<E> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, id: ListenerId, listener: Listener<E>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn deliver(&self, event: &E) -> usize {
        // Snapshot so listeners may (un)register while being called.
        let snapshot: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let mut failures = 0;
        for listener in snapshot {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(registry = self.name, "listener failed: {e}");
                }
                Err(_) => {
                    failures += 1;
                    error!(registry = self.name, "listener panicked");
                }
            }
        }
        failures
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

pub struct EventDispatcher {
    next_id: AtomicU64,
    spontaneous: Registry<SpontaneousEvent>,
    connection: Registry<ConnectionEvent>,
    raw: Registry<RawEnvelope>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("spontaneous", &self.spontaneous.len())
            .field("connection", &self.connection.len())
            .field("raw", &self.raw.len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            spontaneous: Registry::new("spontaneous"),
            connection: Registry::new("connection"),
            raw: Registry::new("raw"),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_spontaneous<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SpontaneousEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.spontaneous.add(id, Arc::new(listener));
        id
    }

    pub fn on_connection<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.connection.add(id, Arc::new(listener));
        id
    }

    pub fn on_raw<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RawEnvelope) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.raw.add(id, Arc::new(listener));
        id
    }

    pub fn remove_spontaneous(&self, id: ListenerId) -> bool {
        self.spontaneous.remove(id)
    }

    pub fn remove_connection(&self, id: ListenerId) -> bool {
        self.connection.remove(id)
    }

    pub fn remove_raw(&self, id: ListenerId) -> bool {
        self.raw.remove(id)
    }

    /// Returns the number of listeners that failed.
    pub fn deliver_spontaneous(&self, event: &SpontaneousEvent) -> usize {
        self.spontaneous.deliver(event)
    }

    pub fn deliver_connection(&self, event: &ConnectionEvent) -> usize {
        self.connection.deliver(event)
    }

    pub fn deliver_raw(&self, event: &RawEnvelope) -> usize {
        self.raw.deliver(event)
    }

    pub fn has_raw_listeners(&self) -> bool {
        self.raw.len() > 0
    }
}

// ── Tests ────────────────────────────────────────────────────────
