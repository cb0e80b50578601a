//! Inbound classification and the reader loop.
//!
//! One reader task owns the read half of a link. Every envelope goes to
//! the raw listeners first, then through [`classify`]:
//!
//! 1. binary payloads are discarded (only auth uses them, inline);
//! 2. the text is parsed after renaming `"type"` to `"responseType"`;
//!    unparseable or empty structures are discarded;
//! 3. a `requestId` matching a pending request completes it;
//! 4. a broadcast discriminator goes to the spontaneous listeners;
//! 5. `PING` is answered with `PONG`; a `PONG` on a reserved namespace
//!    is absorbed;
//! 6. anything on a non-reserved namespace is an application event;
//! 7. the rest is discarded.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::CastCodec;
use crate::correlator::Correlator;
use crate::dispatch::{EventDispatcher, RawEnvelope, SpontaneousEvent};
use crate::envelope::{Envelope, Payload};
use crate::error::CastError;
use crate::message::{Request, RequestBody, RequestId, Response, ResponseBody, rename_discriminator};
use crate::model::AppEvent;
use crate::namespace::{DEFAULT_RECEIVER_ID, is_reserved_namespace};
use crate::writer::EnvelopeWriter;

/// What to do with one inbound envelope.
#[derive(Debug)]
pub enum Inbound {
    /// Delivered to the pending request with this id.
    Reply(RequestId),
    /// Server-originated broadcast for the spontaneous listeners.
    Broadcast(Response),
    /// A `PING` that needs a `PONG`.
    Keepalive,
    /// Answer to one of our keepalive pings.
    Pong,
    /// Message from a receiver application on its own namespace.
    AppEvent(AppEvent),
    Discard(&'static str),
}

fn parse_structure(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(&rename_discriminator(text)) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(Value::Object(map)),
        _ => None,
    }
}

fn is_broadcast(body: &ResponseBody) -> bool {
    matches!(
        body,
        ResponseBody::ReceiverStatus { .. }
            | ResponseBody::MediaStatus { .. }
            | ResponseBody::Close
            | ResponseBody::DeviceAdded { .. }
            | ResponseBody::DeviceUpdated { .. }
            | ResponseBody::DeviceRemoved { .. }
    )
}

/// Classify `envelope`. A reply whose id matches a pending request is
/// handed to its waiter here, atomically with the lookup.
pub fn classify(envelope: &Envelope, correlator: &Correlator) -> Inbound {
    let text = match &envelope.payload {
        Payload::Text(text) => text,
        Payload::Binary(_) => return Inbound::Discard("binary payload"),
    };
    let Some(value) = parse_structure(text) else {
        return Inbound::Discard("unparseable or empty payload");
    };

    let mut response = Response::from_value(value);
    if let Some(id) = response.request_id() {
        match correlator.complete(id, response) {
            Ok(()) => return Inbound::Reply(id),
            Err(unclaimed) => response = unclaimed,
        }
    }

    if response.body().is_some_and(is_broadcast) {
        return Inbound::Broadcast(response);
    }

    match response.body() {
        Some(ResponseBody::Ping) => Inbound::Keepalive,
        Some(ResponseBody::Pong) if is_reserved_namespace(&envelope.namespace) => Inbound::Pong,
        _ if !is_reserved_namespace(&envelope.namespace) => Inbound::AppEvent(AppEvent {
            namespace: envelope.namespace.clone(),
            message: text.clone(),
        }),
        _ => Inbound::Discard("unhandled message on reserved namespace"),
    }
}

/// Shared state the reader loop drives.
#[derive(Clone)]
pub struct ReaderContext {
    pub correlator: Arc<Correlator>,
    pub events: Arc<EventDispatcher>,
    pub writer: EnvelopeWriter,
}

/// Why the reader loop stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// The link was closed locally.
    Cancelled,
    /// Clean end of stream.
    PeerClosed,
    /// The transport is unusable.
    Failed(CastError),
}

/// Read and dispatch until cancelled or the transport dies.
pub async fn run<R>(
    mut reader: FramedRead<R, CastCodec>,
    ctx: ReaderContext,
    token: CancellationToken,
) -> ReaderExit
where
    R: AsyncRead + Unpin,
{
    // FramedRead yields a single `None` after a decode error and then
    // resumes; that `None` is not end of stream.
    let mut recovering = false;

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return ReaderExit::Cancelled,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(envelope)) => {
                recovering = false;
                handle(envelope, &ctx).await;
            }
            Some(Err(e)) if e.is_fatal() => {
                warn!("read failed: {e}");
                return ReaderExit::Failed(e);
            }
            Some(Err(e)) => {
                warn!("skipping undecodable frame: {e}");
                recovering = true;
            }
            None if recovering => recovering = false,
            None => {
                debug!("peer closed the stream");
                return ReaderExit::PeerClosed;
            }
        }
    }
}

async fn handle(envelope: Envelope, ctx: &ReaderContext) {
    if let Payload::Text(text) = &envelope.payload {
        trace!(ns = %envelope.namespace, src = %envelope.source_id, "<-- {text}");
    }

    if ctx.events.has_raw_listeners() {
        let request_id = envelope
            .payload
            .as_text()
            .and_then(parse_structure)
            .and_then(|v| v.get("requestId").and_then(Value::as_u64));
        ctx.events.deliver_raw(&RawEnvelope {
            envelope: envelope.clone(),
            request_id,
        });
    }

    match classify(&envelope, &ctx.correlator) {
        Inbound::Reply(id) => trace!(id, "reply delivered"),
        Inbound::Broadcast(response) => {
            for event in SpontaneousEvent::from_response(response) {
                ctx.events.deliver_spontaneous(&event);
            }
        }
        Inbound::Keepalive => {
            let pong = Request::from(RequestBody::Pong);
            if let Err(e) = ctx
                .writer
                .write_request(&envelope.namespace, DEFAULT_RECEIVER_ID, &pong, None)
                .await
            {
                warn!("failed to answer keepalive: {e}");
            }
        }
        Inbound::Pong => trace!("pong"),
        Inbound::AppEvent(event) => {
            ctx.events
                .deliver_spontaneous(&SpontaneousEvent::AppEvent(event));
        }
        Inbound::Discard(reason) => {
            warn!(ns = %envelope.namespace, src = %envelope.source_id, "discarded: {reason}");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
