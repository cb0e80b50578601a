//! # castv2-core
//!
//! Client-side protocol engine for the Cast v2 receiver control protocol.
//!
//! This crate contains:
//! - **Wire**: `Envelope` (protobuf `CastMessage` layout) and `CastCodec`
//!   for length-prefixed framing via `tokio_util`
//! - **Schema**: `Request` / `Response` JSON messages and the domain
//!   records they carry (`Status`, `MediaStatus`, `Volume`, ...)
//! - **Engine**: `CastConnection` with authentication, request
//!   correlation, the reader loop, keepalive and virtual sessions
//! - **Events**: `EventDispatcher` listener registries
//! - **Facade**: `CastDevice` named operations (launch, load, volume, ...)
//! - **Transport**: `Connector` seam with TLS (rustls) and plain TCP
//! - **Error**: `CastError`, a typed `thiserror` hierarchy

pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod device;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod keepalive;
pub mod message;
pub mod model;
pub mod namespace;
pub mod reader;
pub mod session;
pub mod transport;
pub mod writer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{CastCodec, MAX_FRAME_SIZE};
pub use config::{ConnectionConfig, TlsConfig};
pub use connection::CastConnection;
pub use correlator::{Correlator, PendingReply};
pub use device::CastDevice;
pub use dispatch::{
    ConnectionEvent, EventDispatcher, ListenerId, ListenerResult, RawEnvelope, SpontaneousEvent,
};
pub use envelope::{Envelope, Payload, PayloadType, ProtocolVersion};
pub use error::{CastError, ErrorKind};
pub use message::{Request, RequestBody, RequestId, Response, ResponseBody};
pub use model::{
    AppEvent, Application, Device, Media, MediaStatus, PlayerState, Status, StreamType,
    SupportedCommands, Volume,
};
pub use transport::{BoxedStream, Connector, TcpConnector, TlsConnector};
