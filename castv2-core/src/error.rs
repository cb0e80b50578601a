//! Domain-specific error types for the Cast v2 protocol engine.
//!
//! All fallible operations return `Result<T, CastError>`.
//! Peer input never panics; every failure surfaces as a `CastError`.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the Cast v2 client.
#[derive(Debug, Error)]
pub enum CastError {
    // ── Frame Errors ─────────────────────────────────────────────
    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The binary envelope structure could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// A text payload was not valid UTF-8.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream, possibly in the middle of a frame.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The connection is closed and auto-reconnect is disabled.
    #[error("not connected")]
    NotConnected,

    /// `open()` was called on a connection that is already open.
    #[error("connection already open")]
    AlreadyOpen,

    /// `close()` was called on a connection that is already closed.
    #[error("connection already closed")]
    AlreadyClosed,

    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(String),

    // ── Authentication ───────────────────────────────────────────
    /// The device rejected the authentication challenge.
    #[error("authentication failed: {0}")]
    Authentication(String),

    // ── Request Errors ───────────────────────────────────────────
    /// A correlated request got no reply before its deadline.
    #[error("waiting for response timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the wait for a reply.
    #[error("interrupted while waiting for response")]
    Interrupted,

    /// The receiver answered `INVALID_REQUEST`.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The receiver answered `LOAD_FAILED`.
    #[error("unable to load media")]
    LoadFailed,

    /// The receiver answered `LAUNCH_ERROR`.
    #[error("application launch error: {reason}")]
    LaunchError { reason: String },

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a JSON payload failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A reply arrived but did not have the expected shape.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: String,
    },

    // ── Facade Errors ────────────────────────────────────────────
    /// The operation needs a running application and there is none.
    #[error("no application is running")]
    NoRunningApplication,

    /// The device is in a state that does not allow the operation.
    #[error("invalid device state: {0}")]
    InvalidState(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`CastError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket or stream failure; fatal to the connection.
    Transport,
    /// The device refused the authentication handshake.
    Authentication,
    /// No reply within the request deadline.
    Timeout,
    /// The caller cancelled the wait.
    Interrupted,
    /// The receiver reported an application-level failure.
    Application,
    /// Malformed or unexpected data.
    Decode,
    /// The API was used in the wrong state.
    Usage,
}

impl CastError {
    /// Map this error onto its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::ConnectionClosed | Self::NotConnected | Self::Tls(_) => {
                ErrorKind::Transport
            }
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::InvalidRequest { .. } | Self::LoadFailed | Self::LaunchError { .. } => {
                ErrorKind::Application
            }
            Self::FrameTooLarge { .. }
            | Self::MalformedEnvelope(_)
            | Self::InvalidUtf8(_)
            | Self::Json(_)
            | Self::UnexpectedResponse { .. } => ErrorKind::Decode,
            Self::AlreadyOpen
            | Self::AlreadyClosed
            | Self::NoRunningApplication
            | Self::InvalidState(_)
            | Self::Other(_) => ErrorKind::Usage,
        }
    }

    /// Returns `true` if the transport can no longer be used after this
    /// error was reported by a read.
    ///
    /// An oversized frame is fatal too: the stream position is lost.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::Tls(_) | Self::FrameTooLarge { .. }
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for CastError {
    fn from(s: String) -> Self {
        CastError::Other(s)
    }
}

impl From<&str> for CastError {
    fn from(s: &str) -> Self {
        CastError::Other(s.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for CastError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        CastError::ConnectionClosed
    }
}

impl From<rustls::Error> for CastError {
    fn from(e: rustls::Error) -> Self {
        CastError::Tls(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = CastError::FrameTooLarge {
            size: 70000,
            max: 65536,
        };
        assert!(e.to_string().contains("70000"));
        assert!(e.to_string().contains("65536"));

        let e = CastError::LaunchError {
            reason: "NOT_FOUND".into(),
        };
        assert!(e.to_string().contains("NOT_FOUND"));
    }

    #[test]
    fn from_string() {
        let e: CastError = "something broke".into();
        assert!(matches!(e, CastError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: CastError = io_err.into();
        assert!(matches!(e, CastError::Io(_)));
        assert_eq!(e.kind(), ErrorKind::Transport);
        assert!(e.is_fatal());
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            CastError::Timeout(Duration::from_millis(5)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(CastError::Interrupted.kind(), ErrorKind::Interrupted);
        assert_eq!(CastError::LoadFailed.kind(), ErrorKind::Application);
        assert_eq!(
            CastError::Authentication("NO_TLS".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(CastError::AlreadyClosed.kind(), ErrorKind::Usage);
    }

    #[test]
    fn decode_noise_is_not_fatal() {
        assert!(!CastError::MalformedEnvelope("truncated varint").is_fatal());
        assert!(!CastError::Timeout(Duration::ZERO).is_fatal());
    }
}
