//! Device authentication handshake.
//!
//! Right after the transport connects, the sender writes a single binary
//! envelope holding an empty `AuthChallenge` and reads exactly one
//! `DeviceAuthMessage` back. The reply is only inspected for its error
//! indicator; the device certificate chain it carries is not verified.
//!
//! ```text
//! DeviceAuthMessage { 1: AuthChallenge, 2: AuthResponse, 3: AuthError }
//! AuthError         { 1: varint error_type }
//! ```

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::codec::CastCodec;
use crate::envelope::{
    Envelope, Payload, WIRE_LEN, WIRE_VARINT, get_len_delimited, get_varint, put_len_field,
    skip_field,
};
use crate::error::CastError;
use crate::namespace::{DEFAULT_RECEIVER_ID, NS_DEVICE_AUTH};

const FIELD_CHALLENGE: u32 = 1;
const FIELD_ERROR: u32 = 3;
const FIELD_ERROR_TYPE: u32 = 1;

/// Error indicator carried by a rejected authentication reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorType {
    InternalError,
    NoTls,
    SignatureAlgorithmUnavailable,
    Unknown(u64),
}

impl From<u64> for AuthErrorType {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::InternalError,
            1 => Self::NoTls,
            2 => Self::SignatureAlgorithmUnavailable,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for AuthErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InternalError => f.write_str("INTERNAL_ERROR"),
            Self::NoTls => f.write_str("NO_TLS"),
            Self::SignatureAlgorithmUnavailable => f.write_str("SIGNATURE_ALGORITHM_UNAVAILABLE"),
            Self::Unknown(v) => write!(f, "UNKNOWN({v})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    Error(AuthErrorType),
}

/// Payload of the challenge envelope: a `DeviceAuthMessage` whose only
/// field is an empty `AuthChallenge`.
pub fn challenge_payload() -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    put_len_field(&mut buf, FIELD_CHALLENGE, &[]);
    buf.freeze()
}

/// Decode a `DeviceAuthMessage` reply.
pub fn parse_auth_reply(mut src: &[u8]) -> Result<AuthOutcome, CastError> {
    let mut outcome = AuthOutcome::Ok;

    while !src.is_empty() {
        let key = get_varint(&mut src)?;
        let field = (key >> 3) as u32;
        let wire = (key & 0x7) as u8;

        if field == FIELD_ERROR && wire == WIRE_LEN {
            let error = get_len_delimited(&mut src)?;
            outcome = AuthOutcome::Error(parse_auth_error(error)?);
        } else {
            skip_field(&mut src, wire)?;
        }
    }

    Ok(outcome)
}

fn parse_auth_error(mut src: &[u8]) -> Result<AuthErrorType, CastError> {
    // An AuthError without error_type carries the protobuf default.
    let mut error_type = AuthErrorType::InternalError;
    while !src.is_empty() {
        let key = get_varint(&mut src)?;
        let field = (key >> 3) as u32;
        let wire = (key & 0x7) as u8;

        if field == FIELD_ERROR_TYPE && wire == WIRE_VARINT {
            error_type = AuthErrorType::from(get_varint(&mut src)?);
        } else {
            skip_field(&mut src, wire)?;
        }
    }
    Ok(error_type)
}

/// Run the challenge/reply exchange on a freshly connected stream.
///
/// `timeout` bounds the wait for the reply. A stream that ends before
/// the reply is a transport error; a reply carrying an error indicator
/// is [`CastError::Authentication`].
pub async fn authenticate<R, W>(
    reader: &mut FramedRead<R, CastCodec>,
    writer: &mut FramedWrite<W, CastCodec>,
    sender_id: &str,
    timeout: Duration,
) -> Result<(), CastError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let challenge = Envelope::binary(
        sender_id,
        DEFAULT_RECEIVER_ID,
        NS_DEVICE_AUTH,
        challenge_payload(),
    );
    writer.send(challenge).await?;
    debug!(sender_id, "auth challenge sent");

    let reply = match tokio::time::timeout(timeout, reader.next()).await {
        Ok(Some(reply)) => reply?,
        Ok(None) => return Err(CastError::ConnectionClosed),
        Err(_) => return Err(CastError::Timeout(timeout)),
    };

    let bytes = match &reply.payload {
        Payload::Binary(bytes) => bytes,
        Payload::Text(_) => {
            warn!(namespace = %reply.namespace, "text reply to auth challenge");
            return Err(CastError::Authentication("unexpected text reply".into()));
        }
    };

    match parse_auth_reply(bytes)? {
        AuthOutcome::Ok => {
            debug!("authenticated");
            Ok(())
        }
        AuthOutcome::Error(kind) => Err(CastError::Authentication(kind.to_string())),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::put_varint_field;

    fn error_reply(error_type: Option<u64>) -> Bytes {
        let mut error = BytesMut::new();
        if let Some(t) = error_type {
            put_varint_field(&mut error, FIELD_ERROR_TYPE, t);
        }
        let mut msg = BytesMut::new();
        put_len_field(&mut msg, FIELD_ERROR, &error);
        msg.freeze()
    }

    #[test]
    fn challenge_bytes() {
        assert_eq!(&challenge_payload()[..], &[0x0A, 0x00]);
    }

    #[test]
    fn response_without_error_is_ok() {
        // field 2 (AuthResponse) with some opaque content
        let reply = [0x12, 0x03, 0x0A, 0x01, 0xFF];
        assert_eq!(parse_auth_reply(&reply).unwrap(), AuthOutcome::Ok);
        assert_eq!(parse_auth_reply(&[]).unwrap(), AuthOutcome::Ok);
    }

    #[test]
    fn error_indicator_is_decoded() {
        assert_eq!(
            parse_auth_reply(&error_reply(Some(1))).unwrap(),
            AuthOutcome::Error(AuthErrorType::NoTls)
        );
        assert_eq!(
            parse_auth_reply(&error_reply(None)).unwrap(),
            AuthOutcome::Error(AuthErrorType::InternalError)
        );
        assert_eq!(
            parse_auth_reply(&error_reply(Some(9))).unwrap(),
            AuthOutcome::Error(AuthErrorType::Unknown(9))
        );
    }

    #[test]
    fn truncated_reply_is_malformed() {
        assert!(matches!(
            parse_auth_reply(&[0x1A, 0x05, 0x08]),
            Err(CastError::MalformedEnvelope(_))
        ));
    }

    async fn run_against(reply: Option<Envelope>) -> Result<(), CastError> {
        let (client, server) = tokio::io::duplex(4096);
        let (cr, cw) = tokio::io::split(client);
        let mut reader = FramedRead::new(cr, CastCodec::default());
        let mut writer = FramedWrite::new(cw, CastCodec::default());

        let peer = tokio::spawn(async move {
            let (sr, sw) = tokio::io::split(server);
            let mut sreader = FramedRead::new(sr, CastCodec::default());
            let mut swriter = FramedWrite::new(sw, CastCodec::default());
            let challenge = sreader.next().await.unwrap().unwrap();
            assert_eq!(challenge.namespace, NS_DEVICE_AUTH);
            assert_eq!(challenge.destination_id, DEFAULT_RECEIVER_ID);
            if let Some(reply) = reply {
                swriter.send(reply).await.unwrap();
            }
            // Dropping both halves closes the stream.
        });

        let result = authenticate(
            &mut reader,
            &mut writer,
            "sender-test",
            Duration::from_secs(2),
        )
        .await;
        peer.await.unwrap();
        result
    }

    #[tokio::test]
    async fn handshake_succeeds() {
        let reply = Envelope::binary(
            DEFAULT_RECEIVER_ID,
            "sender-test",
            NS_DEVICE_AUTH,
            Bytes::from_static(&[0x12, 0x00]),
        );
        run_against(Some(reply)).await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejected() {
        let reply = Envelope::binary(
            DEFAULT_RECEIVER_ID,
            "sender-test",
            NS_DEVICE_AUTH,
            error_reply(Some(2)),
        );
        let err = run_against(Some(reply)).await.unwrap_err();
        match err {
            CastError::Authentication(msg) => assert_eq!(msg, "SIGNATURE_ALGORITHM_UNAVAILABLE"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_hangs_up_before_reply() {
        let err = run_against(None).await.unwrap_err();
        assert!(matches!(err, CastError::ConnectionClosed));
    }
}
