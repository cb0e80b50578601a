//! The envelope carried inside every frame.
//!
//! On the wire an envelope is the protobuf `CastMessage` structure:
//!
//! ```text
//! field 1  varint   protocol_version   (CASTV2_1_0 = 0)
//! field 2  bytes    source_id
//! field 3  bytes    destination_id
//! field 4  bytes    namespace
//! field 5  varint   payload_type       (STRING = 0, BINARY = 1)
//! field 6  bytes    payload_utf8       (when STRING)
//! field 7  bytes    payload_binary     (when BINARY)
//! ```
//!
//! Fields 1–5 are always written. Unknown fields are skipped on decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CastError;

pub(crate) const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
pub(crate) const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const FIELD_PROTOCOL_VERSION: u32 = 1;
const FIELD_SOURCE_ID: u32 = 2;
const FIELD_DESTINATION_ID: u32 = 3;
const FIELD_NAMESPACE: u32 = 4;
const FIELD_PAYLOAD_TYPE: u32 = 5;
const FIELD_PAYLOAD_UTF8: u32 = 6;
const FIELD_PAYLOAD_BINARY: u32 = 7;

// ── ProtocolVersion ──────────────────────────────────────────────

/// Envelope protocol version. Only `CASTV2_1_0` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    #[default]
    Castv2_1_0,
}

impl TryFrom<u64> for ProtocolVersion {
    type Error = CastError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolVersion::Castv2_1_0),
            _ => Err(CastError::MalformedEnvelope("unknown protocol version")),
        }
    }
}

// ── PayloadType / Payload ────────────────────────────────────────

/// Discriminates text (JSON) payloads from binary ones.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    String = 0,
    Binary = 1,
}

impl TryFrom<u64> for PayloadType {
    type Error = CastError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PayloadType::String),
            1 => Ok(PayloadType::Binary),
            _ => Err(CastError::MalformedEnvelope("unknown payload type")),
        }
    }
}

/// Envelope body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Text(_) => PayloadType::String,
            Payload::Binary(_) => PayloadType::Binary,
        }
    }

    /// The text payload, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────

/// One protocol message with routing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub protocol_version: ProtocolVersion,
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload: Payload,
}

impl Envelope {
    /// Build a text envelope.
    pub fn text(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version: ProtocolVersion::default(),
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
            payload: Payload::Text(payload.into()),
        }
    }

    /// Build a binary envelope.
    pub fn binary(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            protocol_version: ProtocolVersion::default(),
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
            payload: Payload::Binary(payload.into()),
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    /// Number of bytes [`write_to`](Self::write_to) will produce.
    pub fn encoded_len(&self) -> usize {
        let payload_len = match &self.payload {
            Payload::Text(s) => len_field_size(FIELD_PAYLOAD_UTF8, s.len()),
            Payload::Binary(b) => len_field_size(FIELD_PAYLOAD_BINARY, b.len()),
        };
        varint_field_size(FIELD_PROTOCOL_VERSION, self.protocol_version as u64)
            + len_field_size(FIELD_SOURCE_ID, self.source_id.len())
            + len_field_size(FIELD_DESTINATION_ID, self.destination_id.len())
            + len_field_size(FIELD_NAMESPACE, self.namespace.len())
            + varint_field_size(FIELD_PAYLOAD_TYPE, self.payload_type() as u64)
            + payload_len
    }

    /// Serialize the envelope structure (without the length prefix).
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        put_varint_field(dst, FIELD_PROTOCOL_VERSION, self.protocol_version as u64);
        put_len_field(dst, FIELD_SOURCE_ID, self.source_id.as_bytes());
        put_len_field(dst, FIELD_DESTINATION_ID, self.destination_id.as_bytes());
        put_len_field(dst, FIELD_NAMESPACE, self.namespace.as_bytes());
        put_varint_field(dst, FIELD_PAYLOAD_TYPE, self.payload_type() as u64);
        match &self.payload {
            Payload::Text(s) => put_len_field(dst, FIELD_PAYLOAD_UTF8, s.as_bytes()),
            Payload::Binary(b) => put_len_field(dst, FIELD_PAYLOAD_BINARY, b),
        }
    }

    /// Parse an envelope structure (without the length prefix).
    pub fn parse(mut src: &[u8]) -> Result<Self, CastError> {
        let mut protocol_version = ProtocolVersion::default();
        let mut source_id = None;
        let mut destination_id = None;
        let mut namespace = None;
        let mut payload_type = None;
        let mut payload_utf8 = None;
        let mut payload_binary = None;

        while src.has_remaining() {
            let key = get_varint(&mut src)?;
            let field = (key >> 3) as u32;
            let wire = (key & 0x7) as u8;

            match (field, wire) {
                (FIELD_PROTOCOL_VERSION, WIRE_VARINT) => {
                    protocol_version = ProtocolVersion::try_from(get_varint(&mut src)?)?;
                }
                (FIELD_SOURCE_ID, WIRE_LEN) => source_id = Some(get_string(&mut src)?),
                (FIELD_DESTINATION_ID, WIRE_LEN) => destination_id = Some(get_string(&mut src)?),
                (FIELD_NAMESPACE, WIRE_LEN) => namespace = Some(get_string(&mut src)?),
                (FIELD_PAYLOAD_TYPE, WIRE_VARINT) => {
                    payload_type = Some(PayloadType::try_from(get_varint(&mut src)?)?);
                }
                (FIELD_PAYLOAD_UTF8, WIRE_LEN) => payload_utf8 = Some(get_string(&mut src)?),
                (FIELD_PAYLOAD_BINARY, WIRE_LEN) => {
                    payload_binary = Some(Bytes::copy_from_slice(get_len_delimited(&mut src)?));
                }
                (_, wire) => skip_field(&mut src, wire)?,
            }
        }

        let payload = match payload_type {
            Some(PayloadType::String) => Payload::Text(payload_utf8.unwrap_or_default()),
            Some(PayloadType::Binary) => Payload::Binary(payload_binary.unwrap_or_default()),
            None => return Err(CastError::MalformedEnvelope("missing payload_type")),
        };

        Ok(Self {
            protocol_version,
            source_id: source_id.ok_or(CastError::MalformedEnvelope("missing source_id"))?,
            destination_id: destination_id
                .ok_or(CastError::MalformedEnvelope("missing destination_id"))?,
            namespace: namespace.ok_or(CastError::MalformedEnvelope("missing namespace"))?,
            payload,
        })
    }
}

// ── Protobuf primitives ──────────────────────────────────────────
//
// Shared with `auth`, which speaks the same encoding for its
// `DeviceAuthMessage`.

pub(crate) fn varint_size(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

fn varint_field_size(field: u32, value: u64) -> usize {
    varint_size(u64::from(field) << 3) + varint_size(value)
}

fn len_field_size(field: u32, len: usize) -> usize {
    varint_size(u64::from(field) << 3) + varint_size(len as u64) + len
}

pub(crate) fn put_varint(dst: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

pub(crate) fn put_varint_field(dst: &mut BytesMut, field: u32, value: u64) {
    put_varint(dst, (u64::from(field) << 3) | u64::from(WIRE_VARINT));
    put_varint(dst, value);
}

pub(crate) fn put_len_field(dst: &mut BytesMut, field: u32, data: &[u8]) {
    put_varint(dst, (u64::from(field) << 3) | u64::from(WIRE_LEN));
    put_varint(dst, data.len() as u64);
    dst.put_slice(data);
}

pub(crate) fn get_varint(src: &mut &[u8]) -> Result<u64, CastError> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !src.has_remaining() {
            return Err(CastError::MalformedEnvelope("truncated varint"));
        }
        let byte = src.get_u8();
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CastError::MalformedEnvelope("varint overflow"))
}

pub(crate) fn get_len_delimited<'a>(src: &mut &'a [u8]) -> Result<&'a [u8], CastError> {
    let len = get_varint(src)? as usize;
    if src.len() < len {
        return Err(CastError::MalformedEnvelope("truncated length-delimited field"));
    }
    let (head, tail) = src.split_at(len);
    *src = tail;
    Ok(head)
}

fn get_string(src: &mut &[u8]) -> Result<String, CastError> {
    let raw = get_len_delimited(src)?;
    Ok(String::from_utf8(raw.to_vec())?)
}

pub(crate) fn skip_field(src: &mut &[u8], wire: u8) -> Result<(), CastError> {
    let skip = match wire {
        WIRE_VARINT => {
            get_varint(src)?;
            return Ok(());
        }
        WIRE_LEN => {
            get_len_delimited(src)?;
            return Ok(());
        }
        WIRE_FIXED64 => 8,
        WIRE_FIXED32 => 4,
        _ => return Err(CastError::MalformedEnvelope("unsupported wire type")),
    };
    if src.len() < skip {
        return Err(CastError::MalformedEnvelope("truncated fixed-width field"));
    }
    src.advance(skip);
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
