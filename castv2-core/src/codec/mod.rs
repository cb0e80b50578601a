//! Length-prefixed framing for [`Envelope`]s.
//!
//! Every frame is a 4-byte big-endian length followed by exactly that
//! many bytes of envelope structure. `CastCodec` plugs into
//! `tokio_util::codec::{FramedRead, FramedWrite}`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::error::CastError;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest envelope body accepted or produced (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct CastCodec {}

impl Decoder for CastCodec {
    type Item = Envelope;
    type Error = CastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let size = u32::from_be_bytes(prefix) as usize;

        if size > MAX_FRAME_SIZE {
            return Err(CastError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        if src.len() < LENGTH_PREFIX_SIZE + size {
            src.reserve(LENGTH_PREFIX_SIZE + size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let body = src.split_to(size);
        Envelope::parse(&body).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(envelope) => Ok(Some(envelope)),
            None if buf.is_empty() => Ok(None),
            // The peer hung up in the middle of a frame.
            None => Err(CastError::ConnectionClosed),
        }
    }
}

impl Encoder<Envelope> for CastCodec {
    type Error = CastError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Envelope>>::encode(self, &item, dst)
    }
}

impl Encoder<&Envelope> for CastCodec {
    type Error = CastError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = item.encoded_len();
        if size > MAX_FRAME_SIZE {
            return Err(CastError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        dst.reserve(LENGTH_PREFIX_SIZE + size);
        dst.put_u32(size as u32);
        item.write_to(dst);
        Ok(())
    }
}

/// Encode one envelope into a standalone frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Bytes, CastError> {
    let mut buf = BytesMut::new();
    <CastCodec as Encoder<&Envelope>>::encode(&mut CastCodec::default(), envelope, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one complete frame.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope, CastError> {
    let mut buf = BytesMut::from(frame);
    match CastCodec::default().decode_eof(&mut buf)? {
        Some(envelope) if buf.is_empty() => Ok(envelope),
        Some(_) => Err(CastError::MalformedEnvelope("trailing bytes after frame")),
        None => Err(CastError::ConnectionClosed),
    }
}

// ── Tests ────────────────────────────────────────────────────────
