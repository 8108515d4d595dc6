//! Frame codec.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec` and tolerates everything a
//! long-lived stream throws at it: several frames in one read, a frame split
//! across reads, and garbage between frames. Protocol faults are recovered
//! locally: the decoder resynchronises on the next magic marker and never
//! returns an error for malformed input.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::CodecError;
use crate::frame::{Frame, Payload, Shape};
use crate::header::{FrameHeader, HEADER_LEN, MAGIC};

/// Upper bound on a single payload. Larger declared lengths are treated as
/// a false magic match.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match find_magic(src) {
                Some(0) => {}
                Some(at) => {
                    debug!(skipped = at, "discarding bytes before frame magic");
                    src.advance(at);
                }
                None => {
                    // A marker may be split across reads; keep its possible prefix.
                    let keep = src.len().min(MAGIC.len() - 1);
                    let discard = src.len() - keep;
                    if discard > 0 {
                        debug!(skipped = discard, "no frame magic in buffer");
                        src.advance(discard);
                    }
                    return Ok(None);
                }
            }

            if src.len() < HEADER_LEN {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }

            let header = match FrameHeader::from_bytes(&src[..HEADER_LEN]) {
                Ok(h) => h,
                Err(e) => {
                    debug!(error = %e, "unreadable header; resynchronising");
                    src.advance(1);
                    continue;
                }
            };

            let len = header.payload_len as usize;
            if len > MAX_PAYLOAD_SIZE {
                debug!(len, "declared payload exceeds limit; resynchronising");
                src.advance(1);
                continue;
            }

            let total = HEADER_LEN + len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let mut raw = src.split_to(total);
            raw.advance(HEADER_LEN);

            if len == 0 {
                return Ok(Some(void_placeholder(header)));
            }
            let expected = header.expected_len();
            if expected != Some(len) {
                debug!(
                    name = %header.name,
                    declared = len,
                    expected = ?expected,
                    "dropping frame with inconsistent shape"
                );
                continue;
            }

            let payload = Payload::from_le_bytes(header.element_type, &raw);
            return Ok(Some(Frame::from_parts(header.name, header.shape, payload)));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !buf.is_empty() {
                    debug!(remaining = buf.len(), "discarding incomplete frame at end of stream");
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl tokio_util::codec::Encoder<&Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = item.payload().byte_len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = FrameHeader {
            payload_len: payload_len as u32,
            shape: item.shape(),
            element_type: item.element_type(),
            name: item.name().to_string(),
        };

        dst.reserve(HEADER_LEN + payload_len);
        dst.put_slice(&header.to_bytes());
        match item.payload() {
            Payload::U8(v) => dst.put_slice(v),
            Payload::F32(v) => {
                for x in v {
                    dst.put_f32_le(*x);
                }
            }
        }
        Ok(())
    }
}

impl tokio_util::codec::Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tokio_util::codec::Encoder::<&Frame>::encode(self, &item, dst)
    }
}

/// Encode a single frame into its wire representation.
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    tokio_util::codec::Encoder::<&Frame>::encode(&mut FrameCodec, frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a batch of frames back to back.
pub fn encode_all<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    let mut codec = FrameCodec;
    for frame in frames {
        tokio_util::codec::Encoder::<&Frame>::encode(&mut codec, frame, &mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decode exactly one frame from the start of `bytes`.
///
/// Unlike the streaming decoder this reports what is wrong with the input.
/// Bytes after the first frame are ignored.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    let header = FrameHeader::from_bytes(bytes)?;
    let len = header.payload_len as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let available = bytes.len() - HEADER_LEN;
    if available < len {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN + len,
            available: bytes.len(),
        });
    }
    if len == 0 {
        return Ok(void_placeholder(header));
    }
    let expected = header.expected_len();
    if expected != Some(len) {
        return Err(CodecError::ShapeMismatch {
            declared: len,
            expected: expected.unwrap_or(usize::MAX),
            width: header.shape.width,
            height: header.shape.height,
            channels: header.shape.channels,
        });
    }
    let payload = Payload::from_le_bytes(header.element_type, &bytes[HEADER_LEN..HEADER_LEN + len]);
    Ok(Frame::from_parts(header.name, header.shape, payload))
}

fn void_placeholder(header: FrameHeader) -> Frame {
    Frame::from_parts(
        header.name,
        Shape::SCALAR,
        Payload::zeroed(header.element_type, 1),
    )
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC.len()).position(|w| w == MAGIC)
}

// ── Tests ────────────────────────────────────────────────────────
