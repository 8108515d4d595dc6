//! Fixed frame header.
//!
//! ```text
//! magic:        [u8; 4]   "Ihg\x1c"
//! length:       u32       payload bytes
//! width:        u32
//! height:       u32
//! channels:     u32
//! element_type: u8        0 = u8, 1 = f32
//! name:         [u8; 128] ASCII, right-padded with spaces
//! ```
//!
//! All integers are little-endian.

use crate::error::CodecError;
use crate::frame::{ElementType, Shape};

/// Marker that opens every frame.
pub const MAGIC: [u8; 4] = *b"Ihg\x1c";

/// Width of the padded name field.
pub const NAME_LEN: usize = 128;

/// Bytes before the name: magic, length, width, height, channels, tag.
const PRE_NAME: usize = 4 + 4 + 4 + 4 + 4 + 1;

/// Total header size on the wire.
pub const HEADER_LEN: usize = PRE_NAME + NAME_LEN;

pub type FrameHeaderBytes = [u8; HEADER_LEN];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub shape: Shape,
    pub element_type: ElementType,
    pub name: String,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> FrameHeaderBytes {
        let mut out: FrameHeaderBytes = [b' '; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        out[8..12].copy_from_slice(&self.shape.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.shape.height.to_le_bytes());
        out[16..20].copy_from_slice(&self.shape.channels.to_le_bytes());
        out[20] = self.element_type as u8;
        for (slot, ch) in out[PRE_NAME..].iter_mut().zip(self.name.chars()) {
            *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
        }
        out
    }

    /// Parse a header. `bytes` must hold at least [`HEADER_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }
        if bytes[0..4] != MAGIC {
            return Err(CodecError::InvalidMagic);
        }
        let element_type = ElementType::try_from(bytes[20])?;
        let name = bytes[PRE_NAME..HEADER_LEN]
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect::<String>()
            .trim_matches(|c: char| c == ' ' || c == '\0')
            .to_string();

        Ok(Self {
            payload_len: read_u32(bytes, 4),
            shape: Shape::new(read_u32(bytes, 8), read_u32(bytes, 12), read_u32(bytes, 16)),
            element_type,
            name,
        })
    }

    /// Payload length implied by shape and element type. `None` when the
    /// shape overflows.
    pub fn expected_len(&self) -> Option<usize> {
        self.shape.element_count()?.checked_mul(self.element_type.size())
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

// ── Tests ────────────────────────────────────────────────────────
