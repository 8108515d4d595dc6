//! Error types for the simlink wire protocol.
//!
//! The streaming decoder never surfaces protocol faults to its caller;
//! these variants are returned by the one-shot [`decode`](crate::codec::decode)
//! and by payload accessors so tests and tools can see exactly what was wrong.

use thiserror::Error;

/// The canonical error type for frame encoding and decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    // ── Framing ──────────────────────────────────────────────────
    /// Bytes did not start with the frame magic.
    #[error("invalid magic bytes: expected Ihg\\x1c")]
    InvalidMagic,

    /// Fewer bytes were available than the header or payload requires.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Declared payload length disagrees with width·height·channels·size.
    #[error("payload length {declared} does not match shape {width}x{height}x{channels} ({expected} bytes)")]
    ShapeMismatch {
        declared: usize,
        expected: usize,
        width: u32,
        height: u32,
        channels: u32,
    },

    /// The element type tag was neither u8 (0) nor f32 (1).
    #[error("unknown element type tag: {0:#x}")]
    UnknownElementType(u8),

    /// The declared payload exceeds the codec limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Names ────────────────────────────────────────────────────
    /// A frame name did not have the `Type.Instance.Property` form.
    #[error("malformed frame name: {0:?}")]
    MalformedName(String),

    // ── Payload access ───────────────────────────────────────────
    /// JSON payload could not be parsed.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O failure while driving a framed stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = CodecError::Truncated {
            needed: 149,
            available: 12,
        };
        assert!(e.to_string().contains("149"));
        assert!(e.to_string().contains("12"));

        let e = CodecError::UnknownElementType(7);
        assert!(e.to_string().contains("0x7"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: CodecError = io_err.into();
        assert!(matches!(e, CodecError::Io(_)));
    }
}
