//! # simlink-core
//!
//! Wire-level types for the simlink simulation protocol.
//!
//! This crate contains:
//! - **Frames**: `Frame`, `Shape`, `ElementType`, `Payload`
//! - **Header**: the fixed 149-byte frame header
//! - **Codec**: `FrameCodec` for streaming decode via `tokio_util`, plus
//!   one-shot `encode` / `decode`
//! - **Names**: `FrameName` and `EntityId` for `Type.Instance.Property`
//! - **Events**: `BaseEventData`, the common event payload
//! - **Error**: `CodecError`

pub mod codec;
pub mod error;
pub mod event;
pub mod frame;
pub mod header;
pub mod name;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{FrameCodec, MAX_PAYLOAD_SIZE, decode, encode, encode_all};
pub use error::CodecError;
pub use event::BaseEventData;
pub use frame::{ElementType, Frame, Payload, Shape};
pub use header::{FrameHeader, HEADER_LEN, MAGIC, NAME_LEN};
pub use name::{EVENT_PREFIX, EntityId, FrameName};
