//! # simlink-client
//!
//! Client runtime for a remote simulation speaking the simlink frame
//! protocol.
//!
//! This crate contains:
//! - **Session**: `Session`, one explicitly constructed connection with a
//!   blocking API for the program thread
//! - **Entities**: `Entity` handles with typed getters, setters and event
//!   listeners
//! - **State**: outbound/inbound mailboxes, the entity directory and the
//!   type registry
//! - **Transport**: send pump, receive pump and watchdog on tokio
//! - **Sync**: tick stamps, event dispatch and busy-poll protection
//! - **Telemetry**: periodic memory reports to the simulation
//! - **Config / logging**: `SessionConfig` (TOML) and a `tracing` subscriber
//! - **Error**: `SessionError`

pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod instrument;
pub mod logging;
pub(crate) mod network;
pub mod rate_limit;
pub mod session;
pub mod state;
pub(crate) mod telemetry;
pub mod tick;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::SessionConfig;
pub use entity::{Color, Entity, Image, Verbosity};
pub use error::SessionError;
pub use instrument::{Instrumentation, NoInstrumentation};
pub use session::{Session, SessionStats};
pub use state::{EntityFactory, EntityRecord, Listener, TypeInfo, WriteMode};

pub use simlink_core::{EntityId, Frame, Payload, Shape};
