//! Error types for the client session.
//!
//! Only usage faults reach callers as `Err`. Transport faults surface as a
//! `false` return or a dropped connection, protocol faults are absorbed by
//! the codec, and lookup faults degrade to default values.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    // ── Usage faults ─────────────────────────────────────────────
    /// An entity with this `Type.Instance` key already exists.
    #[error("entity {0} already exists; look it up instead")]
    DuplicateEntity(String),

    /// The type is abstract and cannot be instantiated.
    #[error("abstract type {0} cannot be instantiated")]
    AbstractType(String),

    /// No factory is registered for the type.
    #[error("unknown entity type {0}")]
    UnknownType(String),

    /// A custom factory was registered twice under the same type name.
    #[error("custom type {0} is already registered")]
    DuplicateType(String),

    /// A custom factory refused to build the entity.
    #[error("factory for {type_name} failed: {reason}")]
    Factory { type_name: String, reason: String },

    /// An image handed to the session does not describe its own pixels.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    // ── Transport ────────────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The session is not connected.
    #[error("not connected")]
    NotConnected,

    // ── Payloads & configuration ─────────────────────────────────
    /// Encoding or decoding of a frame failed.
    #[error("codec error: {0}")]
    Codec(#[from] simlink_core::CodecError),

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = SessionError::DuplicateEntity("SmartDoor.door1".into());
        assert!(e.to_string().contains("SmartDoor.door1"));

        let e = SessionError::AbstractType("EntityBase".into());
        assert!(e.to_string().contains("abstract"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e: SessionError = io_err.into();
        assert!(matches!(e, SessionError::Connection(_)));
    }
}
