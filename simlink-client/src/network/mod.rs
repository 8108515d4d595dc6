//! TCP transport: connection setup, the send and receive pumps, and the
//! watchdog that drops a silent simulation.

pub mod connection;

pub use connection::{Link, flush, open, start};
