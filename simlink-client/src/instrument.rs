//! Instrumentation hook.
//!
//! A debugger or profiler attached to the program can observe the session
//! at protocol level and freeze its timeouts while the process is paused.

use simlink_core::Frame;

/// Observer installed with [`Session::set_instrumentation`].
///
/// Every method has a no-op default. Callbacks run on the pump tasks or the
/// dispatching thread and must return quickly.
///
/// [`Session::set_instrumentation`]: crate::Session::set_instrumentation
pub trait Instrumentation: Send + Sync {
    /// While `true`, the watchdog never fires and no entity goes stale.
    fn holds_process(&self) -> bool {
        false
    }

    /// Called with each outbound batch just before it is written.
    fn on_flush(&self, _frames: &[Frame]) {}

    /// Called with each decoded inbound batch.
    fn on_batch(&self, _frames: &[Frame]) {}

    /// Called after a dispatch pass with the number of listeners run.
    fn on_dispatch(&self, _events: usize) {}
}

/// The hook used when none is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInstrumentation;

impl Instrumentation for NoInstrumentation {}
