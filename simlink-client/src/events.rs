//! Event queue.
//!
//! Event frames are matched to listeners as soon as they are decoded, but
//! listeners only run when the caller asks for a dispatch pass. Until then
//! the pairs wait here in arrival order.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use simlink_core::{EntityId, Frame};

use crate::entity::Entity;
use crate::state::{Listener, lock};

/// One listener bound to one received event.
#[derive(Clone)]
pub struct PendingEvent {
    pub entity: EntityId,
    pub frame: Arc<Frame>,
    pub listener: Listener,
}

impl std::fmt::Debug for PendingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEvent")
            .field("entity", &self.entity)
            .field("event", &self.frame.name())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    items: Mutex<VecDeque<PendingEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: PendingEvent) {
        lock(&self.items).push_back(event);
    }

    /// Take everything queued so far. Events arriving during the drain
    /// wait for the next pass.
    pub fn drain(&self) -> Vec<PendingEvent> {
        lock(&self.items).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.items).clear();
    }
}

/// Run one listener, containing any panic it raises. Returns `false` if
/// the listener panicked.
pub fn invoke(listener: &Listener, entity: &Entity, sim_time: f64, frame: &Frame) -> bool {
    match catch_unwind(AssertUnwindSafe(|| listener(entity, sim_time, frame))) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::error!(event = frame.name(), "event listener panicked: {reason}");
            false
        }
    }
}
