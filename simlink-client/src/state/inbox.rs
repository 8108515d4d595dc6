//! Inbound mailbox: latest value per property name.
//!
//! Frames are stored behind `Arc` and replaced whole, so a reader either
//! sees the previous value or the new one, never a mix.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use simlink_core::Frame;

use super::{read, write};

#[derive(Debug, Default)]
pub struct Inbox {
    values: RwLock<HashMap<String, Arc<Frame>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, replacing any previous value under its name.
    pub fn store(&self, frame: Frame) {
        write(&self.values).insert(frame.name().to_string(), Arc::new(frame));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Frame>> {
        read(&self.values).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        read(&self.values).contains_key(name)
    }

    pub fn len(&self) -> usize {
        read(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.values).is_empty()
    }

    pub fn clear(&self) {
        write(&self.values).clear();
    }
}
