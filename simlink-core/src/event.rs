//! Common event payload.
//!
//! Most event frames carry a UTF-8 JSON record describing who triggered
//! the event and when. Listeners decode it with [`BaseEventData::from_frame`].

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseEventData {
    /// Simulation time in seconds when the event occurred.
    #[serde(rename = "time")]
    pub at_time: f64,
    /// Type of the entity that triggered the event.
    #[serde(rename = "entityType")]
    pub entity_type: String,
    /// Name of the entity that triggered the event.
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(rename = "rfidTag", default)]
    pub rfid_tag: String,
}

impl BaseEventData {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        frame.as_json()
    }
}
