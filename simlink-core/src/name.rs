//! Frame naming: `Type.Instance.Property`.
//!
//! Every frame is addressed by a three-part dotted name. Properties whose
//! name starts with [`EVENT_PREFIX`] are one-shot notifications rather than
//! persistent values.

use std::fmt;

use crate::error::CodecError;

/// Property prefix reserved for event frames.
pub const EVENT_PREFIX: &str = "_event";

// ── EntityId ─────────────────────────────────────────────────────

/// Identifies one remote entity: `Type.Instance`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub type_name: String,
    pub instance: String,
}

impl EntityId {
    pub fn new(type_name: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            instance: instance.into(),
        }
    }

    /// Directory key, `Type.Instance`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.type_name, self.instance)
    }

    /// Full frame name for one of this entity's properties.
    pub fn property(&self, property: &str) -> String {
        format!("{}.{}.{}", self.type_name, self.instance, property)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.instance)
    }
}

// ── FrameName ────────────────────────────────────────────────────

/// A borrowed, validated frame name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameName<'a> {
    pub type_name: &'a str,
    pub instance: &'a str,
    pub property: &'a str,
}

impl<'a> FrameName<'a> {
    /// Split `name` into exactly three non-empty parts.
    pub fn parse(name: &'a str) -> Result<Self, CodecError> {
        let mut parts = name.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(i), Some(p), None) if !t.is_empty() && !i.is_empty() && !p.is_empty() => {
                Ok(Self {
                    type_name: t,
                    instance: i,
                    property: p,
                })
            }
            _ => Err(CodecError::MalformedName(name.to_string())),
        }
    }

    pub fn is_event(&self) -> bool {
        self.property.starts_with(EVENT_PREFIX)
    }

    pub fn entity_key(&self) -> String {
        format!("{}.{}", self.type_name, self.instance)
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::new(self.type_name, self.instance)
    }
}

impl<'a> TryFrom<&'a str> for FrameName<'a> {
    type Error = CodecError;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for FrameName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.type_name, self.instance, self.property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_parts() {
        let n = FrameName::parse("ConveyorBelt.belt1.TargetSpeed").unwrap();
        assert_eq!(n.type_name, "ConveyorBelt");
        assert_eq!(n.instance, "belt1");
        assert_eq!(n.property, "TargetSpeed");
        assert!(!n.is_event());
        assert_eq!(n.entity_key(), "ConveyorBelt.belt1");
        assert_eq!(n.to_string(), "ConveyorBelt.belt1.TargetSpeed");
    }

    #[test]
    fn detects_events() {
        let n = FrameName::parse("DeliveryContainer.box._eventOnDelivered").unwrap();
        assert!(n.is_event());
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "A", "A.b", "A.b.c.d", "A..c", ".b.c"] {
            assert!(FrameName::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn entity_id_builds_names() {
        let id = EntityId::new("SmartDoor", "door1");
        assert_eq!(id.key(), "SmartDoor.door1");
        assert_eq!(id.property("Open"), "SmartDoor.door1.Open");
    }
}
