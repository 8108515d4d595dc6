//! Entity type registry.
//!
//! Maps a type name to the factory that builds its directory record. The
//! built-in catalogue is registered at construction; programs add their
//! own types with [`TypeRegistry::register_custom`], and custom factories
//! always win over a built-in of the same name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use simlink_core::EntityId;

use super::directory::EntityRecord;
use crate::error::SessionError;

/// Builds the directory record for a newly discovered entity.
pub type EntityFactory = Arc<dyn Fn(&EntityId) -> Result<EntityRecord, SessionError> + Send + Sync>;

/// Types the simulation exposes out of the box.
const BUILTIN_TYPES: &[&str] = &[
    "AirSupplyDrop", "AirliftCrane", "AirstrikeControl", "AlarmClock", "AlarmSiren",
    "ArcadeMachine", "Artillery", "CardDeck", "CarvingRobot", "ColorCubePuzzle",
    "ConveyorBelt", "Crate", "DataExchange", "DeliveryContainer", "DialupPhone", "Dice",
    "DiceRoller", "DigitalScale", "Elevator", "ExpressiveTextLabel", "FactBox",
    "GPSWaypoint", "GeigerCounter", "HumanoidRobot", "InputBox", "LEDStrip", "LaserTracer",
    "LaunchPad", "LevelEditor", "Killzone", "MaterialDepthSensor", "Maze", "MessageSniffer",
    "Microphone", "MiniatureFigure", "MoonLander", "MotionDetector", "MovablePlatform",
    "ObjectSpawner", "PaintableCanvas", "Piano", "PinHacker", "PlayingCard", "PoolTable",
    "PostProcessVolume", "ProximitySensor", "PullerRobot", "PushButton", "PusherRobot",
    "Quadcopter", "RaceCar", "RadarTrap", "RailwayBarrier", "RailwayTrain", "RangeFinder",
    "RemoteExplosive", "RobotArm", "Rocket", "ServiceDrone", "SimEnvManager",
    "SimplePhysicsCar", "Slider", "SmartBlinds", "SmartCamera", "SmartDoor", "SmartLiDAR",
    "SmartLight", "SmartPictureFrame", "SmartPortal", "SmartRadar", "SmartSpeaker",
    "SmartTracker", "SmartWall", "SniperRifle", "SurveillanceSatellite", "Swapper",
    "Thermometer", "ToggleSwitch", "TrafficLight", "TriggerZone", "VacuumRobot",
    "VoxelBuilder",
];

/// Built-in types that specialise another built-in.
const DERIVED_TYPES: &[(&str, &str)] = &[
    ("LargeConveyorBelt", "ConveyorBelt"),
    ("TurnableConveyorBelt", "ConveyorBelt"),
    ("RailConveyorBelt", "ConveyorBelt"),
];

/// Names that exist only as bases and are never instantiated.
const ABSTRACT_TYPES: &[&str] = &["EntityBase", "EntityBaseStub"];

/// Longest parent chain followed before giving up on a cycle.
const MAX_DEPTH: usize = 16;

// ── TypeInfo ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: String,
    pub parent: Option<String>,
    pub is_abstract: bool,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            is_abstract: false,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

// ── TypeRegistry ─────────────────────────────────────────────────

#[derive(Default)]
pub struct TypeRegistry {
    builtin: HashMap<String, TypeInfo>,
    custom: HashMap<String, (TypeInfo, EntityFactory)>,
}

impl TypeRegistry {
    /// A registry with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry populated with the built-in catalogue.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        for name in BUILTIN_TYPES {
            reg.register_builtin(TypeInfo::new(*name));
        }
        for (name, parent) in DERIVED_TYPES {
            reg.register_builtin(TypeInfo::new(*name).with_parent(*parent));
        }
        for name in ABSTRACT_TYPES {
            reg.register_builtin(TypeInfo::new(*name).abstract_type());
        }
        reg
    }

    pub fn register_builtin(&mut self, info: TypeInfo) {
        self.builtin.insert(info.name.clone(), info);
    }

    /// Register a program-defined type. Registering the same name twice is
    /// a programming error.
    pub fn register_custom(&mut self, info: TypeInfo, factory: EntityFactory) -> Result<(), SessionError> {
        if self.custom.contains_key(&info.name) {
            return Err(SessionError::DuplicateType(info.name));
        }
        self.custom.insert(info.name.clone(), (info, factory));
        Ok(())
    }

    /// Build the record for `id`: custom factory first, then built-in.
    pub fn construct(&self, id: &EntityId) -> Result<EntityRecord, SessionError> {
        if let Some((info, factory)) = self.custom.get(&id.type_name) {
            if info.is_abstract {
                return Err(SessionError::AbstractType(id.type_name.clone()));
            }
            return factory(id);
        }
        match self.builtin.get(&id.type_name) {
            Some(info) if info.is_abstract => Err(SessionError::AbstractType(id.type_name.clone())),
            Some(_) => Ok(EntityRecord::new(id.clone())),
            None => Err(SessionError::UnknownType(id.type_name.clone())),
        }
    }

    pub fn info(&self, type_name: &str) -> Option<&TypeInfo> {
        self.custom
            .get(type_name)
            .map(|(info, _)| info)
            .or_else(|| self.builtin.get(type_name))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.info(type_name).is_some()
    }

    /// Whether `type_name` is `ancestor` or derives from it.
    pub fn is_kind_of(&self, type_name: &str, ancestor: &str) -> bool {
        let mut current = Some(type_name);
        for _ in 0..MAX_DEPTH {
            match current {
                Some(name) if name == ancestor => return true,
                Some(name) => current = self.info(name).and_then(|i| i.parent.as_deref()),
                None => return false,
            }
        }
        false
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("builtin", &self.builtin.len())
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
