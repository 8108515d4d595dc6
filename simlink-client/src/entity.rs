//! Entity handle.
//!
//! An [`Entity`] is a cheap, clonable reference to one remote object. Every
//! accessor is a primitive over the session mailboxes: getters read the
//! newest inbound value, setters queue an outbound frame.

use std::fmt;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::Serialize;
use simlink_core::{EntityId, Frame, Payload};
use tracing::warn;

use crate::error::SessionError;
use crate::session::Core;
use crate::state::{Listener, WriteMode};

// ── Colour & verbosity ───────────────────────────────────────────

/// RGB colour in `0.0..=1.0`, sent as a JSON triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Color(pub [f32; 3]);

impl Color {
    pub const WHITE: Color = Color([1.0, 1.0, 1.0]);
    pub const BLACK: Color = Color([0.0, 0.0, 0.0]);
    pub const RED: Color = Color([1.0, 0.0, 0.0]);
    pub const GREEN: Color = Color([0.0, 1.0, 0.0]);
    pub const BLUE: Color = Color([0.0, 0.0, 1.0]);
    pub const YELLOW: Color = Color([1.0, 1.0, 0.0]);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// How important a remote log line is. The simulation hides lines above
/// its configured verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Verbosity {
    Critical = 0,
    #[default]
    Important = 1,
    Info = 2,
    Debug = 3,
}

// ── Image ────────────────────────────────────────────────────────

/// An 8-bit image, pixels interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

impl Image {
    /// Edge length of the placeholder returned for a missing image.
    pub const BLANK_SIZE: u32 = 64;

    pub fn blank(channels: u32) -> Self {
        let channels = clamp_channels(channels);
        let n = (Self::BLANK_SIZE * Self::BLANK_SIZE * channels) as usize;
        Self {
            width: Self::BLANK_SIZE,
            height: Self::BLANK_SIZE,
            channels,
            data: vec![0; n],
        }
    }

    /// Convert to RGBA and scale to `size`×`size` with nearest-neighbour
    /// sampling. Gray gains an opaque alpha, gray+alpha keeps its alpha.
    pub fn to_square_rgba(&self, size: u32) -> Result<RgbaImage, SessionError> {
        let pixels = (self.width as usize)
            .checked_mul(self.height as usize)
            .filter(|&n| n > 0)
            .ok_or_else(|| SessionError::InvalidImage(format!("empty {}x{} image", self.width, self.height)))?;
        let channels = self.channels as usize;
        if !(1..=4).contains(&channels) || self.data.len() < pixels.saturating_mul(channels) {
            return Err(SessionError::InvalidImage(format!(
                "{} bytes do not fill {}x{}x{}",
                self.data.len(),
                self.width,
                self.height,
                self.channels
            )));
        }

        let rgba: Vec<u8> = self
            .data
            .chunks_exact(channels)
            .take(pixels)
            .flat_map(|px| match *px {
                [g] => [g, g, g, 255],
                [g, a] => [g, g, g, a],
                [r, g, b] => [r, g, b, 255],
                [r, g, b, a] => [r, g, b, a],
                _ => [0, 0, 0, 255],
            })
            .collect();
        let source = RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| SessionError::InvalidImage("pixel buffer too small".into()))?;
        if source.dimensions() == (size, size) {
            return Ok(source);
        }
        Ok(imageops::resize(&source, size, size, FilterType::Nearest))
    }

    /// Pick `channels` channels out of `frame`: three are reordered from
    /// BGR to RGB, two or one keep the leading channels.
    pub fn from_frame(frame: &Frame, channels: u32) -> Option<Self> {
        let channels = clamp_channels(channels);
        let shape = frame.shape();
        if shape.channels < channels || shape.element_count().unwrap_or(0) == 0 {
            return None;
        }
        let src: Vec<u8> = match frame.payload() {
            Payload::U8(v) => v.clone(),
            Payload::F32(v) => v.iter().map(|x| *x as u8).collect(),
        };
        let order: &[usize] = match channels {
            3 => &[2, 1, 0],
            2 => &[0, 1],
            _ => &[0],
        };
        let data = src
            .chunks_exact(shape.channels as usize)
            .flat_map(|px| order.iter().map(move |&c| px[c]))
            .collect();
        Some(Self {
            width: shape.width,
            height: shape.height,
            channels,
            data,
        })
    }
}

fn clamp_channels(channels: u32) -> u32 {
    channels.clamp(1, 3)
}

// ── Entity ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Entity {
    id: EntityId,
    core: Arc<Core>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entity").field(&self.id.key()).finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Entity {
    pub(crate) fn new(id: EntityId, core: Arc<Core>) -> Self {
        Self { id, core }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.id.type_name
    }

    pub fn instance(&self) -> &str {
        &self.id.instance
    }

    /// Still present in the simulation and recently synced.
    pub fn is_valid(&self) -> bool {
        self.core.is_valid(&self.id.key())
    }

    fn fetch(&self, property: &str) -> Option<Arc<Frame>> {
        let name = self.id.property(property);
        let frame = self.core.read(&name);
        if frame.is_none() {
            warn!(property = %name, "sensor unavailable");
        }
        frame
    }

    fn put(&self, property: &str, payload: impl Into<Payload>, mode: WriteMode) {
        self.core
            .write(Frame::vector(self.id.property(property), payload), mode);
    }

    // ── Getters ──────────────────────────────────────────────────

    pub fn get_float(&self, property: &str) -> f64 {
        self.fetch(property).map_or(0.0, |f| f.as_f64())
    }

    pub fn get_vector3(&self, property: &str) -> [f32; 3] {
        self.fetch(property).map_or([0.0; 3], |f| f.as_vector3())
    }

    pub fn get_bytes(&self, property: &str) -> Vec<u8> {
        self.fetch(property).map(|f| f.as_bytes()).unwrap_or_default()
    }

    /// An image with `channels` channels (1 to 3), or a 64×64 blank if the
    /// property is missing or has too few channels.
    pub fn get_image(&self, property: &str, channels: u32) -> Image {
        let Some(frame) = self.fetch(property) else {
            return Image::blank(channels);
        };
        Image::from_frame(&frame, channels).unwrap_or_else(|| {
            warn!(
                property = frame.name(),
                have = frame.shape().channels,
                want = channels,
                "image has too few channels"
            );
            Image::blank(channels)
        })
    }

    pub fn get_json(&self, property: &str) -> serde_json::Value {
        let Some(frame) = self.fetch(property) else {
            return serde_json::Value::Null;
        };
        frame.as_json().unwrap_or_else(|e| {
            warn!(property = frame.name(), "invalid JSON: {e}");
            serde_json::Value::Null
        })
    }

    pub fn get_bool(&self, property: &str) -> bool {
        self.fetch(property).is_some_and(|f| f.as_bool())
    }

    /// Payload bytes as a signed little-endian integer.
    pub fn get_int(&self, property: &str) -> i64 {
        self.fetch(property).map_or(0, |f| f.as_i64())
    }

    pub fn get_u8(&self, property: &str) -> u8 {
        self.fetch(property).map_or(0, |f| f.as_f64() as u8)
    }

    pub fn get_string(&self, property: &str) -> String {
        self.fetch(property).map(|f| f.as_text()).unwrap_or_default()
    }

    // ── Setters ──────────────────────────────────────────────────

    pub fn set_float(&self, property: &str, value: f32, mode: WriteMode) {
        self.put(property, vec![value], mode);
    }

    pub fn set_vector3(&self, property: &str, value: [f32; 3], mode: WriteMode) {
        self.put(property, value.to_vec(), mode);
    }

    pub fn set_bytes(&self, property: &str, value: &[u8], mode: WriteMode) {
        self.put(property, value, mode);
    }

    pub fn set_json<T: Serialize>(&self, property: &str, value: &T, mode: WriteMode) -> Result<(), SessionError> {
        let frame = Frame::json(self.id.property(property), value)?;
        self.core.write(frame, mode);
        Ok(())
    }

    /// Send a command with no payload.
    pub fn fire(&self, property: &str, mode: WriteMode) {
        self.core.write(Frame::void(self.id.property(property)), mode);
    }

    pub fn set_bool(&self, property: &str, value: bool, mode: WriteMode) {
        self.put(property, vec![u8::from(value)], mode);
    }

    /// Sent as four little-endian bytes.
    pub fn set_int(&self, property: &str, value: i32, mode: WriteMode) {
        self.put(property, value.to_le_bytes().to_vec(), mode);
    }

    pub fn set_u8(&self, property: &str, value: u8, mode: WriteMode) {
        self.put(property, vec![value], mode);
    }

    pub fn set_string(&self, property: &str, value: &str, mode: WriteMode) {
        self.put(property, value.as_bytes(), mode);
    }

    // ── Events ───────────────────────────────────────────────────

    /// Call `listener` for every `event` (e.g. `_eventOnPress`) this entity
    /// raises. Returns `false` if the entity is no longer known.
    pub fn on_event<F>(&self, event: &str, listener: F) -> bool
    where
        F: Fn(&Entity, f64, &Frame) + Send + Sync + 'static,
    {
        self.bind(event, Arc::new(listener), false)
    }

    /// Like [`on_event`](Self::on_event), but replaces any listeners
    /// already bound to `event`.
    pub fn on_event_singleton<F>(&self, event: &str, listener: F) -> bool
    where
        F: Fn(&Entity, f64, &Frame) + Send + Sync + 'static,
    {
        self.bind(event, Arc::new(listener), true)
    }

    pub fn clear_event(&self, event: &str) {
        self.core
            .directory
            .clear_listeners(&self.id.key(), &self.id.property(event));
    }

    fn bind(&self, event: &str, listener: Listener, replace: bool) -> bool {
        let bound = self
            .core
            .directory
            .add_listener(&self.id.key(), &self.id.property(event), listener, replace);
        if !bound {
            warn!(entity = %self.id, event, "cannot listen on an entity that is gone");
        }
        bound
    }

    // ── Misc ─────────────────────────────────────────────────────

    /// Show `msg` in the simulation's log, attributed to this entity.
    pub fn log_debug(&self, msg: &str, color: Color) {
        let record = serde_json::json!({ "msg": msg, "col": color });
        match Frame::json(self.id.property("LogDebug"), &record) {
            Ok(frame) => self.core.write(frame, WriteMode::Append { cap: 0 }),
            Err(e) => warn!(entity = %self.id, "cannot encode log line: {e}"),
        }
    }

    /// Select and centre this entity in the simulation viewport.
    pub fn focus(&self) {
        self.fire("Focus", WriteMode::Replace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Session, SessionConfig};

    fn session() -> Session {
        Session::new(SessionConfig::default()).unwrap()
    }

    #[test]
    fn getters_read_inbox_and_default_when_missing() {
        let s = session();
        s.core().ingest(vec![
            Frame::scalar("RangeFinder.rf.Distance", 7.5),
            Frame::vector("RangeFinder.rf.Origin", vec![1.0f32, 2.0, 3.0]),
            Frame::vector("RangeFinder.rf.Label", b"front ".to_vec()),
            Frame::vector("RangeFinder.rf.Count", (-2i32).to_le_bytes().to_vec()),
            Frame::vector("RangeFinder.rf.Info", br#"{"a":1}"#.to_vec()),
        ]);
        let rf = s.find("RangeFinder", "rf").unwrap();

        assert_eq!(rf.get_float("Distance"), 7.5);
        assert_eq!(rf.get_vector3("Origin"), [1.0, 2.0, 3.0]);
        assert_eq!(rf.get_string("Label"), "front");
        assert_eq!(rf.get_int("Count"), -2);
        assert_eq!(rf.get_json("Info")["a"], 1);

        assert_eq!(rf.get_float("Missing"), 0.0);
        assert_eq!(rf.get_vector3("Missing"), [0.0; 3]);
        assert!(!rf.get_bool("Missing"));
        assert!(rf.get_json("Missing").is_null());
        assert_eq!(rf.get_image("Missing", 3), Image::blank(3));
    }

    #[test]
    fn image_channel_selection() {
        // 1×2 BGR image.
        let frame = Frame::image("SmartCamera.cam.Image", 1, 2, 3, vec![10, 20, 30, 40, 50, 60]).unwrap();

        let rgb = Image::from_frame(&frame, 3).unwrap();
        assert_eq!(rgb.data, vec![30, 20, 10, 60, 50, 40]);

        let two = Image::from_frame(&frame, 2).unwrap();
        assert_eq!(two.data, vec![10, 20, 40, 50]);

        let one = Image::from_frame(&frame, 1).unwrap();
        assert_eq!(one.data, vec![10, 40]);

        let gray = Frame::image("SmartCamera.cam.Depth", 1, 2, 1, vec![1, 2]).unwrap();
        assert!(Image::from_frame(&gray, 3).is_none());
    }

    #[test]
    fn square_rgba_scales_and_adds_alpha() {
        // 2×1 RGB: red, blue.
        let img = Image {
            width: 2,
            height: 1,
            channels: 3,
            data: vec![255, 0, 0, 0, 0, 255],
        };
        let out = img.to_square_rgba(4).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 3).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(3, 0).0, [0, 0, 255, 255]);

        let gray = Image {
            width: 1,
            height: 1,
            channels: 1,
            data: vec![7],
        };
        assert_eq!(gray.to_square_rgba(1).unwrap().get_pixel(0, 0).0, [7, 7, 7, 255]);
    }

    #[test]
    fn square_rgba_rejects_short_buffers() {
        let img = Image {
            width: 4,
            height: 4,
            channels: 3,
            data: vec![0; 10],
        };
        assert!(matches!(img.to_square_rgba(8), Err(SessionError::InvalidImage(_))));
        assert!(Image::blank(3).to_square_rgba(256).is_ok());
    }

    #[test]
    fn setters_queue_frames() {
        let s = session();
        let door = s.spawn("SmartDoor", "door1").unwrap();
        door.set_bool("SetOpen", true, WriteMode::Replace);
        door.set_int("SetLevel", 258, WriteMode::Replace);
        door.fire("Focus", WriteMode::Replace);
        door.set_json("Config", &serde_json::json!({ "speed": 2 }), WriteMode::Replace)
            .unwrap();

        let batch = s.core().outbox.take_batch();
        let names: Vec<&str> = batch.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec![
                "SmartDoor.door1.SetOpen",
                "SmartDoor.door1.SetLevel",
                "SmartDoor.door1.Focus",
                "SmartDoor.door1.Config"
            ]
        );
        assert_eq!(batch[0].payload(), &Payload::U8(vec![1]));
        assert_eq!(batch[1].payload(), &Payload::U8(vec![2, 1, 0, 0]));
        assert!(batch[2].is_void());
    }

    #[test]
    fn log_debug_appends_json() {
        let s = session();
        let door = s.spawn("SmartDoor", "door1").unwrap();
        door.log_debug("one", Color::YELLOW);
        door.log_debug("two", Color::default());

        let batch = s.core().outbox.take_batch();
        assert_eq!(batch.len(), 2);
        let first: serde_json::Value = batch[0].as_json().unwrap();
        assert_eq!(first["msg"], "one");
        assert_eq!(first["col"], serde_json::json!([1.0, 1.0, 0.0]));
    }
}
