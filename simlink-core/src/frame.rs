//! In-memory frame representation.
//!
//! A [`Frame`] is one named, typed, rectangular array value. Only two
//! element types exist on the wire; every other numeric input is coerced
//! to `f32` through the [`Payload`] `From` conversions.

use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::CodecError;

// ── ElementType ──────────────────────────────────────────────────

/// Element type tag carried in the frame header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 8-bit unsigned integer.
    U8 = 0,
    /// 32-bit IEEE float, little-endian.
    F32 = 1,
}

impl ElementType {
    /// Bytes occupied by one element.
    pub const fn size(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::F32 => 4,
        }
    }
}

impl TryFrom<u8> for ElementType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ElementType::U8),
            1 => Ok(ElementType::F32),
            other => Err(CodecError::UnknownElementType(other)),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::U8 => write!(f, "u8"),
            ElementType::F32 => write!(f, "f32"),
        }
    }
}

// ── Shape ────────────────────────────────────────────────────────

/// Rectangular extent of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl Shape {
    /// Single element.
    pub const SCALAR: Shape = Shape::new(1, 1, 1);

    /// Shape written for a zero-length ("void") payload.
    pub const VOID: Shape = Shape::new(0, 1, 1);

    pub const fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// A flat run of `len` elements.
    pub const fn vector(len: u32) -> Self {
        Self::new(len, 1, 1)
    }

    /// Number of elements described by this shape, or `None` if it
    /// does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

// ── Payload ──────────────────────────────────────────────────────

/// Typed element storage for a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl Payload {
    /// A zero-valued payload of `count` elements.
    pub fn zeroed(element_type: ElementType, count: usize) -> Self {
        match element_type {
            ElementType::U8 => Payload::U8(vec![0; count]),
            ElementType::F32 => Payload::F32(vec![0.0; count]),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Payload::U8(_) => ElementType::U8,
            Payload::F32(_) => ElementType::F32,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Payload::U8(v) => v.len(),
            Payload::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the raw little-endian representation.
    pub fn byte_len(&self) -> usize {
        self.len() * self.element_type().size()
    }

    /// Raw little-endian bytes, as carried on the wire.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Payload::U8(v) => v.clone(),
            Payload::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    /// Rebuild a payload from raw little-endian bytes.
    ///
    /// Trailing bytes that do not form a whole `f32` are ignored.
    pub fn from_le_bytes(element_type: ElementType, bytes: &[u8]) -> Self {
        match element_type {
            ElementType::U8 => Payload::U8(bytes.to_vec()),
            ElementType::F32 => Payload::F32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
        }
    }

    /// Element `index` widened to `f64`.
    pub fn value_at(&self, index: usize) -> Option<f64> {
        match self {
            Payload::U8(v) => v.get(index).map(|&x| f64::from(x)),
            Payload::F32(v) => v.get(index).map(|&x| f64::from(x)),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::U8(v)
    }
}

impl From<&[u8]> for Payload {
    fn from(v: &[u8]) -> Self {
        Payload::U8(v.to_vec())
    }
}

impl From<Vec<f32>> for Payload {
    fn from(v: Vec<f32>) -> Self {
        Payload::F32(v)
    }
}

impl From<&[f32]> for Payload {
    fn from(v: &[f32]) -> Self {
        Payload::F32(v.to_vec())
    }
}

// Everything else is coerced to f32.

impl From<Vec<f64>> for Payload {
    fn from(v: Vec<f64>) -> Self {
        Payload::F32(v.into_iter().map(|x| x as f32).collect())
    }
}

impl From<&[f64]> for Payload {
    fn from(v: &[f64]) -> Self {
        Payload::F32(v.iter().map(|&x| x as f32).collect())
    }
}

impl From<Vec<i32>> for Payload {
    fn from(v: Vec<i32>) -> Self {
        Payload::F32(v.into_iter().map(|x| x as f32).collect())
    }
}

impl From<Vec<i64>> for Payload {
    fn from(v: Vec<i64>) -> Self {
        Payload::F32(v.into_iter().map(|x| x as f32).collect())
    }
}

impl From<Vec<u32>> for Payload {
    fn from(v: Vec<u32>) -> Self {
        Payload::F32(v.into_iter().map(|x| x as f32).collect())
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One named, typed, rectangular array value.
#[derive(Clone, PartialEq)]
pub struct Frame {
    name: String,
    shape: Shape,
    payload: Payload,
}

impl Frame {
    /// Build a frame, checking that `payload` fills `shape` exactly.
    pub fn new(name: impl Into<String>, shape: Shape, payload: Payload) -> Result<Self, CodecError> {
        let count = shape.element_count();
        if count != Some(payload.len()) {
            return Err(CodecError::ShapeMismatch {
                declared: payload.byte_len(),
                expected: count
                    .and_then(|n| n.checked_mul(payload.element_type().size()))
                    .unwrap_or(usize::MAX),
                width: shape.width,
                height: shape.height,
                channels: shape.channels,
            });
        }
        Ok(Self {
            name: name.into(),
            shape,
            payload,
        })
    }

    /// A flat payload; the shape is derived from its length.
    pub fn vector(name: impl Into<String>, payload: impl Into<Payload>) -> Self {
        let payload = payload.into();
        Self {
            name: name.into(),
            shape: Shape::vector(payload.len() as u32),
            payload,
        }
    }

    /// A single `f32` value.
    pub fn scalar(name: impl Into<String>, value: f32) -> Self {
        Self::vector(name, vec![value])
    }

    /// A zero-length command frame.
    pub fn void(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: Shape::VOID,
            payload: Payload::F32(Vec::new()),
        }
    }

    /// An 8-bit image laid out as `width × height × channels`.
    pub fn image(
        name: impl Into<String>,
        width: u32,
        height: u32,
        channels: u32,
        data: Vec<u8>,
    ) -> Result<Self, CodecError> {
        Self::new(name, Shape::new(width, height, channels), Payload::U8(data))
    }

    /// A UTF-8 JSON document carried as bytes.
    pub fn json<T: serde::Serialize>(name: impl Into<String>, value: &T) -> Result<Self, CodecError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::vector(name, bytes))
    }

    pub(crate) fn from_parts(name: String, shape: Shape, payload: Payload) -> Self {
        Self {
            name,
            shape,
            payload,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn element_type(&self) -> ElementType {
        self.payload.element_type()
    }

    /// Whether this frame carries no elements.
    pub fn is_void(&self) -> bool {
        self.payload.is_empty()
    }

    /// First element widened to `f64`, or `0.0` when empty.
    pub fn as_f64(&self) -> f64 {
        self.payload.value_at(0).unwrap_or(0.0)
    }

    /// First element interpreted as a boolean.
    pub fn as_bool(&self) -> bool {
        self.as_f64() as i64 != 0
    }

    /// Up to three leading elements; missing ones are zero.
    pub fn as_vector3(&self) -> [f32; 3] {
        let mut out = [0.0f32; 3];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.payload.value_at(i).unwrap_or(0.0) as f32;
        }
        out
    }

    /// The raw little-endian payload bytes.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.payload.to_le_bytes()
    }

    /// Payload bytes read as a signed little-endian integer (up to 8 bytes).
    pub fn as_i64(&self) -> i64 {
        let bytes = self.as_bytes();
        if bytes.is_empty() {
            return 0;
        }
        let n = bytes.len().min(8);
        let mut buf = [0u8; 8];
        buf[..n].copy_from_slice(&bytes[..n]);
        // Sign-extend from the highest byte actually present.
        if bytes[n - 1] & 0x80 != 0 {
            for b in buf.iter_mut().skip(n) {
                *b = 0xFF;
            }
        }
        i64::from_le_bytes(buf)
    }

    /// Payload bytes decoded as text, padding trimmed.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.as_bytes()).trim().to_string()
    }

    /// Payload bytes decoded as JSON.
    pub fn as_json<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(&self.as_bytes())?)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("element_type", &self.element_type())
            .field("bytes", &self.payload.byte_len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────
