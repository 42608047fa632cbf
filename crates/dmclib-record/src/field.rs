//! Telemetry record field descriptors and decoding.
//!
//! A telemetry record is a fixed-layout binary blob whose layout varies
//! by controller family. A [`FieldMap`] describes one family's layout as
//! named [`FieldDescriptor`]s; decoding a field is a pure function of
//! the map and the raw record bytes.
//!
//! The map is built once at connect time (see the
//! [`layout`](crate::layout) module) and never mutated afterwards. A
//! reconnect builds a fresh map and swaps it in wholesale, so decoding
//! never observes a half-built layout.

use std::collections::HashMap;

/// Wire representation of a raw field value.
///
/// All multi-byte fields are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One unsigned byte.
    UnsignedByte,
    /// Two bytes, unsigned.
    UnsignedWord,
    /// Four bytes, unsigned.
    UnsignedLong,
    /// One signed byte.
    SignedByte,
    /// Two bytes, signed.
    SignedWord,
    /// Four bytes, signed.
    SignedLong,
}

impl FieldKind {
    /// Width of the raw value in bytes.
    pub fn width(&self) -> usize {
        match self {
            FieldKind::UnsignedByte | FieldKind::SignedByte => 1,
            FieldKind::UnsignedWord | FieldKind::SignedWord => 2,
            FieldKind::UnsignedLong | FieldKind::SignedLong => 4,
        }
    }
}

/// Describes how one named quantity is stored in a telemetry record.
///
/// Two decode modes share this struct, matching how the controllers
/// document their record layout:
///
/// - `bit >= 0`: the field is a single bit of the raw value. `scale`
///   doubles as the polarity flag; `scale <= 0.0` means the bit is
///   active-low and the decoded value is inverted.
/// - `bit < 0`: the field is a scalar, decoded as `raw / scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    /// Wire representation of the raw value.
    pub kind: FieldKind,
    /// Byte offset of the raw value within the record.
    pub byte: usize,
    /// Bit number within the raw value, or -1 for scalar fields.
    pub bit: i8,
    /// Scale divisor for scalar fields; polarity for bit fields.
    pub scale: f64,
    /// Engineering-unit offset added after scaling.
    pub offset: f64,
}

impl FieldDescriptor {
    /// A scalar field decoded as `raw / 1.0`.
    pub fn value(kind: FieldKind, byte: usize) -> Self {
        Self::scaled(kind, byte, 1.0)
    }

    /// A scalar field decoded as `raw / scale`.
    pub fn scaled(kind: FieldKind, byte: usize, scale: f64) -> Self {
        Self {
            kind,
            byte,
            bit: -1,
            scale,
            offset: 0.0,
        }
    }

    /// A scalar field decoded as `raw / scale + offset`.
    pub fn scaled_offset(kind: FieldKind, byte: usize, scale: f64, offset: f64) -> Self {
        Self {
            kind,
            byte,
            bit: -1,
            scale,
            offset,
        }
    }

    /// An active-high bit field.
    pub fn bit(kind: FieldKind, byte: usize, bit: u8) -> Self {
        Self {
            kind,
            byte,
            bit: bit as i8,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// An active-low bit field (decodes to 1.0 when the bit is clear).
    pub fn inverted_bit(kind: FieldKind, byte: usize, bit: u8) -> Self {
        Self {
            kind,
            byte,
            bit: bit as i8,
            scale: -1.0,
            offset: 0.0,
        }
    }

    /// Decode this field from raw record bytes.
    ///
    /// Returns `None` when the record is too short for the field's byte
    /// range. Decoding is a pure function; calling it twice on the same
    /// bytes yields the same value.
    pub fn decode(&self, record: &[u8]) -> Option<f64> {
        let end = self.byte.checked_add(self.kind.width())?;
        let bytes = record.get(self.byte..end)?;
        let raw: i64 = match self.kind {
            FieldKind::UnsignedByte => bytes[0] as i64,
            FieldKind::SignedByte => bytes[0] as i8 as i64,
            FieldKind::UnsignedWord => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            FieldKind::SignedWord => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            FieldKind::UnsignedLong => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64
            }
            FieldKind::SignedLong => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64
            }
        };

        if self.bit >= 0 {
            let set = raw & (1 << self.bit) != 0;
            let active_high = self.scale > 0.0;
            Some(if set == active_high { 1.0 } else { 0.0 })
        } else {
            Some(raw as f64 / self.scale + self.offset)
        }
    }
}

/// Immutable map from field names to their location in one controller
/// family's telemetry record.
///
/// Names follow the controllers' own query vocabulary: `_TPA` is axis A
/// encoder position, `@IN[01]` is digital input 1, `_TC` is the error
/// code. Axis field names carry the axis letter (`A` through `H`).
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: HashMap<String, FieldDescriptor>,
    record_size: usize,
}

impl FieldMap {
    /// Build a map from a finished field table and the record size the
    /// capability query reported.
    pub fn new(fields: HashMap<String, FieldDescriptor>, record_size: usize) -> Self {
        Self {
            fields,
            record_size,
        }
    }

    /// Total record size in bytes, 4-byte header included.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Number of named fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the map has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field's descriptor.
    pub fn descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Decode a named field from raw record bytes.
    ///
    /// Returns `None` for unknown names and for records too short for
    /// the field. Callers that want the legacy 0.0 fall-back can layer
    /// it on top; the map itself stays honest about unknowns.
    pub fn value(&self, name: &str, record: &[u8]) -> Option<f64> {
        self.fields.get(name)?.decode(record)
    }

    /// Iterate over all field names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }
}
