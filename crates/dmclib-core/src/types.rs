//! Core types used throughout dmclib.
//!
//! These types provide a model-agnostic abstraction layer over the
//! various controller families (motion series, I/O-only series).

use std::fmt;
use std::str::FromStr;

/// The maximum number of motion axes any supported controller exposes.
pub const MAX_AXES: usize = 8;

/// Opaque axis identifier.
///
/// Controllers address axes by letter (`A` through `H`); telemetry and
/// unsolicited messages identify them the same way. Using an opaque type
/// keeps the letter/index conversion in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Axis(u8);

impl Axis {
    /// The first axis, letter `A`.
    pub const A: Axis = Axis(0);

    /// The second axis, letter `B`.
    pub const B: Axis = Axis(1);

    /// Create an `Axis` from a zero-based index.
    ///
    /// Returns `None` for indices at or beyond [`MAX_AXES`].
    pub fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < MAX_AXES {
            Some(Axis(index))
        } else {
            None
        }
    }

    /// Create an `Axis` from its controller letter (`'A'`..=`'H'`).
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'A'..='H' => Some(Axis(letter as u8 - b'A')),
            _ => None,
        }
    }

    /// Return the zero-based index of this axis.
    pub fn index(&self) -> u8 {
        self.0
    }

    /// Return the controller letter for this axis.
    pub fn letter(&self) -> char {
        (b'A' + self.0) as char
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Error returned when a string cannot be parsed into an [`Axis`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAxisError(String);

impl fmt::Display for ParseAxisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown axis: {}", self.0)
    }
}

impl std::error::Error for ParseAxisError {}

impl FromStr for Axis {
    type Err = ParseAxisError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Axis::from_letter(c.to_ascii_uppercase())
                .ok_or_else(|| ParseAxisError(s.to_string())),
            _ => Err(ParseAxisError(s.to_string())),
        }
    }
}

/// Telemetry record geometry as reported by the controller's capability
/// query.
///
/// The reply is four comma-separated integers: the number of axes, the
/// size of the general-status block, the size of the coordinated-motion
/// block, and the size of each per-axis block. The total record size
/// follows directly: a 4-byte header plus the three blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordGeometry {
    /// Number of per-axis blocks in the record.
    pub axes: usize,
    /// Size in bytes of the general-status block.
    pub general_bytes: usize,
    /// Size in bytes of the coordinated-motion block. For I/O-only
    /// controllers this field instead carries the I/O block size.
    pub coord_bytes: usize,
    /// Size in bytes of each per-axis block (0 on I/O-only controllers).
    pub axis_bytes: usize,
}

impl RecordGeometry {
    /// Total size in bytes of one telemetry record, header included.
    pub fn record_size(&self) -> usize {
        4 + self.axes * self.axis_bytes + self.general_bytes + self.coord_bytes
    }
}

impl FromStr for RecordGeometry {
    type Err = ParseGeometryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.split(',').map(|p| p.trim().parse::<usize>());
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| ParseGeometryError(s.to_string()))?
                .map_err(|_| ParseGeometryError(s.to_string()))
        };
        Ok(RecordGeometry {
            axes: next()?,
            general_bytes: next()?,
            coord_bytes: next()?,
            axis_bytes: next()?,
        })
    }
}

/// Error returned when a capability reply cannot be parsed into a
/// [`RecordGeometry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseGeometryError(String);

impl fmt::Display for ParseGeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unparseable record geometry: {}", self.0)
    }
}

impl std::error::Error for ParseGeometryError {}

/// How telemetry records are acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    /// The controller streams records on its own schedule, configured
    /// with the given update period in milliseconds.
    Push {
        /// Record period in milliseconds.
        period_ms: u32,
    },
    /// The host requests one record per poll at the given interval.
    Polled {
        /// Poll interval in milliseconds.
        interval_ms: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_letter_round_trip() {
        for i in 0..MAX_AXES as u8 {
            let axis = Axis::from_index(i).unwrap();
            assert_eq!(Axis::from_letter(axis.letter()), Some(axis));
        }
    }

    #[test]
    fn axis_rejects_out_of_range() {
        assert_eq!(Axis::from_index(8), None);
        assert_eq!(Axis::from_letter('I'), None);
        assert_eq!(Axis::from_letter('1'), None);
    }

    #[test]
    fn axis_from_str() {
        assert_eq!("C".parse::<Axis>().unwrap().index(), 2);
        assert_eq!("c".parse::<Axis>().unwrap().index(), 2);
        assert!("CC".parse::<Axis>().is_err());
        assert!("".parse::<Axis>().is_err());
    }

    #[test]
    fn axis_display() {
        assert_eq!(Axis::A.to_string(), "A");
        assert_eq!(Axis::from_index(7).unwrap().to_string(), "H");
    }

    #[test]
    fn geometry_parses_capability_reply() {
        let g: RecordGeometry = "8,52,26,36".parse().unwrap();
        assert_eq!(g.axes, 8);
        assert_eq!(g.general_bytes, 52);
        assert_eq!(g.coord_bytes, 26);
        assert_eq!(g.axis_bytes, 36);
        assert_eq!(g.record_size(), 4 + 8 * 36 + 52 + 26);
    }

    #[test]
    fn geometry_parses_io_only_reply() {
        let g: RecordGeometry = "0,12,52,0".parse().unwrap();
        assert_eq!(g.axes, 0);
        assert_eq!(g.axis_bytes, 0);
        assert_eq!(g.record_size(), 4 + 12 + 52);
    }

    #[test]
    fn geometry_rejects_garbage() {
        assert!("".parse::<RecordGeometry>().is_err());
        assert!("4,18,0".parse::<RecordGeometry>().is_err());
        assert!("4,x,0,0".parse::<RecordGeometry>().is_err());
    }
}
