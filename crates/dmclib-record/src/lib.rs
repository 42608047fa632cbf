//! dmclib-record: Telemetry record decoding for dmclib.
//!
//! Controllers stream fixed-layout binary telemetry records whose field
//! layout varies by family and installed options. This crate turns the
//! connect-time capability query into an immutable [`FieldMap`] and
//! decodes named fields out of raw record bytes.
//!
//! # Key types
//!
//! - [`FieldDescriptor`] / [`FieldKind`] -- where and how one quantity lives
//! - [`FieldMap`] -- one family's complete layout, built at connect time
//! - [`CapabilityProbe`] -- the I/O seam layout builders use for probing
//! - [`build_field_map`] -- geometry + model + probes -> [`FieldMap`]

pub mod field;
pub mod layout;
pub mod probe;

pub use field::{FieldDescriptor, FieldKind, FieldMap};
pub use layout::build_field_map;
pub use probe::{CannedProbe, CapabilityProbe};
