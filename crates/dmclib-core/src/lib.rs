//! dmclib-core: Core traits, types, and error definitions for dmclib.
//!
//! This crate defines the abstractions shared by the transport layer,
//! the telemetry record decoder, and the protocol engine. Applications
//! depend on these types without pulling in any specific transport.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`ControllerEvent`] -- asynchronous telemetry and state notifications
//! - [`Axis`] / [`RecordGeometry`] -- controller addressing and record shape
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use dmclib_core::*`.
pub use error::{Error, Result};
pub use events::ControllerEvent;
pub use transport::Transport;
pub use types::*;
