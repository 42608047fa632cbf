//! Galil DMC protocol engine for dmclib.
//!
//! This crate implements the wire protocol shared by Galil DMC-family
//! motion controllers: ASCII commands terminated by `:` (or refused
//! with `?`), binary telemetry records, and high-bit-marked unsolicited
//! messages, all interleaved on a single serial or TCP byte stream. It
//! provides:
//!
//! - **Protocol codec** ([`protocol`]) -- command framing, the
//!   terminator-counting exchange decoder, and the telemetry record
//!   header demultiplexer.
//! - **Unsolicited decoder** ([`unsolicited`]) -- recover name/value
//!   pairs from high-bit-marked bytes and emit them as events.
//! - **Controller driver** ([`controller`]) -- [`DmcController`], the
//!   connection object: connect handshake, background telemetry
//!   acquisition, command exchange, and field access.
//! - **Builder** ([`builder`]) -- fluent builder API for constructing
//!   [`DmcController`] instances with smart defaults.
//!
//! # Stream demultiplexing
//!
//! The controller multiplexes three traffic classes onto one byte
//! stream. Command replies are plain ASCII ending in `:`; telemetry
//! records are binary frames announced by a little-endian length pair
//! in their header; unsolicited messages are ASCII with the high bit
//! set on every byte (`CW 1`). The decoders here separate the classes
//! without losing bytes, so a record arriving mid-reply or a message
//! arriving mid-record does not desynchronize the stream.
//!
//! # Example
//!
//! ```
//! use dmclib_dmc::protocol::{ExchangeDecoder, encode_command};
//!
//! // Build a "tell position, axis A" command
//! let cmd = encode_command("TPA");
//! assert_eq!(cmd, b"TPA\r");
//!
//! // Feed the controller's reply through the exchange decoder
//! let mut decoder = ExchangeDecoder::new("TPA");
//! for &b in b" 2048\r\n:" {
//!     decoder.push(b);
//! }
//! assert_eq!(decoder.finish().unwrap(), "2048");
//! ```

pub(crate) mod acquisition;
pub mod builder;
pub mod controller;
pub mod protocol;
pub mod unsolicited;

// Re-export the primary types for ergonomic `use dmclib_dmc::*`.
pub use builder::DmcControllerBuilder;
pub use controller::DmcController;

/// Consecutive telemetry read timeouts tolerated before the controller
/// is flagged disconnected.
pub use acquisition::ALLOWED_TIMEOUTS;
