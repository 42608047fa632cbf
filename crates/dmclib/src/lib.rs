//! # dmclib -- Async access to Galil motion controllers
//!
//! `dmclib` is an asynchronous Rust library for communicating with
//! Galil DMC-family motion controllers and RIO I/O modules over serial
//! or TCP. It is designed for machine control front ends, beamline and
//! lab automation, and monitoring tools that need low-latency command
//! access alongside a continuous telemetry stream.
//!
//! ## Quick Start
//!
//! Add `dmclib` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! dmclib = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Connect to a controller and read an axis position:
//!
//! ```no_run
//! use dmclib::dmc::DmcControllerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> dmclib::Result<()> {
//!     let controller = DmcControllerBuilder::new()
//!         .tcp("192.168.0.50:23")
//!         .build()?;
//!     controller.connect().await?;
//!
//!     println!("connected to {}", controller.model());
//!     let reply = controller.exchange("MG _TPA").await?;
//!     println!("axis A position: {}", reply);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                 | Purpose                                         |
//! |-----------------------|-------------------------------------------------|
//! | `dmclib-core`         | [`Transport`] trait, types, errors, events      |
//! | `dmclib-transport`    | Serial (tokio-serial) and TCP transports        |
//! | `dmclib-record`       | Telemetry field maps and per-family layouts     |
//! | `dmclib-dmc`          | Protocol engine and [`DmcController`](dmc::DmcController) |
//! | **`dmclib`**          | This facade crate -- re-exports everything      |
//!
//! ## The byte stream
//!
//! A Galil controller multiplexes three traffic classes onto one
//! serial or TCP stream: ASCII command replies (`:`-terminated, `?` on
//! refusal), fixed-layout binary telemetry records, and unsolicited
//! messages from controller programs (high bit set on every byte).
//! `dmclib` owns the stream from a background acquisition task,
//! demultiplexes the classes, and surfaces them as:
//!
//! - reply text from [`exchange`](dmc::DmcController::exchange),
//! - decoded telemetry via [`field_value`](dmc::DmcController::field_value)
//!   and [`latest_record`](dmc::DmcController::latest_record),
//! - broadcast [`ControllerEvent`]s from
//!   [`subscribe`](dmc::DmcController::subscribe).
//!
//! ## Supported families
//!
//! - **DMC-30000** single-axis pockets (30010, 31010 with 16-bit ADC)
//! - **DMC-4000 / 41x3 / 50000** multi-axis packs
//! - **DMC-21x3 / 18x6** legacy Econo and Accelera cards
//! - **RIO-47xxx** I/O modules (digital/analog, Ethernet)

pub use dmclib_core::*;

/// Serial and TCP transport implementations.
///
/// Provides [`SerialTransport`](transport::SerialTransport) (tokio-serial)
/// and [`TcpTransport`](transport::TcpTransport) for the two physical
/// links the controllers support.
pub mod transport {
    pub use dmclib_transport::*;
}

/// Telemetry record field maps and layout builders.
///
/// Provides [`FieldMap`](record::FieldMap) and
/// [`build_field_map`](record::build_field_map), which turn a
/// connect-time capability query into named-field access over raw
/// record bytes.
pub mod record {
    pub use dmclib_record::*;
}

/// The DMC protocol engine and controller driver.
///
/// Provides [`DmcController`](dmc::DmcController) and
/// [`DmcControllerBuilder`](dmc::DmcControllerBuilder), plus the
/// lower-level codec in [`dmc::protocol`](dmclib_dmc::protocol).
pub mod dmc {
    pub use dmclib_dmc::*;
}
