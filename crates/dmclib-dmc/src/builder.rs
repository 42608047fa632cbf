//! DmcControllerBuilder -- fluent builder for constructing
//! [`DmcController`] instances.
//!
//! Separates configuration from connection so that callers can set up
//! the transport choice, telemetry mode, and timeout values before
//! anything touches the wire. Construction is cheap; the transport is
//! opened by [`DmcController::connect()`].
//!
//! # Example
//!
//! ```no_run
//! use dmclib_dmc::builder::DmcControllerBuilder;
//! use dmclib_core::types::TelemetryMode;
//! use std::time::Duration;
//!
//! # async fn example() -> dmclib_core::error::Result<()> {
//! let controller = DmcControllerBuilder::new()
//!     .tcp("192.168.0.50:23")
//!     .telemetry(TelemetryMode::Push { period_ms: 8 })
//!     .command_timeout(Duration::from_millis(300))
//!     .build()?;
//! controller.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use dmclib_core::error::{Error, Result};
use dmclib_core::transport::Transport;
use dmclib_core::types::TelemetryMode;

use crate::acquisition::DisconnectedTransport;
use crate::controller::{DmcController, TransportSource};

/// Default serial baud rate for DMC controllers.
const DEFAULT_BAUD: u32 = 115_200;

/// Fluent builder for [`DmcController`].
///
/// All configuration has sensible defaults, so the simplest usage is:
///
/// ```ignore
/// let controller = DmcControllerBuilder::new()
///     .serial_port("/dev/ttyUSB0")
///     .build()?;
/// ```
pub struct DmcControllerBuilder {
    serial_port: Option<String>,
    baud_rate: Option<u32>,
    tcp_addr: Option<String>,
    command_timeout: Duration,
    telemetry: TelemetryMode,
    event_capacity: usize,
}

impl DmcControllerBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        DmcControllerBuilder {
            serial_port: None,
            baud_rate: None,
            tcp_addr: None,
            command_timeout: Duration::from_millis(500),
            telemetry: TelemetryMode::Push { period_ms: 8 },
            event_capacity: 256,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default serial baud rate (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = Some(baud);
        self
    }

    /// Set the TCP address (e.g. `192.168.0.50:23`).
    pub fn tcp(mut self, addr: &str) -> Self {
        self.tcp_addr = Some(addr.to_string());
        self
    }

    /// Set the timeout for a single receive while waiting for a reply
    /// or a telemetry record (default: 500ms).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set how telemetry records are acquired (default: push at 8ms).
    ///
    /// Push mode asks the controller to stream records (`DR`); polled
    /// mode requests one record per interval (`QR`). If the controller
    /// refuses `DR` at connect time, push falls back to polling at the
    /// same period.
    pub fn telemetry(mut self, mode: TelemetryMode) -> Self {
        self.telemetry = mode;
        self
    }

    /// Set the event broadcast channel capacity (default: 256).
    ///
    /// Slow subscribers that fall more than this many events behind
    /// start seeing `Lagged` errors from their receiver.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build a [`DmcController`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `dmclib-test-harness`) and for advanced use
    /// cases where the caller manages the transport lifecycle directly.
    /// Note that after a `disconnect()` the provided transport is closed
    /// and a further `connect()` will fail.
    pub fn build_with_transport(self, transport: Box<dyn Transport>) -> DmcController {
        DmcController::new(
            transport,
            TransportSource::Provided,
            self.command_timeout,
            self.telemetry,
            self.event_capacity,
        )
    }

    /// Build a [`DmcController`] that opens its own transport.
    ///
    /// Requires that exactly one of [`serial_port()`](Self::serial_port)
    /// or [`tcp()`](Self::tcp) has been called. The transport is opened
    /// on [`DmcController::connect()`], and reopened on reconnect.
    pub fn build(self) -> Result<DmcController> {
        let source = match (self.serial_port, self.tcp_addr) {
            (Some(path), None) => TransportSource::Serial {
                path,
                baud: self.baud_rate.unwrap_or(DEFAULT_BAUD),
            },
            (None, Some(addr)) => TransportSource::Tcp { addr },
            (None, None) => {
                return Err(Error::InvalidParameter(
                    "serial_port or tcp is required for build()".into(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidParameter(
                    "serial_port and tcp are mutually exclusive".into(),
                ));
            }
        };

        Ok(DmcController::new(
            Box::new(DisconnectedTransport),
            source,
            self.command_timeout,
            self.telemetry,
            self.event_capacity,
        ))
    }
}

impl Default for DmcControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
