//! Transport trait for controller communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a motion
//! controller. Implementations exist for serial ports, TCP sockets, and
//! mock transports for testing.
//!
//! The protocol engine in `dmclib-dmc` operates on a `Transport` rather
//! than directly on a serial port, enabling both real hardware control
//! and deterministic unit testing with `MockTransport` from the
//! `dmclib-test-harness` crate.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a controller.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Protocol-level concerns (terminator counting, telemetry
/// record framing, unsolicited byte classification) are handled by the
/// protocol engine that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the controller.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying transport (serial TX buffer, TCP socket, etc.).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the controller into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if no data is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
