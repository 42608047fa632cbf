//! TCP transport for controller communication.
//!
//! This module provides [`TcpTransport`], which implements the
//! [`Transport`] trait for Ethernet-connected controllers. The
//! controllers accept up to eight simultaneous TCP handles on port 23;
//! one handle carries the command/telemetry session.
//!
//! # Example
//!
//! ```no_run
//! use dmclib_transport::TcpTransport;
//! use dmclib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> dmclib_core::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.0.50:23").await?;
//!
//! // Query the error code
//! transport.send(b"TC 1\r").await?;
//!
//! let mut buf = [0u8; 4096];
//! let n = transport.receive(&mut buf, Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use dmclib_core::error::{Error, Result};
use dmclib_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default connection timeout (5 seconds).
///
/// Generous enough for a controller that is still booting its Ethernet
/// stack, short enough that a wrong address fails promptly.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport for controller communication.
///
/// Implements the [`Transport`] trait for Ethernet-connected controllers.
/// The connection is established eagerly via [`connect`](TcpTransport::connect)
/// or [`connect_with_timeout`](TcpTransport::connect_with_timeout).
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying TCP stream, `None` after `close()` is called.
    stream: Option<TcpStream>,
    /// The address string for logging/debugging.
    addr: String,
}

impl TcpTransport {
    /// Connect to a TCP endpoint using the default timeout.
    ///
    /// The `addr` parameter should be a `host:port` string, e.g.,
    /// `"192.168.0.50:23"`.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a TCP endpoint with a specified timeout.
    ///
    /// # Arguments
    ///
    /// * `addr` - A `host:port` string (e.g., `"192.168.0.50:23"`)
    /// * `timeout` - Maximum time to wait for the connection to be established
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to controller"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Disable Nagle's algorithm. Commands are a handful of bytes and
        // the synchronous exchange path stalls on every round-trip.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        tracing::info!(addr = %addr, "TCP connection established");

        Ok(Self {
            stream: Some(stream),
            addr: addr.to_string(),
        })
    }

    /// Wrap an existing `TcpStream` as a `TcpTransport`.
    ///
    /// Useful when a TCP connection has already been established
    /// externally (e.g., accepted from a listener in tests).
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        tracing::debug!(addr = %addr, "Wrapping existing TCP stream");
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// Get the address string this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            addr = %self.addr,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send data");
            map_io_error(e)
        })?;

        stream.flush().await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to flush TCP stream");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let result = tokio::time::timeout(timeout, stream.read(buf)).await;

        match result {
            Ok(Ok(0)) => {
                // TCP: 0 bytes read means the peer has closed the connection.
                tracing::warn!(addr = %self.addr, "Controller closed connection (0 bytes read)");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(
                    addr = %self.addr,
                    bytes = n,
                    data = ?&buf[..n],
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => {
                tracing::trace!(
                    addr = %self.addr,
                    timeout_ms = timeout.as_millis(),
                    "Timeout waiting for data"
                );
                Err(Error::Timeout)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "Closing TCP connection");

            if let Err(e) = stream.flush().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }

            if let Err(e) = stream.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to shutdown TCP stream (continuing anyway)"
                );
            }

            tracing::info!(addr = %self.addr, "TCP connection closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmclib_core::transport::Transport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Helper: bind a TcpListener on a random available port and return it
    /// along with its address string.
    async fn test_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn connect_send_receive() {
        let (listener, addr) = test_listener().await;

        // Server that answers a command with a terminated reply
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"MG TIME\r");
            stream.write_all(b" 12345.0000\r\n:").await.unwrap();
            stream.flush().await.unwrap();
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        assert!(transport.is_connected());

        transport.send(b"MG TIME\r").await.unwrap();

        let mut buf = [0u8; 256];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b" 12345.0000\r\n:");

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        // Bind a listener and immediately drop it so the port is not listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpTransport::connect(&addr).await;
        assert!(result.is_err());
        let err = result.unwrap_err();
        match &err {
            Error::Transport(msg) => assert!(
                msg.contains("connection refused"),
                "expected 'connection refused' in message, got: {}",
                msg
            ),
            other => panic!("expected Transport error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn receive_timeout() {
        let (listener, addr) = test_listener().await;

        // Server accepts but sends nothing
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();

        let mut buf = [0u8; 256];
        let result = transport.receive(&mut buf, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout)));

        transport.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn disconnection_detection() {
        let (listener, addr) = test_listener().await;

        // Server accepts then immediately closes the connection
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();

        server.await.unwrap();

        // Give the OS a moment to propagate the FIN
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut buf = [0u8; 256];
        let result = transport.receive(&mut buf, Duration::from_secs(2)).await;
        assert!(
            matches!(result, Err(Error::ConnectionLost)),
            "expected ConnectionLost, got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn send_after_close_returns_not_connected() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        transport.close().await.unwrap();

        let result = transport.send(b"should fail").await;
        assert!(matches!(result, Err(Error::NotConnected)));

        server.abort();
    }

    #[tokio::test]
    async fn is_connected_state_transitions() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::connect(&addr).await.unwrap();
        assert!(transport.is_connected());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        // Closing again is a no-op, should not error
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        server.abort();
    }

    #[tokio::test]
    async fn from_stream_works() {
        let (listener, _addr) = test_listener().await;
        let listener_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
            stream.flush().await.unwrap();
        });

        let raw_stream = TcpStream::connect(listener_addr).await.unwrap();
        let mut transport = TcpTransport::from_stream(raw_stream, listener_addr.to_string());
        assert!(transport.is_connected());

        transport.send(b"test").await.unwrap();

        let mut buf = [0u8; 64];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"test");

        transport.close().await.unwrap();
        server.await.unwrap();
    }
}
