//! Error types for dmclib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! controller-layer errors are all captured here.

/// The error type for all dmclib operations.
///
/// Variants cover the full range of failure modes encountered when
/// communicating with motion controllers: physical transport failures,
/// stream desynchronization, timeouts, and command rejections.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, TCP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed telemetry record, unparseable reply).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The controller answered a command with a `?` terminator.
    ///
    /// The command was delivered and the byte stream remains in sync;
    /// the controller simply refused the operation (bad syntax, axis
    /// not configured, value out of range).
    #[error("command rejected by controller")]
    CommandRejected,

    /// The inbound byte stream lost synchronization and had to be
    /// resynchronized (e.g. a telemetry record header was never found
    /// where one was due).
    #[error("stream desynchronized: {0}")]
    Desync(String),

    /// Timed out waiting for a response from the controller.
    ///
    /// This typically indicates the controller is powered off, the baud
    /// rate is wrong, or another host holds the connection.
    #[error("timeout waiting for response")]
    Timeout,

    /// The requested operation is not supported by this controller model.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a controller command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the controller has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the controller was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
