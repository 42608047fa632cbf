//! dmclib-transport: Serial and TCP transports for dmclib.
//!
//! This crate provides concrete [`Transport`](dmclib_core::Transport)
//! implementations for the two physical links the controllers support:
//!
//! - [`SerialTransport`] -- RS-232 / USB virtual COM ports (tokio-serial)
//! - [`TcpTransport`] -- Ethernet controllers (telnet-style TCP, port 23)

pub mod serial;
pub mod tcp;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
pub use tcp::TcpTransport;
