//! dmclib-test-harness: Mock transport for deterministic dmclib tests.
//!
//! This crate provides [`MockTransport`] for unit testing the protocol
//! engine without real controller hardware: scripted command/response
//! exchanges plus a raw inbound byte queue for push-mode telemetry and
//! unsolicited messages.

pub mod mock;

pub use mock::MockTransport;
