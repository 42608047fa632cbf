//! Mock transport for deterministic testing of the protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait two ways at
//! once:
//!
//! - **Scripted exchanges**: pre-loaded request/response pairs,
//!   consumed in order, for testing command encoding and reply
//!   decoding without hardware.
//! - **Raw inbound bytes**: a queue of bytes delivered by `receive()`
//!   without any preceding `send()`, for testing push-mode telemetry
//!   records and unsolicited messages that the controller injects on
//!   its own schedule.
//!
//! # Example
//!
//! ```
//! use dmclib_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the engine sends this command, return this reply.
//! mock.expect(b"MG TIME\r", b"1234.0000\r\n:");
//! // Bytes the controller pushes unprompted.
//! mock.push_raw(&[0xE8, 0xEF, 0xED, 0xE5, 0xE4]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use dmclib_core::error::{Error, Result};
use dmclib_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to return when the matching request is received.
    response: Vec<u8>,
}

/// One entry in the raw inbound queue.
#[derive(Debug, Clone, Copy)]
enum RawEvent {
    /// A byte delivered by `receive()`.
    Byte(u8),
    /// One `receive()` call returns [`Error::Timeout`] instead.
    Timeout,
}

/// A mock [`Transport`] for testing the protocol engine without
/// hardware.
///
/// Expectations are consumed in order. When `send()` is called, the
/// sent data is recorded and matched against the next expectation; the
/// corresponding response is then returned by subsequent `receive()`
/// calls. Raw bytes queued with [`push_raw`](Self::push_raw) are
/// delivered once any pending response is exhausted.
///
/// If a send does not match or the queue is exhausted, an error is
/// returned.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// The response data pending for the next `receive()` call.
    pending_response: Option<Vec<u8>>,
    /// Cursor into the pending response.
    response_cursor: usize,
    /// Inbound bytes delivered without a preceding send.
    raw_queue: VecDeque<RawEvent>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending_response: None,
            response_cursor: 0,
            raw_queue: VecDeque::new(),
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, subsequent
    /// `receive()` calls will return `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue raw inbound bytes, delivered by `receive()` with no
    /// preceding `send()`. Used for push-mode telemetry records and
    /// unsolicited messages.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.raw_queue.extend(bytes.iter().map(|&b| RawEvent::Byte(b)));
    }

    /// Queue one receive timeout ahead of any bytes pushed afterwards.
    ///
    /// Lets a test script "nothing arrives, then a record" sequences
    /// for exercising the timeout escalation logic.
    pub fn push_timeout(&mut self) {
        self.raw_queue.push_back(RawEvent::Timeout);
    }

    /// All data that has been sent through this transport, one element
    /// per `send()` call.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Number of expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state.
    ///
    /// When `false`, subsequent `send()` and `receive()` calls return
    /// [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(data.to_vec());

        if let Some(expectation) = self.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
            self.pending_response = Some(expectation.response);
            self.response_cursor = 0;
            Ok(())
        } else {
            Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            ))
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        // Scripted response first, then the raw inbound queue.
        if let Some(ref response) = self.pending_response {
            let remaining = &response[self.response_cursor..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.response_cursor += n;
            if self.response_cursor >= response.len() {
                self.pending_response = None;
                self.response_cursor = 0;
            }
            return Ok(n);
        }

        match self.raw_queue.front() {
            Some(RawEvent::Timeout) => {
                self.raw_queue.pop_front();
                Err(Error::Timeout)
            }
            Some(RawEvent::Byte(_)) => {
                let mut n = 0;
                while n < buf.len() {
                    match self.raw_queue.front().copied() {
                        Some(RawEvent::Byte(b)) => {
                            self.raw_queue.pop_front();
                            buf[n] = b;
                            n += 1;
                        }
                        _ => break,
                    }
                }
                Ok(n)
            }
            None => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending_response = None;
        self.response_cursor = 0;
        self.raw_queue.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
