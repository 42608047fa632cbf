//! Telemetry acquisition task.
//!
//! A single background task owns the transport and multiplexes the two
//! traffic sources that share it: synchronous command exchanges
//! (forwarded from [`DmcController`](crate::controller::DmcController)
//! over an `mpsc` channel with `oneshot` replies) and the continuous
//! telemetry record stream. Serializing both through one task is what
//! keeps the byte-classification state machine consistent; no lock is
//! shared with callers.
//!
//! Record reads are never cancelled mid-record: the `select!` only
//! races the cheap wakeup (command arrival vs. poll tick), and the
//! actual transport reads run to completion inside the chosen branch.
//!
//! Consecutive record-read timeouts are counted; exceeding
//! [`ALLOWED_TIMEOUTS`] forces a disconnect (transport closed,
//! [`ControllerEvent::Disconnected`] emitted, connected flag cleared)
//! after which the controller short-circuits all exchanges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dmclib_core::error::{Error, Result};
use dmclib_core::events::ControllerEvent;
use dmclib_core::transport::Transport;
use dmclib_core::types::TelemetryMode;

use crate::protocol::{self, Demux, DemuxStep, ExchangeDecoder};
use crate::unsolicited;

/// Consecutive record-read timeouts tolerated before the connection is
/// declared dead.
pub const ALLOWED_TIMEOUTS: u32 = 2;

/// Cap on bytes examined while hunting for one record header. A stream
/// that produces this much traffic without a header is desynchronized
/// beyond recovery within this read cycle.
const MAX_HEADER_HUNT: usize = 4096;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A request sent from the controller to the acquisition task.
pub(crate) enum CommandRequest {
    /// A command line to exchange with the controller.
    Exchange {
        cmd: String,
        response_tx: oneshot::Sender<Result<String>>,
    },
    /// Stop the task and hand the transport back.
    Shutdown {
        response_tx: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the background acquisition task.
pub(crate) struct AcquisitionHandle {
    pub cmd_tx: mpsc::Sender<CommandRequest>,
    /// Kept so the task can be aborted when the controller is dropped.
    #[allow(dead_code)]
    pub task_handle: JoinHandle<()>,
}

impl AcquisitionHandle {
    /// Request a clean shutdown and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(CommandRequest::Shutdown { response_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        response_rx.await.map_err(|_| Error::NotConnected)
    }
}

/// State shared between the controller and the acquisition task.
pub(crate) struct SharedState {
    latest: std::sync::Mutex<Option<Arc<Vec<u8>>>>,
    connected: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        SharedState {
            latest: std::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// The most recent complete telemetry record, if any.
    pub fn latest_record(&self) -> Option<Arc<Vec<u8>>> {
        self.latest.lock().unwrap().clone()
    }

    pub fn store_record(&self, record: Arc<Vec<u8>>) {
        *self.latest.lock().unwrap() = Some(record);
    }

    pub fn clear_record(&self) {
        *self.latest.lock().unwrap() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

/// Configuration handed to the acquisition task at spawn time.
pub(crate) struct AcquisitionConfig {
    pub record_size: usize,
    pub mode: TelemetryMode,
    pub command_timeout: Duration,
}

// ---------------------------------------------------------------------------
// DisconnectedTransport sentinel
// ---------------------------------------------------------------------------

/// Sentinel transport left in the controller after the real transport
/// has been moved into the acquisition task.
pub(crate) struct DisconnectedTransport;

#[async_trait::async_trait]
impl Transport for DisconnectedTransport {
    async fn send(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::NotConnected)
    }

    async fn receive(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        Err(Error::NotConnected)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the acquisition task.
///
/// The task owns the transport exclusively. Exchanges are sent via the
/// returned handle's channel; telemetry records are published to
/// `event_tx` and stored in `shared`.
pub(crate) fn spawn_acquisition_task(
    transport: Box<dyn Transport>,
    config: AcquisitionConfig,
    event_tx: broadcast::Sender<ControllerEvent>,
    shared: Arc<SharedState>,
) -> AcquisitionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<CommandRequest>(16);
    let task_handle = tokio::spawn(acquisition_loop(transport, config, event_tx, shared, cmd_rx));
    AcquisitionHandle {
        cmd_tx,
        task_handle,
    }
}

// ---------------------------------------------------------------------------
// Acquisition loop
// ---------------------------------------------------------------------------

async fn acquisition_loop(
    mut transport: Box<dyn Transport>,
    config: AcquisitionConfig,
    event_tx: broadcast::Sender<ControllerEvent>,
    shared: Arc<SharedState>,
    mut cmd_rx: mpsc::Receiver<CommandRequest>,
) {
    let mut demux = Demux::new(config.record_size);
    let mut consecutive_timeouts: u32 = 0;
    let poll_interval = match config.mode {
        TelemetryMode::Polled { interval_ms } => Some(Duration::from_millis(interval_ms as u64)),
        TelemetryMode::Push { .. } => None,
    };
    // The first poll waits a full interval so callers can finish setup
    // before the task touches the transport.
    let mut next_poll = tokio::time::Instant::now() + poll_interval.unwrap_or(Duration::ZERO);

    loop {
        // Race only the wakeup; the transport reads below run to
        // completion so a record is never torn by a command arrival.
        let request = tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => Some(cmd),
                None => {
                    debug!("command channel closed, exiting acquisition loop");
                    break;
                }
            },

            _ = async {
                match poll_interval {
                    Some(_) => tokio::time::sleep_until(next_poll).await,
                    None => {}
                }
            } => None,
        };

        match request {
            Some(CommandRequest::Exchange { cmd, response_tx }) => {
                let result = if shared.is_connected() {
                    execute_exchange(
                        transport.as_mut(),
                        &cmd,
                        config.command_timeout,
                        &event_tx,
                    )
                    .await
                } else {
                    // Disconnected exchanges short-circuit so callers
                    // can keep serving cached values.
                    Ok(String::new())
                };
                let _ = response_tx.send(result);
            }
            Some(CommandRequest::Shutdown { response_tx }) => {
                debug!("acquisition task shutting down");
                let _ = response_tx.send(transport);
                return;
            }
            None => {
                if !shared.is_connected() {
                    // Forced disconnect already happened; keep serving
                    // the channel until the controller shuts us down.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                if let Some(interval) = poll_interval {
                    next_poll = tokio::time::Instant::now() + interval;
                }
                let polled = poll_interval.is_some();
                match acquire_record(
                    transport.as_mut(),
                    &mut demux,
                    polled,
                    config.command_timeout,
                    &event_tx,
                )
                .await
                {
                    Ok(record) => {
                        consecutive_timeouts = 0;
                        shared.store_record(record.clone());
                        let _ = event_tx.send(ControllerEvent::Record(record));
                    }
                    Err(Error::Timeout) => {
                        consecutive_timeouts += 1;
                        demux.reset();
                        warn!(consecutive_timeouts, "telemetry record read timed out");
                        if consecutive_timeouts > ALLOWED_TIMEOUTS {
                            warn!("timeout threshold exceeded, forcing disconnect");
                            let _ = transport.close().await;
                            shared.set_connected(false);
                            let _ = event_tx.send(ControllerEvent::Disconnected);
                        }
                    }
                    Err(e) => {
                        demux.reset();
                        warn!(error = %e, "telemetry record read failed, forcing disconnect");
                        let _ = transport.close().await;
                        shared.set_connected(false);
                        let _ = event_tx.send(ControllerEvent::Disconnected);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Record acquisition
// ---------------------------------------------------------------------------

/// Read one telemetry record from the transport.
///
/// In polled mode the record request is issued first and the record
/// carries one extra trailing `:` which is consumed and discarded. The
/// header is hunted byte by byte through the demultiplexer; the body is
/// then block-read. Unsolicited bytes collected during the hunt are
/// decoded before returning, success or not.
async fn acquire_record(
    transport: &mut dyn Transport,
    demux: &mut Demux,
    polled: bool,
    timeout: Duration,
    event_tx: &broadcast::Sender<ControllerEvent>,
) -> Result<Arc<Vec<u8>>> {
    let mut mesg = Vec::new();
    let result = read_record(transport, demux, &mut mesg, polled, timeout).await;
    unsolicited::process_unsolicited(&mesg, event_tx);
    result
}

async fn read_record(
    transport: &mut dyn Transport,
    demux: &mut Demux,
    mesg: &mut Vec<u8>,
    polled: bool,
    timeout: Duration,
) -> Result<Arc<Vec<u8>>> {
    if polled {
        transport.send(&protocol::encode_command("QR")).await?;
    }

    let record_size = demux.record_size();
    let mut record = vec![0u8; record_size];
    let mut buf = [0u8; 1];
    let mut hunted = 0usize;

    // Header hunt, one byte at a time.
    let body_len = loop {
        transport.receive(&mut buf, timeout).await?;
        match demux.push(buf[0]) {
            DemuxStep::Unsolicited => mesg.push(buf[0]),
            DemuxStep::Hunting => {
                hunted += 1;
                if hunted > MAX_HEADER_HUNT {
                    return Err(Error::Desync(format!(
                        "no record header within {hunted} bytes"
                    )));
                }
            }
            DemuxStep::HeaderFound { body_len } => break body_len,
        }
    };
    record[..4].copy_from_slice(&demux.header());

    // Block-read the body.
    let mut filled = 4;
    while filled < 4 + body_len {
        let n = transport.receive(&mut record[filled..], timeout).await?;
        filled += n;
    }

    // A polled record is a solicited reply and carries a trailing `:`.
    if polled {
        let _ = transport.receive(&mut buf, timeout).await?;
    }

    Ok(Arc::new(record))
}

// ---------------------------------------------------------------------------
// Exchange execution (inside the acquisition task)
// ---------------------------------------------------------------------------

/// Execute one command exchange on the transport.
///
/// Reads until the expected terminator count is reached, diverting
/// unsolicited bytes to the decoder. Unsolicited messages are delivered
/// even when the exchange itself fails.
pub(crate) async fn execute_exchange(
    transport: &mut dyn Transport,
    cmd: &str,
    timeout: Duration,
    event_tx: &broadcast::Sender<ControllerEvent>,
) -> Result<String> {
    debug!(cmd, "command exchange");
    transport.send(&protocol::encode_command(cmd)).await?;

    let mut decoder = ExchangeDecoder::new(cmd);
    let mut buf = [0u8; 256];
    while !decoder.is_complete() {
        match transport.receive(&mut buf, timeout).await {
            Ok(n) => {
                for &b in &buf[..n] {
                    if decoder.push(b) {
                        break;
                    }
                }
            }
            Err(e) => {
                unsolicited::process_unsolicited(&decoder.take_unsolicited(), event_tx);
                return Err(e);
            }
        }
    }
    unsolicited::process_unsolicited(&decoder.take_unsolicited(), event_tx);
    decoder.finish()
}
