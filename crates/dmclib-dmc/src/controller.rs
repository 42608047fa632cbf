//! DmcController -- the connection object for a Galil motion controller.
//!
//! This module ties the DMC protocol engine ([`protocol`](crate::protocol),
//! the acquisition task) to a [`Transport`] to produce a working
//! controller handle. It owns the connect sequence (identification,
//! capability query, field map construction, telemetry configuration),
//! forwards command exchanges to the background acquisition task, and
//! exposes decoded telemetry to callers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use dmclib_core::error::{Error, Result};
use dmclib_core::events::ControllerEvent;
use dmclib_core::transport::Transport;
use dmclib_core::types::TelemetryMode;
use dmclib_record::field::FieldMap;
use dmclib_record::layout::build_field_map;
use dmclib_record::probe::CapabilityProbe;
use dmclib_transport::serial::SerialTransport;
use dmclib_transport::tcp::TcpTransport;

use crate::acquisition::{
    self, AcquisitionConfig, AcquisitionHandle, CommandRequest, DisconnectedTransport, SharedState,
    execute_exchange,
};

/// How the controller obtains its transport on each `connect()`.
#[derive(Debug)]
pub(crate) enum TransportSource {
    /// Open a serial port.
    Serial { path: String, baud: u32 },
    /// Open a TCP connection.
    Tcp { addr: String },
    /// Use the transport handed to the builder. A second `connect()`
    /// after `disconnect()` fails, since the transport was closed and
    /// cannot be reopened here.
    Provided,
}

/// A connected Galil DMC-family motion controller.
///
/// Constructed via [`DmcControllerBuilder`](crate::builder::DmcControllerBuilder).
/// All controller communication goes through the [`Transport`] chosen at
/// build time; once connected, the transport is owned by a background
/// acquisition task and commands are marshalled to it over a channel.
pub struct DmcController {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    source: TransportSource,
    command_timeout: Duration,
    /// Telemetry mode requested by the builder. The active mode may
    /// differ: a `DR` refusal at connect time falls back to polling.
    requested_mode: TelemetryMode,
    event_tx: broadcast::Sender<ControllerEvent>,
    shared: Arc<SharedState>,
    /// Handle to the background acquisition task, if connected.
    acquisition: Mutex<Option<AcquisitionHandle>>,
    field_map: std::sync::RwLock<Option<Arc<FieldMap>>>,
    model: std::sync::RwLock<String>,
    serial_number: std::sync::RwLock<Option<String>>,
}

impl std::fmt::Debug for DmcController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmcController")
            .field("source", &self.source)
            .field("command_timeout", &self.command_timeout)
            .field("requested_mode", &self.requested_mode)
            .finish_non_exhaustive()
    }
}

/// Everything the connect handshake learns from the controller.
struct HandshakeOutcome {
    model: String,
    serial_number: Option<String>,
    field_map: FieldMap,
    mode: TelemetryMode,
}

impl DmcController {
    /// Create a new `DmcController` from its constituent parts.
    ///
    /// This is called by [`DmcControllerBuilder`](crate::builder::DmcControllerBuilder);
    /// callers should use the builder API instead.
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        source: TransportSource,
        command_timeout: Duration,
        mode: TelemetryMode,
        event_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity);
        DmcController {
            transport: Arc::new(Mutex::new(transport)),
            source,
            command_timeout,
            requested_mode: mode,
            event_tx,
            shared: Arc::new(SharedState::new()),
            acquisition: Mutex::new(None),
            field_map: std::sync::RwLock::new(None),
            model: std::sync::RwLock::new(String::new()),
            serial_number: std::sync::RwLock::new(None),
        }
    }

    /// Connect to the controller and start telemetry acquisition.
    ///
    /// Runs the full handshake: model identification (`\x12\x16`),
    /// serial number and axis count queries, capability query (`QZ`),
    /// field map construction, and telemetry configuration (`DR`/`CF`/`CW`).
    /// On success the transport moves into a background acquisition task
    /// and [`ControllerEvent::Connected`] is emitted.
    ///
    /// Reconnecting after a disconnect repeats the whole sequence and
    /// rebuilds the field map from scratch.
    pub async fn connect(&self) -> Result<()> {
        // Reap a previous task so its transport is not leaked.
        {
            let mut handle_guard = self.acquisition.lock().await;
            if let Some(handle) = handle_guard.take() {
                self.shared.set_connected(false);
                let transport = handle.shutdown().await?;
                *self.transport.lock().await = transport;
            }
        }

        let transport = self.obtain_transport().await?;
        let probe = TransportProbe::new(transport, self.command_timeout, self.event_tx.clone());

        let outcome = match self.handshake(&probe).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Put the transport back so a retry can reuse it.
                *self.transport.lock().await = probe.into_transport();
                return Err(e);
            }
        };

        info!(model = %outcome.model, mode = ?outcome.mode, "controller connected");

        let record_size = outcome.field_map.record_size();
        *self.model.write().unwrap() = outcome.model;
        *self.serial_number.write().unwrap() = outcome.serial_number;
        *self.field_map.write().unwrap() = Some(Arc::new(outcome.field_map));

        self.shared.clear_record();
        self.shared.set_connected(true);

        // Emit before spawning so subscribers always observe Connected
        // ahead of any event the task produces.
        let _ = self.event_tx.send(ControllerEvent::Connected);

        let config = AcquisitionConfig {
            record_size,
            mode: outcome.mode,
            command_timeout: self.command_timeout,
        };
        let handle = acquisition::spawn_acquisition_task(
            probe.into_transport(),
            config,
            self.event_tx.clone(),
            Arc::clone(&self.shared),
        );
        *self.acquisition.lock().await = Some(handle);
        Ok(())
    }

    /// Stop acquisition and close the transport.
    ///
    /// Emits [`ControllerEvent::Disconnected`] unless the controller was
    /// already disconnected (for example by the timeout escalation in the
    /// acquisition task, which emits the event itself).
    pub async fn disconnect(&self) -> Result<()> {
        let was_connected = self.shared.is_connected();
        self.shared.set_connected(false);

        let mut handle_guard = self.acquisition.lock().await;
        if let Some(handle) = handle_guard.take() {
            let mut transport = handle.shutdown().await?;
            if let Err(e) = transport.close().await {
                debug!(error = %e, "transport close during disconnect");
            }
            *self.transport.lock().await = transport;
        }
        self.shared.clear_record();

        if was_connected {
            debug!("controller disconnected");
            let _ = self.event_tx.send(ControllerEvent::Disconnected);
        }
        Ok(())
    }

    /// Send a command and wait for the controller's reply text.
    ///
    /// The command is forwarded to the acquisition task, which serializes
    /// it against telemetry reads. Compound commands (`;`-separated) wait
    /// for one terminator per sub-command; the cleaned sub-results are
    /// joined with single spaces.
    ///
    /// When the controller is flagged disconnected this returns
    /// `Ok("")` without touching the transport, so periodic callers keep
    /// running across an outage.
    pub async fn exchange(&self, cmd: &str) -> Result<String> {
        if !self.shared.is_connected() {
            return Ok(String::new());
        }

        let maybe_sender = {
            let guard = self.acquisition.lock().await;
            guard.as_ref().map(|h| h.cmd_tx.clone())
        };
        let Some(cmd_tx) = maybe_sender else {
            return Err(Error::NotConnected);
        };

        let (response_tx, response_rx) = tokio::sync::oneshot::channel();
        cmd_tx
            .send(CommandRequest::Exchange {
                cmd: cmd.to_string(),
                response_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        // Grace on top of the per-receive timeout: the exchange may queue
        // behind an in-progress record read.
        match tokio::time::timeout(
            self.command_timeout + Duration::from_millis(500),
            response_rx,
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected), // oneshot sender dropped
            Err(_) => Err(Error::Timeout),          // overall timeout
        }
    }

    /// Decode a named field from the latest telemetry record.
    ///
    /// Returns `None` when disconnected, before the first record arrives,
    /// or when the field is absent from this model's map.
    pub fn try_field_value(&self, name: &str) -> Option<f64> {
        let record = self.shared.latest_record()?;
        let map = self.field_map.read().unwrap().clone()?;
        map.value(name, &record)
    }

    /// Decode a named field from the latest telemetry record, with a
    /// `0.0` sentinel for the cases [`try_field_value`](Self::try_field_value)
    /// reports as `None`.
    pub fn field_value(&self, name: &str) -> f64 {
        self.try_field_value(name).unwrap_or(0.0)
    }

    /// The most recent complete telemetry record, if any.
    pub fn latest_record(&self) -> Option<Arc<Vec<u8>>> {
        self.shared.latest_record()
    }

    /// The field map installed at connect time, if connected.
    pub fn field_map(&self) -> Option<Arc<FieldMap>> {
        self.field_map.read().unwrap().clone()
    }

    /// Subscribe to controller events (records, unsolicited messages,
    /// connection state changes).
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    /// The model and firmware revision string reported at connect time,
    /// e.g. `"DMC4080 Rev 1.3c"`. Empty before the first connect.
    pub fn model(&self) -> String {
        self.model.read().unwrap().clone()
    }

    /// The controller serial number, if it answered `MG _BN`.
    pub fn serial_number(&self) -> Option<String> {
        self.serial_number.read().unwrap().clone()
    }

    /// Whether the controller is currently connected.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Produce the transport to handshake on, per the builder's source.
    async fn obtain_transport(&self) -> Result<Box<dyn Transport>> {
        match &self.source {
            TransportSource::Serial { path, baud } => {
                debug!(path, baud, "opening serial transport");
                Ok(Box::new(SerialTransport::open(path, *baud).await?))
            }
            TransportSource::Tcp { addr } => {
                debug!(addr, "opening TCP transport");
                Ok(Box::new(TcpTransport::connect(addr).await?))
            }
            TransportSource::Provided => {
                let transport = {
                    let mut guard = self.transport.lock().await;
                    std::mem::replace(
                        &mut *guard,
                        Box::new(DisconnectedTransport) as Box<dyn Transport>,
                    )
                };
                if !transport.is_connected() {
                    *self.transport.lock().await = transport;
                    return Err(Error::NotConnected);
                }
                Ok(transport)
            }
        }
    }

    /// Run the identification and configuration handshake.
    async fn handshake(&self, probe: &TransportProbe) -> Result<HandshakeOutcome> {
        // Model and firmware revision. 0x12 0x16 is the bare
        // identification sequence every DMC firmware answers.
        let ident = probe.query("\x12\x16").await?;
        let model = ident.trim().to_string();
        if model.is_empty() {
            return Err(Error::Protocol("empty model identification".into()));
        }
        debug!(model = %model, "controller identified");

        // Best-effort queries; older firmware rejects these.
        let serial_number = match probe.query("MG _BN").await {
            Ok(reply) => Some(reply.trim().to_string()),
            Err(e) => {
                debug!(error = %e, "serial number query failed");
                None
            }
        };
        if let Ok(reply) = probe.query("MG _BV").await {
            debug!(axes = %reply.trim(), "firmware-supported axis count");
        }

        // QZ reports "axes,general,coord,axis" byte counts; the layout
        // builders key off it.
        let qz = probe.query("QZ").await?;
        let geometry = qz
            .trim()
            .parse()
            .map_err(|e| Error::Protocol(format!("capability query: {e}")))?;
        let field_map = build_field_map(geometry, &model, probe).await?;

        let handle = self.discover_handle(probe).await;
        let mode = self.configure_telemetry(probe, handle).await;

        Ok(HandshakeOutcome {
            model,
            serial_number,
            field_map,
            mode,
        })
    }

    /// Discover which connection handle this session occupies.
    ///
    /// `WH` answers e.g. `"IHA"`; the trailing letter names the handle.
    /// Serial connections and rejecting firmware default to handle A.
    async fn discover_handle(&self, probe: &TransportProbe) -> char {
        match probe.query("WH").await {
            Ok(reply) => match reply.trim().chars().last() {
                Some(letter @ 'A'..='H') => letter,
                _ => 'A',
            },
            Err(e) => {
                debug!(error = %e, "handle query failed, assuming A");
                'A'
            }
        }
    }

    /// Configure how telemetry records will arrive, returning the mode
    /// the acquisition task should actually run in.
    ///
    /// Push mode asks the controller to stream records with `DR`; a
    /// refusal (old firmware, record streaming already claimed by another
    /// host) falls back to polling at the same period. Both modes route
    /// unsolicited traffic to this handle (`CF`) and set the high bit on
    /// unsolicited bytes (`CW 1`) so they can be demultiplexed.
    async fn configure_telemetry(&self, probe: &TransportProbe, handle: char) -> TelemetryMode {
        let mode = match self.requested_mode {
            TelemetryMode::Push { period_ms } => {
                let cmd = format!("DR {}, {}", period_ms, handle as u8 - b'A');
                match probe.query(&cmd).await {
                    Ok(_) => TelemetryMode::Push { period_ms },
                    Err(e) => {
                        warn!(error = %e, "record streaming refused, falling back to polling");
                        TelemetryMode::Polled {
                            interval_ms: period_ms,
                        }
                    }
                }
            }
            TelemetryMode::Polled { interval_ms } => TelemetryMode::Polled { interval_ms },
        };

        if let Err(e) = probe.query(&format!("CF {handle}")).await {
            debug!(error = %e, "CF rejected, unsolicited routing unchanged");
        }
        if let Err(e) = probe.query("CW 1").await {
            debug!(error = %e, "CW rejected, unsolicited marking unchanged");
        }
        mode
    }
}

/// A [`CapabilityProbe`] over a live transport, used for the whole
/// connect handshake before the transport moves into the acquisition
/// task.
struct TransportProbe {
    transport: Mutex<Box<dyn Transport>>,
    timeout: Duration,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl TransportProbe {
    fn new(
        transport: Box<dyn Transport>,
        timeout: Duration,
        event_tx: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        TransportProbe {
            transport: Mutex::new(transport),
            timeout,
            event_tx,
        }
    }

    fn into_transport(self) -> Box<dyn Transport> {
        self.transport.into_inner()
    }
}

#[async_trait]
impl CapabilityProbe for TransportProbe {
    async fn query(&self, cmd: &str) -> Result<String> {
        let mut transport = self.transport.lock().await;
        execute_exchange(&mut **transport, cmd, self.timeout, &self.event_tx).await
    }
}
