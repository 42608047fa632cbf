//! Asynchronous controller event types.
//!
//! Events are emitted by the controller driver through a
//! `tokio::sync::broadcast` channel: telemetry records as they arrive,
//! unsolicited messages from controller programs, and connection state
//! changes. EPICS-style soft front ends and motion GUIs subscribe to
//! these events for real-time updates without polling.

use std::sync::Arc;

use crate::types::Axis;

/// An event emitted by a controller driver.
///
/// Events are delivered on a best-effort basis through a bounded
/// broadcast channel; slow consumers may miss events under heavy load
/// (e.g. a fast telemetry period with a stalled subscriber).
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A complete telemetry record was read.
    ///
    /// The raw record bytes are shared via `Arc` so the acquisition loop
    /// never copies a record per subscriber. Decode individual fields
    /// with the controller's field map.
    Record(Arc<Vec<u8>>),

    /// An axis reported that homing found the home position.
    AxisHomed {
        /// Which axis homed.
        axis: Axis,
    },

    /// An axis reported that its homing sequence finished and the
    /// homing flag was cleared.
    HomingComplete {
        /// Which axis finished homing.
        axis: Axis,
    },

    /// An unsolicited name/value pair from a controller program.
    ///
    /// Known messages (homing) are also surfaced as their dedicated
    /// variants; everything else only appears here.
    Unsolicited {
        /// Message name with the trailing axis letter removed.
        name: String,
        /// The axis the message refers to, if the name carried a valid
        /// axis letter suffix.
        axis: Option<Axis>,
        /// The numeric value accompanying the name.
        value: f64,
    },

    /// Successfully connected to the controller.
    Connected,

    /// Connection to the controller was lost or closed.
    Disconnected,
}
