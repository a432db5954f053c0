//! Event and message model.
//!
//! Three channels, three shapes: tuner status up to the controller,
//! controller events out to the RTO sink, and controller replies back to the
//! Supervisor. Payloads are typed per tag; formatting into the legacy
//! textual shapes happens at the process boundary, not here.

use std::fmt;
use std::time::SystemTime;

use dyskt_nic::Channel;

use crate::controller::RadioDescriptor;

/// `cmd_id` of internally-originated status events, which are not replies to
/// any Supervisor command and are never acknowledged.
pub const INTERNAL_CMD_ID: i32 = -1;

/// Control state of the tuner. `Stop` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TunerState {
    Scan,
    Hold,
    Pause,
    Listen,
    Stop,
}

impl TunerState {
    pub fn as_str(self) -> &'static str {
        match self {
            TunerState::Scan => "scan",
            TunerState::Hold => "hold",
            TunerState::Pause => "pause",
            TunerState::Listen => "listen",
            TunerState::Stop => "stop",
        }
    }
}

impl fmt::Display for TunerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry on the tuner status queue.
#[derive(Debug, Clone)]
pub struct Status {
    pub ts: SystemTime,
    /// `INTERNAL_CMD_ID`, or the id of the Supervisor command being answered.
    pub cmd_id: i32,
    pub event: StatusEvent,
}

impl Status {
    /// An event the tuner originated on its own.
    pub fn internal(event: StatusEvent) -> Self {
        Self {
            ts: SystemTime::now(),
            cmd_id: INTERNAL_CMD_ID,
            event,
        }
    }

    /// An event answering the Supervisor command `cmd_id`, stamped `ts` at
    /// token receipt.
    pub fn reply(ts: SystemTime, cmd_id: i32, event: StatusEvent) -> Self {
        Self { ts, cmd_id, event }
    }
}

/// Tuner-originated event, tagged by what happened.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// Entered scanning; carries the full scan pattern.
    Scan(Vec<Channel>),
    /// Holding on the channel the tuner is currently parked on.
    Hold(Channel),
    Pause,
    /// Listening on an explicitly requested channel.
    Listen(Channel),
    Stop,
    /// Answer to a `state` query.
    State(TunerState),
    /// A command was rejected; payload is the reason.
    Err(String),
    /// A hardware operation failed; the tuner keeps running.
    Fail(String),
}

/// Controller-to-RTO event.
#[derive(Debug, Clone)]
pub struct RtoEvent {
    pub vnic: String,
    pub ts: SystemTime,
    pub body: RtoBody,
}

#[derive(Debug, Clone)]
pub enum RtoBody {
    /// Radio is up and capturing; emitted exactly once per successful setup.
    Up(Box<RadioDescriptor>),
    /// One captured 802.11 MPDU.
    Frame(Vec<u8>),
    Scan(Vec<Channel>),
    Hold(Channel),
    Listen(Channel),
    Pause,
    Fail(String),
}

/// Controller-to-Supervisor reply.
#[derive(Debug, Clone)]
pub enum SupervisorMsg {
    /// Positive acknowledgement of the command `cmd_id`.
    CmdAck {
        role: String,
        cmd_id: i32,
        payload: AckPayload,
    },
    /// The command `cmd_id` was rejected.
    CmdErr {
        role: String,
        cmd_id: i32,
        reason: String,
    },
    /// The controller is going down after a runtime failure.
    Err {
        role: String,
        category: ErrCategory,
        reason: String,
    },
    /// Something non-fatal deserves operator attention.
    Warn {
        role: String,
        category: ErrCategory,
        reason: String,
    },
}

/// Payload of a positive acknowledgement, by acknowledged command.
#[derive(Debug, Clone)]
pub enum AckPayload {
    /// `state` reply.
    State(TunerState),
    /// `scan` reply: the active scan pattern.
    Pattern(Vec<Channel>),
    /// `hold`/`listen` reply: the channel the radio is parked on.
    Tuned(Channel),
    /// `pause` reply.
    Empty,
}

/// Failure category of `err`/`warn` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCategory {
    Socket,
    Unknown,
    Shutdown,
}

impl fmt::Display for ErrCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrCategory::Socket => "Socket",
            ErrCategory::Unknown => "Unknown",
            ErrCategory::Shutdown => "Shutdown",
        })
    }
}
