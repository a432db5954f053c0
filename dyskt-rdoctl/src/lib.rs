//! DySKT radio controller.
//!
//! A radio controller owns one wireless NIC. It places the card in monitor
//! mode behind a fresh virtual interface, walks a scan pattern of channels
//! with dwell-timed hops, captures raw 802.11 frames and forwards them to
//! the RTO sink, while obeying control tokens from the Supervisor.
//!
//! Internally a controller is two cooperating workers: the [`tuner::Tuner`]
//! drives channel selection and interprets tokens, the
//! [`controller::RadioController`] run loop drains the capture socket and
//! fans events out. They share nothing but a status queue and a stop flag.

pub mod config;
pub mod controller;
pub mod event;
pub mod sock;
pub mod token;
pub mod tuner;

pub use dyskt_nic as nic;

pub use config::{Antenna, AntennaConfig, ConfigError, RadioConfig};
pub use controller::{
    ignore_lifecycle_signals, RadioController, RadioDescriptor, RadioError, VNIC_PREFIX,
};
pub use event::{
    AckPayload, ErrCategory, RtoBody, RtoEvent, Status, StatusEvent, SupervisorMsg, TunerState,
    INTERNAL_CMD_ID,
};
pub use sock::{FrameSource, PacketSocket, SocketError, MAX_MPDU, SOCK_READ_TIMEOUT};
pub use token::{Cmd, Token, TokenError, STOP_TOKEN};
pub use tuner::Tuner;

#[cfg(any(test, feature = "sim"))]
pub use sock::ReplaySource;
