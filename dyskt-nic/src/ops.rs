//! Driver-level facade over the platform's wireless primitives.

use core::fmt;

use thiserror::Error;

use crate::chan::Channel;
use crate::mac::MacAddr;

/// Handle of a wireless physical device. One phy may host several virtual
/// interfaces at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Phy(pub u32);

impl fmt::Display for Phy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phy{}", self.0)
    }
}

/// One interface hanging off a phy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceInfo {
    pub name: String,
    pub addr: MacAddr,
}

/// Operating mode of a virtual interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceMode {
    Managed,
    Monitor,
}

impl fmt::Display for IfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IfaceMode::Managed => "managed",
            IfaceMode::Monitor => "monitor",
        })
    }
}

/// Administrative link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// Requested hardware address for [`NicOps::set_hw_addr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HwAddr {
    /// A fresh locally-administered unicast address chosen by the facade.
    Random,
    Literal(MacAddr),
}

/// Textual device parameters readable through [`NicOps::iw_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IwParam {
    Standards,
    TxPower,
}

/// Facade failure. Callers distinguish exactly one case: the device rejecting
/// an argument (a channel/width combination the card cannot tune, for
/// instance), which is recoverable during scan-pattern filtering. Everything
/// else is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NicError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no such interface: {0}")]
    NoSuchIface(String),
    #[error("no such phy: {0}")]
    NoSuchPhy(Phy),
    #[error("{op} failed on {target}: {msg}")]
    Op {
        op: &'static str,
        target: String,
        msg: String,
    },
}

impl NicError {
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, NicError::InvalidArgument(_))
    }
}

/// The driver-level operations the radio controller needs from a wireless
/// NIC. Implementations wrap the platform's netlink/ioctl plumbing; all
/// methods take `&self` and must be callable from the tuner worker and the
/// controller loop concurrently.
pub trait NicOps: Send + Sync {
    /// Names of every wireless interface currently present.
    fn list_wireless_ifaces(&self) -> Result<Vec<String>, NicError>;

    /// Resolves the phy hosting `nic` and lists all interfaces on that phy.
    fn get_phy_and_ifaces(&self, nic: &str) -> Result<(Phy, Vec<IfaceInfo>), NicError>;

    /// Channel numbers the card behind `phy` can tune to.
    fn supported_channels(&self, phy: Phy) -> Result<Vec<u16>, NicError>;

    /// Creates a virtual interface `name` on `phy` in the given mode.
    fn add_virtual(&self, phy: Phy, name: &str, mode: IfaceMode) -> Result<(), NicError>;

    /// Removes a virtual interface by name.
    fn delete_virtual(&self, name: &str) -> Result<(), NicError>;

    /// Tunes `nic` to the given channel specification.
    fn set_channel(&self, nic: &str, ch: Channel) -> Result<(), NicError>;

    /// Raises or lowers the link on `nic`.
    fn set_link(&self, nic: &str, state: LinkState) -> Result<(), NicError>;

    /// Overrides the hardware address of `nic`, returning the address that
    /// was actually assigned. The link must be down.
    fn set_hw_addr(&self, nic: &str, addr: HwAddr) -> Result<MacAddr, NicError>;

    /// Restores the factory hardware address of `nic`, returning it.
    fn reset_hw_addr(&self, nic: &str) -> Result<MacAddr, NicError>;

    /// Kernel driver bound to `nic`.
    fn driver_of(&self, nic: &str) -> Result<String, NicError>;

    /// Chipset behind a driver.
    fn chipset_of(&self, driver: &str) -> Result<String, NicError>;

    /// Reads a textual device parameter.
    fn iw_config(&self, nic: &str, param: IwParam) -> Result<String, NicError>;
}
