//! In-memory stand-in for the platform NIC facade.
//!
//! [`SimNic`] models phys, interfaces, link state, hardware addresses and
//! channel tuning well enough to drive the radio controller end to end
//! without privileges or hardware. It records every mutating call in an
//! operation log and supports targeted failure injection, in the style of a
//! scripted test radio.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::chan::Channel;
use crate::mac::MacAddr;
use crate::ops::{HwAddr, IfaceInfo, IfaceMode, IwParam, LinkState, NicError, NicOps, Phy};

/// One entry of the operation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    AddVirtual {
        phy: Phy,
        name: String,
        mode: IfaceMode,
    },
    DeleteVirtual {
        name: String,
    },
    SetChannel {
        iface: String,
        ch: Channel,
    },
    SetLink {
        iface: String,
        state: LinkState,
    },
    SetHwAddr {
        iface: String,
        addr: MacAddr,
    },
    ResetHwAddr {
        iface: String,
    },
}

/// A mutating operation the simulator can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    AddVirtual,
    DeleteVirtual,
    SetChannel,
    SetLink,
    SetHwAddr,
    ResetHwAddr,
}

/// Externally observable state of a simulated interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimIface {
    pub phy: Phy,
    pub mode: IfaceMode,
    pub link: LinkState,
    pub addr: MacAddr,
}

#[derive(Debug, Clone)]
struct PhyState {
    channels: Vec<u16>,
    factory: MacAddr,
    driver: String,
}

#[derive(Debug, Default)]
struct State {
    phys: HashMap<u32, PhyState>,
    // BTreeMap keeps interface listings deterministic.
    ifaces: BTreeMap<String, SimIface>,
    current: HashMap<String, Channel>,
    rejected: HashSet<Channel>,
    fail_once: HashSet<FailPoint>,
    ops: Vec<SimOp>,
}

/// Scriptable NIC facade.
#[derive(Debug, Default)]
pub struct SimNic {
    state: Mutex<State>,
}

impl SimNic {
    pub fn new() -> Self {
        Self::default()
    }

    /// A rig with one phy, the given supported channels and a single managed
    /// interface named `nic`. Covers most tests.
    pub fn single_radio(nic: &str, channels: &[u16]) -> Self {
        let sim = Self::new();
        sim.add_phy(Phy(0), channels, MacAddr([0x00, 0x1d, 0x7e, 0x0a, 0x0b, 0x0c]));
        sim.add_iface(nic, Phy(0), IfaceMode::Managed, LinkState::Up);
        sim
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_phy(&self, phy: Phy, channels: &[u16], factory: MacAddr) {
        self.lock().phys.insert(
            phy.0,
            PhyState {
                channels: channels.to_vec(),
                factory,
                driver: "sim80211".to_string(),
            },
        );
    }

    pub fn add_iface(&self, name: &str, phy: Phy, mode: IfaceMode, link: LinkState) {
        let mut st = self.lock();
        let addr = st
            .phys
            .get(&phy.0)
            .map(|p| p.factory)
            .unwrap_or(MacAddr([0; 6]));
        st.ifaces.insert(
            name.to_string(),
            SimIface {
                phy,
                mode,
                link,
                addr,
            },
        );
    }

    /// Makes the card report "invalid argument" for one channel/width pair.
    pub fn reject_channel(&self, ch: Channel) {
        self.lock().rejected.insert(ch);
    }

    /// Arms a one-shot failure for the next call hitting `point`.
    pub fn fail_next(&self, point: FailPoint) {
        self.lock().fail_once.insert(point);
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.lock().ops.clone()
    }

    /// Channels set on `iface`, in call order.
    pub fn channels_set(&self, iface: &str) -> Vec<Channel> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                SimOp::SetChannel { iface: i, ch } if i == iface => Some(*ch),
                _ => None,
            })
            .collect()
    }

    pub fn iface(&self, name: &str) -> Option<SimIface> {
        self.lock().ifaces.get(name).cloned()
    }

    pub fn current_channel(&self, iface: &str) -> Option<Channel> {
        self.lock().current.get(iface).copied()
    }

    fn trip(&self, st: &mut State, point: FailPoint, op: &'static str, target: &str) -> Result<(), NicError> {
        if st.fail_once.remove(&point) {
            return Err(NicError::Op {
                op,
                target: target.to_string(),
                msg: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl NicOps for SimNic {
    fn list_wireless_ifaces(&self) -> Result<Vec<String>, NicError> {
        Ok(self.lock().ifaces.keys().cloned().collect())
    }

    fn get_phy_and_ifaces(&self, nic: &str) -> Result<(Phy, Vec<IfaceInfo>), NicError> {
        let st = self.lock();
        let phy = st
            .ifaces
            .get(nic)
            .ok_or_else(|| NicError::NoSuchIface(nic.to_string()))?
            .phy;
        let mut infos: Vec<IfaceInfo> = st
            .ifaces
            .iter()
            .filter(|(_, iface)| iface.phy == phy)
            .map(|(name, iface)| IfaceInfo {
                name: name.clone(),
                addr: iface.addr,
            })
            .collect();
        // The queried interface comes first; its address is the one callers
        // treat as the hardware address of the radio.
        infos.sort_by_key(|info| info.name != nic);
        Ok((phy, infos))
    }

    fn supported_channels(&self, phy: Phy) -> Result<Vec<u16>, NicError> {
        self.lock()
            .phys
            .get(&phy.0)
            .map(|p| p.channels.clone())
            .ok_or(NicError::NoSuchPhy(phy))
    }

    fn add_virtual(&self, phy: Phy, name: &str, mode: IfaceMode) -> Result<(), NicError> {
        let mut st = self.lock();
        self.trip(&mut st, FailPoint::AddVirtual, "add_virtual", name)?;
        if !st.phys.contains_key(&phy.0) {
            return Err(NicError::NoSuchPhy(phy));
        }
        if st.ifaces.contains_key(name) {
            return Err(NicError::InvalidArgument(format!(
                "interface {name} already exists"
            )));
        }
        let addr = st.phys[&phy.0].factory;
        st.ifaces.insert(
            name.to_string(),
            SimIface {
                phy,
                mode,
                link: LinkState::Down,
                addr,
            },
        );
        st.ops.push(SimOp::AddVirtual {
            phy,
            name: name.to_string(),
            mode,
        });
        Ok(())
    }

    fn delete_virtual(&self, name: &str) -> Result<(), NicError> {
        let mut st = self.lock();
        self.trip(&mut st, FailPoint::DeleteVirtual, "delete_virtual", name)?;
        st.ifaces
            .remove(name)
            .ok_or_else(|| NicError::NoSuchIface(name.to_string()))?;
        st.current.remove(name);
        st.ops.push(SimOp::DeleteVirtual {
            name: name.to_string(),
        });
        Ok(())
    }

    fn set_channel(&self, nic: &str, ch: Channel) -> Result<(), NicError> {
        let mut st = self.lock();
        self.trip(&mut st, FailPoint::SetChannel, "set_channel", nic)?;
        let phy = st
            .ifaces
            .get(nic)
            .ok_or_else(|| NicError::NoSuchIface(nic.to_string()))?
            .phy;
        let supported = st
            .phys
            .get(&phy.0)
            .ok_or(NicError::NoSuchPhy(phy))?
            .channels
            .contains(&ch.ch);
        if !supported || st.rejected.contains(&ch) {
            return Err(NicError::InvalidArgument(format!("cannot tune {ch}")));
        }
        st.current.insert(nic.to_string(), ch);
        st.ops.push(SimOp::SetChannel {
            iface: nic.to_string(),
            ch,
        });
        Ok(())
    }

    fn set_link(&self, nic: &str, state: LinkState) -> Result<(), NicError> {
        let mut st = self.lock();
        self.trip(&mut st, FailPoint::SetLink, "set_link", nic)?;
        let iface = st
            .ifaces
            .get_mut(nic)
            .ok_or_else(|| NicError::NoSuchIface(nic.to_string()))?;
        iface.link = state;
        st.ops.push(SimOp::SetLink {
            iface: nic.to_string(),
            state,
        });
        Ok(())
    }

    fn set_hw_addr(&self, nic: &str, addr: HwAddr) -> Result<MacAddr, NicError> {
        let mut st = self.lock();
        self.trip(&mut st, FailPoint::SetHwAddr, "set_hw_addr", nic)?;
        let iface = st
            .ifaces
            .get_mut(nic)
            .ok_or_else(|| NicError::NoSuchIface(nic.to_string()))?;
        if iface.link == LinkState::Up {
            return Err(NicError::Op {
                op: "set_hw_addr",
                target: nic.to_string(),
                msg: "link is up".to_string(),
            });
        }
        let assigned = match addr {
            HwAddr::Literal(mac) => mac,
            HwAddr::Random => {
                let mut octets: [u8; 6] = rand::random();
                // Locally administered, unicast.
                octets[0] = (octets[0] | 0x02) & !0x01;
                MacAddr(octets)
            }
        };
        iface.addr = assigned;
        st.ops.push(SimOp::SetHwAddr {
            iface: nic.to_string(),
            addr: assigned,
        });
        Ok(assigned)
    }

    fn reset_hw_addr(&self, nic: &str) -> Result<MacAddr, NicError> {
        let mut st = self.lock();
        self.trip(&mut st, FailPoint::ResetHwAddr, "reset_hw_addr", nic)?;
        let phy = st
            .ifaces
            .get(nic)
            .ok_or_else(|| NicError::NoSuchIface(nic.to_string()))?
            .phy;
        let factory = st.phys.get(&phy.0).ok_or(NicError::NoSuchPhy(phy))?.factory;
        if let Some(iface) = st.ifaces.get_mut(nic) {
            iface.addr = factory;
        }
        st.ops.push(SimOp::ResetHwAddr {
            iface: nic.to_string(),
        });
        Ok(factory)
    }

    fn driver_of(&self, nic: &str) -> Result<String, NicError> {
        let st = self.lock();
        let phy = st
            .ifaces
            .get(nic)
            .ok_or_else(|| NicError::NoSuchIface(nic.to_string()))?
            .phy;
        Ok(st
            .phys
            .get(&phy.0)
            .ok_or(NicError::NoSuchPhy(phy))?
            .driver
            .clone())
    }

    fn chipset_of(&self, driver: &str) -> Result<String, NicError> {
        Ok(format!("{driver} rev A"))
    }

    fn iw_config(&self, nic: &str, param: IwParam) -> Result<String, NicError> {
        if !self.lock().ifaces.contains_key(nic) {
            return Err(NicError::NoSuchIface(nic.to_string()));
        }
        Ok(match param {
            IwParam::Standards => "b/g/n".to_string(),
            IwParam::TxPower => "20 dBm".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::ChannelWidth;

    fn ch(n: u16) -> Channel {
        Channel::new(n, ChannelWidth::NoHt)
    }

    #[test]
    fn single_radio_lists_the_nic() {
        let sim = SimNic::single_radio("wlan0", &[1, 6, 11]);
        assert_eq!(sim.list_wireless_ifaces().unwrap(), vec!["wlan0"]);
        let (phy, infos) = sim.get_phy_and_ifaces("wlan0").unwrap();
        assert_eq!(phy, Phy(0));
        assert_eq!(infos[0].name, "wlan0");
        assert_eq!(sim.supported_channels(phy).unwrap(), vec![1, 6, 11]);
    }

    #[test]
    fn unsupported_and_rejected_channels_are_invalid_arguments() {
        let sim = SimNic::single_radio("wlan0", &[1, 6, 11]);
        let err = sim.set_channel("wlan0", ch(14)).unwrap_err();
        assert!(err.is_invalid_argument());

        sim.reject_channel(Channel::new(6, ChannelWidth::Ht40Plus));
        let err = sim
            .set_channel("wlan0", Channel::new(6, ChannelWidth::Ht40Plus))
            .unwrap_err();
        assert!(err.is_invalid_argument());

        sim.set_channel("wlan0", ch(6)).unwrap();
        assert_eq!(sim.current_channel("wlan0"), Some(ch(6)));
    }

    #[test]
    fn virtual_lifecycle_and_log() {
        let sim = SimNic::single_radio("wlan0", &[1]);
        sim.add_virtual(Phy(0), "dyskt0", IfaceMode::Monitor).unwrap();
        sim.set_link("dyskt0", LinkState::Up).unwrap();
        sim.delete_virtual("dyskt0").unwrap();
        assert_eq!(
            sim.ops(),
            vec![
                SimOp::AddVirtual {
                    phy: Phy(0),
                    name: "dyskt0".to_string(),
                    mode: IfaceMode::Monitor,
                },
                SimOp::SetLink {
                    iface: "dyskt0".to_string(),
                    state: LinkState::Up,
                },
                SimOp::DeleteVirtual {
                    name: "dyskt0".to_string(),
                },
            ]
        );
    }

    #[test]
    fn spoof_and_reset_restore_factory_address() {
        let sim = SimNic::single_radio("wlan0", &[1]);
        let factory = sim.iface("wlan0").unwrap().addr;

        sim.set_link("wlan0", LinkState::Down).unwrap();
        let spoofed = sim.set_hw_addr("wlan0", HwAddr::Random).unwrap();
        assert_ne!(spoofed, factory);
        assert!(spoofed.is_local());
        assert_eq!(spoofed.octets()[0] & 0x01, 0);

        let restored = sim.reset_hw_addr("wlan0").unwrap();
        assert_eq!(restored, factory);
        assert_eq!(sim.iface("wlan0").unwrap().addr, factory);
    }

    #[test]
    fn set_hw_addr_requires_link_down() {
        let sim = SimNic::single_radio("wlan0", &[1]);
        assert!(sim.set_hw_addr("wlan0", HwAddr::Random).is_err());
    }

    #[test]
    fn fail_next_is_one_shot() {
        let sim = SimNic::single_radio("wlan0", &[1, 6]);
        sim.fail_next(FailPoint::SetChannel);
        assert!(sim.set_channel("wlan0", ch(1)).is_err());
        assert!(sim.set_channel("wlan0", ch(1)).is_ok());
    }
}
