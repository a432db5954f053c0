//! Radio controller: NIC lifecycle, capture loop, event fan-out.
//!
//! Setup is a transaction with compensating undo: the monitor interface, the
//! capture socket and the spoofed address are acquired in order and every
//! failure path releases whatever was already acquired, in reverse. The run
//! loop then multiplexes tuner status events and captured frames until a
//! terminal status or a socket failure, and tears the card back down.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use nix::sys::signal::{self, SigHandler, Signal};
use thiserror::Error;

use dyskt_nic::{Channel, IfaceMode, IwParam, LinkState, MacAddr, NicError, NicOps, Phy};

use crate::config::{Antenna, ConfigError, RadioConfig};
use crate::event::{
    AckPayload, ErrCategory, RtoBody, RtoEvent, Status, StatusEvent, SupervisorMsg, TunerState,
};
use crate::sock::{FrameSource, PacketSocket, SocketError, MAX_MPDU, SOCK_READ_TIMEOUT};
use crate::tuner::Tuner;

/// Name prefix of controller-owned monitor interfaces.
pub const VNIC_PREFIX: &str = "dyskt";

/// Depth of the tuner status queue.
const STATUS_QUEUE_DEPTH: usize = 64;

/// Anything that can take a radio controller down.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("nic: {0}")]
    Nic(#[from] NicError),
    #[error("socket: {0}")]
    Socket(#[from] SocketError),
}

/// Read-only snapshot of the radio, handed to the RTO in the `UP` event.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RadioDescriptor {
    pub nic: String,
    pub vnic: String,
    pub phy: Phy,
    pub mac: MacAddr,
    pub role: String,
    pub spoofed: Option<MacAddr>,
    pub driver: Option<String>,
    pub chipset: Option<String>,
    pub standards: Option<String>,
    pub txpwr: Option<String>,
    pub channels: Vec<u16>,
    pub desc: String,
    pub antennas: Vec<Antenna>,
}

/// One radio controller. Owns the monitor interface and the capture socket
/// for its lifetime; the tuner worker is spawned by [`run`](Self::run).
pub struct RadioController<N: NicOps, S: FrameSource = PacketSocket> {
    role: String,
    nic_name: String,
    phy: Phy,
    vnic: String,
    nic: Arc<N>,
    sock: S,
    rto: Sender<RtoEvent>,
    sup: Sender<SupervisorMsg>,
    status_rx: Receiver<Status>,
    tuner: Option<Tuner<N>>,
    tuner_stop: Arc<AtomicBool>,
    /// The tuner's state as last reported, lagging it by at most one event.
    stuner: TunerState,
    spoofed: Option<MacAddr>,
    descriptor: RadioDescriptor,
}

impl<N: NicOps> RadioController<N> {
    /// Sets the radio up for capture on a real `AF_PACKET` socket.
    pub fn new(
        cfg: RadioConfig,
        nic: Arc<N>,
        ctl: Receiver<String>,
        rto: Sender<RtoEvent>,
        sup: Sender<SupervisorMsg>,
    ) -> Result<Self, RadioError> {
        Self::with_frame_source(cfg, nic, ctl, rto, sup, |iface| {
            PacketSocket::open(iface, SOCK_READ_TIMEOUT)
        })
    }
}

impl<N: NicOps, S: FrameSource> RadioController<N, S> {
    /// Full setup with a caller-supplied frame source, opened on the virtual
    /// monitor interface once it exists. Emits `UP` to the RTO on success,
    /// stamped at the moment the source was opened.
    pub fn with_frame_source(
        cfg: RadioConfig,
        nic: Arc<N>,
        ctl: Receiver<String>,
        rto: Sender<RtoEvent>,
        sup: Sender<SupervisorMsg>,
        open: impl FnOnce(&str) -> Result<S, SocketError>,
    ) -> Result<Self, RadioError> {
        if cfg.dwell.is_zero() {
            return Err(ConfigError::Dwell.into());
        }
        let antennas = cfg.antennas.validate()?;

        // Resolve the card and its phy.
        let present = nic.list_wireless_ifaces()?;
        if !present.iter().any(|name| name == &cfg.nic) {
            return Err(ConfigError::NicNotFound {
                role: cfg.role.clone(),
                nic: cfg.nic.clone(),
            }
            .into());
        }
        let (phy, phy_ifaces) = nic.get_phy_and_ifaces(&cfg.nic)?;
        let mac = phy_ifaces
            .first()
            .map(|info| info.addr)
            .ok_or_else(|| ConfigError::NoInterfaces {
                role: cfg.role.clone(),
                nic: cfg.nic.clone(),
            })?;

        // Descriptor properties. Lookups degrade to absent values rather
        // than aborting setup.
        let driver = ok_or_log(nic.driver_of(&cfg.nic), &cfg.nic, "driver");
        let chipset = match &driver {
            Some(drv) => ok_or_log(nic.chipset_of(drv), &cfg.nic, "chipset"),
            None => None,
        };
        let standards = ok_or_log(
            nic.iw_config(&cfg.nic, IwParam::Standards),
            &cfg.nic,
            "standards",
        );
        let txpwr = ok_or_log(
            nic.iw_config(&cfg.nic, IwParam::TxPower),
            &cfg.nic,
            "tx power",
        );
        let supported = match nic.supported_channels(phy) {
            Ok(channels) => channels,
            Err(err) => {
                warn!("{}: no channel list for {phy}: {err}", cfg.nic);
                Vec::new()
            }
        };

        // Spoof before any virtual interface exists.
        let mut spoofed = None;
        if let Some(req) = cfg.spoofed {
            nic.set_link(&cfg.nic, LinkState::Down)?;
            let assigned = nic.set_hw_addr(&cfg.nic, req)?;
            info!("{}: {} spoofed to {assigned}", cfg.role, cfg.nic);
            spoofed = Some(assigned);
        }

        // Take full control of the phy.
        for info in &phy_ifaces {
            nic.delete_virtual(&info.name)?;
        }

        // Fresh monitor interface under our own name.
        let vnic = alloc_vnic_name(&nic.list_wireless_ifaces()?);
        if let Err(err) = nic.add_virtual(phy, &vnic, IfaceMode::Monitor) {
            if let Err(err2) = nic.set_link(&cfg.nic, LinkState::Up) {
                warn!("{}: failed to restore {}: {err2}", cfg.role, cfg.nic);
            }
            return Err(err.into());
        }
        if let Err(err) = nic.set_link(&vnic, LinkState::Up) {
            restore_nic(nic.as_ref(), phy, &cfg.nic, &vnic, None);
            return Err(err.into());
        }

        // Capture socket. From here on every failure unwinds the monitor
        // interface before propagating.
        let sock = match open(&vnic) {
            Ok(sock) => sock,
            Err(err) => {
                restore_nic(nic.as_ref(), phy, &cfg.nic, &vnic, None);
                return Err(err.into());
            }
        };
        let uptime = SystemTime::now();

        let (scan, start) = match stage_scan(nic.as_ref(), &vnic, &cfg, &supported) {
            Ok(staged) => staged,
            Err(err) => {
                restore_nic(nic.as_ref(), phy, &cfg.nic, &vnic, None);
                return Err(err);
            }
        };

        // Wire the tuner and announce.
        let pattern_len = scan.len();
        let (status_tx, status_rx) = bounded(STATUS_QUEUE_DEPTH);
        let tuner = Tuner::new(
            ctl,
            status_tx,
            Arc::clone(&nic),
            vnic.clone(),
            scan,
            vec![cfg.dwell; pattern_len],
            start,
            cfg.paused,
        );
        let tuner_stop = tuner.stop_handle();

        let descriptor = RadioDescriptor {
            nic: cfg.nic.clone(),
            vnic: vnic.clone(),
            phy,
            mac,
            role: cfg.role.clone(),
            spoofed,
            driver,
            chipset,
            standards,
            txpwr,
            channels: supported,
            desc: cfg.desc,
            antennas,
        };

        let controller = Self {
            role: cfg.role,
            nic_name: cfg.nic,
            phy,
            vnic,
            nic,
            sock,
            rto,
            sup,
            status_rx,
            tuner: Some(tuner),
            tuner_stop,
            stuner: if cfg.paused {
                TunerState::Pause
            } else {
                TunerState::Scan
            },
            spoofed,
            descriptor,
        };
        controller.to_rto_at(uptime, RtoBody::Up(Box::new(controller.descriptor.clone())));
        info!(
            "{}: radio up, {} monitoring as {}",
            controller.role, controller.nic_name, controller.vnic
        );
        Ok(controller)
    }

    pub fn descriptor(&self) -> &RadioDescriptor {
        &self.descriptor
    }

    pub fn vnic(&self) -> &str {
        &self.vnic
    }

    /// Captures until a terminal status or a socket failure, then restores
    /// the card. Blocking; a controller normally runs in its own process.
    pub fn run(mut self)
    where
        N: 'static,
    {
        let Some(tuner) = self.tuner.take() else {
            return;
        };
        let spawned = thread::Builder::new()
            .name(format!("tuner-{}", self.vnic))
            .spawn(move || tuner.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                error!("{}: spawning tuner worker: {err}", self.vnic);
                self.to_sup(SupervisorMsg::Err {
                    role: self.role.clone(),
                    category: ErrCategory::Unknown,
                    reason: err.to_string(),
                });
                if !self.teardown(None) {
                    self.warn_incomplete();
                }
                return;
            }
        };

        let mut buf = vec![0u8; MAX_MPDU];
        loop {
            match self.status_rx.try_recv() {
                // Nothing from the tuner; drain the air.
                Err(TryRecvError::Empty) => match self.sock.recv_frame(&mut buf) {
                    Ok(Some(n)) => {
                        if self.stuner != TunerState::Pause {
                            self.to_rto(RtoBody::Frame(buf[..n].to_vec()));
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        self.to_rto(RtoBody::Fail(err.to_string()));
                        self.to_sup(SupervisorMsg::Err {
                            role: self.role.clone(),
                            category: ErrCategory::Socket,
                            reason: err.to_string(),
                        });
                        break;
                    }
                },
                Ok(status) => {
                    if !self.dispatch_status(status) {
                        break;
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    let reason = "tuner status queue closed".to_string();
                    self.to_rto(RtoBody::Fail(reason.clone()));
                    self.to_sup(SupervisorMsg::Err {
                        role: self.role.clone(),
                        category: ErrCategory::Unknown,
                        reason,
                    });
                    break;
                }
            }
        }

        if !self.teardown(Some(handle)) {
            self.warn_incomplete();
        }
        info!("{}: radio controller down", self.role);
    }

    /// Releases everything acquired by setup without running. For callers
    /// that abort between construction and [`run`](Self::run).
    pub fn shutdown(mut self) -> bool {
        let clean = self.teardown(None);
        if !clean {
            self.warn_incomplete();
        }
        clean
    }

    /// Applies one tuner status event. Returns false on a terminal status.
    fn dispatch_status(&mut self, status: Status) -> bool {
        let Status { ts, cmd_id, event } = status;
        match event {
            StatusEvent::Err(reason) => {
                if cmd_id >= 0 {
                    self.to_sup(SupervisorMsg::CmdErr {
                        role: self.role.clone(),
                        cmd_id,
                        reason,
                    });
                }
            }
            StatusEvent::Fail(reason) => self.to_rto_at(ts, RtoBody::Fail(reason)),
            StatusEvent::State(state) => {
                if cmd_id >= 0 {
                    self.ack(cmd_id, AckPayload::State(state));
                }
            }
            StatusEvent::Hold(ch) => {
                self.stuner = TunerState::Hold;
                self.to_rto_at(ts, RtoBody::Hold(ch));
                if cmd_id >= 0 {
                    self.ack(cmd_id, AckPayload::Tuned(ch));
                }
            }
            StatusEvent::Scan(pattern) => {
                self.stuner = TunerState::Scan;
                self.to_rto(RtoBody::Scan(pattern.clone()));
                if cmd_id >= 0 {
                    self.ack(cmd_id, AckPayload::Pattern(pattern));
                }
            }
            StatusEvent::Listen(ch) => {
                self.stuner = TunerState::Listen;
                self.to_rto(RtoBody::Listen(ch));
                if cmd_id >= 0 {
                    self.ack(cmd_id, AckPayload::Tuned(ch));
                }
            }
            StatusEvent::Pause => {
                self.stuner = TunerState::Pause;
                self.to_rto(RtoBody::Pause);
                if cmd_id >= 0 {
                    self.ack(cmd_id, AckPayload::Empty);
                }
            }
            StatusEvent::Stop => {
                self.stuner = TunerState::Stop;
                return false;
            }
        }
        true
    }

    /// Stops the tuner and restores the card. Returns whether every step
    /// succeeded.
    fn teardown(&mut self, handle: Option<JoinHandle<()>>) -> bool {
        let mut clean = true;
        self.tuner_stop.store(true, Ordering::Relaxed);
        self.tuner = None;
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("{}: tuner worker panicked", self.vnic);
                clean = false;
            }
        }
        clean &= restore_nic(
            self.nic.as_ref(),
            self.phy,
            &self.nic_name,
            &self.vnic,
            self.spoofed.as_ref(),
        );
        clean
    }

    fn warn_incomplete(&self) {
        self.to_sup(SupervisorMsg::Warn {
            role: self.role.clone(),
            category: ErrCategory::Shutdown,
            reason: "Incomplete reset".to_string(),
        });
    }

    fn ack(&self, cmd_id: i32, payload: AckPayload) {
        self.to_sup(SupervisorMsg::CmdAck {
            role: self.role.clone(),
            cmd_id,
            payload,
        });
    }

    fn to_rto(&self, body: RtoBody) {
        self.to_rto_at(SystemTime::now(), body);
    }

    fn to_rto_at(&self, ts: SystemTime, body: RtoBody) {
        let event = RtoEvent {
            vnic: self.vnic.clone(),
            ts,
            body,
        };
        if self.rto.send(event).is_err() {
            warn!("{}: RTO sink closed", self.vnic);
        }
    }

    fn to_sup(&self, msg: SupervisorMsg) {
        if self.sup.send(msg).is_err() {
            debug!("{}: supervisor endpoint closed", self.vnic);
        }
    }
}

/// Builds the effective scan pattern and parks the radio on its starting
/// channel: filter against capabilities and the pass list, then probe each
/// survivor on the card, dropping entries it rejects as invalid arguments.
fn stage_scan<N: NicOps>(
    nic: &N,
    vnic: &str,
    cfg: &RadioConfig,
    supported: &[u16],
) -> Result<(Vec<Channel>, usize), RadioError> {
    let tunable: HashSet<u16> = supported.iter().copied().collect();
    let mut scan: Vec<Channel> = cfg
        .scan
        .iter()
        .copied()
        .filter(|ch| tunable.contains(&ch.ch) && !cfg.pass.contains(ch))
        .collect();

    let mut hop = Duration::ZERO;
    let mut i = 0;
    while i < scan.len() {
        let t = Instant::now();
        match nic.set_channel(vnic, scan[i]) {
            Ok(()) => {
                hop += t.elapsed();
                i += 1;
            }
            Err(err) if err.is_invalid_argument() => {
                debug!("{vnic}: dropping {}: {err}", scan[i]);
                scan.remove(i);
            }
            Err(err) => return Err(err.into()),
        }
    }
    if scan.is_empty() {
        return Err(ConfigError::EmptyScanPattern.into());
    }

    let avg_hop = hop / scan.len() as u32;
    let interval = (cfg.dwell + avg_hop) * scan.len() as u32;
    debug!(
        "{vnic}: {} scannable channels, avg hop {avg_hop:?}, full pass {interval:?}",
        scan.len()
    );

    let start = cfg
        .scan_start
        .and_then(|ch| scan.iter().position(|&entry| entry == ch))
        .unwrap_or(0);
    nic.set_channel(vnic, scan[start])?;
    Ok((scan, start))
}

/// Undoes the monitor takeover: the virtual interface goes away, a managed
/// interface with the original name comes back and is brought up, resetting
/// the hardware address on the way when it was spoofed. Secondary failures
/// are logged and folded into the return value.
fn restore_nic<N: NicOps>(
    nic: &N,
    phy: Phy,
    name: &str,
    vnic: &str,
    spoofed: Option<&MacAddr>,
) -> bool {
    let mut clean = true;
    if let Err(err) = nic.delete_virtual(vnic) {
        warn!("{vnic}: removing monitor interface: {err}");
        clean = false;
    }
    if let Err(err) = nic.add_virtual(phy, name, IfaceMode::Managed) {
        warn!("{name}: re-adding managed interface: {err}");
        clean = false;
    }
    if spoofed.is_some() {
        if let Err(err) = nic.set_link(name, LinkState::Down) {
            warn!("{name}: lowering link: {err}");
            clean = false;
        }
        if let Err(err) = nic.reset_hw_addr(name) {
            warn!("{name}: resetting hardware address: {err}");
            clean = false;
        }
    }
    if let Err(err) = nic.set_link(name, LinkState::Up) {
        warn!("{name}: raising link: {err}");
        clean = false;
    }
    clean
}

/// Smallest unused `dyskt<k>` interface name.
fn alloc_vnic_name(existing: &[String]) -> String {
    let used: HashSet<u32> = existing
        .iter()
        .filter_map(|name| name.strip_prefix(VNIC_PREFIX))
        .filter_map(|suffix| suffix.parse().ok())
        .collect();
    let k = (0u32..).find(|k| !used.contains(k)).unwrap_or(0);
    format!("{VNIC_PREFIX}{k}")
}

fn ok_or_log<T>(res: Result<T, NicError>, nic: &str, what: &str) -> Option<T> {
    match res {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("{nic}: no {what}: {err}");
            None
        }
    }
}

/// Makes the process immune to the terminal signals its parent handles.
/// Lifecycle travels over the control endpoint as `!STOP!`; call this once
/// from the controller process entry point.
pub fn ignore_lifecycle_signals() -> io::Result<()> {
    // Safety: SIG_IGN installs no handler code.
    unsafe {
        signal::signal(Signal::SIGINT, SigHandler::SigIgn).map_err(errno_to_io)?;
        signal::signal(Signal::SIGTERM, SigHandler::SigIgn).map_err(errno_to_io)?;
    }
    Ok(())
}

fn errno_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}
