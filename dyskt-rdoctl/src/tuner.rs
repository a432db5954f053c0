//! Channel tuner worker.
//!
//! The tuner owns channel selection for one radio: it walks the scan pattern
//! with dwell-timed hops, interprets Supervisor control tokens, and reports
//! every state change as exactly one status event on its queue. It never
//! touches the capture socket.
//!
//! Invariants: the scan pattern and dwell table are non-empty and the same
//! length for the tuner's whole life; the pattern index only ever advances
//! modulo the pattern length.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};

use dyskt_nic::{Channel, NicOps};

use crate::event::{Status, StatusEvent, TunerState, INTERNAL_CMD_ID};
use crate::token::{self, Cmd, Token};

/// How often an unbounded control wait re-checks the stop flag. Bounds how
/// long a controller join can take.
const CTL_POLL: Duration = Duration::from_millis(250);

/// Outcome of an unbounded control wait.
enum Wake {
    Token(String),
    Shutdown,
    Disconnected,
}

/// The tuning half of a radio controller. Construct, then hand to a worker
/// thread via [`Tuner::run`].
pub struct Tuner<N: NicOps> {
    ctl: Receiver<String>,
    status: Sender<Status>,
    nic: Arc<N>,
    vnic: String,
    scan: Vec<Channel>,
    dwell: Vec<Duration>,
    idx: usize,
    state: TunerState,
    stop: Arc<AtomicBool>,
    /// Token consumed by an unbounded wait, replayed on the next iteration.
    pending: Option<String>,
}

impl<N: NicOps> Tuner<N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctl: Receiver<String>,
        status: Sender<Status>,
        nic: Arc<N>,
        vnic: String,
        scan: Vec<Channel>,
        dwell: Vec<Duration>,
        start: usize,
        paused: bool,
    ) -> Self {
        debug_assert!(!scan.is_empty());
        debug_assert_eq!(scan.len(), dwell.len());
        debug_assert!(start < scan.len());
        Self {
            ctl,
            status,
            nic,
            vnic,
            scan,
            dwell,
            idx: start,
            state: if paused {
                TunerState::Pause
            } else {
                TunerState::Scan
            },
            stop: Arc::new(AtomicBool::new(false)),
            pending: None,
        }
    }

    /// Flag observed between iterations; setting it makes [`run`](Self::run)
    /// return without emitting.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The channel the tuner is currently parked on.
    pub fn current(&self) -> Channel {
        self.scan[self.idx]
    }

    /// Walks channels until stopped. Blocking; meant for a dedicated thread.
    pub fn run(mut self) {
        debug!("{}: tuner up, initial state {}", self.vnic, self.state);
        if self.state == TunerState::Pause {
            self.emit(Status::internal(StatusEvent::Pause));
            if !self.park() {
                return;
            }
        } else {
            self.emit(Status::internal(StatusEvent::Scan(self.scan.clone())));
        }

        // A token interrupting a dwell must not restart the slot from
        // scratch, so the unexpired part is carried in `remaining`.
        let mut remaining = Duration::ZERO;
        while !self.stop.load(Ordering::Relaxed) {
            let wait = if remaining.is_zero() {
                self.dwell[self.idx]
            } else {
                remaining
            };
            let t0 = Instant::now();
            let tkn = match self.pending.take() {
                Some(tkn) => tkn,
                None => match self.ctl.recv_timeout(wait) {
                    Ok(tkn) => tkn,
                    Err(RecvTimeoutError::Timeout) => {
                        self.hop(&mut remaining);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        // Supervisor went away; same as an explicit stop.
                        self.emit(Status::internal(StatusEvent::Stop));
                        return;
                    }
                },
            };

            let ts = SystemTime::now();
            match tkn.parse::<Token>() {
                Ok(Token::Stop) => {
                    self.emit(Status::reply(ts, INTERNAL_CMD_ID, StatusEvent::Stop));
                    return;
                }
                Ok(Token::Cmd(cmd)) => {
                    remaining = self.dwell[self.idx].saturating_sub(t0.elapsed());
                    if !self.dispatch(cmd, ts) {
                        return;
                    }
                }
                Err(err) => {
                    remaining = self.dwell[self.idx].saturating_sub(t0.elapsed());
                    self.emit(Status::reply(
                        ts,
                        INTERNAL_CMD_ID,
                        StatusEvent::Err(err.to_string()),
                    ));
                }
            }
        }
    }

    /// Dwell expired: advance the pattern and retune. Facade failures are
    /// reported and scanning carries on with the next slot.
    fn hop(&mut self, remaining: &mut Duration) {
        self.idx = (self.idx + 1) % self.scan.len();
        let next = self.scan[self.idx];
        match self.nic.set_channel(&self.vnic, next) {
            Ok(()) => {
                trace!("{}: hopped to {next}", self.vnic);
                *remaining = Duration::ZERO;
            }
            Err(err) => self.emit(Status::internal(StatusEvent::Fail(err.to_string()))),
        }
    }

    /// Handles one parsed command. Returns false when the tuner should exit.
    fn dispatch(&mut self, cmd: Cmd, ts: SystemTime) -> bool {
        let cid = cmd.cmd_id;
        match cmd.name.as_str() {
            "state" => self.emit(Status::reply(ts, cid, StatusEvent::State(self.state))),
            "scan" => {
                if self.state != TunerState::Scan {
                    self.state = TunerState::Scan;
                    self.emit(Status::reply(ts, cid, StatusEvent::Scan(self.scan.clone())));
                } else {
                    self.redundant(ts, cid);
                }
            }
            // Reserved tokens: accepted, not yet implemented.
            "txpwr" | "spoof" => {}
            "hold" => {
                if self.state != TunerState::Hold {
                    self.state = TunerState::Hold;
                    self.emit(Status::reply(ts, cid, StatusEvent::Hold(self.current())));
                    return self.park();
                }
                self.redundant(ts, cid);
            }
            "pause" => {
                if self.state != TunerState::Pause {
                    self.state = TunerState::Pause;
                    self.emit(Status::reply(ts, cid, StatusEvent::Pause));
                    return self.park();
                }
                self.redundant(ts, cid);
            }
            // Redundant listens are allowed: something outside this process
            // may have moved the channel since the last one.
            "listen" => match token::listen_channel(&cmd.params) {
                Ok(ch) => match self.nic.set_channel(&self.vnic, ch) {
                    Ok(()) => {
                        self.state = TunerState::Listen;
                        self.emit(Status::reply(ts, cid, StatusEvent::Listen(ch)));
                        return self.park();
                    }
                    Err(err) => {
                        self.emit(Status::reply(ts, cid, StatusEvent::Err(err.to_string())))
                    }
                },
                Err(err) => self.emit(Status::reply(ts, cid, StatusEvent::Err(err.to_string()))),
            },
            other => self.emit(Status::reply(
                ts,
                cid,
                StatusEvent::Err(format!("invalid command {other}")),
            )),
        }
        true
    }

    fn redundant(&mut self, ts: SystemTime, cid: i32) {
        self.emit(Status::reply(
            ts,
            cid,
            StatusEvent::Err("redundant command".to_string()),
        ));
    }

    /// Freezes the dwell clock until the next token. Returns false when the
    /// tuner should exit instead of resuming.
    fn park(&mut self) -> bool {
        match self.wait_for_token() {
            Wake::Token(tkn) => {
                self.pending = Some(tkn);
                true
            }
            Wake::Shutdown => false,
            Wake::Disconnected => {
                self.emit(Status::internal(StatusEvent::Stop));
                false
            }
        }
    }

    fn wait_for_token(&self) -> Wake {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Wake::Shutdown;
            }
            match self.ctl.recv_timeout(CTL_POLL) {
                Ok(tkn) => return Wake::Token(tkn),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Wake::Disconnected,
            }
        }
    }

    fn emit(&self, status: Status) {
        if self.status.send(status).is_err() {
            warn!("{}: status queue closed, stopping", self.vnic);
            self.stop.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    use crossbeam_channel::{bounded, unbounded};

    use dyskt_nic::sim::SimNic;
    use dyskt_nic::ChannelWidth;

    const DWELL: Duration = Duration::from_millis(40);

    struct Rig {
        sim: Arc<SimNic>,
        ctl: Sender<String>,
        status: Receiver<Status>,
        stop: Arc<AtomicBool>,
        handle: thread::JoinHandle<()>,
    }

    impl Rig {
        fn next(&self) -> Status {
            self.status
                .recv_timeout(Duration::from_secs(2))
                .expect("status event")
        }

        fn send(&self, tkn: &str) {
            self.ctl.send(tkn.to_string()).expect("control endpoint");
        }

        fn finish(self) {
            let _ = self.ctl.send(token::STOP_TOKEN.to_string());
            self.stop.store(true, Ordering::Relaxed);
            self.handle.join().expect("tuner thread");
        }
    }

    fn noht(chs: &[u16]) -> Vec<Channel> {
        chs.iter()
            .map(|&ch| Channel::new(ch, ChannelWidth::NoHt))
            .collect()
    }

    fn spawn_tuner(scan: Vec<Channel>, start: usize, paused: bool) -> Rig {
        let sim = Arc::new(SimNic::single_radio(
            "dyskt0",
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        ));
        let dwell = vec![DWELL; scan.len()];
        let (status_tx, status_rx) = bounded(64);
        let (ctl_tx, ctl_rx) = unbounded();
        let tuner = Tuner::new(
            ctl_rx,
            status_tx,
            Arc::clone(&sim),
            "dyskt0".to_string(),
            scan,
            dwell,
            start,
            paused,
        );
        let stop = tuner.stop_handle();
        let handle = thread::spawn(move || tuner.run());
        Rig {
            sim,
            ctl: ctl_tx,
            status: status_rx,
            stop,
            handle,
        }
    }

    #[test]
    fn announces_scan_pattern_on_start() {
        let rig = spawn_tuner(noht(&[1, 6, 11]), 0, false);
        let status = rig.next();
        assert_eq!(status.cmd_id, INTERNAL_CMD_ID);
        let StatusEvent::Scan(pattern) = status.event else {
            panic!("expected a scan announcement, got {:?}", status.event);
        };
        assert_eq!(pattern, noht(&[1, 6, 11]));
        rig.finish();
    }

    #[test]
    fn paused_start_blocks_until_scan_token() {
        let rig = spawn_tuner(noht(&[1, 6, 11]), 1, true);
        let status = rig.next();
        assert_eq!(status.cmd_id, INTERNAL_CMD_ID);
        assert!(matches!(status.event, StatusEvent::Pause));

        // No hops while paused.
        thread::sleep(3 * DWELL);
        assert!(rig.sim.channels_set("dyskt0").is_empty());

        rig.send("scan:7:");
        let status = rig.next();
        assert_eq!(status.cmd_id, 7);
        assert!(matches!(status.event, StatusEvent::Scan(_)));

        // Resumes from the slot after the starting index: 11, 1, 6, ...
        thread::sleep(5 * DWELL);
        let hops = rig.sim.channels_set("dyskt0");
        assert!(hops.len() >= 3, "expected hops, got {hops:?}");
        assert_eq!(hops[..3], noht(&[11, 1, 6])[..]);
        rig.finish();
    }

    #[test]
    fn stop_token_emits_stop_and_exits() {
        let rig = spawn_tuner(noht(&[1]), 0, false);
        rig.send("!STOP!");
        loop {
            let status = rig.next();
            if matches!(status.event, StatusEvent::Stop) {
                assert_eq!(status.cmd_id, INTERNAL_CMD_ID);
                break;
            }
        }
        rig.handle.join().expect("tuner thread");
    }

    #[test]
    fn hold_freezes_hops_until_next_token() {
        let rig = spawn_tuner(noht(&[1, 6, 11]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("hold:2:");
        let status = rig.next();
        assert_eq!(status.cmd_id, 2);
        let StatusEvent::Hold(parked) = status.event else {
            panic!("expected hold, got {:?}", status.event);
        };
        assert!(noht(&[1, 6, 11]).contains(&parked));

        let frozen_at = rig.sim.channels_set("dyskt0").len();
        thread::sleep(4 * DWELL);
        assert_eq!(rig.sim.channels_set("dyskt0").len(), frozen_at);

        rig.send("scan:3:");
        let status = rig.next();
        assert_eq!(status.cmd_id, 3);
        assert!(matches!(status.event, StatusEvent::Scan(_)));
        thread::sleep(3 * DWELL);
        assert!(rig.sim.channels_set("dyskt0").len() > frozen_at);
        rig.finish();
    }

    #[test]
    fn redundant_commands_error_without_state_change() {
        let rig = spawn_tuner(noht(&[1, 6]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("scan:4:");
        let status = rig.next();
        assert_eq!(status.cmd_id, 4);
        let StatusEvent::Err(reason) = status.event else {
            panic!("expected an error, got {:?}", status.event);
        };
        assert_eq!(reason, "redundant command");

        rig.send("pause:5:");
        assert!(matches!(rig.next().event, StatusEvent::Pause));
        rig.send("pause:6:");
        let status = rig.next();
        assert_eq!(status.cmd_id, 6);
        let StatusEvent::Err(reason) = status.event else {
            panic!("expected an error, got {:?}", status.event);
        };
        assert_eq!(reason, "redundant command");
        rig.finish();
    }

    #[test]
    fn listen_tunes_and_parks() {
        let rig = spawn_tuner(noht(&[1, 6]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("listen:3:11-HT20");
        let status = rig.next();
        assert_eq!(status.cmd_id, 3);
        let StatusEvent::Listen(ch) = status.event else {
            panic!("expected listen, got {:?}", status.event);
        };
        assert_eq!(ch, Channel::new(11, ChannelWidth::Ht20));
        assert_eq!(
            rig.sim.current_channel("dyskt0"),
            Some(Channel::new(11, ChannelWidth::Ht20))
        );

        let frozen_at = rig.sim.channels_set("dyskt0").len();
        thread::sleep(4 * DWELL);
        assert_eq!(rig.sim.channels_set("dyskt0").len(), frozen_at);
        rig.finish();
    }

    #[test]
    fn listen_with_bad_params_errors_and_continues() {
        let rig = spawn_tuner(noht(&[1, 6]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("listen:4:banana");
        let status = rig.next();
        assert_eq!(status.cmd_id, 4);
        let StatusEvent::Err(reason) = status.event else {
            panic!("expected an error, got {:?}", status.event);
        };
        assert_eq!(reason, "invalid param format");

        // Still scanning.
        thread::sleep(3 * DWELL);
        assert!(!rig.sim.channels_set("dyskt0").is_empty());
        rig.finish();
    }

    #[test]
    fn listen_nic_failure_errors_and_continues() {
        let rig = spawn_tuner(noht(&[1, 6]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.sim
            .reject_channel(Channel::new(11, ChannelWidth::Ht20));
        rig.send("listen:5:11-HT20");
        let status = rig.next();
        assert_eq!(status.cmd_id, 5);
        assert!(matches!(status.event, StatusEvent::Err(_)));
        rig.finish();
    }

    #[test]
    fn unknown_command_reports_with_its_id() {
        let rig = spawn_tuner(noht(&[1]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("foo:9:x");
        let status = rig.next();
        assert_eq!(status.cmd_id, 9);
        let StatusEvent::Err(reason) = status.event else {
            panic!("expected an error, got {:?}", status.event);
        };
        assert_eq!(reason, "invalid command foo");
        rig.finish();
    }

    #[test]
    fn malformed_token_reports_internally() {
        let rig = spawn_tuner(noht(&[1]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("noColons");
        let status = rig.next();
        assert_eq!(status.cmd_id, INTERNAL_CMD_ID);
        let StatusEvent::Err(reason) = status.event else {
            panic!("expected an error, got {:?}", status.event);
        };
        assert_eq!(reason, "invalid command format");
        rig.finish();
    }

    #[test]
    fn state_query_reports_current_state() {
        let rig = spawn_tuner(noht(&[1, 6]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("state:5:");
        let status = rig.next();
        assert_eq!(status.cmd_id, 5);
        assert!(matches!(
            status.event,
            StatusEvent::State(TunerState::Scan)
        ));
        rig.finish();
    }

    #[test]
    fn reserved_commands_are_silent() {
        let rig = spawn_tuner(noht(&[1]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.send("txpwr:6:30");
        rig.send("spoof:7:random");
        rig.send("state:8:");
        // Neither reserved command produced an ack or an error.
        let status = rig.next();
        assert_eq!(status.cmd_id, 8);
        assert!(matches!(status.event, StatusEvent::State(_)));
        rig.finish();
    }

    #[test]
    fn single_channel_pattern_keeps_tuning() {
        let rig = spawn_tuner(noht(&[6]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        thread::sleep(4 * DWELL);
        let hops = rig.sim.channels_set("dyskt0");
        assert!(hops.len() >= 2, "expected repeated tuning, got {hops:?}");
        assert!(hops.iter().all(|&ch| ch == Channel::new(6, ChannelWidth::NoHt)));
        rig.finish();
    }

    #[test]
    fn hop_failure_emits_fail_and_scanning_continues() {
        let rig = spawn_tuner(noht(&[1, 6]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        rig.sim.reject_channel(Channel::new(6, ChannelWidth::NoHt));
        let status = rig.next();
        assert_eq!(status.cmd_id, INTERNAL_CMD_ID);
        assert!(matches!(status.event, StatusEvent::Fail(_)));

        thread::sleep(3 * DWELL);
        let hops = rig.sim.channels_set("dyskt0");
        assert!(hops.contains(&Channel::new(1, ChannelWidth::NoHt)));
        rig.finish();
    }

    #[test]
    fn stop_flag_bounds_a_blocked_wait() {
        let rig = spawn_tuner(noht(&[1]), 0, true);
        assert!(matches!(rig.next().event, StatusEvent::Pause));

        rig.stop.store(true, Ordering::Relaxed);
        rig.handle.join().expect("tuner thread");
        // Exits without a terminal emission.
        assert!(rig.status.try_recv().is_err());
    }

    #[test]
    fn disconnected_endpoint_is_a_stop() {
        let rig = spawn_tuner(noht(&[1]), 0, false);
        assert!(matches!(rig.next().event, StatusEvent::Scan(_)));

        let Rig {
            ctl,
            status,
            handle,
            ..
        } = rig;
        drop(ctl);
        loop {
            let next = status
                .recv_timeout(Duration::from_secs(2))
                .expect("status event");
            if matches!(next.event, StatusEvent::Stop) {
                break;
            }
        }
        handle.join().expect("tuner thread");
    }
}
