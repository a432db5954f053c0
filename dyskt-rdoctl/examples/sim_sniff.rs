//! Drives a full radio controller against the simulated NIC facade: spoofs
//! the MAC, scans, holds, listens, then stops, printing every RTO event and
//! Supervisor reply.
//!
//! Run with: cargo run -p dyskt-rdoctl --features sim --example sim-sniff

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use log::info;

use dyskt_rdoctl::nic::sim::SimNic;
use dyskt_rdoctl::nic::{Channel, ChannelWidth, HwAddr};
use dyskt_rdoctl::{
    ignore_lifecycle_signals, RadioConfig, RadioController, ReplaySource, RtoBody, STOP_TOKEN,
};

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .init();

    // A real controller process leaves SIGINT/SIGTERM to its parent.
    ignore_lifecycle_signals().expect("signal setup");

    let sim = Arc::new(SimNic::single_radio("wlan0", &[1, 6, 11]));
    let cfg = RadioConfig {
        role: "recon".to_string(),
        nic: "wlan0".to_string(),
        dwell: Duration::from_millis(200),
        scan: vec![
            Channel::new(1, ChannelWidth::NoHt),
            Channel::new(6, ChannelWidth::NoHt),
            Channel::new(11, ChannelWidth::NoHt),
        ],
        pass: vec![],
        scan_start: Some(Channel::new(6, ChannelWidth::NoHt)),
        paused: false,
        spoofed: Some(HwAddr::Random),
        antennas: Default::default(),
        desc: "simulated alfa card".to_string(),
    };

    let (ctl_tx, ctl_rx) = unbounded();
    let (rto_tx, rto_rx) = unbounded();
    let (sup_tx, sup_rx) = unbounded();

    let air = ReplaySource::new();
    // A couple of canned beacon-ish frames drifting in.
    for seq in 0u8..4 {
        air.push_frame(&[0x80, 0x00, 0x00, 0x00, seq]);
        air.push_timeout();
    }

    let source = air.clone();
    let controller = RadioController::with_frame_source(
        cfg,
        Arc::clone(&sim),
        ctl_rx,
        rto_tx,
        sup_tx,
        move |_| Ok(source),
    )
    .expect("setup");
    info!("descriptor: {:?}", controller.descriptor());

    let runner = thread::spawn(move || controller.run());

    let printer = thread::spawn(move || {
        for event in rto_rx.iter() {
            match event.body {
                RtoBody::Frame(bytes) => info!("[{}] frame {bytes:02x?}", event.vnic),
                body => info!("[{}] {body:?}", event.vnic),
            }
        }
    });
    let replies = thread::spawn(move || {
        for msg in sup_rx.iter() {
            info!("supervisor <- {msg:?}");
        }
    });

    for tkn in ["state:1:", "hold:2:", "scan:3:", "listen:4:11-HT20", STOP_TOKEN] {
        thread::sleep(Duration::from_millis(600));
        info!("supervisor -> {tkn}");
        ctl_tx.send(tkn.to_string()).expect("control endpoint");
    }

    runner.join().expect("controller");
    printer.join().expect("printer");
    replies.join().expect("replies");
    info!("wlan0 restored: {:?}", sim.iface("wlan0"));
}
