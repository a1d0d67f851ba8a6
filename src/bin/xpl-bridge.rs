/*!
xPL bridge: relays frames between an inner non-UDP transport
(typically an XBee ZigBee module on a serial port) and the UDP LAN,
with hop limiting.

The bridge is itself a configurable xPL device on the LAN side with a
single `panid` configurable; changing it remotely re-opens the inner
transport on the new PAN ID.
*/
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rustxpl::bridge::Bridge;
use rustxpl::config::{self, ItemKind};
use rustxpl::io::{ConnectType, Setting, TransportRegistry};

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Inner interface: the serial device of the XBee module.
    #[arg(short = 'i', long = "interface", default_value = "")]
    interface: String,

    /// Inner transport layer name.
    #[arg(short = 'n', long = "net", default_value = "xbeezb")]
    net: String,

    /// Serial baud rate.
    #[arg(short = 'B', long = "baudrate", default_value_t = rustxpl::xbee::DEFAULT_BAUD)]
    baud: u32,

    /// PAN ID to program into the module (hex).
    #[arg(short = 'p', long = "panid")]
    panid: Option<String>,

    /// Forward messages with a hop count up to this.
    #[arg(short = 'm', long = "maxhop", default_value = "1")]
    maxhop: u8,

    /// Enable broadcast towards the inner network.
    #[arg(short = 'b', long = "broadcast")]
    broadcast: bool,

    /// Device configuration file.
    #[arg(short = 'f', long = "file", default_value = "xpl-bridge.xpl")]
    file: PathBuf,

    /// Raise the log level. Repeat for more.
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    debug: u8,

    /// Seconds to wait for a usable network at startup.
    #[arg(short = 'W', default_value = "5")]
    wait: u32,
}

fn parse_panid(s: &str) -> Result<u64> {
    let hex = s.trim().trim_start_matches("0x");
    u64::from_str_radix(hex, 16).with_context(|| format!("bad PAN ID {s:?}"))
}

/// Make the bridge visible (and reconfigurable) on the LAN side.
fn attach_bridge_device(
    bridge: &mut Bridge,
    file: &std::path::Path,
    panid: Option<u64>,
    wanted: &Rc<RefCell<Option<u64>>>,
) -> Result<()> {
    let app = bridge.outer_mut();
    let idx = app.add_configurable_device("rustxpl", "bridge", Some(file.to_path_buf()))?;
    let dev = app.device_mut(idx);
    dev.set_version(env!("CARGO_PKG_VERSION"));
    if dev.config_values("panid").is_none() {
        dev.add_configurable("panid", ItemKind::Reconf, 1)?;
    }
    if let (Some(p), None) = (panid, dev.config_value("panid")) {
        dev.add_config_value("panid", &format!("{p:x}"))?;
    }
    let flag = wanted.clone();
    dev.add_config_listener(move |d| {
        if let Some(v) = d.config_value("panid")
            && let Ok(p) = parse_panid(v)
        {
            *flag.borrow_mut() = Some(p);
        }
    })?;
    app.enable_device(idx, true)?;
    Ok(())
}

fn open_bridge(
    registry: &TransportRegistry,
    opt: &Opt,
    panid: Option<u64>,
    wanted: &Rc<RefCell<Option<u64>>>,
) -> Result<Bridge> {
    let mut outsetting = Setting::new("udp", ConnectType::ViaHub);
    outsetting.iotimeout = opt.wait;
    outsetting.broadcast = opt.broadcast;

    let mut bridge = Bridge::open(registry, inner_setting(opt, panid), outsetting, opt.maxhop)?;
    attach_bridge_device(&mut bridge, &opt.file, panid, wanted)?;
    Ok(bridge)
}

fn inner_setting(opt: &Opt, panid: Option<u64>) -> Setting {
    let mut insetting = Setting::new(&opt.net, ConnectType::Standalone);
    insetting.iface = opt.interface.clone();
    insetting.iotimeout = opt.wait;
    insetting.broadcast = opt.broadcast;
    insetting.hbeat_remote_addr = true;
    insetting.xbee.baud = opt.baud;
    insetting.xbee.new_panid = panid;
    insetting
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("rustxpl")
        .verbosity(2 + opt.debug as usize)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    // PAN ID: command line first, then whatever an earlier run
    // persisted.
    let mut panid = match &opt.panid {
        Some(p) => Some(parse_panid(p)?),
        None => match config::read_config_file(&opt.file, None) {
            Ok(pairs) => pairs
                .iter()
                .find(|p| p.name == "panid")
                .and_then(|p| parse_panid(&p.value).ok()),
            Err(_) => None,
        },
    };

    let registry = TransportRegistry::with_defaults();
    let wanted: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
    let mut bridge = open_bridge(&registry, &opt, panid, &wanted)?;
    info!("bridge started, max hop {}", bridge.max_hop());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

    while running.load(Ordering::SeqCst) {
        bridge.poll(500)?;
        let new = wanted.borrow_mut().take();
        if let Some(p) = new
            && panid != Some(p)
        {
            // Only the ZigBee side needs to come down; the LAN side
            // and the learned clients stay as they are.
            info!("PAN ID changed to 0x{p:x}, re-opening the inner transport");
            panid = Some(p);
            bridge.reopen_inner(&registry, inner_setting(&opt, panid))?;
        }
    }
    info!("bridge shutting down");
    bridge.close()?;
    Ok(())
}
