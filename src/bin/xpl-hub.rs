/*!
xPL hub: owns UDP port 3865 and rebroadcasts every frame to each
locally registered client.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use log::info;

use rustxpl::hub::Hub;
use rustxpl::io::{ConnectType, Setting, TransportRegistry};

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Network interface to use. Default: first active non-loopback.
    #[arg(short = 'i', long = "interface", default_value = "")]
    interface: String,

    /// Transport layer name.
    #[arg(short = 'n', long = "net", default_value = "udp")]
    net: String,

    /// Raise the log level. Repeat for more.
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    debug: u8,

    /// Seconds to wait for a usable network at startup.
    #[arg(short = 'W', default_value = "5")]
    wait: u32,
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("rustxpl")
        .verbosity(2 + opt.debug as usize)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let registry = TransportRegistry::with_defaults();
    let mut setting = Setting::new(&opt.net, ConnectType::Standalone);
    setting.iface = opt.interface;
    setting.iotimeout = opt.wait;

    let mut hub = Hub::open(&registry, setting)?;
    info!("hub started on {}", hub.app_mut().setting().iface);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

    while running.load(Ordering::SeqCst) {
        hub.poll(500)?;
    }
    info!("hub shutting down");
    hub.app_mut().close()?;
    Ok(())
}
