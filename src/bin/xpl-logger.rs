/*!
xPL logger: joins the network as an ordinary hub client and prints
every frame it sees.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;

use rustxpl::app::Application;
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

    /// Print whole frames instead of one-line summaries.
    #[arg(short = 'r', long = "raw")]
    raw: bool,
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
    let mut setting = Setting::new(&opt.net, ConnectType::ViaHub);
    setting.iface = opt.interface;
    setting.iotimeout = opt.wait;

    let mut app = Application::open(&registry, setting)?;
    let raw = opt.raw;
    app.add_listener(move |msg| {
        if raw {
            print!("{}", msg.encode());
        } else {
            let target = msg
                .target()
                .map_or_else(|| "*".to_owned(), |t| t.to_string());
            let body: Vec<String> = msg
                .body()
                .iter()
                .map(|p| format!("{}={}", p.name, p.value))
                .collect();
            println!(
                "xpl-{} {} -> {} {} {{ {} }}",
                msg.typ(),
                msg.source(),
                target,
                msg.schema(),
                body.join(", "),
            );
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))?;

    while running.load(Ordering::SeqCst) {
        app.poll(500)?;
    }
    app.close()?;
    Ok(())
}
