/*!
xPL sender: inject one message into the network and exit.

```text
xpl-sender -s acme-tool.cli x10.basic command=on device=a1
xpl-sender -t acme-cm12.srv -c stat sensor.request request=current
```
*/
use anyhow::{Context, Result, bail};
use clap::Parser;

use rustxpl::app::Application;
use rustxpl::id::{Id, Schema};
use rustxpl::io::{ConnectType, Setting, TransportRegistry};
use rustxpl::message::{Message, MessageType};

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

    /// Message type: cmnd, stat, or trig.
    #[arg(short = 'c', long = "class", default_value = "cmnd")]
    msgtype: String,

    /// Source id. Default: a generated instance under xpl-send.
    #[arg(short = 's', long = "source")]
    source: Option<String>,

    /// Target id. Default: broadcast.
    #[arg(short = 't', long = "target")]
    target: Option<String>,

    /// Message schema, class.type.
    schema: String,

    /// Body pairs, name=value.
    pairs: Vec<String>,
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

    let typ: MessageType = opt.msgtype.parse()?;
    let schema: Schema = opt.schema.parse()?;
    let source: Id = match &opt.source {
        Some(s) => s.parse()?,
        None => Id::new("xpl", "send", &app.generate_unique_id())?,
    };
    let mut msg = match &opt.target {
        None => Message::broadcast(typ, source, schema),
        Some(t) => Message::targeted(typ, source, t.parse()?, schema),
    };
    for pair in &opt.pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("body argument {pair:?} is not name=value");
        };
        msg.add_pair(name, value)?;
    }

    app.send(&msg).context("send failed")?;
    app.close()?;
    Ok(())
}
