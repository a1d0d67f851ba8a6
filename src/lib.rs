#![warn(missing_docs)]
/*! This crate provides a portable implementation of the [xPL][xpl]
home automation messaging protocol, together with the transport layer
that carries xPL frames over heterogeneous links: IPv4/UDP on the LAN,
and XBee S2 (ZigBee) API frames over a serial port.

It provides the building blocks for the three kinds of participants on
an xPL network:

* **Devices**: end points that publish status/trigger messages, react
  to commands, and may be configured remotely over xPL itself.
* **Hubs**: per-host multiplexers that rebroadcast every frame
  received on the well known UDP port to each locally registered
  client socket.
* **Bridges**: two-sided relays that translate between two xPL
  transports (typically UDP and ZigBee), applying hop limits and
  learning remote addresses.

# Architecture overview

An application owns exactly one transport and a set of devices. Each
`poll()` cycle it asks the transport for bytes, runs them through the
message decoder, and hands every decoded [`message::Message`] first to
the global listeners and then to each device's dispatch logic. Devices
independently emit heartbeats, status, and trigger messages back
through the same transport.

```text
      [ UDP | XBee ZigBee | loopback transport ]
                        ↓ poll
                 [ Message decoder ]
                        ↓
                  [ Application ]
                   ↓           ↓
          [ global listeners ] [ Devices ]
                                   ↓
                    [ filters / groups / listeners ]
```

A hub is an application bound directly to the xPL port plus a client
table; a bridge holds two applications and forwards between them.

# Examples

Open a device over the in-memory loopback transport (which echoes
frames back like a local hub would), enable it, and watch the
heartbeat come back:

```
use rustxpl::app::Application;
use rustxpl::io::{ConnectType, Setting, TransportRegistry};

let registry = TransportRegistry::with_defaults();
let setting = Setting::new("loopback", ConnectType::Standalone);
let mut app = Application::open(&registry, setting)?;
let dev = app.add_device("acme", "sensor", Some("kitchen"))?;
app.device_mut(dev).set_version("1.0");
app.enable_device(dev, true)?;
app.poll(10)?;
assert!(app.device(dev).hub_confirmed());
# Ok::<(), rustxpl::Error>(())
```

## Links

* xPL protocol documentation: <http://xplproject.org.uk/>

[xpl]: https://en.wikipedia.org/wiki/XPL_Protocol
 */

pub mod app;
pub mod bridge;
pub mod config;
pub mod device;
pub mod filter;
pub mod hub;
pub mod id;
pub mod io;
pub mod loopback;
pub mod message;
pub mod platform;
pub mod udp;
pub mod xbee;

/// Crate error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame that does not follow the xPL grammar.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Caller handed in something invalid.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The xPL port (or another requested address) is taken.
    #[error("address in use: {0}")]
    AddressInUse(String),

    /// No usable network interface.
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// Operation on a transport that is closed.
    #[error("transport not open")]
    TransportNotOpen,

    /// Recoverable transport error. The read is retried on the next
    /// poll.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unrecoverable transport error. The transport must be closed.
    #[error("fatal transport error: {0}")]
    TransportFatal(String),

    /// Timed out waiting for a reply.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operation requires a configured device.
    #[error("device not configured")]
    NotConfigured,

    /// Bounded table (filters, groups, config values, RF payload)
    /// would overflow.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// OS level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// OS call failure reported through nix.
    #[error("system error: {0}")]
    Sys(#[from] nix::errno::Errno),
}

/// Crate result type, defaulting to the crate error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
