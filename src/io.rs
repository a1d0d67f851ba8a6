/*! Transport abstraction.

Every link an xPL frame can travel over (UDP, XBee ZigBee, the
in-memory loopback) implements [`Transport`]: receive, send, close,
and a control call taking a tagged [`Ctl`] request. Opening is done by
name through a [`TransportRegistry`] populated at program start.
*/
use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::platform::Platform;
use crate::{Error, Result};

/// Communications between xPL applications on a LAN use UDP on this
/// port.
pub const XPL_PORT: u16 = 3865;

/// How the inbound socket binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectType {
    /// Listen directly on the xPL port. Hubs and non-UDP links do
    /// this.
    Standalone,
    /// Listen on an ephemeral port and rely on a local hub to
    /// rebroadcast. Ordinary UDP clients do this.
    ViaHub,
    /// Try standalone, fall back to hub mode if the port is taken.
    Auto,
}

/// Address family of a transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// IPv4.
    Inet4,
    /// ZigBee 16 bit network address.
    Zigbee16,
    /// ZigBee 64 bit hardware address.
    Zigbee64,
}

/// A transport level address: family tag, raw bytes in network order,
/// optional port, broadcast marker.
#[derive(Debug, Clone)]
pub struct Address {
    family: Family,
    bytes: [u8; 16],
    len: u8,
    /// Port in host order, where the family has one.
    pub port: Option<u16>,
    /// Marks the transport's broadcast address.
    pub broadcast: bool,
}

impl Address {
    /// Build an address from raw bytes.
    #[must_use]
    pub fn new(family: Family, raw: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        let len = raw.len().min(16);
        bytes[..len].copy_from_slice(&raw[..len]);
        Self {
            family,
            bytes,
            len: len as u8,
            port: None,
            broadcast: false,
        }
    }

    /// IPv4 address with a port.
    #[must_use]
    pub fn inet4(ip: Ipv4Addr, port: u16) -> Self {
        let mut a = Self::new(Family::Inet4, &ip.octets());
        a.port = Some(port);
        a
    }

    /// 64 bit ZigBee address.
    #[must_use]
    pub fn zigbee64(addr: [u8; 8]) -> Self {
        Self::new(Family::Zigbee64, &addr)
    }

    /// 16 bit ZigBee network address.
    #[must_use]
    pub fn zigbee16(addr: [u8; 2]) -> Self {
        Self::new(Family::Zigbee16, &addr)
    }

    /// Mark as the broadcast address.
    #[must_use]
    pub fn into_broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Address family.
    #[must_use]
    pub fn family(&self) -> Family {
        self.family
    }

    /// The active address bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The IPv4 form, when the family is IPv4.
    #[must_use]
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.family {
            Family::Inet4 => {
                let o: [u8; 4] = self.bytes().try_into().ok()?;
                Some(Ipv4Addr::from(o))
            }
            _ => None,
        }
    }
}

/// Address identity is the family plus the raw bytes. Port and
/// broadcast marker are routing detail, not identity; the bridge
/// client table relies on this.
impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family && self.bytes() == other.bytes()
    }
}
impl Eq for Address {}

/// Control requests understood by every transport. This replaces the
/// variadic ioctl of older xPL libraries with a closed set of typed
/// requests.
#[derive(Debug)]
pub enum Ctl<'a> {
    /// Wait up to the timeout for inbound data; reply is
    /// [`CtlReply::Available`] with the byte count (0 on timeout).
    Poll {
        /// Longest time to wait, in milliseconds.
        timeout_ms: u32,
    },
    /// The transport's broadcast address.
    BroadcastAddr,
    /// The local endpoint address (with the bound port for UDP).
    LocalAddr,
    /// Every local interface address of the host.
    LocalAddrList,
    /// Render an address in the transport's textual form.
    AddrToString(&'a Address),
    /// Parse an address from the transport's textual form.
    AddrFromString(&'a str),
}

/// Replies to [`Ctl`] requests.
#[derive(Debug)]
pub enum CtlReply {
    /// Bytes ready to read.
    Available(usize),
    /// A single address.
    Addr(Address),
    /// A list of addresses.
    AddrList(Vec<Address>),
    /// A rendered address.
    Text(String),
}

/// One open transport endpoint.
///
/// All operations are non blocking except `ctl(Poll)`, which waits at
/// most the caller's timeout.
pub trait Transport {
    /// Receive one datagram. Returns `(0, None)` when nothing is
    /// ready, otherwise the byte count and the source address when
    /// the link knows it.
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Option<Address>)>;

    /// Send one datagram. A `None` destination, or one marked
    /// broadcast, goes to the transport's broadcast address. Returns
    /// bytes transmitted.
    fn send(&mut self, buf: &[u8], dst: Option<&Address>) -> Result<usize>;

    /// Release OS resources. Further operations fail.
    fn close(&mut self) -> Result<()>;

    /// Issue a control request.
    fn ctl(&mut self, req: Ctl) -> Result<CtlReply>;

    /// Sugar for `ctl(Poll)`.
    fn poll_available(&mut self, timeout_ms: u32) -> Result<usize> {
        match self.ctl(Ctl::Poll { timeout_ms })? {
            CtlReply::Available(n) => Ok(n),
            r => Err(Error::Transport(format!("unexpected poll reply {r:?}"))),
        }
    }

    /// Sugar for `ctl(LocalAddr)`.
    fn local_addr(&mut self) -> Result<Address> {
        match self.ctl(Ctl::LocalAddr)? {
            CtlReply::Addr(a) => Ok(a),
            r => Err(Error::Transport(format!("unexpected addr reply {r:?}"))),
        }
    }

    /// Sugar for `ctl(BroadcastAddr)`.
    fn broadcast_addr(&mut self) -> Result<Address> {
        match self.ctl(Ctl::BroadcastAddr)? {
            CtlReply::Addr(a) => Ok(a),
            r => Err(Error::Transport(format!("unexpected addr reply {r:?}"))),
        }
    }

    /// Sugar for `ctl(LocalAddrList)`.
    fn local_addr_list(&mut self) -> Result<Vec<Address>> {
        match self.ctl(Ctl::LocalAddrList)? {
            CtlReply::AddrList(l) => Ok(l),
            r => Err(Error::Transport(format!("unexpected list reply {r:?}"))),
        }
    }

    /// Sugar for `ctl(AddrToString)`.
    fn addr_to_string(&mut self, addr: &Address) -> Result<String> {
        match self.ctl(Ctl::AddrToString(addr))? {
            CtlReply::Text(s) => Ok(s),
            r => Err(Error::Transport(format!("unexpected text reply {r:?}"))),
        }
    }

    /// Sugar for `ctl(AddrFromString)`.
    fn addr_from_string(&mut self, s: &str) -> Result<Address> {
        match self.ctl(Ctl::AddrFromString(s))? {
            CtlReply::Addr(a) => Ok(a),
            r => Err(Error::Transport(format!("unexpected addr reply {r:?}"))),
        }
    }
}

/// XBee specific knobs of a [`Setting`].
#[derive(Debug, Clone)]
pub struct XBeeSetting {
    /// Serial baud rate.
    pub baud: u32,
    /// Hardware RTS/CTS flow control.
    pub rtscts: bool,
    /// Write this PAN ID to the module (and persist it) if it
    /// differs from the current one.
    pub new_panid: Option<u64>,
    /// Software-reset the module during open.
    pub reset: bool,
}

impl Default for XBeeSetting {
    fn default() -> Self {
        Self {
            baud: crate::xbee::DEFAULT_BAUD,
            rtscts: false,
            new_panid: None,
            reset: false,
        }
    }
}

/// Everything needed to open a transport.
#[derive(Debug, Clone)]
pub struct Setting {
    /// Interface name (UDP) or serial device path (XBee). Empty
    /// means pick a sensible default.
    pub iface: String,
    /// Registered transport name.
    pub transport: String,
    /// Bind mode for the inbound side.
    pub connect: ConnectType,
    /// Seconds to keep retrying when no usable network is present
    /// yet.
    pub iotimeout: u32,
    /// This side is allowed to broadcast. Bridges consult this when
    /// echoing to learned clients.
    pub broadcast: bool,
    /// Include the non-standard `remote-addr` pair in `hbeat.basic`
    /// bodies. Only the ZigBee bridge wants this.
    pub hbeat_remote_addr: bool,
    /// XBee knobs; ignored by other transports.
    pub xbee: XBeeSetting,
}

impl Setting {
    /// A setting with defaults for everything but the transport name
    /// and connection mode.
    #[must_use]
    pub fn new(transport: &str, connect: ConnectType) -> Self {
        Self {
            iface: String::new(),
            transport: transport.to_owned(),
            connect,
            iotimeout: 5,
            broadcast: false,
            hbeat_remote_addr: false,
            xbee: XBeeSetting::default(),
        }
    }
}

/// Factory signature: open a transport from a setting. May refine the
/// setting (fill in the discovered interface, flip `Auto` to the mode
/// actually bound). Any waiting during open (discovery retry) goes
/// through the platform, never a raw sleep.
pub type OpenFn = fn(&mut Setting, &dyn Platform) -> Result<Box<dyn Transport>>;

/// Maps transport names to open functions. Built once at program
/// start; read only afterwards.
pub struct TransportRegistry {
    entries: HashMap<String, OpenFn>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TransportRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// All built in transports: `udp`, `xbeezb`, `loopback`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register("udp", crate::udp::open);
        r.register("xbeezb", crate::xbee::open);
        r.register("loopback", crate::loopback::open);
        r
    }

    /// Register a transport. First registration of a name wins.
    pub fn register(&mut self, name: &str, open: OpenFn) {
        self.entries.entry(name.to_owned()).or_insert(open);
    }

    /// Open by the name in the setting. An empty name means `udp`.
    pub fn open(
        &self,
        setting: &mut Setting,
        platform: &dyn Platform,
    ) -> Result<Box<dyn Transport>> {
        if setting.transport.is_empty() {
            setting.transport = "udp".to_owned();
        }
        let open = self
            .entries
            .get(&setting.transport)
            .ok_or_else(|| Error::BadArgument(format!("unknown transport {:?}", setting.transport)))?;
        open(setting, platform)
    }
}
