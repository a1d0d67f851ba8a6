/*! IPv4/UDP transport.

Two sockets per endpoint, the way xPL hubs expect: an outbound
broadcast socket aimed at the interface's computed broadcast address
(`local | !netmask`, port 3865), and an inbound datagram socket bound
either to the well known port (standalone mode) or to an ephemeral
port (hub-client mode).

If no interface is named, the first active non-loopback IPv4
interface is used, retrying for a configurable number of seconds so a
tool started before the network is up still comes alive.
*/
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use log::{debug, warn};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::sockopt::{Broadcast, RcvBuf, ReuseAddr};
use nix::sys::socket::{
    AddressFamily, SockFlag, SockType, SockaddrIn, bind, getsockname, getsockopt, setsockopt,
    socket,
};

use crate::io::{Address, ConnectType, Ctl, CtlReply, Setting, Transport, XPL_PORT};
use crate::platform::Platform;
use crate::{Error, Result};

struct Sockets {
    /// Broadcast sender.
    out: UdpSocket,
    /// Bound receiver.
    inp: UdpSocket,
}

/// The UDP transport. Open through the registry (name `"udp"`).
pub struct UdpTransport {
    sockets: Option<Sockets>,
    bcast: SocketAddrV4,
    local: Ipv4Addr,
    port: u16,
}

/// Registry entry point.
pub fn open(setting: &mut Setting, platform: &dyn Platform) -> Result<Box<dyn Transport>> {
    Ok(Box::new(UdpTransport::open(setting, platform)?))
}

/// The broadcast address of a subnet.
fn broadcast_of(local: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(local) | !u32::from(netmask))
}

/// One scan of the interface list. Returns `(name, addr, netmask)`
/// of the wanted interface, or of the first active non-loopback one
/// when no name is given.
fn find_iface(want: &str) -> Option<(String, Ipv4Addr, Ipv4Addr)> {
    let addrs = getifaddrs().ok()?;
    for ifa in addrs {
        if !want.is_empty() && ifa.interface_name != want {
            continue;
        }
        if want.is_empty()
            && (!ifa.flags.contains(InterfaceFlags::IFF_UP)
                || ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK))
        {
            continue;
        }
        let Some(addr) = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        let Some(mask) = ifa.netmask.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        return Some((ifa.interface_name, addr.ip(), mask.ip()));
    }
    None
}

/// Every IPv4 address on the host, loopback included. The hub uses
/// this to decide whether a heartbeat names one of our addresses.
fn local_ip_list() -> Result<Vec<Ipv4Addr>> {
    Ok(getifaddrs()?
        .filter_map(|ifa| ifa.address.and_then(|a| a.as_sockaddr_in().map(|s| s.ip())))
        .collect())
}

/// Grow the receive buffer as far as the OS lets us, stepping down
/// from 1 MB until a setsockopt sticks.
fn maximize_rcvbuf(fd: &OwnedFd) {
    let initial = getsockopt(fd, RcvBuf).unwrap_or(0);
    debug!("Initial receive buffer size is {initial} bytes");
    let mut ideal: usize = 1_024_000;
    while ideal > initial {
        if setsockopt(fd, RcvBuf, &ideal).is_ok() {
            let now = getsockopt(fd, RcvBuf).unwrap_or(0);
            debug!("Receive buffer size now {now} bytes");
            return;
        }
        ideal -= 64_000;
    }
    warn!("Unable to increase the receive buffer size");
}

/// Bytes waiting on a socket.
fn available_bytes(fd: i32) -> Result<usize> {
    let mut n: libc::c_int = 0;
    // SAFETY: FIONREAD writes a single c_int through the valid
    // pointer given; fd is an open socket owned by the caller.
    let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut n) };
    if ret < 0 {
        return Err(Error::Transport(std::io::Error::last_os_error().to_string()));
    }
    Ok(n.max(0) as usize)
}

impl UdpTransport {
    /// Open per the setting. Fills in the discovered interface name
    /// and, in `Auto` mode, records which bind actually happened.
    pub fn open(setting: &mut Setting, platform: &dyn Platform) -> Result<Self> {
        // Pick an interface, waiting for the network if allowed.
        let mut waited = 0;
        let (name, local, netmask) = loop {
            match find_iface(&setting.iface) {
                Some(found) => break found,
                None if setting.iface.is_empty() && waited < setting.iotimeout => {
                    debug!("No usable interface yet, retrying");
                    platform.sleep_ms(1000);
                    waited += 1;
                }
                None => {
                    return Err(Error::InterfaceNotFound(if setting.iface.is_empty() {
                        "no active, non-loopback IPv4 interface".to_owned()
                    } else {
                        setting.iface.clone()
                    }));
                }
            }
        };
        setting.iface = name;
        let bcast = SocketAddrV4::new(broadcast_of(local, netmask), XPL_PORT);
        debug!(
            "Using interface {} ({local}), broadcast {bcast}",
            setting.iface
        );

        let out = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        out.set_broadcast(true)?;
        out.set_nonblocking(true)?;

        let (inp, port) = Self::bind_inbound(setting)?;
        inp.set_nonblocking(true)?;

        Ok(Self {
            sockets: Some(Sockets { out, inp }),
            bcast,
            local,
            port,
        })
    }

    /// Build the bound inbound socket. SO_REUSEADDR must be set
    /// before bind, hence the raw socket calls.
    fn bind_inbound(setting: &mut Setting) -> Result<(UdpSocket, u16)> {
        let standalone = match setting.connect {
            ConnectType::ViaHub => false,
            ConnectType::Standalone | ConnectType::Auto => true,
        };
        let fd = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::empty(),
            None,
        )?;
        setsockopt(&fd, Broadcast, &true)?;
        if standalone {
            setsockopt(&fd, ReuseAddr, &true)?;
        }
        let want_port = if standalone { XPL_PORT } else { 0 };
        let sa = SockaddrIn::new(0, 0, 0, 0, want_port);
        match bind(fd.as_raw_fd(), &sa) {
            Ok(()) => {}
            Err(nix::errno::Errno::EADDRINUSE) if setting.connect == ConnectType::Auto => {
                // Someone (a hub) owns the port; fall back to a
                // client binding.
                debug!("xPL port taken, falling back to hub-client mode");
                setting.connect = ConnectType::ViaHub;
                bind(fd.as_raw_fd(), &SockaddrIn::new(0, 0, 0, 0, 0))?;
            }
            Err(nix::errno::Errno::EADDRINUSE) => {
                return Err(Error::AddressInUse(format!("UDP port {want_port}")));
            }
            Err(e) => return Err(e.into()),
        }
        let bound: SockaddrIn = getsockname(fd.as_raw_fd())?;
        let port = bound.port();
        if port == XPL_PORT {
            setting.connect = ConnectType::Standalone;
        }
        maximize_rcvbuf(&fd);
        debug!("Bound xPL listener to port {port}");
        Ok((UdpSocket::from(fd), port))
    }

    fn sockets(&self) -> Result<&Sockets> {
        self.sockets.as_ref().ok_or(Error::TransportNotOpen)
    }
}

impl Transport for UdpTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Option<Address>)> {
        let s = self.sockets()?;
        match s.inp.recv_from(buf) {
            Ok((n, src)) => {
                let src = match src {
                    std::net::SocketAddr::V4(v4) => Some(Address::inet4(*v4.ip(), v4.port())),
                    std::net::SocketAddr::V6(_) => None,
                };
                Ok((n, src))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok((0, None)),
            Err(e) => Err(Error::Transport(format!("recvfrom: {e}"))),
        }
    }

    fn send(&mut self, buf: &[u8], dst: Option<&Address>) -> Result<usize> {
        let bcast = self.bcast;
        let s = self.sockets()?;
        let target = match dst {
            Some(a) if !a.broadcast => {
                let ip = a
                    .ipv4()
                    .ok_or_else(|| Error::BadArgument("non-IPv4 target on UDP".into()))?;
                SocketAddrV4::new(ip, a.port.unwrap_or(XPL_PORT))
            }
            _ => bcast,
        };
        let n = s
            .out
            .send_to(buf, target)
            .map_err(|e| Error::Transport(format!("sendto {target}: {e}")))?;
        debug!("Sent {n} bytes (of {} attempted) to {target}", buf.len());
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the sockets closes the fds.
        self.sockets = None;
        Ok(())
    }

    fn ctl(&mut self, req: Ctl) -> Result<CtlReply> {
        match req {
            Ctl::Poll { timeout_ms } => {
                let s = self.sockets()?;
                let fd = s.inp.as_fd();
                let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
                let timeout = PollTimeout::from(timeout_ms.min(u16::MAX.into()) as u16);
                match poll(&mut fds, timeout) {
                    Ok(0) => Ok(CtlReply::Available(0)),
                    Ok(_) => Ok(CtlReply::Available(available_bytes(
                        s.inp.as_raw_fd(),
                    )?)),
                    Err(nix::errno::Errno::EINTR) => Ok(CtlReply::Available(0)),
                    Err(e) => Err(Error::Transport(format!("poll: {e}"))),
                }
            }
            Ctl::BroadcastAddr => Ok(CtlReply::Addr(
                Address::inet4(*self.bcast.ip(), self.bcast.port()).into_broadcast(),
            )),
            Ctl::LocalAddr => Ok(CtlReply::Addr(Address::inet4(self.local, self.port))),
            Ctl::LocalAddrList => Ok(CtlReply::AddrList(
                local_ip_list()?
                    .into_iter()
                    .map(|ip| Address::inet4(ip, 0))
                    .collect(),
            )),
            Ctl::AddrToString(a) => match a.ipv4() {
                Some(ip) => Ok(CtlReply::Text(ip.to_string())),
                None => Err(Error::BadArgument("not an IPv4 address".into())),
            },
            Ctl::AddrFromString(s) => {
                let ip: Ipv4Addr = s
                    .parse()
                    .map_err(|_| Error::BadArgument(format!("bad IPv4 address {s:?}")))?;
                Ok(CtlReply::Addr(Address::inet4(ip, XPL_PORT)))
            }
        }
    }
}
