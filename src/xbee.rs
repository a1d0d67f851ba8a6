/*! XBee S2 (ZigBee) transport.

Talks to an XBee series 2 module over a serial port in API mode
(AP=1, non escaped). Opening performs the bootstrap AT exchange:
firmware check (`VR`), local address (`SH`/`SL`), optional PAN ID
write (`ID` + `WR`), optional reset with a join wait, association
check (`AI`), operating PAN id (`OI`, logged), and the maximum RF
payload (`NP`), which is enforced on every send before anything
touches the wire.

Only one AT response and one received data packet are buffered at a
time; overflow frames are dropped with a warning. Addresses are 16 bit
network or 64 bit hardware addresses, written textually as colon
separated hex bytes (`00:13:a2:00:40:8b:ae:0c`).
*/
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;

use log::{debug, info, warn};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    BaudRate, ControlFlags, SetArg, SpecialCharacterIndices, cfmakeraw, cfsetspeed, tcgetattr,
    tcsetattr,
};

use crate::io::{Address, Ctl, CtlReply, Family, Setting, Transport};
use crate::{Error, Result};

/// Default serial baud rate of a factory XBee.
pub const DEFAULT_BAUD: u32 = 38400;
/// Default serial device.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

const FRAME_DELIM: u8 = 0x7E;

// API frame types.
const AT_COMMAND: u8 = 0x08;
const ZB_TX_REQUEST: u8 = 0x10;
const MODEM_STATUS: u8 = 0x8A;
const AT_RESPONSE: u8 = 0x88;
const ZB_TX_STATUS: u8 = 0x8B;
const ZB_RX_PACKET: u8 = 0x90;
const NODE_ID: u8 = 0x95;

const MODEM_STATUS_JOINED: u8 = 0x02;

/// Reserved destination addresses.
const ADDR64_BROADCAST: [u8; 8] = [0, 0, 0, 0, 0, 0, 0xFF, 0xFF];
const ADDR64_COORDINATOR: [u8; 8] = [0; 8];
const ADDR64_UNKNOWN: [u8; 8] = [0xFF; 8];
const ADDR16_UNKNOWN: [u8; 2] = [0xFF, 0xFE];

fn baud_rate(baud: u32) -> Result<BaudRate> {
    Ok(match baud {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        _ => return Err(Error::BadArgument(format!("unsupported baud rate {baud}"))),
    })
}

/// Wrap a payload in an API frame: delimiter, 16 bit length, payload,
/// checksum.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FRAME_DELIM);
    out.push((payload.len() >> 8) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    let sum: u8 = payload.iter().fold(0u8, |a, b| a.wrapping_add(*b));
    out.push(0xFF - sum);
    out
}

/// The payload of a ZigBee Transmit Request.
fn zb_tx_request(fid: u8, dst64: &[u8; 8], dst16: &[u8; 2], data: &[u8]) -> Vec<u8> {
    let mut p = Vec::with_capacity(14 + data.len());
    p.push(ZB_TX_REQUEST);
    p.push(fid);
    p.extend_from_slice(dst64);
    p.extend_from_slice(dst16);
    p.push(0); // broadcast radius: maximum
    p.push(0); // options
    p.extend_from_slice(data);
    p
}

/// Incremental API frame reassembler. Bytes go in as they arrive off
/// the serial port, verified frame payloads come out.
#[derive(Debug, Default)]
struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Resync on the delimiter.
            match self.buf.iter().position(|&b| b == FRAME_DELIM) {
                Some(0) => {}
                Some(n) => {
                    debug!("FrameReader: skipping {n} bytes to the next delimiter");
                    self.buf.drain(..n);
                }
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 3 {
                return None;
            }
            let len = ((self.buf[1] as usize) << 8) | self.buf[2] as usize;
            if self.buf.len() < len + 4 {
                return None;
            }
            let payload: Vec<u8> = self.buf[3..3 + len].to_vec();
            let got = self.buf[3 + len];
            let sum: u8 = payload.iter().fold(0u8, |a, b| a.wrapping_add(*b));
            let want = 0xFF - sum;
            self.buf.drain(..len + 4);
            if got != want {
                warn!("FrameReader: bad checksum {got:#04x}, want {want:#04x}; frame dropped");
                continue;
            }
            return Some(payload);
        }
    }
}

#[derive(Debug)]
struct AtResponse {
    fid: u8,
    cmd: [u8; 2],
    status: u8,
    data: Vec<u8>,
}

#[derive(Debug)]
struct RxPacket {
    src64: [u8; 8],
    data: Vec<u8>,
    read: usize,
}

fn delivery_status_str(status: u8) -> &'static str {
    match status {
        0x01 => "MAC ACK failure",
        0x02 => "CCA failure",
        0x15 => "invalid destination endpoint",
        0x21 => "network ACK failure",
        0x22 => "not joined to network",
        0x23 => "self-addressed",
        0x24 => "address not found",
        0x25 => "route not found",
        0x26 => "broadcast relay was not heard",
        0x2B => "invalid binding table index",
        0x2C | 0x32 => "resource error, out of buffers or timers",
        0x2D => "attempted broadcast with APS transmission",
        0x2E => "attempted unicast with APS transmission, but EE=0",
        0x74 => "data payload too large",
        _ => "unknown",
    }
}

/// Colon separated hex form of a ZigBee address.
fn addr_to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn addr_from_hex(s: &str) -> Result<Address> {
    let bytes: Vec<u8> = s
        .split(':')
        .map(|p| u8::from_str_radix(p, 16))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::BadArgument(format!("bad ZigBee address {s:?}")))?;
    match bytes.len() {
        2 => Ok(Address::zigbee16([bytes[0], bytes[1]])),
        8 => {
            let mut a = [0u8; 8];
            a.copy_from_slice(&bytes);
            Ok(Address::zigbee64(a))
        }
        n => Err(Error::BadArgument(format!(
            "ZigBee address must be 2 or 8 bytes, got {n}"
        ))),
    }
}

/// A serial port in raw mode.
struct Serial {
    file: File,
}

impl Serial {
    fn open(path: &str, baud: u32, rtscts: bool) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| Error::Transport(format!("open {path}: {e}")))?;
        let mut tio = tcgetattr(&file)?;
        cfmakeraw(&mut tio);
        cfsetspeed(&mut tio, baud_rate(baud)?)?;
        if rtscts {
            tio.control_flags.insert(ControlFlags::CRTSCTS);
        } else {
            tio.control_flags.remove(ControlFlags::CRTSCTS);
        }
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        tcsetattr(&file, SetArg::TCSANOW, &tio)?;
        Ok(Self { file })
    }

    /// Wait up to the timeout for input, then drain what is there.
    /// Returns the bytes read (possibly empty).
    fn read_some(&mut self, timeout_ms: u32) -> Result<Vec<u8>> {
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        let timeout = PollTimeout::from(timeout_ms.min(u16::MAX.into()) as u16);
        match poll(&mut fds, timeout) {
            Ok(0) | Err(nix::errno::Errno::EINTR) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(e) => return Err(Error::Transport(format!("serial poll: {e}"))),
        }
        let mut buf = [0u8; 512];
        let mut out = Vec::new();
        loop {
            match (&self.file).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::Transport(format!("serial read: {e}"))),
            }
        }
        Ok(out)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (&self.file)
            .write_all(data)
            .map_err(|e| Error::Transport(format!("serial write: {e}")))
    }
}

/// The XBee transport. Open through the registry (name `"xbeezb"`).
pub struct XBeeTransport {
    serial: Option<Serial>,
    reader: FrameReader,
    atpkt: Option<AtResponse>,
    rxpkt: Option<RxPacket>,
    local_addr: [u8; 8],
    max_payload: usize,
    coordinator: bool,
    joined: bool,
    next_fid: u8,
    tx_fid: u8,
}

/// Registry entry point. The module waits on its own serial poll, so
/// the platform goes unused here.
pub fn open(
    setting: &mut Setting,
    _platform: &dyn crate::platform::Platform,
) -> Result<Box<dyn Transport>> {
    Ok(Box::new(XBeeTransport::open(setting)?))
}

impl XBeeTransport {
    /// Open the module and run the bootstrap AT sequence.
    pub fn open(setting: &mut Setting) -> Result<Self> {
        if setting.iface.is_empty() {
            setting.iface = DEFAULT_PORT.to_owned();
        }
        let serial = Serial::open(&setting.iface, setting.xbee.baud, setting.xbee.rtscts)?;
        let mut t = Self {
            serial: Some(serial),
            reader: FrameReader::default(),
            atpkt: None,
            rxpkt: None,
            local_addr: [0; 8],
            max_payload: 0,
            coordinator: false,
            joined: false,
            next_fid: 0,
            tx_fid: 0,
        };
        t.bootstrap(setting)?;
        Ok(t)
    }

    fn bootstrap(&mut self, setting: &mut Setting) -> Result<()> {
        // Firmware version: high nibble 2 (ZB), odd low bit (API).
        let vr = self.send_at(b"VR", &[], 1000)?;
        let fwid = *vr
            .first()
            .ok_or_else(|| Error::Transport("empty VR response".into()))?;
        if (fwid & 0xF0) != 0x20 || (fwid & 1) == 0 {
            return Err(Error::TransportFatal(format!(
                "bad XBee module or firmware version 0x{fwid:02X}xx"
            )));
        }
        self.coordinator = fwid == 0x21;

        // 64 bit local address.
        let sh = self.send_at(b"SH", &[], 1000)?;
        let sl = self.send_at(b"SL", &[], 1000)?;
        if sh.len() < 4 || sl.len() < 4 {
            return Err(Error::Transport("short SH/SL response".into()));
        }
        self.local_addr[..4].copy_from_slice(&sh[..4]);
        self.local_addr[4..].copy_from_slice(&sl[..4]);
        debug!("XBee local address {}", addr_to_hex(&self.local_addr));

        // Requested PAN ID, written and persisted only on change.
        if let Some(panid) = setting.xbee.new_panid {
            let id = self.send_at(b"ID", &[], 1000)?;
            let current = id
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            if current != panid {
                info!(
                    "Writing new PAN ID 0x{panid:016x} to the XBee; it becomes \
                     operational in a few seconds"
                );
                self.send_at(b"ID", &panid.to_be_bytes(), 1000)?;
                self.send_at(b"WR", &[], 2000)?;
            }
        }

        if setting.xbee.reset {
            self.send_at(b"FR", &[], 1000)?;
            if !self.coordinator {
                self.wait_joined(30_000)?;
            }
        }

        // Association status must come up 0; routers may still be
        // joining, so give them the configured grace period.
        let mut waited_ms = 0u32;
        loop {
            let ai = self.send_at(b"AI", &[], 1000)?;
            match ai.first() {
                Some(0) => break,
                Some(st) if waited_ms < setting.iotimeout * 1000 => {
                    debug!("Association status 0x{st:02X}, waiting");
                    self.pump(1000)?;
                    waited_ms += 1000;
                }
                Some(st) => {
                    return Err(Error::TransportFatal(format!(
                        "XBee not associated, AI=0x{st:02X}"
                    )));
                }
                None => return Err(Error::Transport("empty AI response".into())),
            }
        }

        let oi = self.send_at(b"OI", &[], 1000)?;
        let pan = oi.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        info!("Starting ZigBee network, operating PAN ID 0x{pan:x}");

        let np = self.send_at(b"NP", &[], 1000)?;
        if np.len() >= 2 {
            self.max_payload = ((np[0] as usize) << 8) | np[1] as usize;
            debug!("Maximum RF payload {} bytes", self.max_payload);
        }
        Ok(())
    }

    fn next_fid(&mut self) -> u8 {
        // 0 would suppress the response frame.
        self.next_fid = match self.next_fid {
            0xFF => 1,
            n => n + 1,
        };
        self.next_fid
    }

    /// Read whatever the serial port has, demultiplexing complete
    /// frames. Waits at most `timeout_ms`.
    fn pump(&mut self, timeout_ms: u32) -> Result<()> {
        let serial = self.serial.as_mut().ok_or(Error::TransportNotOpen)?;
        let data = serial.read_some(timeout_ms)?;
        self.reader.push(&data);
        while let Some(payload) = self.reader.next_frame() {
            self.demux(payload);
        }
        Ok(())
    }

    fn demux(&mut self, p: Vec<u8>) {
        match p.first() {
            Some(&AT_RESPONSE) if p.len() >= 5 => {
                if self.atpkt.is_some() {
                    warn!("Dropping overflow AT response");
                    return;
                }
                self.atpkt = Some(AtResponse {
                    fid: p[1],
                    cmd: [p[2], p[3]],
                    status: p[4],
                    data: p[5..].to_vec(),
                });
            }
            Some(&ZB_RX_PACKET) if p.len() >= 12 => {
                if self.rxpkt.is_some() {
                    warn!("Dropping overflow data packet");
                    return;
                }
                let mut src64 = [0u8; 8];
                src64.copy_from_slice(&p[1..9]);
                self.rxpkt = Some(RxPacket {
                    src64,
                    data: p[12..].to_vec(),
                    read: 0,
                });
            }
            Some(&ZB_TX_STATUS) if p.len() >= 6 => {
                if p[1] == self.tx_fid {
                    let status = p[5];
                    if status != 0 {
                        warn!(
                            "TX status error 0x{status:02X} on frame #{}: {}",
                            p[1],
                            delivery_status_str(status)
                        );
                    }
                    self.tx_fid = 0;
                }
            }
            Some(&MODEM_STATUS) if p.len() >= 2 => {
                debug!("Modem status 0x{:02X}", p[1]);
                if p[1] == MODEM_STATUS_JOINED {
                    self.joined = true;
                }
            }
            Some(&NODE_ID) if p.len() >= 9 => {
                info!("{} joined zigbee network", addr_to_hex(&p[1..9]));
            }
            Some(t) => debug!("Ignoring API frame type 0x{t:02X} ({} bytes)", p.len()),
            None => {}
        }
    }

    /// Send a local AT command and wait for its response data.
    fn send_at(&mut self, cmd: &[u8; 2], params: &[u8], timeout_ms: u32) -> Result<Vec<u8>> {
        self.atpkt = None;
        let fid = self.next_fid();
        let mut payload = vec![AT_COMMAND, fid, cmd[0], cmd[1]];
        payload.extend_from_slice(params);
        let data = frame(&payload);
        self.serial
            .as_mut()
            .ok_or(Error::TransportNotOpen)?
            .write_all(&data)?;

        let mut left = timeout_ms as i64;
        while left > 0 {
            self.pump(10)?;
            left -= 10;
            let Some(at) = self.atpkt.take() else {
                continue;
            };
            if at.fid != fid {
                debug!("Stale AT response frame #{}", at.fid);
                continue;
            }
            if at.cmd != *cmd {
                return Err(Error::Transport(format!(
                    "AT response command mismatch: sent {}, got {}",
                    String::from_utf8_lossy(cmd),
                    String::from_utf8_lossy(&at.cmd),
                )));
            }
            if at.status != 0 {
                return Err(Error::Transport(format!(
                    "AT command {} failed with status 0x{:02X}",
                    String::from_utf8_lossy(cmd),
                    at.status
                )));
            }
            return Ok(at.data);
        }
        Err(Error::Timeout(format!(
            "no response to AT {}",
            String::from_utf8_lossy(cmd)
        )))
    }

    fn wait_joined(&mut self, timeout_ms: u32) -> Result<()> {
        let mut left = timeout_ms as i64;
        while !self.joined {
            if left <= 0 {
                return Err(Error::Timeout("never joined a ZigBee network".into()));
            }
            self.pump(100)?;
            left -= 100;
        }
        Ok(())
    }
}

impl Transport for XBeeTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Option<Address>)> {
        let Some(pkt) = self.rxpkt.as_mut() else {
            return Ok((0, None));
        };
        let n = (pkt.data.len() - pkt.read).min(buf.len());
        buf[..n].copy_from_slice(&pkt.data[pkt.read..pkt.read + n]);
        pkt.read += n;
        let src = Address::zigbee64(pkt.src64);
        if pkt.read >= pkt.data.len() {
            self.rxpkt = None;
        }
        Ok((n, Some(src)))
    }

    fn send(&mut self, buf: &[u8], dst: Option<&Address>) -> Result<usize> {
        // The RF payload ceiling applies before anything is written.
        if self.max_payload > 0 && buf.len() > self.max_payload {
            return Err(Error::CapacityExceeded(format!(
                "{} byte frame exceeds the {} byte RF payload",
                buf.len(),
                self.max_payload
            )));
        }
        let (dst64, dst16) = match dst {
            Some(a) if !a.broadcast => match a.family() {
                Family::Zigbee16 => {
                    let mut d16 = [0u8; 2];
                    d16.copy_from_slice(a.bytes());
                    (ADDR64_UNKNOWN, d16)
                }
                Family::Zigbee64 => {
                    let mut d64 = [0u8; 8];
                    d64.copy_from_slice(a.bytes());
                    (d64, ADDR16_UNKNOWN)
                }
                Family::Inet4 => {
                    return Err(Error::BadArgument("IPv4 target on ZigBee".into()));
                }
            },
            Some(_) => (ADDR64_BROADCAST, ADDR16_UNKNOWN),
            // No target: coordinators broadcast, everyone else
            // delivers to the coordinator.
            None if self.coordinator => (ADDR64_BROADCAST, ADDR16_UNKNOWN),
            None => (ADDR64_COORDINATOR, ADDR16_UNKNOWN),
        };
        let fid = self.next_fid();
        let data = frame(&zb_tx_request(fid, &dst64, &dst16, buf));
        self.serial
            .as_mut()
            .ok_or(Error::TransportNotOpen)?
            .write_all(&data)?;
        self.tx_fid = fid;
        debug!("Sent ZigBee frame #{fid} ({} bytes)", buf.len());
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        self.atpkt = None;
        self.rxpkt = None;
        self.serial = None;
        Ok(())
    }

    fn ctl(&mut self, req: Ctl) -> Result<CtlReply> {
        match req {
            Ctl::Poll { timeout_ms } => {
                let mut left = timeout_ms as i64;
                while self.rxpkt.is_none() && left > 0 {
                    self.pump(10)?;
                    left -= 10;
                }
                Ok(CtlReply::Available(
                    self.rxpkt.as_ref().map_or(0, |p| p.data.len() - p.read),
                ))
            }
            Ctl::BroadcastAddr => {
                Ok(CtlReply::Addr(Address::zigbee64(ADDR64_BROADCAST).into_broadcast()))
            }
            Ctl::LocalAddr => Ok(CtlReply::Addr(Address::zigbee64(self.local_addr))),
            Ctl::LocalAddrList => Ok(CtlReply::AddrList(vec![Address::zigbee64(
                self.local_addr,
            )])),
            Ctl::AddrToString(a) => match a.family() {
                Family::Zigbee16 | Family::Zigbee64 => Ok(CtlReply::Text(addr_to_hex(a.bytes()))),
                Family::Inet4 => Err(Error::BadArgument("not a ZigBee address".into())),
            },
            Ctl::AddrFromString(s) => Ok(CtlReply::Addr(addr_from_hex(s)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_checksum() {
        // AT "VR" with frame id 1, a classic from the datasheet.
        let f = frame(&[AT_COMMAND, 0x01, b'V', b'R']);
        assert_eq!(f, vec![0x7E, 0x00, 0x04, 0x08, 0x01, 0x56, 0x52, 0x4E]);
    }

    #[test]
    fn reader_reassembles_split_frames() {
        let f = frame(&[AT_COMMAND, 0x01, b'V', b'R']);
        let mut r = FrameReader::default();
        for chunk in f.chunks(3) {
            assert!(r.next_frame().is_none());
            r.push(chunk);
        }
        assert_eq!(r.next_frame(), Some(vec![AT_COMMAND, 0x01, b'V', b'R']));
        assert!(r.next_frame().is_none());
    }

    #[test]
    fn reader_resyncs_past_garbage() {
        let mut r = FrameReader::default();
        r.push(&[0x00, 0x42, 0x13]);
        r.push(&frame(&[MODEM_STATUS, 0x02]));
        assert_eq!(r.next_frame(), Some(vec![MODEM_STATUS, 0x02]));
    }

    #[test]
    fn reader_drops_bad_checksum() {
        let mut bad = frame(&[MODEM_STATUS, 0x02]);
        let n = bad.len();
        bad[n - 1] ^= 0xFF;
        let mut r = FrameReader::default();
        r.push(&bad);
        r.push(&frame(&[MODEM_STATUS, 0x06]));
        // The corrupted frame is gone, the good one survives.
        assert_eq!(r.next_frame(), Some(vec![MODEM_STATUS, 0x06]));
    }

    #[test]
    fn tx_request_layout() {
        let p = zb_tx_request(7, &ADDR64_BROADCAST, &ADDR16_UNKNOWN, b"hi");
        assert_eq!(p[0], ZB_TX_REQUEST);
        assert_eq!(p[1], 7);
        assert_eq!(&p[2..10], &ADDR64_BROADCAST);
        assert_eq!(&p[10..12], &ADDR16_UNKNOWN);
        assert_eq!(&p[12..14], &[0, 0]);
        assert_eq!(&p[14..], b"hi");
    }

    #[test]
    fn addr_hex_round_trip() -> Result<()> {
        let a = addr_from_hex("00:13:a2:00:40:8b:ae:0c")?;
        assert_eq!(a.family(), Family::Zigbee64);
        assert_eq!(addr_to_hex(a.bytes()), "00:13:a2:00:40:8b:ae:0c");

        let a = addr_from_hex("12:fe")?;
        assert_eq!(a.family(), Family::Zigbee16);

        assert!(addr_from_hex("12:34:56").is_err());
        assert!(addr_from_hex("zz:zz").is_err());
        Ok(())
    }

    fn closed_transport(max_payload: usize) -> XBeeTransport {
        XBeeTransport {
            serial: None,
            reader: FrameReader::default(),
            atpkt: None,
            rxpkt: None,
            local_addr: [0; 8],
            max_payload,
            coordinator: false,
            joined: false,
            next_fid: 0,
            tx_fid: 0,
        }
    }

    #[test]
    fn payload_ceiling_checked_before_write() {
        let mut t = closed_transport(84);
        let big = vec![b'x'; 85];
        // CapacityExceeded, not TransportNotOpen: the check comes
        // before any serial access.
        match t.send(&big, None) {
            Err(Error::CapacityExceeded(_)) => {}
            other => panic!("want CapacityExceeded, got {other:?}"),
        }
        match t.send(&vec![b'x'; 84], None) {
            Err(Error::TransportNotOpen) => {}
            other => panic!("want TransportNotOpen, got {other:?}"),
        }
    }

    #[test]
    fn rx_packet_partial_reads() -> Result<()> {
        let mut t = closed_transport(0);
        t.demux(
            [&[ZB_RX_PACKET][..], &[1, 2, 3, 4, 5, 6, 7, 8], &[0xAA, 0xBB], &[0x01], b"hello"]
                .concat(),
        );
        let mut buf = [0u8; 3];
        let (n, src) = t.recv(&mut buf)?;
        assert_eq!((n, &buf[..n]), (3, &b"hel"[..]));
        assert_eq!(src.unwrap().bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        let (n, _) = t.recv(&mut buf)?;
        assert_eq!((n, &buf[..n]), (2, &b"lo"[..]));
        let (n, _) = t.recv(&mut buf)?;
        assert_eq!(n, 0);
        Ok(())
    }

    #[test]
    fn overflow_data_packet_dropped() {
        let mut t = closed_transport(0);
        let mk = |tail: &[u8]| {
            [&[ZB_RX_PACKET][..], &[0; 8], &[0, 0], &[0], tail].concat()
        };
        t.demux(mk(b"first"));
        t.demux(mk(b"second"));
        let mut buf = [0u8; 16];
        let (n, _) = t.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");
        let (n, _) = t.recv(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn bauds() {
        assert!(baud_rate(38400).is_ok());
        assert!(baud_rate(12345).is_err());
    }
}
