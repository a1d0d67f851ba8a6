/*! The application: one transport, its devices, one poll loop.

Everything is driven from [`Application::poll`]: bytes are pulled
from the transport, decoded, handed to the global listeners and then
to each device, and finally any heartbeats that have come due are
sent. There is no background work; a caller that stops polling stops
the world.
*/
use log::{debug, warn};

use crate::config;
use crate::device::{Device, LinkInfo};
use crate::id::Id;
use crate::io::{Address, Setting, Transport, TransportRegistry};
use crate::message::{Decoder, Message};
use crate::platform::{Platform, SystemPlatform};
use crate::{Error, Result};

/// Instance ids are exactly this long when generated.
const UNIQUE_ID_LEN: usize = crate::id::INSTANCE_MAX;

fn base36(mut v: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if v == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while v > 0 {
        out.push(DIGITS[(v % 36) as usize]);
        v /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("ascii digits")
}

/// Is this message our own heartbeat, echoed back by a hub?
///
/// On UDP the body's `remote-ip`/`port` must name our listener; on
/// anything else the frame's source id must be ours.
fn is_hub_echo(link: &LinkInfo, msg: &Message, my_id: Option<&Id>) -> bool {
    let class = msg.schema().class();
    if !class.eq_ignore_ascii_case("hbeat") && !class.eq_ignore_ascii_case("config") {
        return false;
    }
    if link.is_udp {
        let ip_ok = match (&link.remote_ip, msg.value("remote-ip")) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        };
        let port_ok = match (link.port, msg.value("port")) {
            (Some(ours), Some(theirs)) => theirs == ours.to_string(),
            _ => false,
        };
        ip_ok && port_ok
    } else {
        my_id.is_some_and(|id| msg.source().eq_ignore_case(id))
    }
}

/// One xPL application.
pub struct Application {
    io: Box<dyn Transport>,
    setting: Setting,
    platform: Box<dyn Platform>,
    devices: Vec<Device>,
    listeners: Vec<Box<dyn FnMut(&Message)>>,
    link: LinkInfo,
    local: Address,
}

impl Application {
    /// Open the transport named in the setting and build an
    /// application around it.
    pub fn open(registry: &TransportRegistry, setting: Setting) -> Result<Self> {
        Self::open_with(registry, setting, Box::new(SystemPlatform::new()))
    }

    /// Like [`Application::open`] with an explicit platform, for
    /// deterministic tests. The platform also serves the open itself
    /// (discovery retry waits through it).
    pub fn open_with(
        registry: &TransportRegistry,
        mut setting: Setting,
        platform: Box<dyn Platform>,
    ) -> Result<Self> {
        let io = registry.open(&mut setting, &*platform)?;
        Self::with_transport(io, setting, platform)
    }

    /// Wrap an already opened transport.
    pub fn with_transport(
        mut io: Box<dyn Transport>,
        setting: Setting,
        platform: Box<dyn Platform>,
    ) -> Result<Self> {
        let local = io.local_addr()?;
        let is_udp = setting.transport == "udp";
        let local_str = io.addr_to_string(&local)?;
        let link = LinkInfo {
            is_udp,
            port: local.port,
            remote_ip: is_udp.then(|| local_str.clone()),
            remote_addr: (!is_udp && setting.hbeat_remote_addr).then_some(local_str),
        };
        Ok(Self {
            io,
            setting,
            platform,
            devices: Vec::new(),
            listeners: Vec::new(),
            link,
            local,
        })
    }

    /// The (possibly refined) setting this application opened with.
    #[must_use]
    pub fn setting(&self) -> &Setting {
        &self.setting
    }

    /// The platform's monotonic clock.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.platform.now_ms()
    }

    /// What devices on this application put in their heartbeats.
    #[must_use]
    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    /// Register a listener invoked for every inbound message, before
    /// any device sees it.
    pub fn add_listener(&mut self, f: impl FnMut(&Message) + 'static) {
        self.listeners.push(Box::new(f));
    }

    /// Number of devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Borrow a device.
    #[must_use]
    pub fn device(&self, idx: usize) -> &Device {
        &self.devices[idx]
    }

    /// Mutably borrow a device.
    pub fn device_mut(&mut self, idx: usize) -> &mut Device {
        &mut self.devices[idx]
    }

    /// Add a device. Without an instance id, a fairly unique one is
    /// generated. Returns the device's index.
    pub fn add_device(
        &mut self,
        vendor: &str,
        device: &str,
        instance: Option<&str>,
    ) -> Result<usize> {
        let instance = match instance {
            Some(i) => i.to_owned(),
            None => self.generate_unique_id(),
        };
        let id = Id::new(vendor, device, &instance)?;
        self.devices.push(Device::new(id));
        Ok(self.devices.len() - 1)
    }

    /// Add a configurable device, loading (and applying) its
    /// configuration file when one is given and exists.
    pub fn add_configurable_device(
        &mut self,
        vendor: &str,
        device: &str,
        filename: Option<std::path::PathBuf>,
    ) -> Result<usize> {
        let idx = self.add_device(vendor, device, None)?;
        let dev = &mut self.devices[idx];
        dev.make_configurable(filename);
        config::load_config(dev, &mut *self.io, &self.link, self.platform.now_ms())?;
        Ok(idx)
    }

    /// Enable or disable a device: enabling starts its heartbeats
    /// (first one right away), disabling sends the goodbye.
    pub fn enable_device(&mut self, idx: usize, enabled: bool) -> Result<()> {
        let now = self.platform.now_ms();
        self.devices[idx].set_enabled(enabled, &mut *self.io, &self.link, now);
        Ok(())
    }

    /// Disable every device, each sending its goodbye heartbeat.
    pub fn disable_all_devices(&mut self) {
        let now = self.platform.now_ms();
        for dev in &mut self.devices {
            dev.set_enabled(false, &mut *self.io, &self.link, now);
        }
    }

    /// Generate a fairly unique instance id: the local hardware
    /// address in hex, the millisecond clock in base 36, padded to
    /// 16 characters. Calls less than a millisecond apart may
    /// collide.
    pub fn generate_unique_id(&mut self) -> String {
        let mut s: String = self
            .local
            .bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        s.truncate(UNIQUE_ID_LEN);
        if s.len() < UNIQUE_ID_LEN {
            let room = UNIQUE_ID_LEN - s.len();
            let mut t = base36(self.platform.now_ms());
            if t.len() > room {
                t = t[t.len() - room..].to_owned();
            }
            for _ in 0..room - t.len() {
                s.push('0');
            }
            s.push_str(&t);
        }
        s
    }

    /// Send a message to the transport's broadcast address.
    pub fn send(&mut self, msg: &Message) -> Result<usize> {
        self.io.send(msg.encode().as_bytes(), None)
    }

    /// Send a message to one transport address.
    pub fn send_to(&mut self, msg: &Message, dst: &Address) -> Result<usize> {
        self.io.send(msg.encode().as_bytes(), Some(dst))
    }

    /// Parse a transport textual address.
    pub fn addr_from_string(&mut self, s: &str) -> Result<Address> {
        self.io.addr_from_string(s)
    }

    /// Render a transport address.
    pub fn addr_to_string(&mut self, addr: &Address) -> Result<String> {
        self.io.addr_to_string(addr)
    }

    /// Every local interface address, in textual form.
    pub fn local_addr_strings(&mut self) -> Result<Vec<String>> {
        let list = self.io.local_addr_list()?;
        list.iter().map(|a| self.io.addr_to_string(a)).collect()
    }

    /// True when this message is a heartbeat of ours echoed back by
    /// a hub. `my_id` is needed off UDP, where the body carries no
    /// address to compare.
    #[must_use]
    pub fn is_hub_echo_message(&self, msg: &Message, my_id: Option<&Id>) -> bool {
        is_hub_echo(&self.link, msg, my_id)
    }

    /// One poll cycle: wait up to `timeout_ms` for traffic, decode
    /// and dispatch every pending datagram, then send any heartbeats
    /// that have come due. Returns the messages decoded this cycle,
    /// in arrival order.
    pub fn poll(&mut self, timeout_ms: u32) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        let available = self.io.poll_available(timeout_ms)?;
        if available > 0 {
            let mut buf = vec![0u8; available.max(1500)];
            loop {
                let (n, _src) = match self.io.recv(&mut buf) {
                    Ok(r) => r,
                    Err(Error::Transport(e)) => {
                        // Recoverable: retried on the next poll.
                        warn!("transport read error, will retry: {e}");
                        break;
                    }
                    Err(e) => return Err(e),
                };
                if n == 0 {
                    break;
                }
                let Ok(text) = std::str::from_utf8(&buf[..n]) else {
                    warn!("dropping non-UTF8 datagram ({n} bytes)");
                    continue;
                };
                debug!("read {n} bytes as packet");
                let mut decoder = Decoder::new();
                decoder.feed(text);
                match decoder.take() {
                    Ok(msg) => {
                        self.dispatch(&msg)?;
                        out.push(msg);
                    }
                    Err(e) => warn!("dropping bad frame: {e}"),
                }
            }
        }
        let now = self.platform.now_ms();
        for dev in &mut self.devices {
            dev.timely_heartbeat(&mut *self.io, &self.link, now);
        }
        Ok(out)
    }

    fn dispatch(&mut self, msg: &Message) -> Result<()> {
        for l in &mut self.listeners {
            l(msg);
        }
        for dev in &mut self.devices {
            if dev.enabled() && !dev.hub_confirmed() && is_hub_echo(&self.link, msg, Some(dev.id()))
            {
                dev.confirm_hub();
            }
        }
        for dev in &mut self.devices {
            dev.handle_message(msg, &mut *self.io, &*self.platform, &self.link)?;
        }
        Ok(())
    }

    /// Graceful shutdown: every device says goodbye, then the
    /// transport is closed.
    pub fn close(&mut self) -> Result<()> {
        self.disable_all_devices();
        self.io.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ConnectType;
    use crate::loopback::LoopbackTransport;
    use crate::platform::fake::FakePlatform;

    fn loopback_app() -> Application {
        let setting = Setting::new("loopback", ConnectType::Standalone);
        Application::with_transport(
            Box::new(LoopbackTransport::echo()),
            setting,
            Box::new(FakePlatform::new()),
        )
        .unwrap()
    }

    #[test]
    fn heartbeat_discovery_over_loopback() -> Result<()> {
        let mut app = loopback_app();
        let dev = app.add_device("acme", "cm12", Some("srv"))?;
        app.device_mut(dev).set_version("1.0");
        app.enable_device(dev, true)?;
        assert!(!app.device(dev).hub_confirmed());

        // The echo transport plays hub: the heartbeat comes back and
        // confirms it.
        let msgs = app.poll(10)?;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].schema().to_string(), "hbeat.basic");
        assert!(app.device(dev).hub_confirmed());
        Ok(())
    }

    #[test]
    fn unique_id_shape() {
        let mut app = loopback_app();
        let id = app.generate_unique_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        // Usable as an instance id.
        assert!(Id::new("acme", "dev", &id).is_ok());
    }

    #[test]
    fn add_device_generates_instance() -> Result<()> {
        let mut app = loopback_app();
        let dev = app.add_device("acme", "cm12", None)?;
        assert_eq!(app.device(dev).id().instance().len(), 16);
        Ok(())
    }

    #[test]
    fn malformed_frames_are_dropped_not_fatal() -> Result<()> {
        let mut io = Box::new(LoopbackTransport::echo());
        io.send(b"not an xpl frame\n", None)?;
        let setting = Setting::new("loopback", ConnectType::Standalone);
        let mut app =
            Application::with_transport(io, setting, Box::new(FakePlatform::new()))?;
        let msgs = app.poll(10)?;
        assert!(msgs.is_empty());
        Ok(())
    }

    #[test]
    fn global_listeners_see_everything() -> Result<()> {
        let mut app = loopback_app();
        let count = std::rc::Rc::new(std::cell::Cell::new(0));
        let c = count.clone();
        app.add_listener(move |_| c.set(c.get() + 1));
        let dev = app.add_device("acme", "cm12", Some("srv"))?;
        app.enable_device(dev, true)?;
        app.poll(10)?;
        assert_eq!(count.get(), 1);
        Ok(())
    }

    #[test]
    fn close_sends_goodbyes() -> Result<()> {
        let mut app = loopback_app();
        let dev = app.add_device("acme", "cm12", Some("srv"))?;
        app.enable_device(dev, true)?;
        app.poll(10)?;
        app.close()?;
        // The transport is gone afterwards.
        assert!(app.poll(10).is_err());
        Ok(())
    }

    #[test]
    fn hub_echo_udp_rules() -> Result<()> {
        // A link that claims to be UDP checks remote-ip and port.
        let link = LinkInfo {
            is_udp: true,
            port: Some(54321),
            remote_ip: Some("192.0.2.7".to_owned()),
            remote_addr: None,
        };
        let mut hb = Message::broadcast(
            crate::message::MessageType::Status,
            "acme-cm12.srv".parse()?,
            "hbeat.app".parse()?,
        );
        hb.add_pair("interval", "5")?;
        hb.add_pair("port", "54321")?;
        hb.add_pair("remote-ip", "192.0.2.7")?;
        assert!(is_hub_echo(&link, &hb, None));

        let mut other = hb.clone();
        other.set_value("port", "11111")?;
        assert!(!is_hub_echo(&link, &other, None));

        let mut other = hb.clone();
        other.set_value("remote-ip", "192.0.2.99")?;
        assert!(!is_hub_echo(&link, &other, None));

        // Non heartbeat schema never matches.
        let stat = Message::broadcast(
            crate::message::MessageType::Status,
            "acme-cm12.srv".parse()?,
            "sensor.basic".parse()?,
        );
        assert!(!is_hub_echo(&link, &stat, None));
        Ok(())
    }

    #[test]
    fn base36_digits() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(36 * 36 + 1), "101");
    }
}
