/*! xPL devices.

A device is one addressable end point: it announces itself with
heartbeats, filters what it wants to hear, and hands matching
messages to its listeners. Devices are owned by an
[`crate::app::Application`], which drives their timing from its poll
loop.

Heartbeat cadence has three tiers: every 3 seconds until a hub echo
confirms somebody is listening, every 60 seconds while a configurable
device awaits configuration, then the device's own interval (default
5 minutes).
*/
use log::{debug, warn};

use crate::config::DeviceConfig;
use crate::filter::Filter;
use crate::id::Id;
use crate::io::Transport;
use crate::message::{Message, MessageType};
use crate::platform::Platform;
use crate::{Error, Result};

/// Default heartbeat interval, seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL: u32 = 300;
/// Heartbeat interval while awaiting configuration, seconds.
pub const CONFIG_HEARTBEAT_INTERVAL: u32 = 60;
/// Heartbeat interval until a hub is confirmed, seconds.
pub const HUB_DISCOVERY_INTERVAL: u32 = 3;
/// Largest accepted heartbeat interval, seconds (48 hours).
pub const HEARTBEAT_INTERVAL_MAX: u32 = 172_800;
/// Default group capacity.
pub const DEFAULT_MAX_GROUPS: usize = 4;
/// Default filter capacity.
pub const DEFAULT_MAX_FILTERS: usize = 4;

/// What a device must know about the link its application is on, to
/// fill in heartbeat bodies and route them correctly.
#[derive(Debug, Clone, Default)]
pub struct LinkInfo {
    /// UDP links get `hbeat.app` with `port`/`remote-ip`; everything
    /// else gets `hbeat.basic`.
    pub is_udp: bool,
    /// Local listener port (UDP).
    pub port: Option<u16>,
    /// Local listener address in textual form (UDP).
    pub remote_ip: Option<String>,
    /// Local hardware address in textual form, included in
    /// `hbeat.basic` only when the non-standard `remote-addr`
    /// extension is enabled.
    pub remote_addr: Option<String>,
}

/// Messages queued by listeners while a message is being handled.
/// The owning device stamps its source id on each and sends them in
/// push order.
#[derive(Debug, Default)]
pub struct Outbox {
    msgs: Vec<Message>,
}

impl Outbox {
    /// Queue a message for sending.
    pub fn push(&mut self, msg: Message) {
        self.msgs.push(msg);
    }
}

/// A device listener: predicates plus the callback.
pub struct Listener {
    typ: Option<MessageType>,
    class: Option<String>,
    schema_type: Option<String>,
    f: Box<dyn FnMut(&Device, &Message, &mut Outbox)>,
}

impl Listener {
    fn matches(&self, msg: &Message) -> bool {
        if self.typ.is_some_and(|t| t != msg.typ()) {
            return false;
        }
        if let Some(c) = &self.class
            && !c.eq_ignore_ascii_case(msg.schema().class())
        {
            return false;
        }
        if let Some(t) = &self.schema_type
            && !t.eq_ignore_ascii_case(msg.schema().typ())
        {
            return false;
        }
        true
    }
}

/// One xPL device.
pub struct Device {
    id: Id,
    version: Option<String>,
    hbeat_interval: u32,
    last_hbeat_ms: Option<u64>,
    listeners: Vec<Listener>,
    groups: Vec<String>,
    group_max: usize,
    filters: Vec<Filter>,
    filter_max: usize,
    pub(crate) config: Option<DeviceConfig>,
    enabled: bool,
    report_own_messages: bool,
    respond_to_broadcast: bool,
    hub_confirmed: bool,
}

impl Device {
    /// Create a disabled device. Nothing is sent until
    /// [`Device::set_enabled`].
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            version: None,
            hbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            last_hbeat_ms: None,
            listeners: Vec::new(),
            groups: Vec::new(),
            group_max: DEFAULT_MAX_GROUPS,
            filters: Vec::new(),
            filter_max: DEFAULT_MAX_FILTERS,
            config: None,
            enabled: false,
            report_own_messages: false,
            respond_to_broadcast: true,
            hub_confirmed: false,
        }
    }

    /// Device id.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub(crate) fn set_instance(&mut self, instance: &str) -> Result<()> {
        self.id.set_instance(instance)
    }

    /// Version string advertised in heartbeats.
    pub fn set_version(&mut self, version: &str) {
        self.version = if version.is_empty() {
            None
        } else {
            Some(version.to_owned())
        };
    }

    /// Heartbeat interval in seconds.
    #[must_use]
    pub fn heartbeat_interval(&self) -> u32 {
        self.hbeat_interval
    }

    /// Change the heartbeat interval. Out of range values are
    /// silently ignored and the previous interval kept.
    pub fn set_heartbeat_interval(&mut self, seconds: u32) {
        if seconds > HEARTBEAT_INTERVAL_MAX {
            warn!("Ignoring out of range heartbeat interval {seconds}");
            return;
        }
        self.hbeat_interval = seconds;
    }

    /// Whether the device sees frames it sent itself.
    pub fn set_report_own_messages(&mut self, report: bool) {
        self.report_own_messages = report;
    }

    /// Whether the device answers broadcast `hbeat.request` probes.
    pub fn set_respond_to_broadcast(&mut self, respond: bool) {
        self.respond_to_broadcast = respond;
    }

    /// True once this device has seen one of its own heartbeats come
    /// back, proving a hub is relaying.
    #[must_use]
    pub fn hub_confirmed(&self) -> bool {
        self.hub_confirmed
    }

    pub(crate) fn confirm_hub(&mut self) {
        if !self.hub_confirmed {
            debug!("{}: hub detected and confirmed", self.id);
            self.hub_confirmed = true;
        }
    }

    /// True while the device is announcing itself.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True for a configurable device.
    #[must_use]
    pub fn configurable(&self) -> bool {
        self.config.is_some()
    }

    /// True once a configurable device has received (or loaded) its
    /// configuration.
    #[must_use]
    pub fn configured(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.configured)
    }

    /// Register a listener. `None` predicates match anything.
    /// Listeners run in registration order.
    pub fn add_listener(
        &mut self,
        typ: Option<MessageType>,
        class: Option<&str>,
        schema_type: Option<&str>,
        f: impl FnMut(&Device, &Message, &mut Outbox) + 'static,
    ) {
        self.listeners.push(Listener {
            typ,
            class: class.map(str::to_owned),
            schema_type: schema_type.map(str::to_owned),
            f: Box::new(f),
        });
    }

    /// Group names this device answers to.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Join a group by bare name.
    pub fn add_group(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        if self.groups.len() >= self.group_max {
            return Err(Error::CapacityExceeded(format!(
                "at most {} groups",
                self.group_max
            )));
        }
        debug!("{}: joining group {name}", self.id);
        self.groups.push(name.to_owned());
        Ok(())
    }

    /// Join a group given its configuration form `xpl-group.<name>`.
    /// Anything else is ignored.
    pub fn add_group_from_string(&mut self, s: &str) -> Result<()> {
        match s.strip_prefix("xpl-group.") {
            Some(name) => self.add_group(name),
            None => Ok(()),
        }
    }

    /// Remove every group.
    pub fn clear_groups(&mut self) {
        self.groups.clear();
    }

    /// Installed filters.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Install a filter.
    pub fn add_filter(&mut self, filter: Filter) -> Result<()> {
        if self.filters.len() >= self.filter_max {
            return Err(Error::CapacityExceeded(format!(
                "at most {} filters",
                self.filter_max
            )));
        }
        debug!("{}: adding filter {filter}", self.id);
        self.filters.push(filter);
        Ok(())
    }

    /// Install a filter from its textual form. An empty string is
    /// ignored.
    pub fn add_filter_from_string(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.add_filter(s.parse()?)
    }

    /// Remove every filter.
    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    pub(crate) fn group_capacity(&self) -> usize {
        self.group_max
    }

    pub(crate) fn filter_capacity(&self) -> usize {
        self.filter_max
    }

    /// Build the heartbeat (or goodbye) message for the current
    /// state.
    fn heartbeat_message(&self, info: &LinkInfo, goodbye: bool) -> Message {
        let configuring = self.configurable() && !self.configured();
        let class = if configuring { "config" } else { "hbeat" };
        let typ = match (goodbye, info.is_udp) {
            (true, _) => "end",
            (false, true) => "app",
            (false, false) => "basic",
        };
        let schema = crate::id::Schema::new(class, typ).expect("static schema");
        let mut m = Message::broadcast(MessageType::Status, self.id.clone(), schema);
        let interval_min = if configuring {
            CONFIG_HEARTBEAT_INTERVAL / 60
        } else {
            self.hbeat_interval / 60
        };
        m.add_pair("interval", &interval_min.to_string())
            .expect("name within bound");
        if let Some(port) = info.port.filter(|_| info.is_udp) {
            m.add_pair("port", &port.to_string())
                .expect("name within bound");
        }
        if let Some(ip) = info.remote_ip.as_ref().filter(|_| info.is_udp) {
            m.add_pair("remote-ip", ip).expect("name within bound");
        }
        if let Some(v) = &self.version {
            m.add_pair("version", v).expect("name within bound");
        }
        if let Some(addr) = info.remote_addr.as_ref().filter(|_| !info.is_udp) {
            m.add_pair("remote-addr", addr).expect("name within bound");
        }
        m
    }

    /// Send a heartbeat now. The timer only advances on success, so
    /// a failed send retries on the next tick.
    pub(crate) fn send_heartbeat(
        &mut self,
        io: &mut dyn Transport,
        info: &LinkInfo,
        now_ms: u64,
    ) {
        let m = self.heartbeat_message(info, false);
        match io.send(m.encode().as_bytes(), None) {
            Ok(_) => {
                debug!("{}: sent heartbeat", self.id);
                self.last_hbeat_ms = Some(now_ms);
            }
            Err(e) => warn!("{}: heartbeat send failed: {e}", self.id),
        }
    }

    fn send_goodbye(&mut self, io: &mut dyn Transport, info: &LinkInfo) {
        let m = self.heartbeat_message(info, true);
        if let Err(e) = io.send(m.encode().as_bytes(), None) {
            warn!("{}: goodbye heartbeat send failed: {e}", self.id);
        }
    }

    /// Enable or disable the device. Enabling sends the first
    /// heartbeat immediately; disabling sends a single `hbeat.end`
    /// (or `config.end` while unconfigured).
    pub(crate) fn set_enabled(
        &mut self,
        enabled: bool,
        io: &mut dyn Transport,
        info: &LinkInfo,
        now_ms: u64,
    ) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.send_heartbeat(io, info, now_ms);
        } else {
            self.send_goodbye(io, info);
        }
    }

    /// Send the heartbeat due at `now_ms`, if any.
    pub(crate) fn timely_heartbeat(
        &mut self,
        io: &mut dyn Transport,
        info: &LinkInfo,
        now_ms: u64,
    ) {
        if !self.enabled {
            return;
        }
        let due_s = if !self.hub_confirmed {
            HUB_DISCOVERY_INTERVAL
        } else if self.configurable() && !self.configured() {
            CONFIG_HEARTBEAT_INTERVAL
        } else {
            self.hbeat_interval
        };
        let due = match self.last_hbeat_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= u64::from(due_s) * 1000,
        };
        if due {
            self.send_heartbeat(io, info, now_ms);
        }
    }

    /// Run one inbound message through this device: addressing
    /// rules, then the config machinery, then the listeners.
    pub(crate) fn handle_message(
        &mut self,
        msg: &Message,
        io: &mut dyn Transport,
        platform: &dyn Platform,
        info: &LinkInfo,
    ) -> Result<()> {
        if !self.report_own_messages && msg.source().eq_ignore_case(&self.id) {
            debug!("{}: skipping message from self", self.id);
            return Ok(());
        }

        if msg.is_broadcast() {
            if self.enabled
                && self.respond_to_broadcast
                && msg.typ() == MessageType::Command
                && msg.schema().class().eq_ignore_ascii_case("hbeat")
                && msg.schema().typ().eq_ignore_ascii_case("request")
            {
                // Jitter the reply so a whole network of devices
                // does not answer in the same instant.
                let delay = platform.jitter_ms(500, 2500);
                debug!("{}: answering discovery request after {delay} ms", self.id);
                platform.sleep_ms(delay);
                self.send_heartbeat(io, info, platform.now_ms());
            }
            if !self.filters.is_empty() && !self.filters.iter().any(|f| f.matches(msg)) {
                return Ok(());
            }
        } else if let Some(group) = msg.group_name() {
            if !self.groups.iter().any(|g| g.eq_ignore_ascii_case(group)) {
                return Ok(());
            }
        } else if !msg.target().is_some_and(|t| t.eq_ignore_case(&self.id)) {
            return Ok(());
        }

        if self.configurable() && msg.schema().class().eq_ignore_ascii_case("config") {
            crate::config::handle_config_message(self, msg, io, info, platform.now_ms())?;
        }

        // Listeners are taken out for the duration so they may
        // borrow the device.
        let mut listeners = std::mem::take(&mut self.listeners);
        let mut outbox = Outbox::default();
        for l in listeners.iter_mut().filter(|l| l.matches(msg)) {
            (l.f)(self, msg, &mut outbox);
        }
        self.listeners = listeners;

        for mut m in outbox.msgs {
            m.set_source(self.id.clone());
            if let Err(e) = io.send(m.encode().as_bytes(), None) {
                warn!("{}: send failed: {e}", self.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use crate::platform::fake::FakePlatform;

    fn udp_info() -> LinkInfo {
        LinkInfo {
            is_udp: true,
            port: Some(54321),
            remote_ip: Some("192.0.2.7".to_owned()),
            remote_addr: None,
        }
    }

    fn drain(io: &mut LoopbackTransport) -> Vec<Message> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1500];
        loop {
            let (n, _) = io.recv(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.push(
                std::str::from_utf8(&buf[..n])
                    .unwrap()
                    .parse()
                    .expect("valid frame on the wire"),
            );
        }
    }

    fn new_device(id: &str) -> Device {
        Device::new(id.parse().unwrap())
    }

    #[test]
    fn enable_sends_immediate_heartbeat() {
        let mut io = LoopbackTransport::echo();
        let mut d = new_device("acme-cm12.srv");
        d.set_version("1.0");
        d.set_enabled(true, &mut io, &udp_info(), 0);
        let sent = drain(&mut io);
        assert_eq!(sent.len(), 1);
        let hb = &sent[0];
        assert_eq!(hb.schema().to_string(), "hbeat.app");
        assert_eq!(hb.value("interval"), Some("5"));
        assert_eq!(hb.value("port"), Some("54321"));
        assert_eq!(hb.value("remote-ip"), Some("192.0.2.7"));
        assert_eq!(hb.value("version"), Some("1.0"));
    }

    #[test]
    fn disable_sends_end() {
        let mut io = LoopbackTransport::echo();
        let mut d = new_device("acme-cm12.srv");
        d.set_enabled(true, &mut io, &udp_info(), 0);
        drain(&mut io);
        d.set_enabled(false, &mut io, &udp_info(), 0);
        let sent = drain(&mut io);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].schema().to_string(), "hbeat.end");
    }

    #[test]
    fn basic_heartbeat_off_udp() {
        let mut io = LoopbackTransport::echo();
        let info = LinkInfo {
            is_udp: false,
            port: None,
            remote_ip: None,
            remote_addr: Some("00:13:a2:00:40:8b:ae:0c".to_owned()),
        };
        let mut d = new_device("acme-cm12.srv");
        d.set_enabled(true, &mut io, &info, 0);
        let hb = &drain(&mut io)[0];
        assert_eq!(hb.schema().to_string(), "hbeat.basic");
        assert!(!hb.has_pair("port"));
        assert_eq!(hb.value("remote-addr"), Some("00:13:a2:00:40:8b:ae:0c"));
    }

    #[test]
    fn heartbeat_cadence_tiers() {
        let mut io = LoopbackTransport::echo();
        let info = udp_info();
        let mut d = new_device("acme-cm12.srv");
        d.set_enabled(true, &mut io, &info, 0);
        drain(&mut io);

        // Unconfirmed: every 3 s.
        d.timely_heartbeat(&mut io, &info, 2_000);
        assert_eq!(drain(&mut io).len(), 0);
        d.timely_heartbeat(&mut io, &info, 3_000);
        assert_eq!(drain(&mut io).len(), 1);

        // Confirmed: every interval (default 300 s).
        d.confirm_hub();
        d.timely_heartbeat(&mut io, &info, 6_000);
        assert_eq!(drain(&mut io).len(), 0);
        d.timely_heartbeat(&mut io, &info, 302_000);
        assert_eq!(drain(&mut io).len(), 0);
        d.timely_heartbeat(&mut io, &info, 303_000);
        assert_eq!(drain(&mut io).len(), 1);
    }

    #[test]
    fn interval_bounds() {
        let mut d = new_device("acme-cm12.srv");
        d.set_heartbeat_interval(0);
        assert_eq!(d.heartbeat_interval(), 0);
        d.set_heartbeat_interval(172_800);
        assert_eq!(d.heartbeat_interval(), 172_800);
        d.set_heartbeat_interval(172_801);
        assert_eq!(d.heartbeat_interval(), 172_800);
    }

    #[test]
    fn own_messages_dropped() -> Result<()> {
        let mut io = LoopbackTransport::echo();
        let p = FakePlatform::new();
        let mut d = new_device("acme-cm12.srv");
        let mut m = Message::broadcast(
            MessageType::Status,
            "acme-cm12.srv".parse()?,
            "sensor.basic".parse()?,
        );
        m.add_pair("current", "1")?;

        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let h = hits.clone();
        d.add_listener(None, None, None, move |_, _, _| h.set(h.get() + 1));

        d.handle_message(&m, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 0);

        d.set_report_own_messages(true);
        d.handle_message(&m, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 1);
        Ok(())
    }

    #[test]
    fn broadcast_filter_drop() -> Result<()> {
        let mut io = LoopbackTransport::echo();
        let p = FakePlatform::new();
        let mut d = new_device("mine-dev.a");
        d.add_filter_from_string("stat.acme.*.*.sensor.basic")?;

        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let h = hits.clone();
        d.add_listener(None, None, None, move |_, _, _| h.set(h.get() + 1));

        // Mismatching broadcast: dropped.
        let mut m = Message::broadcast(
            MessageType::Command,
            "acme-x10.ctrl".parse()?,
            "x10.basic".parse()?,
        );
        m.add_pair("command", "on")?;
        d.handle_message(&m, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 0);

        // Matching broadcast: dispatched.
        let m = Message::broadcast(
            MessageType::Status,
            "acme-sensor.kitchen".parse()?,
            "sensor.basic".parse()?,
        );
        d.handle_message(&m, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 1);
        Ok(())
    }

    #[test]
    fn group_and_unicast_addressing() -> Result<()> {
        let mut io = LoopbackTransport::echo();
        let p = FakePlatform::new();
        let mut d = new_device("mine-dev.a");
        d.add_group("lights")?;

        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let h = hits.clone();
        d.add_listener(None, None, None, move |_, _, _| h.set(h.get() + 1));

        let mk = |target: &str| -> Result<Message> {
            Ok(Message::targeted(
                MessageType::Command,
                "acme-x10.ctrl".parse()?,
                target.parse()?,
                "x10.basic".parse()?,
            ))
        };

        d.handle_message(&mk("xpl-group.lights")?, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 1);
        d.handle_message(&mk("xpl-group.heating")?, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 1);
        d.handle_message(&mk("mine-dev.a")?, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 2);
        d.handle_message(&mk("MINE-DEV.A")?, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 3);
        d.handle_message(&mk("other-dev.b")?, &mut io, &p, &udp_info())?;
        assert_eq!(hits.get(), 3);
        Ok(())
    }

    #[test]
    fn heartbeat_request_jittered_reply() -> Result<()> {
        let mut io = LoopbackTransport::echo();
        let p = FakePlatform::new();
        let mut d = new_device("mine-dev.a");
        d.set_enabled(true, &mut io, &udp_info(), 0);
        drain(&mut io);

        let mut req = Message::broadcast(
            MessageType::Command,
            "asker-hub.x".parse()?,
            "hbeat.request".parse()?,
        );
        req.add_pair("command", "request")?;
        d.handle_message(&req, &mut io, &p, &udp_info())?;

        // The fake platform pins jitter to the lower bound.
        assert_eq!(p.slept_ms(), 500);
        assert_eq!(drain(&mut io).len(), 1);

        // A device told not to respond keeps quiet.
        d.set_respond_to_broadcast(false);
        d.handle_message(&req, &mut io, &p, &udp_info())?;
        assert_eq!(drain(&mut io).len(), 0);
        Ok(())
    }

    #[test]
    fn listener_predicates_and_order() -> Result<()> {
        let mut io = LoopbackTransport::echo();
        let p = FakePlatform::new();
        let mut d = new_device("mine-dev.a");

        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let o3 = order.clone();
        d.add_listener(Some(MessageType::Trigger), None, None, move |_, _, _| {
            o1.borrow_mut().push("trig-only")
        });
        d.add_listener(None, Some("sensor"), Some("basic"), move |_, _, _| {
            o2.borrow_mut().push("sensor-basic")
        });
        d.add_listener(None, None, None, move |_, _, _| o3.borrow_mut().push("all"));

        let m = Message::broadcast(
            MessageType::Status,
            "acme-sensor.kitchen".parse()?,
            "sensor.basic".parse()?,
        );
        d.handle_message(&m, &mut io, &p, &udp_info())?;
        assert_eq!(*order.borrow(), vec!["sensor-basic", "all"]);
        Ok(())
    }

    #[test]
    fn listener_outbox_sent_with_device_source() -> Result<()> {
        let mut io = LoopbackTransport::echo();
        let p = FakePlatform::new();
        let mut d = new_device("mine-dev.a");
        d.add_listener(Some(MessageType::Command), None, None, |dev, msg, out| {
            let mut reply = Message::broadcast(
                MessageType::Status,
                dev.id().clone(),
                msg.schema().clone(),
            );
            reply.add_pair("status", "done").unwrap();
            out.push(reply);
        });

        let m = Message::targeted(
            MessageType::Command,
            "acme-x10.ctrl".parse()?,
            "mine-dev.a".parse()?,
            "x10.basic".parse()?,
        );
        d.handle_message(&m, &mut io, &p, &udp_info())?;
        let sent = drain(&mut io);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].source().to_string(), "mine-dev.a");
        assert_eq!(sent[0].value("status"), Some("done"));
        Ok(())
    }

    #[test]
    fn capacity_limits() -> Result<()> {
        let mut d = new_device("mine-dev.a");
        for i in 0..DEFAULT_MAX_GROUPS {
            d.add_group(&format!("g{i}"))?;
        }
        assert!(matches!(
            d.add_group("overflow"),
            Err(Error::CapacityExceeded(_))
        ));
        assert_eq!(d.groups().len(), DEFAULT_MAX_GROUPS);

        for i in 0..DEFAULT_MAX_FILTERS {
            d.add_filter_from_string(&format!("stat.v{i}.*.*.*.*"))?;
        }
        assert!(matches!(
            d.add_filter_from_string("stat.over.*.*.*.*"),
            Err(Error::CapacityExceeded(_))
        ));
        Ok(())
    }
}
