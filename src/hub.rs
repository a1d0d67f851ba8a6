/*! The hub: the per-host xPL multiplexer.

Only one process can own UDP port 3865, so every host runs a hub
there. Local clients bind ephemeral ports and announce them in their
heartbeats; the hub records each distinct port and rebroadcasts every
inbound frame to all of them, unchanged. In particular the hop count
is NOT incremented on rebroadcast; only bridges do that.

Clients that stop heartbeating are swept out once a minute after
twice their interval plus one minute of silence.
*/
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use log::{debug, info, warn};

use crate::app::Application;
use crate::io::{ConnectType, Setting, TransportRegistry};
use crate::message::Message;
use crate::Result;

/// Fallback when a heartbeat has no usable `interval`, minutes.
const DEFAULT_CLIENT_INTERVAL: u32 = 5;
/// Ceiling on what a client may claim, minutes.
const MAX_CLIENT_INTERVAL: u32 = 30;
/// How often the client table is swept, milliseconds.
const SWEEP_PERIOD_MS: u64 = 60_000;

/// One tracked local client.
struct HubClient {
    port: u16,
    interval_min: u32,
    last_heard_ms: u64,
    ident: String,
    sock: UdpSocket,
    addr: SocketAddrV4,
}

/// A hub engine wrapped around a standalone application.
pub struct Hub {
    app: Application,
    clients: Vec<HubClient>,
    local_addrs: Vec<String>,
    listener_ip: Ipv4Addr,
    last_sweep_ms: u64,
}

impl Hub {
    /// Open a hub on the transport named in the setting (UDP in real
    /// life). The connection mode is forced to standalone: a hub
    /// that does not own the xPL port is not a hub.
    pub fn open(registry: &TransportRegistry, mut setting: Setting) -> Result<Self> {
        setting.connect = ConnectType::Standalone;
        let app = Application::open(registry, setting)?;
        Self::with_app(app)
    }

    /// Wrap an existing standalone application.
    pub fn with_app(mut app: Application) -> Result<Self> {
        let local_addrs = app.local_addr_strings()?;
        debug!("local addresses: {local_addrs:?}");
        let listener_ip = app
            .link()
            .remote_ip
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Ipv4Addr::LOCALHOST);
        let last_sweep_ms = app.now_ms();
        Ok(Self {
            app,
            clients: Vec::new(),
            local_addrs,
            listener_ip,
            last_sweep_ms,
        })
    }

    /// The wrapped application.
    pub fn app_mut(&mut self) -> &mut Application {
        &mut self.app
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// One cycle: poll the application, track and rebroadcast every
    /// message, sweep dead clients once a minute.
    pub fn poll(&mut self, timeout_ms: u32) -> Result<()> {
        let msgs = self.app.poll(timeout_ms)?;
        for msg in &msgs {
            self.handle(msg);
        }
        let now = self.app.now_ms();
        if now.saturating_sub(self.last_sweep_ms) >= SWEEP_PERIOD_MS {
            self.last_sweep_ms = now;
            self.sweep(now);
        }
        Ok(())
    }

    fn handle(&mut self, msg: &Message) {
        self.track_client(msg);
        self.rebroadcast(msg);
    }

    /// Heartbeats from this host update the client table.
    fn track_client(&mut self, msg: &Message) {
        let class = msg.schema().class();
        if !class.eq_ignore_ascii_case("hbeat") && !class.eq_ignore_ascii_case("config") {
            return;
        }
        let Some(remote_ip) = msg.value("remote-ip") else {
            debug!("heartbeat without remote-ip ignored");
            return;
        };
        if !self.local_addrs.iter().any(|a| a == remote_ip) {
            debug!("heartbeat from foreign host {remote_ip} ignored");
            return;
        }
        let signing_off = msg.schema().typ().eq_ignore_ascii_case("end");
        let Some(port) = msg.value("port").and_then(|p| p.parse::<u16>().ok()) else {
            debug!("heartbeat without usable port ignored");
            return;
        };
        let interval_min = match msg.value("interval").and_then(|i| i.parse::<u32>().ok()) {
            None => {
                debug!("heartbeat without usable interval, defaulting to 5 minutes");
                DEFAULT_CLIENT_INTERVAL
            }
            Some(i) if i > MAX_CLIENT_INTERVAL => {
                debug!("heartbeat interval {i} out of range, constrained to 30 minutes");
                MAX_CLIENT_INTERVAL
            }
            Some(i) => i,
        };
        let ident = msg.source().to_string();
        let now = self.app.now_ms();

        match self.clients.iter().position(|c| c.port == port) {
            None => {
                // Signoff of an unknown client is of no interest.
                if signing_off {
                    return;
                }
                match Self::new_client(self.listener_ip, port, interval_min, ident, now) {
                    Ok(c) => {
                        info!(
                            "added client {} on port {port}, interval {interval_min}, \
                             {} clients now",
                            c.ident,
                            self.clients.len() + 1
                        );
                        self.clients.push(c);
                    }
                    Err(e) => warn!("cannot set up client on port {port}: {e}"),
                }
            }
            Some(i) if signing_off => {
                info!("client {} on port {port} signed off", self.clients[i].ident);
                self.clients.remove(i);
            }
            Some(i) => {
                let c = &mut self.clients[i];
                if c.ident != ident {
                    debug!("client on port {port} changed ident {} -> {ident}", c.ident);
                    c.ident = ident;
                }
                if c.interval_min != interval_min {
                    debug!(
                        "client on port {port} changed interval {} -> {interval_min}",
                        c.interval_min
                    );
                    c.interval_min = interval_min;
                }
                c.last_heard_ms = now;
            }
        }
    }

    fn new_client(
        listener_ip: Ipv4Addr,
        port: u16,
        interval_min: u32,
        ident: String,
        now: u64,
    ) -> Result<HubClient> {
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        sock.set_broadcast(true)?;
        Ok(HubClient {
            port,
            interval_min,
            last_heard_ms: now,
            ident,
            sock,
            addr: SocketAddrV4::new(listener_ip, port),
        })
    }

    /// Serialize once, deliver to every client. The frame goes out
    /// exactly as it came in.
    fn rebroadcast(&self, msg: &Message) {
        if self.clients.is_empty() {
            return;
        }
        let text = msg.encode();
        for c in &self.clients {
            match c.sock.send_to(text.as_bytes(), c.addr) {
                Ok(n) => debug!("rebroadcast {n} bytes to port {}", c.port),
                Err(e) => debug!("cannot rebroadcast to port {}: {e}", c.port),
            }
        }
    }

    /// Evict clients not heard from in twice their heartbeat
    /// interval plus a minute.
    fn sweep(&mut self, now: u64) {
        self.clients.retain(|c| {
            let elapsed_min = now.saturating_sub(c.last_heard_ms) / 60_000;
            let keep = elapsed_min < u64::from(c.interval_min) * 2 + 1;
            if !keep {
                info!(
                    "removing client {} on port {}: silent for {elapsed_min} minutes \
                     (heartbeats expected every {})",
                    c.ident, c.port, c.interval_min
                );
            }
            keep
        });
    }
}
