/*! The bridge: a two-sided xPL relay.

A bridge joins an inner non-UDP network (typically ZigBee, where no
hub exists) to the outer UDP LAN. It learns its inner clients from
the `remote-addr` pair their heartbeats carry, echoes inner traffic
back to them (standing in for the missing broadcast medium), and
forwards frames across with a hop limit: a frame whose hop count
exceeds `max_hop` is silently dropped, and a forwarded frame has its
hop count incremented. The hub never increments; the bridge always
does.
*/
use log::{debug, error, info, warn};

use crate::app::Application;
use crate::id::Id;
use crate::io::{Address, ConnectType, Setting, TransportRegistry};
use crate::message::{HOP_MAX, Message};
use crate::{Error, Result};

/// How often the client table is swept, milliseconds.
const SWEEP_PERIOD_MS: u64 = 60_000;

/// One learned inner-side client, keyed by its transport address.
struct BridgeClient {
    addr: Address,
    id: Id,
    /// Longest tolerated heartbeat silence, seconds: twice the
    /// announced interval plus a minute.
    period_max_s: u64,
    last_heard_ms: u64,
}

/// A bridge around two applications.
pub struct Bridge {
    inner: Application,
    outer: Application,
    clients: Vec<BridgeClient>,
    max_hop: u8,
    last_sweep_ms: u64,
}

/// The inner side must name a transport, and it must not be udp.
fn check_insetting(setting: &Setting) -> Result<()> {
    if setting.transport.is_empty() || setting.transport == "udp" {
        return Err(Error::BadArgument(
            "inner transport must be named and must not be udp".into(),
        ));
    }
    Ok(())
}

impl Bridge {
    /// Open both sides. The inner side must name a non-UDP transport
    /// and is forced standalone; the outer side is forced to UDP in
    /// hub-client mode.
    pub fn open(
        registry: &TransportRegistry,
        mut insetting: Setting,
        mut outsetting: Setting,
        max_hop: u8,
    ) -> Result<Self> {
        check_insetting(&insetting)?;
        insetting.connect = ConnectType::Standalone;
        outsetting.transport = "udp".to_owned();
        outsetting.connect = ConnectType::ViaHub;
        let inner = Application::open(registry, insetting)?;
        let outer = Application::open(registry, outsetting)?;
        Self::with_apps(inner, outer, max_hop)
    }

    /// Close and replace only the inner side, e.g. after the PAN ID
    /// was reconfigured remotely. The outer application and the
    /// learned client table are left untouched.
    pub fn reopen_inner(
        &mut self,
        registry: &TransportRegistry,
        mut new_insetting: Setting,
    ) -> Result<()> {
        check_insetting(&new_insetting)?;
        new_insetting.connect = ConnectType::Standalone;
        if let Err(e) = self.inner.close() {
            warn!("closing old inner side: {e}");
        }
        self.inner = Application::open(registry, new_insetting)?;
        info!("inner side re-opened");
        Ok(())
    }

    /// Wrap two already opened applications.
    pub fn with_apps(inner: Application, outer: Application, max_hop: u8) -> Result<Self> {
        let max_hop = max_hop.clamp(1, HOP_MAX);
        let last_sweep_ms = inner.now_ms();
        Ok(Self {
            inner,
            outer,
            clients: Vec::new(),
            max_hop,
            last_sweep_ms,
        })
    }

    /// The inner-side application.
    pub fn inner_mut(&mut self) -> &mut Application {
        &mut self.inner
    }

    /// The outer-side application.
    pub fn outer_mut(&mut self) -> &mut Application {
        &mut self.outer
    }

    /// Number of learned inner clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// The configured hop ceiling.
    #[must_use]
    pub fn max_hop(&self) -> u8 {
        self.max_hop
    }

    /// One cycle: poll both sides, forward, and sweep stale clients
    /// once a minute. The timeout is split between the sides.
    pub fn poll(&mut self, timeout_ms: u32) -> Result<()> {
        let half = (timeout_ms / 2).max(1);
        for mut msg in self.inner.poll(half)? {
            self.handle_inner(&mut msg)?;
        }
        for mut msg in self.outer.poll(half)? {
            self.handle_outer(&mut msg)?;
        }
        let now = self.inner.now_ms();
        if now.saturating_sub(self.last_sweep_ms) >= SWEEP_PERIOD_MS {
            self.last_sweep_ms = now;
            self.sweep(now);
        }
        Ok(())
    }

    /// Inner side: learn clients, echo, forward out.
    fn handle_inner(&mut self, msg: &mut Message) -> Result<()> {
        let mut echo_to: Option<usize> = None;
        let class = msg.schema().class();
        if class.eq_ignore_ascii_case("hbeat") || class.eq_ignore_ascii_case("config") {
            echo_to = self.learn_client(msg)?;
        }

        if self.inner.setting().broadcast {
            debug!("echoing inner message to all {} clients", self.clients.len());
            for i in 0..self.clients.len() {
                let addr = self.clients[i].addr.clone();
                if let Err(e) = self.inner.send_to(msg, &addr) {
                    warn!("inner echo failed: {e}");
                }
            }
        } else if let Some(i) = echo_to {
            // Broadcast is off: at least echo the heartbeat back to
            // its sender so it can confirm the bridge is alive.
            debug!("echoing heartbeat to its sender");
            let addr = self.clients[i].addr.clone();
            if let Err(e) = self.inner.send_to(msg, &addr) {
                warn!("inner echo failed: {e}");
            }
        }

        if msg.hop() <= self.max_hop {
            msg.hop_inc();
            debug!("[out<--in] delivering message to the outer side");
            if let Err(e) = self.outer.send(msg) {
                warn!("outer send failed: {e}");
            }
        }
        Ok(())
    }

    /// Track the client a heartbeat describes. Returns its index for
    /// the echo path.
    fn learn_client(&mut self, msg: &Message) -> Result<Option<usize>> {
        let Some(addr_str) = msg.value("remote-addr").map(str::to_owned) else {
            return Ok(None);
        };
        let addr = match self.inner.addr_from_string(&addr_str) {
            Ok(a) => a,
            Err(e) => {
                error!("cannot convert {addr_str:?} to a remote address: {e}");
                return Ok(None);
            }
        };
        let typ = msg.schema().typ();
        if typ.eq_ignore_ascii_case("basic") || typ.eq_ignore_ascii_case("app") {
            let Some(interval_min) = msg.value("interval").and_then(|i| i.parse::<u64>().ok())
            else {
                error!("heartbeat from {addr_str} without usable interval");
                return Ok(None);
            };
            let now = self.inner.now_ms();
            let idx = match self.clients.iter().position(|c| c.addr == addr) {
                Some(i) => i,
                None => {
                    self.clients.push(BridgeClient {
                        addr,
                        id: msg.source().clone(),
                        period_max_s: 0,
                        last_heard_ms: now,
                    });
                    info!(
                        "new client {addr_str}, processing {} clients",
                        self.clients.len()
                    );
                    self.clients.len() - 1
                }
            };
            let c = &mut self.clients[idx];
            c.period_max_s = interval_min * 120 + 60;
            c.last_heard_ms = now;
            c.id = msg.source().clone();
            Ok(Some(idx))
        } else if typ.eq_ignore_ascii_case("end") {
            if let Some(i) = self.clients.iter().position(|c| c.addr == addr) {
                self.clients.remove(i);
                info!(
                    "deleted client {addr_str} after its heartbeat end, \
                     processing {} clients",
                    self.clients.len()
                );
            }
            Ok(None)
        } else {
            Ok(None)
        }
    }

    /// Outer side: hop-limited forwarding to the learned clients.
    fn handle_outer(&mut self, msg: &mut Message) -> Result<()> {
        if msg.hop() > self.max_hop {
            return Ok(());
        }
        msg.hop_inc();
        let broadcast = self.outer.setting().broadcast;
        for i in 0..self.clients.len() {
            let deliver = broadcast
                || msg
                    .target()
                    .is_some_and(|t| self.clients[i].id.eq_ignore_case(t));
            if deliver {
                debug!("[out-->in] delivering message to the inner side");
                let addr = self.clients[i].addr.clone();
                if let Err(e) = self.inner.send_to(msg, &addr) {
                    warn!("inner send failed: {e}");
                }
            }
        }
        Ok(())
    }

    /// Evict clients past their heartbeat deadline.
    fn sweep(&mut self, now: u64) {
        self.clients.retain(|c| {
            let keep = now.saturating_sub(c.last_heard_ms) <= c.period_max_s * 1000;
            if !keep {
                info!("deleted client {} after heartbeat timeout", c.id);
            }
            keep
        });
    }

    /// Graceful shutdown of both sides.
    pub fn close(&mut self) -> Result<()> {
        let a = self.inner.close();
        let b = self.outer.close();
        a.and(b)
    }
}
