/*! In-memory loopback transport.

Opened through the registry (name `"loopback"`) it echoes every sent
frame back to its own receive queue, which is exactly what a device
sees when a hub is running on the same host. [`LoopbackTransport::pair`]
instead cross-connects two endpoints, which is what bridge and hub
tests want.

No OS resources involved; useful for tests and single-process
experiments.
*/
use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use crate::io::{Address, Ctl, CtlReply, Setting, Transport};
use crate::{Error, Result};

type Queue = Rc<RefCell<VecDeque<(Vec<u8>, Address)>>>;

/// A loopback endpoint.
pub struct LoopbackTransport {
    rx: Queue,
    tx: Queue,
    local: Address,
    open: bool,
}

/// Registry entry point: an echo endpoint.
pub fn open(
    _setting: &mut Setting,
    _platform: &dyn crate::platform::Platform,
) -> Result<Box<dyn Transport>> {
    Ok(Box::new(LoopbackTransport::echo()))
}

impl LoopbackTransport {
    fn endpoint(rx: Queue, tx: Queue, host: u8) -> Self {
        Self {
            rx,
            tx,
            local: Address::inet4(Ipv4Addr::new(127, 0, 0, host), crate::io::XPL_PORT),
            open: true,
        }
    }

    /// An endpoint that receives everything it sends.
    #[must_use]
    pub fn echo() -> Self {
        let q: Queue = Rc::default();
        Self::endpoint(q.clone(), q, 1)
    }

    /// Two cross-connected endpoints: what one sends, the other
    /// receives.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a: Queue = Rc::default();
        let b: Queue = Rc::default();
        (
            Self::endpoint(a.clone(), b.clone(), 1),
            Self::endpoint(b, a, 2),
        )
    }

    fn check_open(&self) -> Result<()> {
        if self.open { Ok(()) } else { Err(Error::TransportNotOpen) }
    }
}

impl Transport for LoopbackTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Option<Address>)> {
        self.check_open()?;
        match self.rx.borrow_mut().pop_front() {
            None => Ok((0, None)),
            Some((data, src)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, Some(src)))
            }
        }
    }

    fn send(&mut self, buf: &[u8], _dst: Option<&Address>) -> Result<usize> {
        self.check_open()?;
        self.tx
            .borrow_mut()
            .push_back((buf.to_vec(), self.local.clone()));
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.rx.borrow_mut().clear();
        Ok(())
    }

    fn ctl(&mut self, req: Ctl) -> Result<CtlReply> {
        self.check_open()?;
        match req {
            Ctl::Poll { .. } => {
                // Nothing to wait on; data is either queued or not.
                let n = self.rx.borrow().front().map_or(0, |(d, _)| d.len());
                Ok(CtlReply::Available(n))
            }
            Ctl::BroadcastAddr => Ok(CtlReply::Addr(
                Address::inet4(Ipv4Addr::BROADCAST, crate::io::XPL_PORT).into_broadcast(),
            )),
            Ctl::LocalAddr => Ok(CtlReply::Addr(self.local.clone())),
            Ctl::LocalAddrList => Ok(CtlReply::AddrList(vec![self.local.clone()])),
            Ctl::AddrToString(a) => match a.ipv4() {
                Some(ip) => Ok(CtlReply::Text(ip.to_string())),
                None => Err(Error::BadArgument("not an IPv4 address".into())),
            },
            Ctl::AddrFromString(s) => {
                let ip: Ipv4Addr = s
                    .parse()
                    .map_err(|_| Error::BadArgument(format!("bad address {s:?}")))?;
                Ok(CtlReply::Addr(Address::inet4(ip, crate::io::XPL_PORT)))
            }
        }
    }
}
