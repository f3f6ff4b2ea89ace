//! Readiness multiplexer.
//!
//! Wraps `mio::Poll` behind the select-style contract the reactor needs:
//! one bounded call per loop step answering "which endpoints are readable,
//! writable, or erroring". Interests are re-armed before every poll, which
//! both keeps the write set equal to "endpoints with queued output" and
//! re-arms mio's edge-triggered delivery so unconsumed input is reported
//! again on the next step.

use crate::endpoint::{Endpoint, EndpointId};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

const EVENT_CAPACITY: usize = 1024;

/// Readiness classes reported by one poll call.
///
/// No ordering is guaranteed within or across the sets; the reactor applies
/// its fixed read/write/error phase order on top.
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    pub readable: Vec<EndpointId>,
    pub writable: Vec<EndpointId>,
    pub erroring: Vec<EndpointId>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty() && self.erroring.is_empty()
    }
}

/// The per-reactor poll instance.
///
/// `poll(read_set, write_set, error_set, timeout)` in spirit: the read and
/// error sets are every registered endpoint, the write set is whatever was
/// re-armed as write-interested.
pub(crate) struct Multiplexer {
    poll: Poll,
    events: Events,
    timeout: Duration,
}

impl Multiplexer {
    pub fn new(timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            timeout,
        })
    }

    /// Register a newly added endpoint with its current interests.
    pub fn register(&self, id: EndpointId, endpoint: &mut Endpoint) -> io::Result<()> {
        let interests = endpoint.interests();
        self.poll
            .registry()
            .register(endpoint, Token::from(id), interests)
    }

    /// Re-arm an endpoint's interests from its queue state: readable
    /// always, writable only while output is pending.
    pub fn rearm(&self, id: EndpointId, endpoint: &mut Endpoint) -> io::Result<()> {
        let interests = endpoint.interests();
        self.poll
            .registry()
            .reregister(endpoint, Token::from(id), interests)
    }

    /// Re-arm for write readiness only. Used while draining, when inbound
    /// data no longer matters.
    pub fn rearm_write_only(&self, id: EndpointId, endpoint: &mut Endpoint) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(endpoint, Token::from(id), Interest::WRITABLE)
    }

    /// Drop an endpoint from the poll set. Failures are swallowed; the
    /// handle is being closed regardless.
    pub fn forget(&self, endpoint: &mut Endpoint) {
        let _ = self.poll.registry().deregister(endpoint);
    }

    /// One bounded poll. On timeout with nothing ready, all three sets are
    /// empty and the caller simply loops again; this is the reactor's only
    /// voluntary yield of the CPU.
    pub fn poll(&mut self) -> io::Result<Readiness> {
        let mut readiness = Readiness::default();

        match self.poll.poll(&mut self.events, Some(self.timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(readiness),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let id = EndpointId::from(event.token());
            // A closed read half still counts as readable: the read will
            // return zero and surface as a disconnect.
            if event.is_readable() || event.is_read_closed() {
                readiness.readable.push(id);
            }
            if event.is_writable() || event.is_write_closed() {
                readiness.writable.push(id);
            }
            if event.is_error() {
                readiness.erroring.push(id);
            }
        }

        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use mio::net::TcpListener;

    fn listener_endpoint() -> (Endpoint, std::net::SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        (Endpoint::listener(TcpListener::from_std(listener), addr), addr)
    }

    #[test]
    fn test_poll_timeout_yields_empty_sets() {
        let (mut ep, _) = listener_endpoint();
        let mut mux = Multiplexer::new(Duration::from_millis(10)).unwrap();
        mux.register(EndpointId(0), &mut ep).unwrap();

        let readiness = mux.poll().unwrap();
        assert!(readiness.is_empty());
    }

    #[test]
    fn test_pending_connection_is_readable() {
        let (mut ep, addr) = listener_endpoint();
        let mut mux = Multiplexer::new(Duration::from_millis(200)).unwrap();
        mux.register(EndpointId(3), &mut ep).unwrap();

        let _client = std::net::TcpStream::connect(addr).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let readiness = mux.poll().unwrap();
            if readiness.readable.contains(&EndpointId(3)) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "listener never readable");
        }
    }
}
