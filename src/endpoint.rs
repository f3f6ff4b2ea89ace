//! Endpoints and the connection table.
//!
//! An [`Endpoint`] models one managed transport connection (the listener or
//! a peer): its non-blocking socket, remote address, and FIFO outbound queue.
//! The [`ConnectionTable`] owns every live endpoint, keyed by a slab slot
//! that doubles as the mio poll token.

use bytes::{Buf, Bytes};
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

/// Stable identity of an endpoint in the [`ConnectionTable`].
///
/// Doubles as the mio poll token, so readiness events map straight back
/// to table slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub(crate) usize);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EndpointId> for Token {
    fn from(id: EndpointId) -> Token {
        Token(id.0)
    }
}

impl From<Token> for EndpointId {
    fn from(token: Token) -> EndpointId {
        EndpointId(token.0)
    }
}

/// Role of an endpoint within the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The accepting socket. At most one per reactor, server mode only.
    Listener,
    /// A connected peer carrying data.
    Peer,
}

/// The underlying non-blocking socket.
#[derive(Debug)]
enum Transport {
    Listener(TcpListener),
    Peer(TcpStream),
}

/// Outcome of one transmit attempt against the front of an outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    /// Some bytes left the socket. The front chunk was popped if it is now
    /// fully transmitted, otherwise advanced past the sent prefix.
    Sent(usize),
    /// The peer closed its end (write returned zero).
    Disconnected,
    /// Nothing to send, or the socket would block.
    NotReady,
}

/// One managed transport connection.
#[derive(Debug)]
pub struct Endpoint {
    transport: Transport,
    addr: SocketAddr,
    outbound: VecDeque<Bytes>,
}

impl Endpoint {
    pub(crate) fn listener(listener: TcpListener, addr: SocketAddr) -> Self {
        Self {
            transport: Transport::Listener(listener),
            addr,
            outbound: VecDeque::new(),
        }
    }

    pub(crate) fn peer(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            transport: Transport::Peer(stream),
            addr,
            outbound: VecDeque::new(),
        }
    }

    pub fn role(&self) -> Role {
        match self.transport {
            Transport::Listener(_) => Role::Listener,
            Transport::Peer(_) => Role::Peer,
        }
    }

    /// Remote address for a peer; bind address for the listener.
    /// Fixed at accept/connect time.
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Append a chunk to the outbound queue. The endpoint becomes
    /// write-interested on the next poll.
    pub fn enqueue(&mut self, chunk: impl Into<Bytes>) {
        self.outbound.push_back(chunk.into());
    }

    /// Whether any outbound bytes are still queued.
    pub fn has_pending(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Number of chunks still queued.
    pub fn pending_chunks(&self) -> usize {
        self.outbound.len()
    }

    /// Read available bytes from a peer socket. Returns `Ok(0)` on EOF
    /// (the peer disconnected) and `WouldBlock` when nothing is ready.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.transport {
            Transport::Peer(stream) => stream.read(buf),
            Transport::Listener(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "listener carries no data",
            )),
        }
    }

    /// One transmit attempt of the front outbound chunk.
    pub(crate) fn transmit(&mut self) -> io::Result<SendOutcome> {
        match &mut self.transport {
            Transport::Peer(stream) => transmit_front(&mut self.outbound, stream),
            Transport::Listener(_) => Ok(SendOutcome::NotReady),
        }
    }

    /// Accept one pending connection. Listener only.
    pub(crate) fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.transport {
            Transport::Listener(listener) => listener.accept(),
            Transport::Peer(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a listener",
            )),
        }
    }

    /// Best-effort orderly shutdown of both directions. Errors are
    /// swallowed; the peer may already have released its end.
    pub(crate) fn shutdown_both(&self) {
        if let Transport::Peer(stream) = &self.transport {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Poll interests for this endpoint: always readable, writable only
    /// while the outbound queue is non-empty. An idle socket is never
    /// write-polled, which avoids busy-spinning on always-writable peers.
    pub(crate) fn interests(&self) -> Interest {
        if self.has_pending() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    pub(crate) fn outbound_mut(&mut self) -> &mut VecDeque<Bytes> {
        &mut self.outbound
    }
}

impl Source for Endpoint {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match &mut self.transport {
            Transport::Listener(l) => l.register(registry, token, interests),
            Transport::Peer(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match &mut self.transport {
            Transport::Listener(l) => l.reregister(registry, token, interests),
            Transport::Peer(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match &mut self.transport {
            Transport::Listener(l) => l.deregister(registry),
            Transport::Peer(s) => s.deregister(registry),
        }
    }
}

/// Transmit the front chunk of `queue` into `writer` once.
///
/// Partial writes advance the front chunk in place, so chunk boundaries and
/// ordering are preserved: chunk *i* is never touched before chunk *i-1* is
/// fully on the wire. A zero-length write means the peer closed its end.
fn transmit_front(queue: &mut VecDeque<Bytes>, writer: &mut impl Write) -> io::Result<SendOutcome> {
    let Some(front) = queue.front_mut() else {
        return Ok(SendOutcome::NotReady);
    };

    match writer.write(front) {
        Ok(0) => Ok(SendOutcome::Disconnected),
        Ok(n) if n < front.len() => {
            front.advance(n);
            Ok(SendOutcome::Sent(n))
        }
        Ok(n) => {
            queue.pop_front();
            Ok(SendOutcome::Sent(n))
        }
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SendOutcome::NotReady),
        Err(e) => Err(e),
    }
}

/// Registry of live endpoints using slab allocation.
///
/// O(1) insert, lookup, and remove; slot indices are stable until removal
/// and are reused only afterwards, matching OS handle reuse semantics.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: Slab<Endpoint>,
}

impl ConnectionTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Slab::new(),
        }
    }

    /// Insert a new endpoint, returning its identity.
    pub(crate) fn add(&mut self, endpoint: Endpoint) -> EndpointId {
        EndpointId(self.entries.insert(endpoint))
    }

    /// Remove an endpoint. Idempotent: removing an absent endpoint is a
    /// no-op, not an error.
    pub(crate) fn remove(&mut self, id: EndpointId) -> Option<Endpoint> {
        self.entries.try_remove(id.0)
    }

    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.entries.get(id.0)
    }

    pub fn get_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.entries.get_mut(id.0)
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.entries.contains(id.0)
    }

    /// The outbound queue for an endpoint, if it exists.
    pub fn queue_for(&mut self, id: EndpointId) -> Option<&mut VecDeque<Bytes>> {
        self.entries.get_mut(id.0).map(|e| &mut e.outbound)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EndpointId, &Endpoint)> {
        self.entries.iter().map(|(k, e)| (EndpointId(k), e))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EndpointId, &mut Endpoint)> {
        self.entries.iter_mut().map(|(k, e)| (EndpointId(k), e))
    }

    /// Snapshot of live identities, so callers can mutate the table while
    /// walking a readiness list captured before mutation.
    pub(crate) fn ids(&self) -> Vec<EndpointId> {
        self.entries.iter().map(|(k, _)| EndpointId(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `cap` bytes per write call.
    struct CappedWriter {
        cap: usize,
        written: Vec<u8>,
        calls: usize,
    }

    impl CappedWriter {
        fn new(cap: usize) -> Self {
            Self {
                cap,
                written: Vec::new(),
                calls: 0,
            }
        }
    }

    impl Write for CappedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            let n = buf.len().min(self.cap);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ClosedWriter;

    impl Write for ClosedWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_transmit_preserves_chunk_order() {
        let mut queue: VecDeque<Bytes> = VecDeque::new();
        queue.push_back(Bytes::from_static(b"first"));
        queue.push_back(Bytes::from_static(b"second"));
        queue.push_back(Bytes::from_static(b"third"));

        let mut writer = CappedWriter::new(3);
        while !queue.is_empty() {
            match transmit_front(&mut queue, &mut writer).unwrap() {
                SendOutcome::Sent(_) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(writer.written, b"firstsecondthird");
    }

    #[test]
    fn test_partial_transmit_is_exact() {
        // 11 bytes through a writer that takes 4 per call: exactly three
        // attempts of 4+4+3, no bytes duplicated or dropped.
        let mut queue: VecDeque<Bytes> = VecDeque::new();
        queue.push_back(Bytes::from_static(b"hello world"));

        let mut writer = CappedWriter::new(4);
        let mut sent = Vec::new();
        while !queue.is_empty() {
            match transmit_front(&mut queue, &mut writer).unwrap() {
                SendOutcome::Sent(n) => sent.push(n),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(sent, vec![4, 4, 3]);
        assert_eq!(writer.calls, 3);
        assert_eq!(writer.written, b"hello world");
    }

    #[test]
    fn test_zero_write_is_disconnected() {
        let mut queue: VecDeque<Bytes> = VecDeque::new();
        queue.push_back(Bytes::from_static(b"data"));

        let outcome = transmit_front(&mut queue, &mut ClosedWriter).unwrap();
        assert_eq!(outcome, SendOutcome::Disconnected);
        // Chunk stays queued; the caller closes the endpoint.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_transmit_empty_queue_is_not_ready() {
        let mut queue: VecDeque<Bytes> = VecDeque::new();
        let mut writer = CappedWriter::new(16);
        let outcome = transmit_front(&mut queue, &mut writer).unwrap();
        assert_eq!(outcome, SendOutcome::NotReady);
        assert_eq!(writer.calls, 0);
    }

    #[test]
    fn test_table_remove_is_idempotent() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let listener = TcpListener::from_std(listener);

        let mut table = ConnectionTable::new();
        let id = table.add(Endpoint::listener(listener, addr));

        assert!(table.contains(id));
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_queue_for_absent_endpoint() {
        let mut table = ConnectionTable::new();
        assert!(table.queue_for(EndpointId(7)).is_none());
    }

    #[test]
    fn test_interests_follow_queue() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = std::net::TcpStream::connect(addr).unwrap();
        stream.set_nonblocking(true).unwrap();
        let mut ep = Endpoint::peer(TcpStream::from_std(stream), addr);

        assert_eq!(ep.interests(), Interest::READABLE);
        ep.enqueue(Bytes::from_static(b"x"));
        assert_eq!(ep.interests(), Interest::READABLE | Interest::WRITABLE);
    }
}
