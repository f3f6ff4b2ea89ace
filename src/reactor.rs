//! The reactor: a single-threaded poll-and-dispatch loop.
//!
//! One [`Reactor`] owns a [`ConnectionTable`](crate::ConnectionTable), a
//! readiness multiplexer, and the application's [`Hooks`]. Each
//! [`step`](Reactor::step) polls once and processes
//! readiness in a fixed read, write, error phase order; closes are batched
//! and applied at the end of the step so no phase ever iterates a table
//! mutated mid-phase. The bounded poll is the loop's only suspension point.

use crate::config::Config;
use crate::endpoint::{ConnectionTable, Endpoint, EndpointId, Role, SendOutcome};
use crate::hooks::Hooks;
use crate::poller::Multiplexer;
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reactor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Normal operation; `step` accepts, receives, and sends.
    Running,
    /// Graceful stop in progress; outbound queues are being flushed.
    Draining,
    /// All endpoints closed. Terminal.
    Closed,
}

/// A single-threaded TCP endpoint multiplexer.
///
/// Server mode ([`Reactor::bind`]) carries exactly one listener endpoint;
/// client mode ([`Reactor::connect`]) carries none. All application
/// behavior is supplied through the [`Hooks`] implementation.
pub struct Reactor<H: Hooks> {
    mux: Multiplexer,
    table: ConnectionTable,
    hooks: H,
    listener_id: Option<EndpointId>,
    drain_timeout: Option<Duration>,
    state: State,
}

impl<H: Hooks> Reactor<H> {
    /// Bind a listener and start in server mode.
    ///
    /// Bind failures are the one class of error surfaced to the caller;
    /// once running, a single bad peer never propagates out of `step`.
    pub fn bind(config: &Config, hooks: H) -> io::Result<Self> {
        let addr = resolve(&config.address, config.port)?;
        let listener = bind_listener(addr, config.backlog)?;
        let local_addr = listener.local_addr()?;
        let listener = TcpListener::from_std(listener);

        let mux = Multiplexer::new(config.timeout)?;
        let mut table = ConnectionTable::new();
        let id = table.add(Endpoint::listener(listener, local_addr));

        let mut reactor = Self {
            mux,
            table,
            hooks,
            listener_id: Some(id),
            drain_timeout: config.drain_timeout,
            state: State::Running,
        };

        if let Some(endpoint) = reactor.table.get_mut(id) {
            reactor.mux.register(id, endpoint)?;
            reactor.hooks.on_init(endpoint);
        }

        info!(addr = %local_addr, backlog = config.backlog, "listening");
        Ok(reactor)
    }

    /// Connect to a remote peer and start in client mode.
    ///
    /// The configured poll timeout doubles as the connect timeout.
    pub fn connect(config: &Config, hooks: H) -> io::Result<Self> {
        let addr = resolve(&config.address, config.port)?;
        let stream = connect_stream(addr, config.timeout)?;
        let stream = TcpStream::from_std(stream);

        let mux = Multiplexer::new(config.timeout)?;
        let mut table = ConnectionTable::new();
        let id = table.add(Endpoint::peer(stream, addr));

        let mut reactor = Self {
            mux,
            table,
            hooks,
            listener_id: None,
            drain_timeout: config.drain_timeout,
            state: State::Running,
        };

        if let Some(endpoint) = reactor.table.get_mut(id) {
            reactor.mux.register(id, endpoint)?;
            reactor.hooks.on_init(endpoint);
        }

        info!(peer = %addr, "connected");
        Ok(reactor)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The live endpoint set.
    pub fn endpoints(&self) -> &ConnectionTable {
        &self.table
    }

    /// Mutable access to the live endpoint set, e.g. to enqueue outbound
    /// chunks between steps.
    pub fn endpoints_mut(&mut self) -> &mut ConnectionTable {
        &mut self.table
    }

    /// The listener's bound address, if running in server mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener_id
            .and_then(|id| self.table.get(id))
            .map(|e| e.remote_addr())
    }

    /// One poll-and-dispatch cycle.
    ///
    /// Phases run in a fixed order regardless of how the OS orders
    /// readiness: read first (so buffered data reaches the application
    /// before a dying connection is torn down), then write, then error.
    /// Endpoints scheduled for close are ignored by later phases and
    /// closed in a batch before `on_step`.
    pub fn step(&mut self) -> io::Result<()> {
        for (id, endpoint) in self.table.iter_mut() {
            self.mux.rearm(id, endpoint)?;
        }
        let readiness = self.mux.poll()?;

        // Poll timed out with nothing ready; the loop simply repeats.
        if readiness.is_empty() {
            self.hooks.on_step(&mut self.table);
            return Ok(());
        }

        let mut doomed: Vec<EndpointId> = Vec::new();

        for id in &readiness.readable {
            if Some(*id) == self.listener_id {
                self.accept_pending();
            } else if self.receive(*id) {
                doomed.push(*id);
            }
        }

        for id in &readiness.writable {
            if doomed.contains(id) {
                continue;
            }
            if self.send(*id) {
                doomed.push(*id);
            }
        }

        // Error readiness is always terminal, no retry.
        for id in &readiness.erroring {
            if !doomed.contains(id) {
                doomed.push(*id);
            }
        }

        for id in doomed {
            self.close(id);
        }

        self.hooks.on_step(&mut self.table);
        Ok(())
    }

    /// Loop `step` until the reactor stops being useful: a server runs
    /// until told otherwise, a client until its endpoint is gone.
    pub fn run(&mut self) -> io::Result<()> {
        while self.state == State::Running && !self.table.is_empty() {
            self.step()?;
        }
        Ok(())
    }

    /// Graceful stop: drain every outbound queue, then close everything,
    /// listener last.
    ///
    /// `on_stop` fires once before draining, giving the application a
    /// chance to enqueue final messages to every peer. Peers that
    /// disconnect while draining are closed and drop out of
    /// consideration. The drain is bounded by the configured
    /// `drain_timeout`; on expiry, remaining queues are discarded.
    pub fn stop(&mut self) -> io::Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Draining;
        info!(endpoints = self.table.len(), "draining");
        self.hooks.on_stop(&mut self.table);

        let deadline = self.drain_timeout.map(|t| Instant::now() + t);

        loop {
            let pending: Vec<EndpointId> = self
                .table
                .iter()
                .filter(|(_, e)| e.role() == Role::Peer && e.has_pending())
                .map(|(id, _)| id)
                .collect();
            if pending.is_empty() {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(
                        endpoints = pending.len(),
                        "drain timeout expired, discarding queued output"
                    );
                    break;
                }
            }

            // Only write-pending peers stay in the poll set: inbound data
            // no longer matters, and an idle endpoint left registered
            // would spin the drain loop.
            for (id, endpoint) in self.table.iter_mut() {
                if endpoint.role() == Role::Peer && endpoint.has_pending() {
                    self.mux.rearm_write_only(id, endpoint)?;
                } else {
                    self.mux.forget(endpoint);
                }
            }
            let readiness = self.mux.poll()?;

            let mut doomed: Vec<EndpointId> = Vec::new();
            for id in &readiness.writable {
                if doomed.contains(id) || !pending.contains(id) {
                    continue;
                }
                if self.send(*id) {
                    doomed.push(*id);
                }
            }
            for id in &readiness.erroring {
                if !doomed.contains(id) {
                    doomed.push(*id);
                }
            }
            for id in doomed {
                self.close(id);
            }
        }

        let listener_id = self.listener_id;
        for id in self.table.ids() {
            if Some(id) != listener_id {
                self.close(id);
            }
        }
        // Listener last, so final messages are never lost to a premature
        // teardown.
        if let Some(id) = listener_id {
            self.close(id);
        }

        self.state = State::Closed;
        info!("closed");
        Ok(())
    }

    /// Close one endpoint: `on_close`, remove from the table, deregister,
    /// best-effort shutdown, release the handle.
    ///
    /// Idempotent: closing an absent endpoint is a no-op, so `on_close`
    /// fires exactly once per endpoint. Failures inside are swallowed;
    /// close always completes.
    pub fn close(&mut self, id: EndpointId) {
        let Some(endpoint) = self.table.get_mut(id) else {
            return;
        };
        self.hooks.on_close(endpoint);

        if let Some(mut endpoint) = self.table.remove(id) {
            self.mux.forget(&mut endpoint);
            endpoint.shutdown_both();
            debug!(endpoint = %id, "closed endpoint");
        }
        if self.listener_id == Some(id) {
            self.listener_id = None;
        }
    }

    /// Drain the listener's pending accept queue.
    ///
    /// WouldBlock just means no more pending connections. Any other
    /// accept failure is logged and abandons this round without closing
    /// the listener or the loop.
    fn accept_pending(&mut self) {
        let Some(listener_id) = self.listener_id else {
            return;
        };
        loop {
            let accepted = match self.table.get(listener_id) {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, peer_addr)) => {
                    let id = self.table.add(Endpoint::peer(stream, peer_addr));
                    let Some(peer) = self.table.get_mut(id) else {
                        continue;
                    };
                    if let Err(e) = self.mux.register(id, peer) {
                        warn!(endpoint = %id, error = %e, "failed to register accepted peer");
                        self.table.remove(id);
                        continue;
                    }
                    debug!(endpoint = %id, peer = %peer_addr, "accepted connection");
                    self.hooks.on_accept(peer);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Run `on_receive` for a readable peer. Returns true when the
    /// endpoint must be closed.
    fn receive(&mut self, id: EndpointId) -> bool {
        let Some(peer) = self.table.get_mut(id) else {
            return false;
        };
        match self.hooks.on_receive(peer) {
            Ok(bytes) if bytes.is_empty() => {
                debug!(endpoint = %id, "peer disconnected");
                true
            }
            Ok(_) => false,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                debug!(endpoint = %id, error = %e, "receive failed");
                true
            }
        }
    }

    /// One transmit attempt against a writable peer's queue. Returns true
    /// when the endpoint must be closed.
    fn send(&mut self, id: EndpointId) -> bool {
        let Some(peer) = self.table.get_mut(id) else {
            return false;
        };
        if !peer.has_pending() {
            return false;
        }
        match peer.transmit() {
            Ok(SendOutcome::Sent(n)) => {
                debug!(endpoint = %id, bytes = n, "transmitted");
                self.hooks.on_send(peer);
                false
            }
            Ok(SendOutcome::NotReady) => false,
            Ok(SendOutcome::Disconnected) => {
                debug!(endpoint = %id, "peer closed during send");
                true
            }
            Err(e) => {
                debug!(endpoint = %id, error = %e, "send failed");
                true
            }
        }
    }
}

fn resolve(address: &str, port: u16) -> io::Result<SocketAddr> {
    (address, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
        })
}

/// Create the listening socket: reuse-address, non-blocking, explicit
/// backlog.
fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    Ok(socket.into())
}

/// Establish the client connection with a bounded connect, then switch
/// the stream to non-blocking for the reactor.
fn connect_stream(addr: SocketAddr, timeout: Duration) -> io::Result<std::net::TcpStream> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}
