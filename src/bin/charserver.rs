//! Demo server: greets each client, then echoes input one byte at a time.
//!
//! Ctrl-C triggers the graceful stop, which sends every connected client a
//! farewell message before the listener goes down.

use bytes::Bytes;
use sockmux::{Config, ConnectionTable, Endpoint, Hooks, Reactor, Role};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

struct CharServer;

impl Hooks for CharServer {
    fn on_accept(&mut self, peer: &mut Endpoint) {
        info!(peer = %peer.remote_addr(), "client connected");
        peer.enqueue(Bytes::from_static(b"123 testando"));
    }

    fn on_receive(&mut self, peer: &mut Endpoint) -> io::Result<Vec<u8>> {
        // One byte per step, echoed straight back.
        let mut buf = [0u8; 1];
        let n = peer.recv(&mut buf)?;
        if n > 0 {
            peer.enqueue(Bytes::copy_from_slice(&buf[..n]));
        }
        Ok(buf[..n].to_vec())
    }

    fn on_close(&mut self, peer: &mut Endpoint) {
        info!(peer = %peer.remote_addr(), "client gone");
    }

    fn on_stop(&mut self, endpoints: &mut ConnectionTable) {
        for (_, endpoint) in endpoints.iter_mut() {
            if endpoint.role() == Role::Peer {
                endpoint.enqueue(Bytes::from_static(b"adeus amiguinho"));
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }

    let mut reactor = Reactor::bind(&config, CharServer)?;
    while !SHUTDOWN.load(Ordering::SeqCst) {
        reactor.step()?;
    }

    info!("shutting down");
    reactor.stop()?;
    Ok(())
}
