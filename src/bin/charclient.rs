//! Demo client: connects, prints whatever the server sends, exits when the
//! server closes the connection or on Ctrl-C.

use sockmux::{Config, Endpoint, Hooks, Reactor};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

struct CharClient;

impl Hooks for CharClient {
    fn on_receive(&mut self, peer: &mut Endpoint) -> io::Result<Vec<u8>> {
        let mut buf = [0u8; 1];
        let n = peer.recv(&mut buf)?;
        if n > 0 {
            let mut stdout = io::stdout();
            stdout.write_all(&buf[..n])?;
            stdout.flush()?;
        }
        Ok(buf[..n].to_vec())
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

    let mut reactor = Reactor::connect(&config, CharClient)?;
    while !SHUTDOWN.load(Ordering::SeqCst) && !reactor.endpoints().is_empty() {
        reactor.step()?;
    }

    reactor.stop()?;
    Ok(())
}
