//! sockmux: a minimal event-driven TCP endpoint multiplexer.
//!
//! A single-threaded reactor that accepts connections, reads and writes
//! non-blocking byte streams, and manages per-connection outbound queues
//! without ever blocking the controlling thread. One thread, one bounded
//! readiness poll per loop iteration.
//!
//! The reactor moves opaque bytes only; framing, protocol logic, and any
//! application behavior live behind the [`Hooks`] trait supplied at
//! construction. See the `charserver` and `charclient` binaries for a
//! complete example pair.

pub mod config;
pub mod endpoint;
pub mod hooks;
mod poller;
pub mod reactor;

pub use config::{Config, ConfigError};
pub use endpoint::{ConnectionTable, Endpoint, EndpointId, Role};
pub use hooks::Hooks;
pub use reactor::{Reactor, State};
