//! Lifecycle hooks.
//!
//! All application behavior (framing, protocol logic, demo echo) lives
//! behind this trait; the reactor itself only moves opaque bytes. Every
//! hook has a do-nothing default except [`Hooks::on_receive`], which must
//! perform the actual read and therefore has no sensible default.

use crate::endpoint::{ConnectionTable, Endpoint};
use std::io;

/// Capability set invoked by the reactor at defined lifecycle points.
///
/// Hooks run on the reactor thread; they must not block. Enqueuing outbound
/// data is done through [`Endpoint::enqueue`] on the endpoints handed in.
pub trait Hooks {
    /// Called once after the listener is bound (server) or the connection
    /// is established (client).
    fn on_init(&mut self, _endpoint: &mut Endpoint) {}

    /// Called after a newly accepted peer has been added to the table.
    fn on_accept(&mut self, _peer: &mut Endpoint) {}

    /// Perform the read for a readable peer and return the bytes obtained.
    ///
    /// Returning an empty buffer signals that the peer disconnected; the
    /// reactor closes it at the end of the step. `WouldBlock` means "not
    /// ready this step" and is not an error. Any other error closes the
    /// peer.
    fn on_receive(&mut self, peer: &mut Endpoint) -> io::Result<Vec<u8>>;

    /// Called after each (possibly partial) successful transmit.
    fn on_send(&mut self, _peer: &mut Endpoint) {}

    /// Called before a peer is removed, as the last chance to observe its
    /// state.
    fn on_close(&mut self, _peer: &mut Endpoint) {}

    /// Called once per completed loop iteration with the live table.
    fn on_step(&mut self, _endpoints: &mut ConnectionTable) {}

    /// Called once when graceful shutdown begins, before draining. The
    /// usual place to enqueue final messages to every peer.
    fn on_stop(&mut self, _endpoints: &mut ConnectionTable) {}
}
