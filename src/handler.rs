//! The two halves of a connection pipeline.
//!
//! A [`Connection`] receives what the network produces; a
//! [`ConnectionHandler`] carries what the application wants done. The
//! reactor implements the handler side for every socket and hands it to the
//! outermost connection once, before any other callback.
//!
//! Both traits take `&self`: callbacks are free to call back into the
//! handler (and the handler into `on_queue`) while they run, so
//! implementations keep their state in `Cell`/`RefCell` and never hold a
//! borrow across such a call.

use std::{fmt, net::SocketAddr, rc::Rc};

/// Identifier of an outbound connection, returned by [`Reactor::connect`]
/// and [`Reactor::connect_host`].
///
/// It matches the `token` field the reactor puts on every log line for that
/// socket. Identifiers are never reused by the reactor that handed them out.
///
/// [`Reactor::connect`]: crate::Reactor::connect
/// [`Reactor::connect_host`]: crate::Reactor::connect_host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token {}", self.0)
    }
}

/// Identifier of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Application-facing side of a connection.
///
/// ## Execution Context
///
/// Every method runs on the reactor's loop thread and must not block.
/// Received slices point into a buffer the reactor reuses; copy what you
/// need to keep beyond the call.
///
/// ## Lifecycle
///
/// `set_handler` is called exactly once, first. `on_connect` follows once
/// the socket is usable. `on_disconnect` is called at most once, after the
/// socket has already been closed. A close asked for through
/// [`ConnectionHandler::disconnect`] that delivered everything queued is
/// the one close that does not report it.
pub trait Connection {
    /// Installs the handler this connection sends through.
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>);

    /// Called when bytes arrive.
    fn on_recv(&self, data: &[u8]);

    /// Called when the outbound queue grows (`delta > 0`) or drains to empty
    /// (`total == 0`).
    fn on_queue(&self, delta: isize, total: usize) {
        let _ = (delta, total);
    }

    /// Called once the socket is connected.
    fn on_connect(&self) {}

    /// Called after the peer went away or the socket failed.
    fn on_disconnect(&self) {}
}

/// Network-facing side of a connection.
pub trait ConnectionHandler {
    /// Writes `data`, queuing whatever the socket does not take right away.
    fn send(&self, data: &[u8]);

    /// Closes the connection once everything already sent is written.
    fn disconnect(&self);

    /// Sets how much a single read may deliver. `0` stops reading.
    fn set_buffer_size(&self, size: usize);

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}
