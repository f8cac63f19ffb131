//! Filter nodes that stack protocol layers onto a connection.
//!
//! ```text
//!   reactor ──on_recv──▶ Filter2 ──on_recv──▶ Filter1 ──on_recv──▶ app
//!   reactor ◀──send──── Filter2 ◀──send──── Filter1 ◀──send──── app
//! ```
//!
//! [`attach`] wraps a connection into a node that is itself a
//! [`Connection`]. The node hands the wrapped connection a handler of its
//! own, so commands issued by the inner layer pass through the filter on
//! their way out. A [`Filter`] overrides only what it transforms; every
//! default forwards unchanged through its [`Context`].

use std::{
    cell::OnceCell,
    net::SocketAddr,
    rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::handler::{Connection, ConnectionHandler};

/// One protocol layer.
///
/// Inbound methods (`on_*`) see events travelling from the socket towards
/// the application; outbound methods see commands travelling the other way.
pub trait Filter: 'static {
    fn on_recv(&self, ctx: &Context, data: &[u8]) {
        ctx.fire_recv(data);
    }

    fn on_queue(&self, ctx: &Context, delta: isize, total: usize) {
        ctx.fire_queue(delta, total);
    }

    fn on_connect(&self, ctx: &Context) {
        ctx.fire_connect();
    }

    fn on_disconnect(&self, ctx: &Context) {
        ctx.fire_disconnect();
    }

    fn send(&self, ctx: &Context, data: &[u8]) {
        ctx.send(data);
    }

    fn disconnect(&self, ctx: &Context) {
        ctx.disconnect();
    }

    fn set_buffer_size(&self, ctx: &Context, size: usize) {
        ctx.set_buffer_size(size);
    }
}

/// What a filter forwards to: the connection inside it and the handler
/// outside it.
pub struct Context {
    connection: Rc<dyn Connection>,
    handler: OnceCell<Rc<dyn ConnectionHandler>>,
}

impl Context {
    pub fn fire_recv(&self, data: &[u8]) {
        self.connection.on_recv(data);
    }

    pub fn fire_queue(&self, delta: isize, total: usize) {
        self.connection.on_queue(delta, total);
    }

    pub fn fire_connect(&self) {
        self.connection.on_connect();
    }

    pub fn fire_disconnect(&self) {
        self.connection.on_disconnect();
    }

    pub fn send(&self, data: &[u8]) {
        if let Some(handler) = self.handler.get() {
            handler.send(data);
        }
    }

    pub fn disconnect(&self) {
        if let Some(handler) = self.handler.get() {
            handler.disconnect();
        }
    }

    pub fn set_buffer_size(&self, size: usize) {
        if let Some(handler) = self.handler.get() {
            handler.set_buffer_size(size);
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handler.get().and_then(|handler| handler.local_addr())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.handler.get().and_then(|handler| handler.remote_addr())
    }
}

struct FilterNode<F> {
    filter: F,
    ctx: Context,
    this: Weak<FilterNode<F>>,
}

impl<F: Filter> Connection for FilterNode<F> {
    fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
        if self.ctx.handler.set(handler).is_err() {
            debug!("filter handler already installed, ignoring");
            return;
        }
        let inner: Rc<dyn ConnectionHandler> = Rc::new(FilterHandle {
            node: self.this.clone(),
        });
        self.ctx.connection.set_handler(inner);
    }

    fn on_recv(&self, data: &[u8]) {
        self.filter.on_recv(&self.ctx, data);
    }

    fn on_queue(&self, delta: isize, total: usize) {
        self.filter.on_queue(&self.ctx, delta, total);
    }

    fn on_connect(&self) {
        self.filter.on_connect(&self.ctx);
    }

    fn on_disconnect(&self) {
        self.filter.on_disconnect(&self.ctx);
    }
}

/// Handler given to the layer inside a filter.
///
/// Holds the node weakly: the socket binding is the chain's only owner, so
/// once the socket is gone commands from inner layers fall through.
struct FilterHandle<F> {
    node: Weak<FilterNode<F>>,
}

impl<F: Filter> ConnectionHandler for FilterHandle<F> {
    fn send(&self, data: &[u8]) {
        match self.node.upgrade() {
            Some(node) => node.filter.send(&node.ctx, data),
            None => trace!(len = data.len(), "send on a released filter chain"),
        }
    }

    fn disconnect(&self) {
        if let Some(node) = self.node.upgrade() {
            node.filter.disconnect(&node.ctx);
        }
    }

    fn set_buffer_size(&self, size: usize) {
        if let Some(node) = self.node.upgrade() {
            node.filter.set_buffer_size(&node.ctx, size);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.node.upgrade().and_then(|node| node.ctx.local_addr())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.node.upgrade().and_then(|node| node.ctx.remote_addr())
    }
}

/// Wraps `connection` in `filter`, returning the new outermost layer.
///
/// Attaching several filters in turn yields a chain where inbound events
/// cross the last attached filter first and outbound commands cross it last.
pub fn attach<F: Filter>(connection: Rc<dyn Connection>, filter: F) -> Rc<dyn Connection> {
    Rc::new_cyclic(|this| FilterNode {
        filter,
        ctx: Context {
            connection,
            handler: OnceCell::new(),
        },
        this: this.clone(),
    })
}

/// A filter that changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl Filter for PassThrough {}

/// Logs every byte crossing it, in both directions.
#[derive(Debug, Clone)]
pub struct DumpFilter {
    label: String,
}

impl DumpFilter {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Filter for DumpFilter {
    fn on_recv(&self, ctx: &Context, data: &[u8]) {
        debug!(
            label = %self.label,
            peer_addr = ?ctx.remote_addr(),
            len = data.len(),
            data = %String::from_utf8_lossy(data).escape_debug(),
            "recv"
        );
        ctx.fire_recv(data);
    }

    fn send(&self, ctx: &Context, data: &[u8]) {
        debug!(
            label = %self.label,
            peer_addr = ?ctx.remote_addr(),
            len = data.len(),
            data = %String::from_utf8_lossy(data).escape_debug(),
            "send"
        );
        ctx.send(data);
    }

    fn on_disconnect(&self, ctx: &Context) {
        debug!(label = %self.label, peer_addr = ?ctx.remote_addr(), "disconnected");
        ctx.fire_disconnect();
    }
}
