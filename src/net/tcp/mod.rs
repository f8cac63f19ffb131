//! TCP sockets and listeners driven by the [`Reactor`].
//!
//! Every socket the reactor owns is a [`SocketBinding`] keyed by its poll
//! token. The binding holds the stream, the pending output and the
//! outermost [`Connection`] of the pipeline the socket feeds. The pipeline
//! talks back through a [`SocketHandle`], which only holds a weak reference
//! to the reactor and the token, so closing a socket simply drops its
//! binding.
//!
//! ```text
//! Socket states:
//!
//!   Connecting ──connected──> Idle <──drained── Busy
//!       │                      │  ──partial write─>│
//!       │                      │                   │ disconnect()
//!       └── disconnect() ──────┴─> closed <──── Disconnecting
//!                                   (queue drained)
//! ```
//!
//! ## Event Handling Pipeline
//!
//! ```text
//! 1. Listener readable:
//!    accept() until WouldBlock
//!        - factory() ──> new pipeline
//!        - insert binding, register interest
//!        - set_handler(), then on_connect()
//!
//! 2. Socket readiness (readable and writable are handled independently):
//!    Connecting ──> check the connect result, on_connect()
//!    Readable   ──> read into the shared scratch buffer, on_recv()
//!                   EOF or error closes the socket and skips the rest
//!    Writable   ──> flush the queue, on_queue(-n, 0) once it is empty
//!
//! 3. Close:
//!    remove binding ──> deregister ──> drop stream ──> on_disconnect()
//!    (on_disconnect for every close except a completed disconnect())
//! ```

use std::{
    io::{self, ErrorKind, Read, Write},
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    rc::{Rc, Weak},
};

use mio::{
    net::{TcpListener, TcpStream},
    Interest, Token,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    buffer::ByteQueue,
    error::{NetworkError, Result},
    event::Readiness,
    handler::{Connection, ConnectionHandler, ConnectionId, ListenerId},
    reactor::{Inner, Reactor},
};

pub(crate) type ConnectionFactory = Rc<dyn Fn() -> Rc<dyn Connection>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketState {
    Connecting,
    Idle,
    Busy,
    Disconnecting,
}

#[derive(Debug)]
pub(crate) enum CloseReason {
    /// Asked for through `ConnectionHandler::disconnect`.
    Local,
    Eof,
    Error(io::Error),
    Shutdown,
}

impl CloseReason {
    /// Only a close the application asked for, and that lost nothing,
    /// stays silent. A failure while draining after `disconnect()` drops
    /// queued bytes and is reported like any other.
    fn notifies(&self) -> bool {
        !matches!(self, CloseReason::Local)
    }
}

pub(crate) struct SocketBinding {
    pub(crate) stream: TcpStream,
    pub(crate) state: SocketState,
    pub(crate) queue: ByteQueue,
    pub(crate) buffer_size: usize,
    /// Bytes reported through `on_queue` since the queue was last empty.
    pub(crate) reported: usize,
    pub(crate) interest: Option<Interest>,
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) connection: Rc<dyn Connection>,
}

enum SendOutcome {
    Written,
    Queued {
        connection: Rc<dyn Connection>,
        delta: isize,
        total: usize,
        arm: bool,
    },
    Failed(io::Error),
}

enum FlushOutcome {
    Pending,
    Drained {
        connection: Rc<dyn Connection>,
        drained: usize,
    },
    Finished,
    Failed(io::Error),
}

impl SocketBinding {
    fn new(
        stream: TcpStream,
        state: SocketState,
        connection: Rc<dyn Connection>,
        buffer_size: usize,
    ) -> Self {
        Self {
            stream,
            state,
            queue: ByteQueue::new(),
            buffer_size,
            reported: 0,
            interest: None,
            local_addr: None,
            remote_addr: None,
            connection,
        }
    }

    pub(crate) fn wanted_interest(&self) -> Option<Interest> {
        let read = self.state != SocketState::Connecting && self.buffer_size > 0;
        let write = self.state != SocketState::Idle;
        match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn send(&mut self, data: &[u8]) -> SendOutcome {
        let arm = self.state == SocketState::Idle;
        let mut written = 0;
        if arm {
            match write_some(&mut self.stream, data) {
                Ok(n) => written = n,
                Err(e) => return SendOutcome::Failed(e),
            }
            if written == data.len() {
                return SendOutcome::Written;
            }
            self.state = SocketState::Busy;
        }

        let rest = &data[written..];
        self.queue.push(rest);
        self.reported += rest.len();
        SendOutcome::Queued {
            connection: self.connection.clone(),
            delta: rest.len() as isize,
            total: self.queue.len(),
            arm,
        }
    }

    fn flush(&mut self) -> FlushOutcome {
        if !matches!(self.state, SocketState::Busy | SocketState::Disconnecting) {
            return FlushOutcome::Pending;
        }
        match write_some(&mut self.stream, self.queue.chunk()) {
            Ok(n) => self.queue.consume(n),
            Err(e) => return FlushOutcome::Failed(e),
        }
        if !self.queue.is_empty() {
            return FlushOutcome::Pending;
        }
        if self.state == SocketState::Disconnecting {
            return FlushOutcome::Finished;
        }
        self.state = SocketState::Idle;
        FlushOutcome::Drained {
            connection: self.connection.clone(),
            drained: std::mem::take(&mut self.reported),
        }
    }

    fn complete_connect(&mut self, peer_addr: SocketAddr, no_delay: bool) {
        if let Err(err) = self.stream.set_nodelay(no_delay) {
            trace!(%err, "failed to set TCP_NODELAY");
        }
        self.local_addr = self.stream.local_addr().ok();
        self.remote_addr = Some(peer_addr);
        self.state = if self.queue.is_empty() {
            SocketState::Idle
        } else {
            SocketState::Busy
        };
    }
}

/// Writes as much of `data` as the socket takes without blocking.
fn write_some(stream: &mut TcpStream, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

/// An outbound connection waiting for its host name to resolve. Commands
/// issued meanwhile are kept here and carried over to the socket.
pub(crate) struct PendingConnect {
    connection: Rc<dyn Connection>,
    queue: ByteQueue,
    reported: usize,
    buffer_size: usize,
}

impl PendingConnect {
    fn new(connection: Rc<dyn Connection>, buffer_size: usize) -> Self {
        Self {
            connection,
            queue: ByteQueue::new(),
            reported: 0,
            buffer_size,
        }
    }
}

pub(crate) struct ListenerBinding {
    pub(crate) listener: TcpListener,
    pub(crate) factory: ConnectionFactory,
    pub(crate) local_addr: SocketAddr,
}

/// A listening socket registered with a reactor.
#[derive(Debug, Clone, Copy)]
pub struct Listener {
    id: ListenerId,
    local_addr: SocketAddr,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The bound address, with the actual port when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// The reactor's side of a pipeline: commands go back to the socket by token.
pub(crate) struct SocketHandle {
    reactor: Weak<Inner>,
    token: Token,
}

impl SocketHandle {
    fn reactor(&self) -> Option<Reactor> {
        Reactor::from_weak(&self.reactor)
    }
}

impl ConnectionHandler for SocketHandle {
    fn send(&self, data: &[u8]) {
        if let Some(reactor) = self.reactor() {
            reactor.send_on(self.token, data);
        }
    }

    fn disconnect(&self) {
        if let Some(reactor) = self.reactor() {
            reactor.disconnect_on(self.token);
        }
    }

    fn set_buffer_size(&self, size: usize) {
        if let Some(reactor) = self.reactor() {
            reactor.set_buffer_size_on(self.token, size);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.reactor()?
            .with_socket(self.token, |binding| binding.local_addr)
            .flatten()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.reactor()?
            .with_socket(self.token, |binding| binding.remote_addr)
            .flatten()
    }
}

impl Reactor {
    /// Listens on `addr`, building a fresh pipeline with `factory` for every
    /// accepted socket.
    #[instrument(skip(self, factory))]
    pub fn add_listener<F>(&self, factory: F, addr: SocketAddr) -> Result<Listener>
    where
        F: Fn() -> Rc<dyn Connection> + 'static,
    {
        let mut listener =
            TcpListener::bind(addr).map_err(|source| NetworkError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let token = self.next_token();
        self.inner
            .poll
            .borrow()
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        self.inner.listeners.borrow_mut().insert(
            token,
            ListenerBinding {
                listener,
                factory: Rc::new(factory),
                local_addr,
            },
        );

        info!(token = token.0, %local_addr, "listening");
        Ok(Listener {
            id: ListenerId(token.0 as u64),
            local_addr,
        })
    }

    /// Stops accepting on a listener. Returns `false` if it was already gone.
    pub fn close_listener(&self, id: ListenerId) -> bool {
        self.remove_listener(Token(id.0 as usize))
    }

    fn remove_listener(&self, token: Token) -> bool {
        let Some(mut binding) = self.inner.listeners.borrow_mut().remove(&token) else {
            return false;
        };
        if let Err(err) = self
            .inner
            .poll
            .borrow()
            .registry()
            .deregister(&mut binding.listener)
        {
            trace!(token = token.0, %err, "listener deregistration failed");
        }
        info!(token = token.0, local_addr = %binding.local_addr, "listener closed");
        true
    }

    /// Starts a non-blocking connect to `addr`.
    ///
    /// The pipeline gets its handler right away; `on_connect` follows once
    /// the socket is writable. Data sent before that is queued.
    #[instrument(skip(self, connection))]
    pub fn connect(
        &self,
        connection: Rc<dyn Connection>,
        addr: SocketAddr,
    ) -> Result<ConnectionId> {
        let token = self.next_token();
        let pending = PendingConnect::new(connection.clone(), self.inner.config.buffer_size);
        self.open_stream(token, pending, addr)
            .map_err(|source| NetworkError::Connect { addr, source })?;
        connection.set_handler(self.handle(token));
        self.refresh_interest(token);
        debug!(token = token.0, %addr, "connecting");
        Ok(ConnectionId(token.0 as u64))
    }

    /// Resolves `host` on a worker thread, then connects to its first address.
    ///
    /// Literal IP addresses skip the resolver. Otherwise the pipeline gets its
    /// handler before the lookup finishes: sends are queued and reported as
    /// for [`Reactor::connect`], and `disconnect()` abandons the lookup. A
    /// failed lookup or connect reports `on_disconnect` without a prior
    /// `on_connect`.
    #[instrument(skip(self, connection))]
    pub fn connect_host(
        &self,
        connection: Rc<dyn Connection>,
        host: &str,
        port: u16,
    ) -> Result<ConnectionId> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.connect(connection, SocketAddr::new(ip, port));
        }

        let token = self.next_token();
        let remote = self.remote();
        let name = host.to_owned();
        self.resolver()?.exec(move || {
            let resolved = (name.as_str(), port)
                .to_socket_addrs()
                .map(|mut addrs| addrs.next());
            if remote
                .post(move |reactor| reactor.finish_resolve(token, resolved))
                .is_err()
            {
                trace!(host = %name, "event loop gone before resolution finished");
            }
        })?;
        let pending = PendingConnect::new(connection.clone(), self.inner.config.buffer_size);
        self.inner.resolving.borrow_mut().insert(token, pending);
        connection.set_handler(self.handle(token));
        debug!(token = token.0, "resolving");
        Ok(ConnectionId(token.0 as u64))
    }

    fn finish_resolve(&self, token: Token, resolved: io::Result<Option<SocketAddr>>) {
        let Some(pending) = self.inner.resolving.borrow_mut().remove(&token) else {
            return;
        };
        let connection = pending.connection.clone();
        let result = match resolved {
            Ok(Some(addr)) => self.open_stream(token, pending, addr),
            Ok(None) => Err(io::Error::new(ErrorKind::NotFound, "host has no address")),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.refresh_interest(token);
            }
            Err(err) => {
                warn!(token = token.0, %err, "connect failed");
                connection.on_disconnect();
            }
        }
    }

    fn open_stream(
        &self,
        token: Token,
        pending: PendingConnect,
        addr: SocketAddr,
    ) -> io::Result<()> {
        let stream = TcpStream::connect(addr)?;
        let mut binding = SocketBinding::new(
            stream,
            SocketState::Connecting,
            pending.connection,
            pending.buffer_size,
        );
        binding.queue = pending.queue;
        binding.reported = pending.reported;
        self.inner.sockets.borrow_mut().insert(token, binding);
        Ok(())
    }

    /// Closes every listener and socket. Every open socket reports
    /// `on_disconnect`, including one still draining after `disconnect()`.
    pub fn close_all(&self) {
        let listeners: Vec<Token> = self.inner.listeners.borrow().keys().copied().collect();
        for token in listeners {
            self.remove_listener(token);
        }

        let sockets: Vec<Token> = self.inner.sockets.borrow().keys().copied().collect();
        debug!(count = sockets.len(), "closing all sockets");
        for token in sockets {
            self.close(token, CloseReason::Shutdown);
        }

        let pending: Vec<_> = self
            .inner
            .resolving
            .borrow_mut()
            .drain()
            .map(|(_, pending)| pending.connection)
            .collect();
        for connection in pending {
            connection.on_disconnect();
        }
    }

    fn handle(&self, token: Token) -> Rc<dyn ConnectionHandler> {
        Rc::new(SocketHandle {
            reactor: Rc::downgrade(&self.inner),
            token,
        })
    }

    pub(crate) fn with_socket<R>(
        &self,
        token: Token,
        f: impl FnOnce(&SocketBinding) -> R,
    ) -> Option<R> {
        self.inner.sockets.borrow().get(&token).map(f)
    }

    pub(crate) fn accept(&self, token: Token) {
        loop {
            let accepted = {
                let listeners = self.inner.listeners.borrow();
                let Some(binding) = listeners.get(&token) else {
                    return;
                };
                binding
                    .listener
                    .accept()
                    .map(|(stream, addr)| (stream, addr, binding.factory.clone()))
            };

            match accepted {
                Ok((stream, peer_addr, factory)) => {
                    self.install_accepted(stream, peer_addr, factory)
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(token = token.0, err = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn install_accepted(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        factory: ConnectionFactory,
    ) {
        if let Err(err) = stream.set_nodelay(self.inner.config.no_delay) {
            trace!(%peer_addr, %err, "failed to set TCP_NODELAY");
        }
        let connection = factory();
        let token = self.next_token();

        let mut binding = SocketBinding::new(
            stream,
            SocketState::Idle,
            connection.clone(),
            self.inner.config.buffer_size,
        );
        binding.local_addr = binding.stream.local_addr().ok();
        binding.remote_addr = Some(peer_addr);
        self.inner.sockets.borrow_mut().insert(token, binding);
        debug!(token = token.0, %peer_addr, "accepted connection");

        connection.set_handler(self.handle(token));
        if self.refresh_interest(token) {
            connection.on_connect();
        }
    }

    /// Handles one readiness snapshot of a socket.
    pub(crate) fn dispatch(&self, readiness: Readiness) {
        let token = readiness.token();
        let connecting =
            self.with_socket(token, |binding| binding.state) == Some(SocketState::Connecting);
        if connecting && !self.finish_connect(token) {
            return;
        }
        if readiness.wants_read() && !self.read(token) {
            return;
        }
        if readiness.is_writable() {
            self.flush(token);
        }
    }

    /// Returns whether the socket is still open.
    fn finish_connect(&self, token: Token) -> bool {
        let result = {
            let mut sockets = self.inner.sockets.borrow_mut();
            let Some(binding) = sockets.get_mut(&token) else {
                return false;
            };
            match binding.stream.take_error() {
                Ok(Some(e)) | Err(e) => Err(e),
                Ok(None) => match binding.stream.peer_addr() {
                    Ok(peer_addr) => {
                        binding.complete_connect(peer_addr, self.inner.config.no_delay);
                        Ok((binding.connection.clone(), peer_addr))
                    }
                    // still in progress
                    Err(e)
                        if matches!(e.kind(), ErrorKind::NotConnected | ErrorKind::WouldBlock) =>
                    {
                        return true;
                    }
                    Err(e) => Err(e),
                },
            }
        };

        match result {
            Ok((connection, peer_addr)) => {
                if !self.refresh_interest(token) {
                    return false;
                }
                debug!(token = token.0, %peer_addr, "connected");
                connection.on_connect();
                self.inner.sockets.borrow().contains_key(&token)
            }
            Err(err) => {
                warn!(token = token.0, %err, "connect failed");
                self.close(token, CloseReason::Error(err));
                false
            }
        }
    }

    /// Reads until the socket would block. Returns whether it is still open.
    fn read(&self, token: Token) -> bool {
        let mut scratch = std::mem::take(&mut *self.inner.scratch.borrow_mut());
        if scratch.len() < self.inner.config.max_buffer_size {
            scratch.resize(self.inner.config.max_buffer_size, 0);
        }
        let alive = self.read_into(token, &mut scratch);
        *self.inner.scratch.borrow_mut() = scratch;
        alive
    }

    fn read_into(&self, token: Token, scratch: &mut [u8]) -> bool {
        loop {
            let (result, connection) = {
                let mut sockets = self.inner.sockets.borrow_mut();
                let Some(binding) = sockets.get_mut(&token) else {
                    return false;
                };
                if binding.state == SocketState::Connecting || binding.buffer_size == 0 {
                    return true;
                }
                let limit = binding.buffer_size.min(scratch.len());
                (
                    binding.stream.read(&mut scratch[..limit]),
                    binding.connection.clone(),
                )
            };

            match result {
                Ok(0) => {
                    self.close(token, CloseReason::Eof);
                    return false;
                }
                Ok(n) => {
                    trace!(token = token.0, len = n, "received");
                    connection.on_recv(&scratch[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close(token, CloseReason::Error(e));
                    return false;
                }
            }
        }
    }

    fn flush(&self, token: Token) {
        let outcome = {
            let mut sockets = self.inner.sockets.borrow_mut();
            let Some(binding) = sockets.get_mut(&token) else {
                return;
            };
            binding.flush()
        };

        match outcome {
            FlushOutcome::Pending => {}
            FlushOutcome::Drained {
                connection,
                drained,
            } => {
                if self.refresh_interest(token) {
                    connection.on_queue(-(drained as isize), 0);
                }
            }
            FlushOutcome::Finished => self.close(token, CloseReason::Local),
            FlushOutcome::Failed(e) => self.close(token, CloseReason::Error(e)),
        }
    }

    pub(crate) fn send_on(&self, token: Token, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let outcome = self
            .inner
            .sockets
            .borrow_mut()
            .get_mut(&token)
            .map(|binding| binding.send(data));
        let Some(outcome) = outcome else {
            return self.send_while_resolving(token, data);
        };

        match outcome {
            SendOutcome::Written => {}
            SendOutcome::Queued {
                connection,
                delta,
                total,
                arm,
            } => {
                if arm && !self.refresh_interest(token) {
                    return;
                }
                connection.on_queue(delta, total);
            }
            SendOutcome::Failed(e) => self.close(token, CloseReason::Error(e)),
        }
    }

    fn send_while_resolving(&self, token: Token, data: &[u8]) {
        let queued = {
            let mut resolving = self.inner.resolving.borrow_mut();
            resolving.get_mut(&token).map(|pending| {
                pending.queue.push(data);
                pending.reported += data.len();
                (pending.connection.clone(), pending.queue.len())
            })
        };
        match queued {
            Some((connection, total)) => connection.on_queue(data.len() as isize, total),
            None => trace!(token = token.0, len = data.len(), "send on a closed socket"),
        }
    }

    pub(crate) fn disconnect_on(&self, token: Token) {
        if self.inner.resolving.borrow_mut().remove(&token).is_some() {
            debug!(token = token.0, "lookup abandoned");
            return;
        }
        let close_now = {
            let mut sockets = self.inner.sockets.borrow_mut();
            let Some(binding) = sockets.get_mut(&token) else {
                return;
            };
            match binding.state {
                SocketState::Idle | SocketState::Connecting => true,
                SocketState::Busy => {
                    binding.state = SocketState::Disconnecting;
                    debug!(
                        token = token.0,
                        pending = binding.queue.len(),
                        "closing once the queue drains"
                    );
                    false
                }
                SocketState::Disconnecting => false,
            }
        };
        if close_now {
            self.close(token, CloseReason::Local);
        }
    }

    pub(crate) fn set_buffer_size_on(&self, token: Token, size: usize) {
        let size = size.min(self.inner.config.max_buffer_size);
        if let Some(pending) = self.inner.resolving.borrow_mut().get_mut(&token) {
            pending.buffer_size = size;
            return;
        }
        let flipped = {
            let mut sockets = self.inner.sockets.borrow_mut();
            let Some(binding) = sockets.get_mut(&token) else {
                return;
            };
            let was_paused = binding.buffer_size == 0;
            binding.buffer_size = size;
            was_paused != (size == 0)
        };
        if flipped {
            trace!(token = token.0, size, "read interest changed");
            self.refresh_interest(token);
        }
    }

    /// Brings the poll registration in line with the socket state. A failed
    /// registration closes the socket; returns whether it is still open.
    pub(crate) fn refresh_interest(&self, token: Token) -> bool {
        let result = {
            let poll = self.inner.poll.borrow();
            let mut sockets = self.inner.sockets.borrow_mut();
            let Some(binding) = sockets.get_mut(&token) else {
                return false;
            };
            let wanted = binding.wanted_interest();
            poll.update_interest(&mut binding.stream, token, binding.interest, wanted)
                .map(|interest| binding.interest = interest)
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.close(token, CloseReason::Error(e));
                false
            }
        }
    }

    /// Removes and closes a socket, then tells its pipeline when the close
    /// was not requested by the application.
    pub(crate) fn close(&self, token: Token, reason: CloseReason) {
        let Some(mut binding) = self.inner.sockets.borrow_mut().remove(&token) else {
            return;
        };
        if binding.interest.take().is_some() {
            if let Err(err) = self
                .inner
                .poll
                .borrow()
                .registry()
                .deregister(&mut binding.stream)
            {
                trace!(token = token.0, %err, "socket deregistration failed");
            }
        }

        let notify = reason.notifies();
        let connection = binding.connection.clone();
        debug!(
            token = token.0,
            peer_addr = ?binding.remote_addr,
            ?reason,
            "connection closed"
        );
        drop(binding);

        if notify {
            connection.on_disconnect();
        }
    }
}
