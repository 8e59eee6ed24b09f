//! Broadcast server.
//!
//! Ties together the [`Reactor`], the listening socket, and the
//! [`ConnectionRegistry`]. Every method runs on the event-loop thread and
//! performs only non-blocking I/O; the sole blocking call is the reactor poll
//! inside [`Server::turn`].
//!
//! # Event flow
//!
//! ```text
//! listener readable ──> accept_ready ──> welcome broadcast (sender included)
//! socket readable   ──> read_ready   ──> one read, "<id> said: ..." to everyone else
//! socket writable   ──> write_ready  ──> drain output, disable interest when empty
//! EOF / error       ──> cleanup      ──> cancel, close, remove, "<id> left"
//! ```
//!
//! Each readable notification gets exactly one bounded read, so a client that
//! keeps its socket full cannot hold the loop inside one handler. A read that
//! fills the whole buffer carries the connection over to the next turn, where
//! it is read again even if the reactor reports no new edge.

use std::{
    collections::{BTreeSet, VecDeque},
    io,
    net::SocketAddr,
    time::Duration,
};

use crate::{
    connection::{Connection, ConnectionId, FlushOutcome, ReadOutcome},
    error::{ConnectionError, ServerError},
    message,
    reactor::{Listener, Reactor, Readiness, ShutdownHandle, Socket, Token},
    registry::ConnectionRegistry,
};

/// Bytes requested from a socket per read call.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8192;

/// Connections beyond this are closed right after accept.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Upper bound for a single read call. Each read call is forwarded as one
    /// message.
    pub read_chunk_size: usize,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { read_chunk_size: DEFAULT_READ_CHUNK_SIZE, max_connections: DEFAULT_MAX_CONNECTIONS }
    }
}

/// Readiness-driven broadcast server.
pub struct Server<R: Reactor> {
    /// Event notifier
    reactor: R,
    /// Listening socket
    listener: R::Listener,
    /// Live connections
    registry: ConnectionRegistry<R::Socket>,
    /// Server configuration
    config: ServerConfig,
    /// Scratch buffer for reads, `read_chunk_size` bytes
    read_buf: Vec<u8>,
    /// Scratch buffer for poll results
    events: Vec<Readiness>,
    /// Connections whose last read filled `read_buf`
    carried: BTreeSet<ConnectionId>,
    /// Stop request shared with other threads
    stop: ShutdownHandle,
    /// Whether the listener is registered with the reactor
    listening: bool,
}

impl<R: Reactor> Server<R> {
    /// Create a server over an already bound, non-blocking listener.
    pub fn new(reactor: R, listener: R::Listener, config: ServerConfig) -> Self {
        let stop = reactor.shutdown_handle();
        let read_buf = vec![0; config.read_chunk_size.max(1)];
        Self {
            reactor,
            listener,
            registry: ConnectionRegistry::new(),
            config,
            read_buf,
            events: Vec::new(),
            carried: BTreeSet::new(),
            stop,
            listening: false,
        }
    }

    /// Register the listener for readability. Idempotent.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.listening {
            return Ok(());
        }
        self.reactor
            .register_listener(&mut self.listener, Token::LISTENER)
            .map_err(ServerError::Reactor)?;
        self.listening = true;

        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "server listening"),
            Err(e) => tracing::info!(error = %e, "server listening"),
        }
        Ok(())
    }

    /// Run the event loop until shutdown is requested, then close every
    /// connection.
    ///
    /// # Errors
    ///
    /// - `ServerError::Reactor` if the listener cannot be registered or the
    ///   reactor fails to poll. Connections are still cleaned up.
    pub fn run(&mut self) -> Result<(), ServerError> {
        self.start()?;

        let result = loop {
            if self.stop.is_requested() {
                break Ok(());
            }
            if let Err(e) = self.turn() {
                break Err(e);
            }
        };

        self.shutdown();
        result
    }

    /// Poll the reactor once and dispatch every event, plus one more read for
    /// each connection carried over from the previous turn.
    ///
    /// The poll does not block while reads are carried over. Returns the
    /// number of events dispatched.
    pub fn turn(&mut self) -> Result<usize, ServerError> {
        let mut events = std::mem::take(&mut self.events);
        let timeout = if self.carried.is_empty() { None } else { Some(Duration::ZERO) };

        if let Err(e) = self.reactor.poll(&mut events, timeout) {
            self.events = events;
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(ServerError::Reactor(e));
        }

        for id in std::mem::take(&mut self.carried) {
            let token = id.token();
            if !events.iter().any(|r| r.token == token && r.readable) {
                events.push(Readiness::readable(token));
            }
        }

        for readiness in &events {
            self.dispatch(*readiness);
        }

        let count = events.len();
        self.events = events;
        Ok(count)
    }

    /// Route one readiness event to its handler.
    ///
    /// A connection cleaned up by its read half skips the write half of the
    /// same event. Tokens of connections that are already gone are ignored.
    pub fn dispatch(&mut self, readiness: Readiness) {
        if readiness.token == Token::LISTENER {
            if readiness.readable {
                self.accept_ready();
            }
            return;
        }

        let Some(id) = ConnectionId::from_token(readiness.token) else {
            return;
        };

        if readiness.readable {
            self.read_ready(id);
        }
        if readiness.writable && self.registry.contains(id) {
            self.write_ready(id);
        }
    }

    /// Drain the accept backlog.
    ///
    /// Stops at would-block. Any other accept error is logged and ends the
    /// loop for this notification; the listener stays registered.
    pub fn accept_ready(&mut self) {
        loop {
            let (socket, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let err = ServerError::Accept(e);
                    tracing::warn!(error = %err, "accept loop stopped");
                    break;
                },
            };
            self.admit(socket, peer);
        }
    }

    /// Perform one bounded read on a connection.
    ///
    /// The read yields at most `read_chunk_size` bytes and becomes one message
    /// to every other connection. End-of-stream or a read error closes the
    /// connection. A read that fills the buffer schedules another read on the
    /// next turn.
    pub fn read_ready(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };

        match conn.read_chunk(&mut self.read_buf) {
            ReadOutcome::Data(n) => {
                if n == self.read_buf.len() {
                    self.carried.insert(id);
                }

                let data = &self.read_buf[..n];
                let text = String::from_utf8_lossy(data);
                tracing::debug!(%id, bytes = n, data = %text, "data received");

                let said = message::said(id, data);
                let woken = self.registry.broadcast(id, &said, false);
                self.enable_writes(&woken);
            },
            ReadOutcome::WouldBlock => {},
            ReadOutcome::Dead(cause) => {
                let err = conn.dead(cause);
                self.fail(err);
            },
        }
    }

    /// Flush a connection's output buffer.
    ///
    /// Disables write interest once the buffer is empty. Never enables it:
    /// an empty buffer on entry leaves the connection untouched apart from
    /// switching off a stale write interest.
    pub fn write_ready(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };

        match conn.flush() {
            FlushOutcome::Idle => {
                if conn.write_interest() {
                    self.disable_writes(id);
                }
            },
            FlushOutcome::Drained { written } => {
                tracing::trace!(%id, written, "output drained");
                self.disable_writes(id);
            },
            FlushOutcome::Partial { written, remaining } => {
                tracing::debug!(%id, written, remaining, "partial write");
            },
            FlushOutcome::WouldBlock => {
                tracing::trace!(%id, "spurious write wake");
            },
            FlushOutcome::Dead(cause) => {
                let err = conn.dead(cause);
                self.fail(err);
            },
        }
    }

    /// Tear a connection down and announce its departure.
    ///
    /// Cancels its watches, closes its socket, removes it from the registry,
    /// and queues `"<id> left"` for everyone remaining. Returns `false` when
    /// `id` was not registered, which makes repeated calls harmless.
    ///
    /// Connections that refuse write interest for a departure notice are torn
    /// down afterwards, first come first served, in ascending id order within
    /// one notice.
    pub fn cleanup(&mut self, id: ConnectionId) -> bool {
        let mut pending = VecDeque::from([id]);
        let mut cleaned = false;

        while let Some(id) = pending.pop_front() {
            let Ok(mut conn) = self.registry.remove(id) else {
                continue;
            };
            cleaned = true;
            self.carried.remove(&id);

            if let Err(e) = conn.begin_closing() {
                tracing::trace!(%id, error = %e, "already closing");
            }
            if let Err(e) = self.reactor.cancel(conn.socket_mut(), id.token()) {
                tracing::warn!(%id, error = %e, "failed to cancel watches");
            }
            if let Err(e) = conn.close() {
                tracing::debug!(%id, error = %e, "close failed");
            }
            let peer = conn.peer();
            drop(conn);

            tracing::info!(%id, ?peer, "client disconnected");

            let left = message::left(id);
            let woken = self.registry.broadcast(id, left.as_bytes(), false);
            pending.extend(self.try_enable_writes(&woken));
        }

        cleaned
    }

    /// Clean up every connection and stop watching the listener.
    pub fn shutdown(&mut self) {
        let ids: Vec<_> = self.registry.ids().collect();
        for id in ids {
            self.cleanup(id);
        }

        if self.listening {
            if let Err(e) = self.reactor.deregister_listener(&mut self.listener) {
                tracing::warn!(error = %e, "failed to deregister listener");
            }
            self.listening = false;
        }

        tracing::info!("server shut down");
    }

    /// Handle that stops [`Server::run`] from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.stop.clone()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Live connections.
    pub fn registry(&self) -> &ConnectionRegistry<R::Socket> {
        &self.registry
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Underlying reactor.
    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    /// Admit one accepted socket: watch it, register it, and queue the
    /// welcome text through the regular broadcast path.
    fn admit(&mut self, socket: R::Socket, peer: SocketAddr) {
        if self.registry.len() >= self.config.max_connections {
            tracing::warn!(%peer, max = self.config.max_connections, "connection limit reached");
            let mut socket = socket;
            if let Err(e) = socket.close() {
                tracing::debug!(%peer, error = %e, "close failed");
            }
            return;
        }

        let id = self.registry.allocate_id();
        let mut conn = Connection::new(id, socket, Some(peer));

        if let Err(e) = self.watch(&mut conn) {
            tracing::warn!(%id, %peer, error = %e, "failed to watch accepted socket");
            if let Err(e) = conn.close() {
                tracing::debug!(%id, error = %e, "close failed");
            }
            return;
        }

        let welcome = message::welcome(id, self.registry.is_empty());

        if let Err(e) = conn.activate() {
            self.fail(e);
        }
        if let Err(e) = self.registry.add(conn) {
            let err = ServerError::from(e);
            tracing::error!(%id, error = %err, "registry rejected new connection");
            return;
        }

        tracing::info!(%id, %peer, "client accepted");

        let woken = self.registry.broadcast(id, welcome.as_bytes(), true);
        self.enable_writes(&woken);
    }

    /// Register read and (disabled) write interest for a new connection.
    fn watch(&mut self, conn: &mut Connection<R::Socket>) -> io::Result<()> {
        let token = conn.id().token();

        self.reactor.register_readable(conn.socket_mut(), token)?;
        conn.set_read_interest(true);

        if let Err(e) = self.reactor.register_writable(conn.socket_mut(), token) {
            if let Err(cancel) = self.reactor.cancel(conn.socket_mut(), token) {
                tracing::debug!(id = %conn.id(), error = %cancel, "cancel after failed watch");
            }
            conn.set_read_interest(false);
            return Err(e);
        }
        Ok(())
    }

    /// Enable write interest for connections whose buffer just filled,
    /// cleaning up any the reactor refuses.
    fn enable_writes(&mut self, ids: &[ConnectionId]) {
        for id in self.try_enable_writes(ids) {
            self.cleanup(id);
        }
    }

    /// Enable write interest, returning the ids the reactor refused.
    fn try_enable_writes(&mut self, ids: &[ConnectionId]) -> Vec<ConnectionId> {
        let mut failed = Vec::new();

        for &id in ids {
            let Some(conn) = self.registry.get_mut(id) else {
                continue;
            };
            if conn.write_interest() {
                continue;
            }
            match self.reactor.enable_writable(conn.socket_mut(), id.token()) {
                Ok(()) => conn.set_write_interest(true),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "failed to enable write interest");
                    failed.push(id);
                },
            }
        }

        failed
    }

    /// Disable write interest after the buffer drained.
    fn disable_writes(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };

        match self.reactor.disable_writable(conn.socket_mut(), id.token()) {
            Ok(()) => conn.set_write_interest(false),
            Err(e) => {
                tracing::warn!(%id, error = %e, "failed to disable write interest");
                self.cleanup(id);
            },
        }
    }

    /// Contain a per-connection failure. Fatal ones end in that
    /// connection's cleanup; the rest are logged.
    fn fail(&mut self, err: ConnectionError) {
        if !err.is_fatal() {
            tracing::warn!(error = %err, "connection in unexpected state");
            return;
        }

        tracing::debug!(error = %err, "connection failed");
        if let ConnectionError::SocketDead { id, .. } = err {
            self.cleanup(id);
        }
    }
}

impl<R: Reactor> std::fmt::Debug for Server<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("connection_count", &self.registry.len())
            .field("listening", &self.listening)
            .field("config", &self.config)
            .finish()
    }
}
