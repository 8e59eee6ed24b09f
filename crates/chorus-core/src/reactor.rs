//! Reactor contract consumed by the server.
//!
//! The server never multiplexes I/O itself. It asks a [`Reactor`] to watch
//! handles for readiness, toggles write interest as its buffers fill and
//! drain, and dispatches whatever [`Readiness`] events the reactor reports.
//!
//! Any non-blocking multiplexing facility satisfies the contract: production
//! uses mio (epoll/kqueue), tests use a deterministic in-memory simulation.
//!
//! # Readiness vs. progress
//!
//! A readiness event only says an operation *may* make progress. Sockets
//! report "no progress right now" with [`io::ErrorKind::WouldBlock`], which is
//! distinct from end-of-stream (`Ok(0)` on read) and from real errors.

use std::{
    fmt,
    io::{self, Read, Write},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Reactor registration key.
///
/// [`Token::LISTENER`] is reserved for the listening socket; connections use
/// their id (see [`ConnectionId::token`](crate::ConnectionId::token)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl Token {
    /// Token of the listening socket.
    pub const LISTENER: Token = Token(0);
}

/// A readiness notification for one registered handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Which registration fired
    pub token: Token,
    /// A read (or accept) may make progress
    pub readable: bool,
    /// A write may make progress
    pub writable: bool,
}

impl Readiness {
    /// Readable-only notification.
    pub fn readable(token: Token) -> Self {
        Self { token, readable: true, writable: false }
    }

    /// Writable-only notification.
    pub fn writable(token: Token) -> Self {
        Self { token, readable: false, writable: true }
    }
}

/// A connected, non-blocking byte stream.
pub trait Socket: Read + Write {
    /// Close the stream. Called exactly once, right before the socket is
    /// dropped.
    fn close(&mut self) -> io::Result<()>;
}

/// A non-blocking listening socket.
pub trait Listener {
    /// Stream type produced by [`Listener::accept`].
    type Socket: Socket;

    /// Accept one pending connection.
    ///
    /// Returns `WouldBlock` once the backlog is drained.
    fn accept(&mut self) -> io::Result<(Self::Socket, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Event-notification service.
///
/// # Invariants
///
/// - A socket registered with [`Reactor::register_writable`] starts with
///   write interest *disabled*; it only reports writability between
///   [`Reactor::enable_writable`] and [`Reactor::disable_writable`].
/// - After [`Reactor::cancel`] the token never appears in [`Reactor::poll`]
///   output again.
///
/// Edge-triggered implementations are fine. The server reads once per
/// notification and re-reads a connection whose last read filled the buffer
/// on the next turn without waiting for a new edge.
pub trait Reactor {
    /// Connected stream type.
    type Socket: Socket;
    /// Listening socket type.
    type Listener: Listener<Socket = Self::Socket>;

    /// Watch the listener for incoming connections.
    fn register_listener(&mut self, listener: &mut Self::Listener, token: Token)
    -> io::Result<()>;

    /// Stop watching the listener.
    fn deregister_listener(&mut self, listener: &mut Self::Listener) -> io::Result<()>;

    /// Watch a socket for readability.
    fn register_readable(&mut self, socket: &mut Self::Socket, token: Token) -> io::Result<()>;

    /// Prepare write watching for a socket, initially disabled.
    fn register_writable(&mut self, socket: &mut Self::Socket, token: Token) -> io::Result<()>;

    /// Start reporting writability for a socket.
    fn enable_writable(&mut self, socket: &mut Self::Socket, token: Token) -> io::Result<()>;

    /// Stop reporting writability for a socket.
    fn disable_writable(&mut self, socket: &mut Self::Socket, token: Token) -> io::Result<()>;

    /// Drop every watch on a socket.
    fn cancel(&mut self, socket: &mut Self::Socket, token: Token) -> io::Result<()>;

    /// Wait for the next batch of readiness events.
    ///
    /// Clears `events` before filling it. This is the only call allowed to
    /// block the event-loop thread. `None` waits indefinitely; a zero
    /// timeout only collects what is already pending.
    fn poll(&mut self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;

    /// Handle that stops a running loop from any thread.
    fn shutdown_handle(&self) -> ShutdownHandle;
}

type WakeFn = dyn Fn() -> io::Result<()> + Send + Sync;

/// Cross-thread stop request for a running event loop.
///
/// Setting the flag alone is not enough when the loop is parked in
/// [`Reactor::poll`], so the handle also carries the reactor's wake-up hook.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    wake: Arc<WakeFn>,
}

impl ShutdownHandle {
    /// Create a handle that calls `wake` to interrupt a blocked poll.
    pub fn new<F>(wake: F) -> Self
    where
        F: Fn() -> io::Result<()> + Send + Sync + 'static,
    {
        Self { requested: Arc::new(AtomicBool::new(false)), wake: Arc::new(wake) }
    }

    /// Create a handle for reactors whose poll never blocks.
    pub fn inert() -> Self {
        Self::new(|| Ok(()))
    }

    /// Request shutdown and wake the loop.
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        (self.wake)()
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle").field("requested", &self.is_requested()).finish()
    }
}
