//! mio-backed reactor.
//!
//! mio is edge-triggered: a readiness event is reported once per change, so
//! the core server drains reads and writes until would-block. Write interest
//! is switched with `reregister`, which re-arms the socket and reports it
//! writable again straight away if there is room in the send buffer.

use std::{collections::HashMap, io, sync::Arc, time::Duration};

use chorus_core::{Reactor, Readiness, ShutdownHandle, Token};
use mio::{Events, Interest, Poll, Registry, Waker};

use crate::transport::{MioListener, MioStream};

/// Token reserved for the cross-thread waker.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Per-socket interest as last registered with mio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watch {
    /// Write watching requested
    write_registered: bool,
    /// Write interest currently armed
    write_enabled: bool,
}

/// [`Reactor`] over a mio [`Poll`].
pub struct MioReactor {
    poll: Poll,
    events: Events,
    watches: HashMap<Token, Watch>,
    shutdown: ShutdownHandle,
}

impl MioReactor {
    /// Create a reactor that returns at most `event_capacity` events per
    /// poll.
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), mio_token(WAKE_TOKEN))?);
        let shutdown = ShutdownHandle::new(move || waker.wake());

        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity.max(1)),
            watches: HashMap::new(),
            shutdown,
        })
    }

    /// Number of sockets currently watched.
    pub fn watched_count(&self) -> usize {
        self.watches.len()
    }

    fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    fn rearm(&mut self, socket: &mut MioStream, token: Token, write: bool) -> io::Result<()> {
        let watch = self.watches.get(&token).ok_or_else(not_found)?;
        if !watch.write_registered {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        let interest =
            if write { Interest::READABLE | Interest::WRITABLE } else { Interest::READABLE };
        self.registry().reregister(&mut socket.inner, mio_token(token), interest)?;

        if let Some(watch) = self.watches.get_mut(&token) {
            watch.write_enabled = write;
        }
        Ok(())
    }
}

impl Reactor for MioReactor {
    type Listener = MioListener;
    type Socket = MioStream;

    fn register_listener(&mut self, listener: &mut MioListener, token: Token) -> io::Result<()> {
        self.registry().register(&mut listener.inner, mio_token(token), Interest::READABLE)
    }

    fn deregister_listener(&mut self, listener: &mut MioListener) -> io::Result<()> {
        self.registry().deregister(&mut listener.inner)
    }

    fn register_readable(&mut self, socket: &mut MioStream, token: Token) -> io::Result<()> {
        if self.watches.contains_key(&token) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        self.registry().register(&mut socket.inner, mio_token(token), Interest::READABLE)?;
        self.watches.insert(token, Watch { write_registered: false, write_enabled: false });
        Ok(())
    }

    fn register_writable(&mut self, _socket: &mut MioStream, token: Token) -> io::Result<()> {
        // mio has no disabled registrations; WRITABLE is added on enable.
        let watch = self.watches.get_mut(&token).ok_or_else(not_found)?;
        watch.write_registered = true;
        Ok(())
    }

    fn enable_writable(&mut self, socket: &mut MioStream, token: Token) -> io::Result<()> {
        self.rearm(socket, token, true)
    }

    fn disable_writable(&mut self, socket: &mut MioStream, token: Token) -> io::Result<()> {
        self.rearm(socket, token, false)
    }

    fn cancel(&mut self, socket: &mut MioStream, token: Token) -> io::Result<()> {
        if self.watches.remove(&token).is_none() {
            return Err(io::ErrorKind::NotFound.into());
        }
        self.registry().deregister(&mut socket.inner)
    }

    fn poll(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        out.clear();
        self.poll.poll(&mut self.events, timeout)?;

        for event in &self.events {
            let token = Token(event.token().0);
            if token == WAKE_TOKEN {
                continue;
            }

            // Hang-ups and errors surface through the next read.
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed();
            if readable || writable {
                out.push(Readiness { token, readable, writable });
            }
        }

        tracing::trace!(events = out.len(), "poll returned");
        Ok(())
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

impl std::fmt::Debug for MioReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MioReactor")
            .field("watched", &self.watches.len())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

fn mio_token(token: Token) -> mio::Token {
    mio::Token(token.0)
}

fn not_found() -> io::Error {
    io::ErrorKind::NotFound.into()
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        net::{SocketAddr, TcpStream},
        time::Duration,
    };

    use chorus_core::Listener;

    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    /// Poll until an event for `token` arrives.
    fn wait_for(reactor: &mut MioReactor, token: Token) -> Readiness {
        let mut events = Vec::new();
        for _ in 0..100 {
            reactor.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            if let Some(found) = events.iter().find(|r| r.token == token) {
                return *found;
            }
        }
        panic!("no event for {token:?}");
    }

    #[test]
    fn listener_reports_pending_connection() {
        let mut reactor = MioReactor::new(16).unwrap();
        let mut listener = MioListener::bind(loopback()).unwrap();
        reactor.register_listener(&mut listener, Token::LISTENER).unwrap();

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let readiness = wait_for(&mut reactor, Token::LISTENER);
        assert!(readiness.readable);
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn write_interest_round_trip() {
        let mut reactor = MioReactor::new(16).unwrap();
        let mut listener = MioListener::bind(loopback()).unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client.set_write_timeout(Some(Duration::from_secs(5))).unwrap();

        reactor.register_listener(&mut listener, Token::LISTENER).unwrap();
        wait_for(&mut reactor, Token::LISTENER);
        let (mut stream, _) = listener.accept().unwrap();

        let token = Token(1);
        reactor.register_readable(&mut stream, token).unwrap();
        reactor.register_writable(&mut stream, token).unwrap();
        assert!(reactor.enable_writable(&mut stream, token).is_ok());
        assert!(wait_for(&mut reactor, token).writable);

        reactor.disable_writable(&mut stream, token).unwrap();
        client.write_all(b"ping").unwrap();
        assert!(wait_for(&mut reactor, token).readable);

        reactor.cancel(&mut stream, token).unwrap();
        assert_eq!(reactor.watched_count(), 0);
        assert!(reactor.cancel(&mut stream, token).is_err());
    }

    #[test]
    fn enable_requires_registration() {
        let mut reactor = MioReactor::new(16).unwrap();
        let mut listener = MioListener::bind(loopback()).unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        reactor.register_listener(&mut listener, Token::LISTENER).unwrap();
        wait_for(&mut reactor, Token::LISTENER);
        let (mut stream, _) = listener.accept().unwrap();

        assert!(reactor.enable_writable(&mut stream, Token(7)).is_err());
    }

    #[test]
    fn shutdown_handle_wakes_poll() {
        let mut reactor = MioReactor::new(16).unwrap();
        let handle = reactor.shutdown_handle();

        let waker = std::thread::spawn(move || handle.shutdown());
        let mut events = Vec::new();
        reactor.poll(&mut events, None).unwrap();

        assert!(events.is_empty());
        waker.join().unwrap().unwrap();
        assert!(reactor.shutdown_handle().is_requested());
    }
}
