//! Level-triggered reactor over the simulated network.
//!
//! `poll` never blocks and ignores its timeout. It reports every watched
//! handle that could make progress right now, in token order, and returns an
//! empty batch when the system is quiescent. That makes "run until idle" a well-defined stopping
//! point for tests.

use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    time::Duration,
};

use chorus_core::{Reactor, Readiness, ShutdownHandle, Token};

use crate::{
    sim_network::{PipeId, SimNetwork},
    sim_transport::{SimListener, SimStream},
};

/// Watch state for one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    /// Pipe behind the token
    pub pipe: PipeId,
    /// Read interest registered
    pub readable: bool,
    /// Write watching registered (possibly disabled)
    pub write_registered: bool,
    /// Write interest currently enabled
    pub write_enabled: bool,
}

/// Counters of reactor calls, for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorStats {
    /// `enable_writable` calls that succeeded
    pub enables: usize,
    /// `disable_writable` calls that succeeded
    pub disables: usize,
    /// `cancel` calls that succeeded
    pub cancels: usize,
    /// `poll` calls
    pub polls: usize,
}

/// Deterministic [`Reactor`] for the simulated network.
#[derive(Debug)]
pub struct SimReactor {
    net: SimNetwork,
    listener: Option<Token>,
    watches: BTreeMap<Token, Watch>,
    stats: ReactorStats,
    shutdown: ShutdownHandle,
}

impl SimReactor {
    /// Reactor watching handles on `net`.
    pub fn new(net: &SimNetwork) -> Self {
        Self {
            net: net.clone(),
            listener: None,
            watches: BTreeMap::new(),
            stats: ReactorStats::default(),
            shutdown: ShutdownHandle::inert(),
        }
    }

    /// Watch state for a token. `None` once cancelled.
    pub fn watch(&self, token: Token) -> Option<Watch> {
        self.watches.get(&token).copied()
    }

    /// Whether writability is reported for `token`.
    pub fn write_enabled(&self, token: Token) -> bool {
        self.watches.get(&token).is_some_and(|w| w.write_enabled)
    }

    /// Number of watched sockets.
    pub fn watched_count(&self) -> usize {
        self.watches.len()
    }

    /// Whether the listener is registered.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Call counters.
    pub fn stats(&self) -> ReactorStats {
        self.stats
    }

    fn watch_mut(&mut self, token: Token) -> io::Result<&mut Watch> {
        self.watches.get_mut(&token).ok_or_else(|| io::Error::from(ErrorKind::NotFound))
    }
}

impl Reactor for SimReactor {
    type Listener = SimListener;
    type Socket = SimStream;

    fn register_listener(&mut self, _listener: &mut SimListener, token: Token) -> io::Result<()> {
        if self.listener.is_some() {
            return Err(ErrorKind::AlreadyExists.into());
        }
        self.listener = Some(token);
        Ok(())
    }

    fn deregister_listener(&mut self, _listener: &mut SimListener) -> io::Result<()> {
        self.listener.take().map(|_| ()).ok_or_else(|| ErrorKind::NotFound.into())
    }

    fn register_readable(&mut self, socket: &mut SimStream, token: Token) -> io::Result<()> {
        let watch = self.watches.entry(token).or_insert(Watch {
            pipe: socket.pipe_id(),
            readable: false,
            write_registered: false,
            write_enabled: false,
        });
        if watch.readable {
            return Err(ErrorKind::AlreadyExists.into());
        }
        watch.readable = true;
        Ok(())
    }

    fn register_writable(&mut self, socket: &mut SimStream, token: Token) -> io::Result<()> {
        let watch = self.watches.entry(token).or_insert(Watch {
            pipe: socket.pipe_id(),
            readable: false,
            write_registered: false,
            write_enabled: false,
        });
        if watch.write_registered {
            return Err(ErrorKind::AlreadyExists.into());
        }
        watch.write_registered = true;
        Ok(())
    }

    fn enable_writable(&mut self, socket: &mut SimStream, token: Token) -> io::Result<()> {
        let refused = self
            .net
            .state
            .borrow()
            .pipes
            .get(&socket.pipe_id())
            .is_some_and(|p| p.refuse_write_interest);
        if refused {
            return Err(ErrorKind::PermissionDenied.into());
        }

        let watch = self.watch_mut(token)?;
        if !watch.write_registered {
            return Err(ErrorKind::InvalidInput.into());
        }
        watch.write_enabled = true;
        self.stats.enables += 1;
        Ok(())
    }

    fn disable_writable(&mut self, _socket: &mut SimStream, token: Token) -> io::Result<()> {
        let watch = self.watch_mut(token)?;
        if !watch.write_registered {
            return Err(ErrorKind::InvalidInput.into());
        }
        watch.write_enabled = false;
        self.stats.disables += 1;
        Ok(())
    }

    fn cancel(&mut self, _socket: &mut SimStream, token: Token) -> io::Result<()> {
        self.watches.remove(&token).ok_or_else(|| io::Error::from(ErrorKind::NotFound))?;
        self.stats.cancels += 1;
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<Readiness>, _timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        self.stats.polls += 1;

        let state = self.net.state.borrow();

        if let Some(token) = self.listener
            && (!state.backlog.is_empty() || !state.accept_faults.is_empty())
        {
            events.push(Readiness::readable(token));
        }

        for (token, watch) in &self.watches {
            let Some(pipe) = state.pipes.get(&watch.pipe) else {
                continue;
            };
            let readable = watch.readable && pipe.readable();
            let writable = watch.write_enabled && pipe.writable();
            if readable || writable {
                events.push(Readiness { token: *token, readable, writable });
            }
        }

        Ok(())
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use chorus_core::Listener;

    use super::*;

    #[test]
    fn listener_readable_while_backlog_pending() {
        let net = SimNetwork::new();
        let mut reactor = SimReactor::new(&net);
        let mut listener = SimListener::new(&net);
        let mut events = Vec::new();

        reactor.register_listener(&mut listener, Token::LISTENER).unwrap();
        reactor.poll(&mut events, None).unwrap();
        assert!(events.is_empty());

        net.connect();
        reactor.poll(&mut events, None).unwrap();
        assert_eq!(events, vec![Readiness::readable(Token::LISTENER)]);
    }

    #[test]
    fn write_interest_starts_disabled() {
        let net = SimNetwork::new();
        let mut reactor = SimReactor::new(&net);
        net.connect();
        let (mut stream, _) = SimListener::new(&net).accept().unwrap();
        let token = Token(1);
        let mut events = Vec::new();

        reactor.register_readable(&mut stream, token).unwrap();
        reactor.register_writable(&mut stream, token).unwrap();
        reactor.poll(&mut events, None).unwrap();
        assert!(events.is_empty());

        reactor.enable_writable(&mut stream, token).unwrap();
        reactor.poll(&mut events, None).unwrap();
        assert_eq!(events, vec![Readiness::writable(token)]);

        reactor.disable_writable(&mut stream, token).unwrap();
        reactor.poll(&mut events, None).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn cancel_silences_token() {
        let net = SimNetwork::new();
        let mut reactor = SimReactor::new(&net);
        let client = net.connect();
        let (mut stream, _) = SimListener::new(&net).accept().unwrap();
        let token = Token(1);
        let mut events = Vec::new();

        reactor.register_readable(&mut stream, token).unwrap();
        reactor.register_writable(&mut stream, token).unwrap();
        client.send(b"ping");

        reactor.cancel(&mut stream, token).unwrap();
        reactor.poll(&mut events, None).unwrap();

        assert!(events.is_empty());
        assert!(reactor.watch(token).is_none());
        assert!(reactor.cancel(&mut stream, token).is_err());
    }

    #[test]
    fn refused_write_interest() {
        let net = SimNetwork::new();
        let mut reactor = SimReactor::new(&net);
        let client = net.connect();
        let (mut stream, _) = SimListener::new(&net).accept().unwrap();
        let token = Token(1);

        reactor.register_writable(&mut stream, token).unwrap();
        client.refuse_write_interest();

        assert!(reactor.enable_writable(&mut stream, token).is_err());
        assert!(!reactor.write_enabled(token));
    }
}
