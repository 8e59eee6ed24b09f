//! Deterministic in-memory network.
//!
//! A [`SimNetwork`] is a set of pipes between test-side [`SimClient`]s and the
//! server-side [`SimStream`](crate::SimStream)s handed out by the simulated
//! listener. Everything is single-threaded and shared through `Rc<RefCell>`;
//! the server, its reactor, and the test all see the same pipe state.
//!
//! # Fault injection
//!
//! Each pipe can be told to fail its next read, to fail (or accept zero bytes
//! on) every write, or to accept only a limited number of bytes. A seeded
//! network additionally splits writes at random points so partial-write paths
//! get exercised without hand-written scripts.

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    rc::Rc,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Address the simulated listener reports.
pub const SIM_LISTEN_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1337);

/// First ephemeral port handed to simulated clients.
const FIRST_CLIENT_PORT: u16 = 40_000;

/// Identifier of one simulated pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipeId(pub u64);

/// How server writes to a pipe fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Every write returns this error
    Error(io::ErrorKind),
    /// Every write accepts zero bytes
    Zero,
}

/// One client ↔ server byte pipe.
#[derive(Debug)]
pub(crate) struct Pipe {
    pub(crate) peer: SocketAddr,
    /// Client → server bytes not yet read by the server
    pub(crate) inbound: VecDeque<u8>,
    /// Server → client bytes delivered so far
    pub(crate) delivered: Vec<u8>,
    /// Client shut down its sending side
    pub(crate) client_closed: bool,
    /// Next server read fails with this error
    pub(crate) read_fault: Option<io::ErrorKind>,
    /// Server writes fail
    pub(crate) write_fault: Option<WriteFault>,
    /// Bytes the server may still write. `None` is unlimited.
    pub(crate) write_budget: Option<usize>,
    /// Reactor refuses to enable write interest
    pub(crate) refuse_write_interest: bool,
    /// Times the server closed its end
    pub(crate) server_closes: usize,
}

impl Pipe {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            inbound: VecDeque::new(),
            delivered: Vec::new(),
            client_closed: false,
            read_fault: None,
            write_fault: None,
            write_budget: None,
            refuse_write_interest: false,
            server_closes: 0,
        }
    }

    /// A server read would make progress (data, EOF, or error).
    pub(crate) fn readable(&self) -> bool {
        !self.inbound.is_empty() || self.client_closed || self.read_fault.is_some()
    }

    /// A server write would make progress (bytes or error).
    pub(crate) fn writable(&self) -> bool {
        self.write_fault.is_some() || self.write_budget != Some(0)
    }
}

#[derive(Debug)]
pub(crate) struct NetState {
    pub(crate) pipes: BTreeMap<PipeId, Pipe>,
    pub(crate) backlog: VecDeque<PipeId>,
    pub(crate) accept_faults: VecDeque<io::ErrorKind>,
    pub(crate) chaos: Option<ChaCha8Rng>,
    next_pipe: u64,
}

impl NetState {
    pub(crate) fn pipe(&self, id: PipeId) -> io::Result<&Pipe> {
        self.pipes.get(&id).ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    pub(crate) fn pipe_mut(&mut self, id: PipeId) -> io::Result<&mut Pipe> {
        self.pipes.get_mut(&id).ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    /// Bytes a single write of `len` bytes may deliver under chaos.
    ///
    /// `None` means "would block this time".
    pub(crate) fn chaos_limit(&mut self, len: usize) -> Option<usize> {
        let Some(rng) = self.chaos.as_mut() else {
            return Some(len);
        };
        if len == 0 {
            return Some(0);
        }
        if rng.gen_bool(0.25) {
            return None;
        }
        Some(rng.gen_range(1..=len))
    }
}

/// Shared simulated network.
#[derive(Debug, Clone)]
pub struct SimNetwork {
    pub(crate) state: Rc<RefCell<NetState>>,
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SimNetwork {
    /// Network that delivers every write in full.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Network that splits and delays writes pseudo-randomly.
    ///
    /// The same seed always produces the same split points.
    pub fn with_seed(seed: u64) -> Self {
        Self::build(Some(ChaCha8Rng::seed_from_u64(seed)))
    }

    fn build(chaos: Option<ChaCha8Rng>) -> Self {
        let state = NetState {
            pipes: BTreeMap::new(),
            backlog: VecDeque::new(),
            accept_faults: VecDeque::new(),
            chaos,
            next_pipe: 1,
        };
        Self { state: Rc::new(RefCell::new(state)) }
    }

    /// Open a new connection. The server sees it on its next accept.
    pub fn connect(&self) -> SimClient {
        let mut state = self.state.borrow_mut();
        let id = PipeId(state.next_pipe);
        state.next_pipe += 1;

        let port = FIRST_CLIENT_PORT.wrapping_add(id.0 as u16);
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        state.pipes.insert(id, Pipe::new(peer));
        state.backlog.push_back(id);

        tracing::trace!(pipe = id.0, "sim connect");
        SimClient { net: self.clone(), pipe: id }
    }

    /// Make the next accept call fail with `kind`.
    pub fn fail_next_accept(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().accept_faults.push_back(kind);
    }

    /// Connections waiting to be accepted.
    pub fn backlog_len(&self) -> usize {
        self.state.borrow().backlog.len()
    }

    /// Times the server closed each pipe, in pipe order.
    pub fn server_closes(&self) -> Vec<(PipeId, usize)> {
        self.state.borrow().pipes.iter().map(|(id, pipe)| (*id, pipe.server_closes)).collect()
    }
}

/// Test-side end of a simulated connection.
#[derive(Debug, Clone)]
pub struct SimClient {
    net: SimNetwork,
    pipe: PipeId,
}

impl SimClient {
    /// Pipe this client talks over.
    pub fn pipe_id(&self) -> PipeId {
        self.pipe
    }

    /// Queue bytes for the server to read.
    pub fn send(&self, data: &[u8]) {
        self.with_pipe(|pipe| pipe.inbound.extend(data.iter().copied()));
    }

    /// Shut down the sending side. The server reads end-of-stream once the
    /// queued bytes are consumed.
    pub fn close(&self) {
        self.with_pipe(|pipe| pipe.client_closed = true);
    }

    /// Everything the server has written to this client.
    pub fn received(&self) -> Vec<u8> {
        let state = self.net.state.borrow();
        state.pipes.get(&self.pipe).map(|p| p.delivered.clone()).unwrap_or_default()
    }

    /// [`SimClient::received`] as text.
    pub fn received_text(&self) -> String {
        String::from_utf8_lossy(&self.received()).into_owned()
    }

    /// Take and clear what the server has written so far.
    pub fn take_received(&self) -> Vec<u8> {
        let mut taken = Vec::new();
        self.with_pipe(|pipe| taken = std::mem::take(&mut pipe.delivered));
        taken
    }

    /// Make the server's next read fail with `kind`.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.with_pipe(|pipe| pipe.read_fault = Some(kind));
    }

    /// Make every server write fail.
    pub fn break_writes(&self, fault: WriteFault) {
        self.with_pipe(|pipe| pipe.write_fault = Some(fault));
    }

    /// Limit how many more bytes the server may write. `None` lifts the
    /// limit.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.with_pipe(|pipe| pipe.write_budget = budget);
    }

    /// Allow `bytes` more bytes on a limited pipe.
    pub fn grant(&self, bytes: usize) {
        self.with_pipe(|pipe| {
            if let Some(budget) = pipe.write_budget.as_mut() {
                *budget += bytes;
            }
        });
    }

    /// Make the reactor refuse to enable write interest for this pipe.
    pub fn refuse_write_interest(&self) {
        self.with_pipe(|pipe| pipe.refuse_write_interest = true);
    }

    /// Times the server closed its end of this pipe.
    pub fn server_closes(&self) -> usize {
        self.net.state.borrow().pipes.get(&self.pipe).map_or(0, |p| p.server_closes)
    }

    /// Whether the server has closed its end.
    pub fn is_closed_by_server(&self) -> bool {
        self.server_closes() > 0
    }

    /// Address the server sees for this client.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.net.state.borrow().pipes.get(&self.pipe).map(|p| p.peer)
    }

    fn with_pipe(&self, f: impl FnOnce(&mut Pipe)) {
        if let Some(pipe) = self.net.state.borrow_mut().pipes.get_mut(&self.pipe) {
            f(pipe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_queues_backlog() {
        let net = SimNetwork::new();
        let a = net.connect();
        let b = net.connect();

        assert_eq!(net.backlog_len(), 2);
        assert_ne!(a.pipe_id(), b.pipe_id());
        assert_ne!(a.peer_addr(), b.peer_addr());
    }

    #[test]
    fn pipe_readiness_tracks_faults() {
        let net = SimNetwork::new();
        let client = net.connect();
        let id = client.pipe_id();

        assert!(!net.state.borrow().pipes[&id].readable());
        client.send(b"x");
        assert!(net.state.borrow().pipes[&id].readable());

        client.set_write_budget(Some(0));
        assert!(!net.state.borrow().pipes[&id].writable());
        client.grant(4);
        assert!(net.state.borrow().pipes[&id].writable());
    }

    #[test]
    fn chaos_is_deterministic_per_seed() {
        let draws = |seed| {
            let net = SimNetwork::with_seed(seed);
            let mut state = net.state.borrow_mut();
            (0..32).map(|_| state.chaos_limit(100)).collect::<Vec<_>>()
        };

        assert_eq!(draws(7), draws(7));
        assert!(draws(7).iter().flatten().all(|n| (1..=100).contains(n)));
    }
}
