//! Per-client connection state.
//!
//! A [`Connection`] owns its socket and its pending output. The server drives
//! it through readiness events; the connection itself only knows how to read a
//! chunk, flush its buffer, and classify what the socket said.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────┐ registered ┌────────┐ EOF / error ┌─────────┐ cleanup ┌────────┐
//! │ Accepted │───────────>│ Active │────────────>│ Closing │────────>│ Closed │
//! └──────────┘            └────────┘             └─────────┘         └────────┘
//! ```
//!
//! `Closed` is terminal. The socket is closed at most once no matter how many
//! paths reach cleanup.

use std::{
    fmt,
    io::{self, ErrorKind},
    net::SocketAddr,
};

use bytes::{Buf, BytesMut};

use crate::{
    error::{ConnectionError, DeathCause},
    reactor::{Socket, Token},
};

/// Unique connection identifier.
///
/// Allocated from a monotonically increasing counter starting at 1, so ids are
/// never reused while a registry is alive. Zero is reserved for the listener's
/// reactor token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Reactor token for this connection.
    pub fn token(self) -> Token {
        Token(self.0 as usize)
    }

    /// Connection id for a reactor token. `None` for the listener token.
    pub fn from_token(token: Token) -> Option<Self> {
        (token != Token::LISTENER).then_some(Self(token.0 as u64))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, not yet watched or registered
    Accepted,
    /// Watched by the reactor and present in the registry
    Active,
    /// Failure detected, cleanup in progress
    Closing,
    /// Socket closed and watches cancelled
    Closed,
}

/// Result of a single read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were read into the caller's buffer
    Data(usize),
    /// Nothing available right now
    WouldBlock,
    /// Socket is gone
    Dead(DeathCause),
}

/// Result of flushing the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Buffer was already empty
    Idle,
    /// Everything pending was written
    Drained {
        /// Bytes written during this flush
        written: usize,
    },
    /// Some bytes were written, the socket stopped accepting more
    Partial {
        /// Bytes written during this flush
        written: usize,
        /// Bytes still pending
        remaining: usize,
    },
    /// The socket accepted nothing; a spurious wake
    WouldBlock,
    /// Socket is gone
    Dead(DeathCause),
}

/// One accepted client.
#[derive(Debug)]
pub struct Connection<S> {
    id: ConnectionId,
    socket: S,
    peer: Option<SocketAddr>,
    output: BytesMut,
    read_interest: bool,
    write_interest: bool,
    state: ConnectionState,
}

impl<S: Socket> Connection<S> {
    /// Wrap a freshly accepted socket in [`ConnectionState::Accepted`].
    pub fn new(id: ConnectionId, socket: S, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            socket,
            peer,
            output: BytesMut::new(),
            read_interest: false,
            write_interest: false,
            state: ConnectionState::Accepted,
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Peer address reported at accept time
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Bytes queued but not yet written
    pub fn pending_output(&self) -> &[u8] {
        &self.output
    }

    /// Whether the reactor watches this socket for readability
    pub fn read_interest(&self) -> bool {
        self.read_interest
    }

    /// Whether the reactor reports writability for this socket
    pub fn write_interest(&self) -> bool {
        self.write_interest
    }

    /// Underlying socket
    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub(crate) fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub(crate) fn set_read_interest(&mut self, enabled: bool) {
        self.read_interest = enabled;
    }

    pub(crate) fn set_write_interest(&mut self, enabled: bool) {
        self.write_interest = enabled;
    }

    /// Transition `Accepted → Active`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in `Accepted`
    pub fn activate(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Accepted {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "activate" });
        }
        self.state = ConnectionState::Active;
        Ok(())
    }

    /// Transition to `Closing`. Allowed from `Accepted` and `Active`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if already closing or closed
    pub fn begin_closing(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Accepted | ConnectionState::Active => {
                self.state = ConnectionState::Closing;
                Ok(())
            },
            state => Err(ConnectionError::InvalidState { state, operation: "begin_closing" }),
        }
    }

    /// Append bytes to the output buffer.
    ///
    /// Returns `true` when the buffer went from empty to non-empty, i.e. when
    /// write interest needs enabling.
    pub fn queue(&mut self, payload: &[u8]) -> bool {
        if payload.is_empty() {
            return false;
        }
        let was_empty = self.output.is_empty();
        self.output.extend_from_slice(payload);
        was_empty
    }

    /// Read once into `buf`.
    ///
    /// `buf` must be non-empty, otherwise a zero-length read is
    /// indistinguishable from end-of-stream.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
        loop {
            match self.socket.read(buf) {
                Ok(0) => return ReadOutcome::Dead(DeathCause::EndOfStream),
                Ok(n) => return ReadOutcome::Data(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::WouldBlock => return ReadOutcome::WouldBlock,
                Err(e) => return ReadOutcome::Dead(DeathCause::Io(e.kind())),
            }
        }
    }

    /// Write from the front of the output buffer until it is drained or the
    /// socket stops accepting bytes.
    pub fn flush(&mut self) -> FlushOutcome {
        if self.output.is_empty() {
            return FlushOutcome::Idle;
        }

        let mut written = 0;
        while !self.output.is_empty() {
            match self.socket.write(&self.output) {
                Ok(0) => return FlushOutcome::Dead(DeathCause::WriteZero),
                Ok(n) => {
                    self.output.advance(n);
                    written += n;
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return FlushOutcome::Dead(DeathCause::Io(e.kind())),
            }
        }

        if self.output.is_empty() {
            self.output.clear();
            FlushOutcome::Drained { written }
        } else if written == 0 {
            FlushOutcome::WouldBlock
        } else {
            FlushOutcome::Partial { written, remaining: self.output.len() }
        }
    }

    /// Close the socket and enter `Closed`.
    ///
    /// Idempotent: a connection that is already `Closed` does not touch its
    /// socket again.
    pub fn close(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        self.read_interest = false;
        self.write_interest = false;
        self.output.clear();
        self.socket.close()
    }

    /// Error describing this connection's death.
    pub fn dead(&self, cause: DeathCause) -> ConnectionError {
        ConnectionError::SocketDead { id: self.id, cause }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io::{Read, Write},
    };

    use super::*;

    /// Scripted socket: each read/write call pops the next scripted result.
    #[derive(Default)]
    struct ScriptedSocket {
        reads: VecDeque<io::Result<Vec<u8>>>,
        writes: VecDeque<io::Result<usize>>,
        written: Vec<u8>,
        closes: usize,
    }

    impl Read for ScriptedSocket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                },
                Some(Err(e)) => Err(e),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for ScriptedSocket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.writes.pop_front() {
                Some(Ok(limit)) => {
                    let n = limit.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                },
                Some(Err(e)) => Err(e),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Socket for ScriptedSocket {
        fn close(&mut self) -> io::Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    fn connection(socket: ScriptedSocket) -> Connection<ScriptedSocket> {
        Connection::new(ConnectionId::new(1), socket, None)
    }

    #[test]
    fn token_round_trip_skips_listener() {
        let id = ConnectionId::new(5);
        assert_eq!(ConnectionId::from_token(id.token()), Some(id));
        assert_eq!(ConnectionId::from_token(Token::LISTENER), None);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut conn = connection(ScriptedSocket::default());
        assert_eq!(conn.state(), ConnectionState::Accepted);

        conn.activate().unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(conn.activate().is_err());

        conn.begin_closing().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.begin_closing().is_err());

        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn queue_reports_empty_to_non_empty_transition() {
        let mut conn = connection(ScriptedSocket::default());

        assert!(!conn.queue(b""));
        assert!(conn.queue(b"hello "));
        assert!(!conn.queue(b"world"));
        assert_eq!(conn.pending_output(), b"hello world");
    }

    #[test]
    fn read_classifies_outcomes() {
        let mut socket = ScriptedSocket::default();
        socket.reads.push_back(Ok(b"abc".to_vec()));
        socket.reads.push_back(Err(ErrorKind::Interrupted.into()));
        socket.reads.push_back(Ok(b"d".to_vec()));
        socket.reads.push_back(Err(ErrorKind::WouldBlock.into()));
        socket.reads.push_back(Err(ErrorKind::ConnectionReset.into()));
        socket.reads.push_back(Ok(Vec::new()));
        let mut conn = connection(socket);
        let mut buf = [0u8; 16];

        assert_eq!(conn.read_chunk(&mut buf), ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(conn.read_chunk(&mut buf), ReadOutcome::Data(1));
        assert_eq!(conn.read_chunk(&mut buf), ReadOutcome::WouldBlock);
        assert_eq!(
            conn.read_chunk(&mut buf),
            ReadOutcome::Dead(DeathCause::Io(ErrorKind::ConnectionReset))
        );
        assert_eq!(conn.read_chunk(&mut buf), ReadOutcome::Dead(DeathCause::EndOfStream));
    }

    #[test]
    fn flush_empty_buffer_is_idle() {
        let mut conn = connection(ScriptedSocket::default());
        assert_eq!(conn.flush(), FlushOutcome::Idle);
        assert_eq!(conn.flush(), FlushOutcome::Idle);
    }

    #[test]
    fn flush_full_drain() {
        let mut socket = ScriptedSocket::default();
        socket.writes.push_back(Ok(usize::MAX));
        let mut conn = connection(socket);
        conn.queue(b"payload");

        assert_eq!(conn.flush(), FlushOutcome::Drained { written: 7 });
        assert!(conn.pending_output().is_empty());
        assert_eq!(conn.socket().written, b"payload");
    }

    #[test]
    fn flush_partial_keeps_suffix() {
        let mut socket = ScriptedSocket::default();
        socket.writes.push_back(Ok(3));
        let mut conn = connection(socket);
        conn.queue(b"abcdefgh");

        assert_eq!(conn.flush(), FlushOutcome::Partial { written: 3, remaining: 5 });
        assert_eq!(conn.pending_output(), b"defgh");
    }

    #[test]
    fn flush_spurious_wake_changes_nothing() {
        let mut conn = connection(ScriptedSocket::default());
        conn.queue(b"abc");

        assert_eq!(conn.flush(), FlushOutcome::WouldBlock);
        assert_eq!(conn.pending_output(), b"abc");
    }

    #[test]
    fn flush_detects_dead_socket() {
        let mut socket = ScriptedSocket::default();
        socket.writes.push_back(Ok(0));
        let mut conn = connection(socket);
        conn.queue(b"abc");
        assert_eq!(conn.flush(), FlushOutcome::Dead(DeathCause::WriteZero));

        let mut socket = ScriptedSocket::default();
        socket.writes.push_back(Err(ErrorKind::BrokenPipe.into()));
        let mut conn = connection(socket);
        conn.queue(b"abc");
        assert_eq!(conn.flush(), FlushOutcome::Dead(DeathCause::Io(ErrorKind::BrokenPipe)));
    }

    #[test]
    fn close_is_idempotent() {
        let mut conn = connection(ScriptedSocket::default());
        conn.activate().unwrap();
        conn.queue(b"unsent");

        conn.close().unwrap();
        conn.close().unwrap();

        assert_eq!(conn.socket().closes, 1);
        assert!(conn.pending_output().is_empty());
        assert!(!conn.write_interest());
    }
}
