//! TCP sockets over mio.
//!
//! Thin wrappers that give mio's non-blocking TCP types the core
//! [`Socket`] and [`Listener`] contracts. The reactor registers the inner
//! mio handles; the server only ever reads, writes, accepts, and closes.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr},
};

use chorus_core::{Listener, Socket};
use mio::net::{TcpListener, TcpStream};

/// Non-blocking listening socket.
#[derive(Debug)]
pub struct MioListener {
    pub(crate) inner: TcpListener,
}

impl MioListener {
    /// Bind a non-blocking listener to `addr`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = TcpListener::bind(addr)?;
        tracing::debug!(%addr, "listener bound");
        Ok(Self { inner })
    }
}

impl Listener for MioListener {
    type Socket = MioStream;

    fn accept(&mut self) -> io::Result<(MioStream, SocketAddr)> {
        let (inner, peer) = self.inner.accept()?;
        if let Err(e) = inner.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        Ok((MioStream { inner }, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Accepted non-blocking TCP connection.
#[derive(Debug)]
pub struct MioStream {
    pub(crate) inner: TcpStream,
}

impl Read for MioStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for MioStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Socket for MioStream {
    fn close(&mut self) -> io::Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            // Peer already gone; the descriptor is released on drop either way.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
