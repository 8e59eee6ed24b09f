//! Server-side sockets over the simulated network.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::SocketAddr,
};

use chorus_core::{Listener, Socket};

use crate::sim_network::{PipeId, SIM_LISTEN_ADDR, SimNetwork, WriteFault};

/// Server end of a simulated pipe.
#[derive(Debug)]
pub struct SimStream {
    net: SimNetwork,
    pipe: PipeId,
}

impl SimStream {
    /// Pipe this stream reads from and writes to.
    pub fn pipe_id(&self) -> PipeId {
        self.pipe
    }
}

impl Read for SimStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.net.state.borrow_mut();
        let pipe = state.pipe_mut(self.pipe)?;

        if let Some(kind) = pipe.read_fault.take() {
            return Err(kind.into());
        }
        if pipe.inbound.is_empty() {
            return if pipe.client_closed { Ok(0) } else { Err(ErrorKind::WouldBlock.into()) };
        }

        let n = buf.len().min(pipe.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.net.state.borrow_mut();

        match state.pipe(self.pipe)?.write_fault {
            Some(WriteFault::Error(kind)) => return Err(kind.into()),
            Some(WriteFault::Zero) => return Ok(0),
            None => {},
        }

        let Some(chaos_limit) = state.chaos_limit(buf.len()) else {
            return Err(ErrorKind::WouldBlock.into());
        };

        let pipe = state.pipe_mut(self.pipe)?;
        let mut n = chaos_limit;
        if let Some(budget) = pipe.write_budget {
            if budget == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            n = n.min(budget);
            pipe.write_budget = Some(budget - n);
        }

        pipe.delivered.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for SimStream {
    fn close(&mut self) -> io::Result<()> {
        let mut state = self.net.state.borrow_mut();
        let pipe = state.pipe_mut(self.pipe)?;
        pipe.server_closes += 1;
        tracing::trace!(pipe = self.pipe.0, closes = pipe.server_closes, "sim close");
        Ok(())
    }
}

/// Simulated listening socket.
#[derive(Debug, Clone)]
pub struct SimListener {
    net: SimNetwork,
}

impl SimListener {
    /// Listener over `net`'s accept backlog.
    pub fn new(net: &SimNetwork) -> Self {
        Self { net: net.clone() }
    }
}

impl Listener for SimListener {
    type Socket = SimStream;

    fn accept(&mut self) -> io::Result<(SimStream, SocketAddr)> {
        let mut state = self.net.state.borrow_mut();

        if let Some(kind) = state.accept_faults.pop_front() {
            return Err(kind.into());
        }
        let Some(pipe) = state.backlog.pop_front() else {
            return Err(ErrorKind::WouldBlock.into());
        };
        let peer = state.pipe(pipe)?.peer;

        Ok((SimStream { net: self.net.clone(), pipe }, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SIM_LISTEN_ADDR)
    }
}
