//! Chorus production server.
//!
//! Runs the [`chorus_core::Server`] over real TCP sockets with a mio reactor.
//!
//! # Architecture
//!
//! All broadcast logic lives in [`chorus_core`]. This crate provides the
//! production "glue": a [`MioReactor`] implementing the core reactor
//! contract, [`MioListener`]/[`MioStream`] wrapping mio's TCP types, and
//! [`ChorusServer`], which binds and drives the loop on the calling thread.
//!
//! # Components
//!
//! - [`ChorusServer`]: bind, run, stop
//! - [`MioReactor`]: readiness notification via mio
//! - [`RuntimeConfig`]: bind address, event capacity, server limits

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reactor;
mod transport;

use std::net::SocketAddr;

use chorus_core::{Server, ServerConfig, ShutdownHandle};
pub use error::RuntimeError;
pub use reactor::{MioReactor, WAKE_TOKEN};
pub use transport::{MioListener, MioStream};

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:1337";

/// Default number of events fetched per poll.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for the production runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:1337")
    pub bind_address: String,
    /// Events fetched per poll
    pub event_capacity: usize,
    /// Core server configuration (limits, read size)
    pub server: ServerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            server: ServerConfig::default(),
        }
    }
}

/// Production Chorus server.
///
/// Wraps the core [`Server`] with a mio reactor and a bound TCP listener.
#[derive(Debug)]
pub struct ChorusServer {
    server: Server<MioReactor>,
}

impl ChorusServer {
    /// Bind the listener and register it for readiness.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::InvalidAddress` if `bind_address` does not parse
    /// - `RuntimeError::Bind` if the address cannot be bound
    /// - `RuntimeError::Io` if the reactor cannot be created
    pub fn bind(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let address: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|source| RuntimeError::InvalidAddress {
                address: config.bind_address.clone(),
                source,
            })?;

        let listener = MioListener::bind(address)
            .map_err(|source| RuntimeError::Bind { address, source })?;
        let reactor = MioReactor::new(config.event_capacity)?;

        let mut server = Server::new(reactor, listener, config.server);
        server.start()?;

        Ok(Self { server })
    }

    /// Run the event loop on the calling thread until a stop is requested
    /// through [`ChorusServer::shutdown_handle`].
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.server.run()?;
        Ok(())
    }

    /// Handle that stops [`ChorusServer::run`] from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown_handle()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RuntimeError> {
        Ok(self.server.local_addr()?)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.server.connection_count()
    }
}

/// Bind to the configured address and serve until stopped.
///
/// Convenience for binaries that never need the handle or the bound
/// address.
pub fn listen(config: RuntimeConfig) -> Result<(), RuntimeError> {
    ChorusServer::bind(config)?.run()
}
