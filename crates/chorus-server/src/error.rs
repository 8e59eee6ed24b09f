//! Runtime error types.

use std::{
    io,
    net::{AddrParseError, SocketAddr},
};

use chorus_core::ServerError;
use thiserror::Error;

/// Errors that stop the production runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Listening socket could not be bound.
    ///
    /// Fatal at startup: address in use, permission denied, and so on.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address we tried to bind
        address: SocketAddr,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Bind address did not parse as `host:port`.
    #[error("invalid bind address '{address}': {source}")]
    InvalidAddress {
        /// Address as given
        address: String,
        /// Parse failure
        #[source]
        source: AddrParseError,
    },

    /// Reactor setup or socket query failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The event loop stopped with an error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),
}
