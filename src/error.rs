use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors surfaced synchronously by the reactor.
///
/// Failures that happen on a live socket never show up here; they end the
/// connection and reach the application as a single `on_disconnect`.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Bind Error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Connect Error to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Resolver workers are gone")]
    ResolverGone,

    #[error("EventLoop is gone")]
    EventLoopGone,
}

pub type Result<T> = std::result::Result<T, NetworkError>;
