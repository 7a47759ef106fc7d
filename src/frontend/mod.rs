//! Frontend listeners.
//!
//! A [`TunnelListener`] accepts plain TCP and dials out over a tunnel; a
//! [`TunnelServer`] accepts WebSocket tunnels and dials out over TCP.

mod listener;
mod server;
pub mod tls;

pub use listener::TunnelListener;
pub use server::TunnelServer;
pub use tls::ServerTlsError;

use crate::error::{BridgeError, DialError};
use std::net::SocketAddr;
use thiserror::Error;

/// Failure to set up a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Tls(#[from] ServerTlsError),
}

impl From<BridgeError> for ListenerError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Dial(e) | BridgeError::Target { source: e, .. } => ListenerError::Dial(e),
        }
    }
}
