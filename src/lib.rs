//! tcpbridge - relay raw TCP connections over WebSocket tunnels
//!
//! This crate provides:
//! - Uniform duplex streams over TCP, HTTP CONNECT, chunked POST and WebSocket
//! - Composable dialers that chain through HTTP(S) proxies
//! - A bidirectional relay with symmetric teardown
//! - Client listeners and a WebSocket tunnel server
//! - Prometheus metrics

pub mod auth;
pub mod bridge;
pub mod config;
pub mod dialer;
pub mod error;
pub mod frontend;
pub mod metrics;
pub mod stream;
pub mod util;

pub use bridge::{Bridge, RelayTerminated, Termination};
pub use config::Config;
pub use dialer::{Dialer, DialerRegistry, TunnelEndpoint};
pub use error::{BridgeError, DialError};
pub use stream::StreamConnection;
