//! Settings shared by every hop of a proxy chain.

use crate::error::DialError;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default timeout for handshakes and proxy responses.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for opening a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default WebSocket keepalive interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP method used for `http`/`https` hops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ProxyMethod {
    #[default]
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "POST")]
    Post,
}

impl ProxyMethod {
    pub fn as_method(&self) -> Method {
        match self {
            ProxyMethod::Connect => Method::CONNECT,
            ProxyMethod::Post => Method::POST,
        }
    }
}

impl FromStr for ProxyMethod {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONNECT" => Ok(ProxyMethod::Connect),
            "POST" => Ok(ProxyMethod::Post),
            _ => Err(DialError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for ProxyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

/// Certificate checking for `https`/`wss` hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    /// SNI and verification name; the hop's host when unset.
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            server_name: None,
            insecure_skip_verify: true,
        }
    }
}

/// Caller-owned configuration read by every dialer in a chain.
#[derive(Debug, Clone)]
pub struct ProxyChainConfig {
    pub tls: TlsPolicy,
    /// Limit for TLS, HTTP and WebSocket handshakes. Zero disables it.
    pub dial_timeout: Duration,
    /// Limit for opening TCP connections. Zero disables it.
    pub connect_timeout: Duration,
    /// Extra headers sent on every handshake request.
    pub headers: HeaderMap,
    pub method: ProxyMethod,
    /// WebSocket keepalive interval. Zero disables it.
    pub heartbeat_interval: Duration,
}

impl Default for ProxyChainConfig {
    fn default() -> Self {
        Self {
            tls: TlsPolicy::default(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            headers: HeaderMap::new(),
            method: ProxyMethod::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}
