//! Error types for dialing and bridging.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure to establish a tunnel or proxy hop.
///
/// Every variant is terminal for the dial attempt that produced it. Nothing in
/// this crate retries a failed dial.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("TLS handshake with {server_name} failed: {source}")]
    Tls { server_name: String, source: io::Error },

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),

    #[error("no connection to {target} after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("non-OK status from {target}: {status_line}")]
    Protocol {
        target: String,
        status: u16,
        status_line: String,
    },

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("unsupported proxy method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("websocket handshake with {target} failed: {source}")]
    Handshake {
        target: String,
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("i/o error during handshake with {target}: {source}")]
    Io { target: String, source: io::Error },
}

impl DialError {
    /// Short label used for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            DialError::Connect { .. } => "connect",
            DialError::Tls { .. } | DialError::TlsConfig(_) => "tls",
            DialError::Timeout { .. } => "timeout",
            DialError::Protocol { .. } => "status",
            DialError::UnsupportedScheme(_) => "unsupported_scheme",
            DialError::UnsupportedMethod(_) => "unsupported_method",
            DialError::InvalidEndpoint { .. } => "invalid_endpoint",
            DialError::InvalidHeader(_) => "invalid_header",
            DialError::Handshake { .. } => "handshake",
            DialError::Io { .. } => "io",
        }
    }
}

/// Failure of a bridge entry point before the relay started.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("tunnel dial failed: {0}")]
    Dial(#[from] DialError),

    #[error("dial tcp {addr} failed: {source}")]
    Target { addr: String, source: DialError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_labels() {
        let err = DialError::UnsupportedScheme("ftp".to_string());
        assert_eq!(err.reason(), "unsupported_scheme");

        let err = DialError::Timeout {
            target: "http://proxy:3128".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.reason(), "timeout");
    }

    #[test]
    fn test_protocol_error_display_carries_status_line() {
        let err = DialError::Protocol {
            target: "proxy:3128".to_string(),
            status: 403,
            status_line: "HTTP/1.1 403 Forbidden".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "non-OK status from proxy:3128: HTTP/1.1 403 Forbidden"
        );
    }

    #[test]
    fn test_bridge_error_from_dial() {
        let err: BridgeError = DialError::UnsupportedScheme("gopher".to_string()).into();
        assert!(matches!(err, BridgeError::Dial(DialError::UnsupportedScheme(_))));
    }
}
