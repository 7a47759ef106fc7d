//! Configuration data types.

use crate::config::proxy::ProxySetting;
use crate::dialer::{ProxyChainConfig, ProxyMethod, TlsPolicy, TunnelEndpoint};
use crate::error::DialError;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// TCP listeners that relay over a tunnel
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Tunnel endpoints that relay to TCP targets
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// A TCP listener whose connections are relayed over a tunnel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Unique name, used in logs and metric labels
    pub name: String,

    /// Address and port to accept TCP connections on
    pub listen: SocketAddr,

    /// Tunnel URL: (ws|wss|http|https)://[user:pass@]host[:port][/path]
    pub tunnel: String,

    /// Upstream proxy: `env` or empty for the environment, `noProxy`, or a URL
    #[serde(default)]
    pub proxy: String,

    /// Method for http/https hops
    #[serde(default)]
    pub method: ProxyMethod,

    /// WebSocket keepalive interval; 0s disables it
    #[serde(default = "default_client_heartbeat", with = "humantime_serde")]
    pub heartbeat: Duration,

    /// Limit for handshakes and proxy responses
    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,

    /// Limit for opening TCP connections
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Extra headers sent on every handshake
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub tls: ClientTlsConfig,
}

impl ClientConfig {
    pub fn tunnel_endpoint(&self) -> Result<TunnelEndpoint, DialError> {
        TunnelEndpoint::parse(&self.tunnel)
    }

    pub fn proxy_setting(&self) -> ProxySetting {
        ProxySetting::parse(&self.proxy)
    }

    /// Dialer settings for this client's chain.
    pub fn chain_config(&self) -> Result<ProxyChainConfig, DialError> {
        Ok(ProxyChainConfig {
            tls: TlsPolicy {
                server_name: self.tls.server_name.clone(),
                insecure_skip_verify: self.tls.insecure_skip_verify,
            },
            dial_timeout: self.dial_timeout,
            connect_timeout: self.connect_timeout,
            headers: header_map(&self.headers)?,
            method: self.method,
            heartbeat_interval: self.heartbeat,
        })
    }
}

/// Outbound TLS settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientTlsConfig {
    /// Server name to verify and send as SNI; the hop's host when unset
    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default = "default_true")]
    pub insecure_skip_verify: bool,
}

impl Default for ClientTlsConfig {
    fn default() -> Self {
        Self {
            server_name: None,
            insecure_skip_verify: true,
        }
    }
}

/// A WebSocket endpoint that relays each tunnel to the TCP address in its path.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub name: String,

    pub listen: SocketAddr,

    /// Serve wss:// with this certificate when set
    #[serde(default)]
    pub tls: Option<ServerTlsConfig>,

    /// WebSocket keepalive interval; 0s disables it
    #[serde(default = "default_server_heartbeat", with = "humantime_serde")]
    pub heartbeat: Duration,

    /// Limit for connecting to relay targets
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

/// PEM certificate chain and private key for a server listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerTlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Build a header map, rejecting invalid names or values.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, DialError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DialError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DialError::InvalidHeader(format!("{name}: {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_client_heartbeat() -> Duration {
    crate::dialer::DEFAULT_HEARTBEAT_INTERVAL
}

fn default_server_heartbeat() -> Duration {
    Duration::ZERO
}

fn default_dial_timeout() -> Duration {
    crate::dialer::DEFAULT_DIAL_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    crate::dialer::DEFAULT_CONNECT_TIMEOUT
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
