//! Dialers for tunnel and proxy hops.
//!
//! A [`DialerRegistry`] maps URL schemes to dialer constructors. Each
//! constructor receives the hop's endpoint and a *forward* dialer used to
//! reach that hop, so chains nest: a WebSocket tunnel dialer may reach its
//! server through a CONNECT dialer, which in turn reaches the proxy through
//! a [`DirectDialer`].

mod base;
mod config;
mod connect;
mod direct;
mod endpoint;
mod post;
mod response;
mod tls;
mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use base::{BaseDialer, encode_request_head};
pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_DIAL_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, ProxyChainConfig,
    ProxyMethod, TlsPolicy,
};
pub use connect::ConnectDialer;
pub use direct::DirectDialer;
pub use endpoint::{Scheme, TunnelEndpoint};
pub use post::PostDialer;
pub use response::{ResponseHead, expect_success, read_response_head};
pub use websocket::WebSocketDialer;

use crate::error::DialError;
use crate::stream::StreamConnection;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Something that can open a stream to an address.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a stream to `addr` (`host:port`).
    ///
    /// Dialers for hops with a fixed destination (WebSocket tunnels, POST
    /// channels) ignore `addr`.
    async fn dial(&self, addr: &str) -> Result<Box<dyn StreamConnection>, DialError>;
}

/// Builds the dialer for one hop from its endpoint and forward dialer.
pub type DialerConstructor = Arc<
    dyn Fn(&TunnelEndpoint, Arc<dyn Dialer>) -> Result<Arc<dyn Dialer>, DialError> + Send + Sync,
>;

/// Scheme-keyed dialer constructors, owned by the caller.
#[derive(Clone, Default)]
pub struct DialerRegistry {
    constructors: HashMap<String, DialerConstructor>,
}

impl DialerRegistry {
    /// An empty registry; every scheme is unsupported until registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `http`, `https`, `ws` and `wss` bound to the built-in
    /// dialers, all sharing `config`.
    pub fn with_config(config: ProxyChainConfig) -> Self {
        let config = Arc::new(config);
        let mut registry = Self::new();
        for scheme in Scheme::ALL {
            let config = Arc::clone(&config);
            registry.register(scheme.as_str(), move |endpoint, forward| {
                standard_dialer(endpoint, forward, &config)
            });
        }
        registry
    }

    /// Bind `scheme` to `constructor`, replacing any previous binding.
    pub fn register<F>(&mut self, scheme: &str, constructor: F)
    where
        F: Fn(&TunnelEndpoint, Arc<dyn Dialer>) -> Result<Arc<dyn Dialer>, DialError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(scheme.to_ascii_lowercase(), Arc::new(constructor));
    }

    /// Build the dialer for `endpoint`.
    ///
    /// An unregistered scheme fails here, before any connection is attempted.
    pub fn dialer_for(
        &self,
        endpoint: &TunnelEndpoint,
        forward: Arc<dyn Dialer>,
    ) -> Result<Arc<dyn Dialer>, DialError> {
        let scheme = endpoint.scheme().to_ascii_lowercase();
        let constructor = self
            .constructors
            .get(&scheme)
            .ok_or(DialError::UnsupportedScheme(scheme))?;
        constructor(endpoint, forward)
    }
}

impl fmt::Debug for DialerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.constructors.keys().collect();
        schemes.sort();
        f.debug_struct("DialerRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

/// The built-in strategy for `endpoint`'s scheme.
///
/// `ws`/`wss` hops use the WebSocket dialer; `http`/`https` hops use CONNECT
/// or chunked POST depending on `config.method`.
pub fn standard_dialer(
    endpoint: &TunnelEndpoint,
    forward: Arc<dyn Dialer>,
    config: &ProxyChainConfig,
) -> Result<Arc<dyn Dialer>, DialError> {
    let scheme = endpoint
        .known_scheme()
        .ok_or_else(|| DialError::UnsupportedScheme(endpoint.scheme().to_string()))?;
    let base = BaseDialer::new(endpoint.clone(), forward, config)?;

    let dialer: Arc<dyn Dialer> = match (scheme, config.method) {
        (Scheme::Ws | Scheme::Wss, _) => Arc::new(WebSocketDialer::new(base)),
        (Scheme::Http | Scheme::Https, ProxyMethod::Connect) => Arc::new(ConnectDialer::new(base)),
        (Scheme::Http | Scheme::Https, ProxyMethod::Post) => Arc::new(PostDialer::new(base)),
    };
    Ok(dialer)
}
