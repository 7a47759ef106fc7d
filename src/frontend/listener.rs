//! Client-side listener: accepted TCP connections are relayed over a tunnel.

use super::ListenerError;
use crate::bridge::Bridge;
use crate::config::ClientConfig;
use crate::dialer::{Dialer, DialerRegistry, DirectDialer, TunnelEndpoint};
use crate::metrics::{MetricsCollector, Role};
use crate::util::SessionId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Accepts TCP connections and bridges each one to the configured tunnel.
pub struct TunnelListener {
    name: Arc<str>,
    listener: TcpListener,
    bridge: Bridge,
    tunnel: TunnelEndpoint,
    proxy: Option<TunnelEndpoint>,
    dialer: Arc<dyn Dialer>,
    target: Arc<str>,
    metrics: MetricsCollector,
}

impl TunnelListener {
    /// Bind the listen address and prepare the dialer chain.
    ///
    /// The proxy setting is resolved once, here; environment changes after
    /// startup are not picked up.
    pub async fn bind(
        config: &ClientConfig,
        metrics: MetricsCollector,
    ) -> Result<Self, ListenerError> {
        let registry = DialerRegistry::with_config(config.chain_config()?);
        Self::bind_with(config, registry, metrics).await
    }

    async fn bind_with(
        config: &ClientConfig,
        registry: DialerRegistry,
        metrics: MetricsCollector,
    ) -> Result<Self, ListenerError> {
        let tunnel = config.tunnel_endpoint()?;
        let proxy = config.proxy_setting().resolve(&tunnel)?;

        let bridge = Bridge::new(registry)
            .with_direct_dialer(Arc::new(DirectDialer::new(config.connect_timeout)));
        // Built once: unknown schemes fail here and TLS roots load only once.
        let dialer = bridge.dialer_for(&tunnel, proxy.as_ref())?;

        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: config.listen,
                source,
            })?;

        info!(
            name = %config.name,
            listen = ?listener.local_addr().ok(),
            tunnel = %tunnel,
            proxy = ?proxy.as_ref().map(|p| p.to_string()),
            method = %config.method,
            "tunnel listener bound"
        );

        Ok(Self {
            name: Arc::from(config.name.as_str()),
            listener,
            bridge,
            target: Arc::from(tunnel.relay_target()),
            tunnel,
            proxy,
            dialer,
            metrics,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the listener, accepting connections until shutdown.
    ///
    /// Sessions already relaying are left to finish on their own.
    #[instrument(skip_all, fields(
        listener = %self.name,
        tunnel = %self.tunnel,
        proxy = ?self.proxy.as_ref().map(|p| p.to_string()),
    ))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("tunnel listener starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.handle_connection(stream, addr),
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }

                _ = shutdown.recv() => {
                    info!("tunnel listener shutting down");
                    break;
                }
            }
        }
    }

    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        let name = Arc::clone(&self.name);
        let bridge = self.bridge.clone();
        let dialer = Arc::clone(&self.dialer);
        let target = Arc::clone(&self.target);
        let metrics = self.metrics.clone();
        let session = SessionId::new();

        metrics.session_opened(&name, Role::Client);
        info!(session = %session, client = %client_addr, "accepted connection");

        tokio::spawn(async move {
            let start = Instant::now();
            let result = bridge.tcp_over(stream, dialer.as_ref(), &target).await;
            let duration = start.elapsed();
            metrics.session_closed(&name, Role::Client, &result, duration);

            match result {
                Ok(outcome) => debug!(
                    session = %session,
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    clean = outcome.is_clean(),
                    "session completed"
                ),
                Err(e) => warn!(
                    session = %session,
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    error = %e,
                    "session failed"
                ),
            }
        });
    }
}
