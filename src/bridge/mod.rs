//! Bridge entry points.
//!
//! A bridge session pairs one accepted connection with one dialed
//! connection and relays between them until either side stops:
//!
//! ```text
//! dialing -> connected -> relaying -> closing -> closed
//!    \________________________________________/
//!                 (dial failure)
//! ```

pub mod relay;

pub use relay::{BUFFER_LEN, Direction, RelayTerminated, Termination, relay, relay_and_close};

use crate::dialer::{DEFAULT_CONNECT_TIMEOUT, Dialer, DialerRegistry, DirectDialer, TunnelEndpoint};
use crate::error::BridgeError;
use crate::stream::{RawConnection, StreamConnection};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of one bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Connected,
    Relaying,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Dialing => "dialing",
            SessionState::Connected => "connected",
            SessionState::Relaying => "relaying",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

fn enter(state: SessionState) {
    debug!(state = %state, "session state");
}

/// Dials tunnels and TCP targets and relays between connection pairs.
#[derive(Clone)]
pub struct Bridge {
    registry: Arc<DialerRegistry>,
    direct: Arc<dyn Dialer>,
}

impl Bridge {
    pub fn new(registry: DialerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            direct: Arc::new(DirectDialer::new(DEFAULT_CONNECT_TIMEOUT)),
        }
    }

    /// Replace the dialer used for plain TCP connections.
    pub fn with_direct_dialer(mut self, direct: Arc<dyn Dialer>) -> Self {
        self.direct = direct;
        self
    }

    pub fn registry(&self) -> &DialerRegistry {
        &self.registry
    }

    /// Build the dialer chain for `tunnel`, optionally through `proxy`.
    ///
    /// Both schemes are checked before anything is dialed.
    pub fn dialer_for(
        &self,
        tunnel: &TunnelEndpoint,
        proxy: Option<&TunnelEndpoint>,
    ) -> Result<Arc<dyn Dialer>, BridgeError> {
        let forward = match proxy {
            Some(proxy) => self.registry.dialer_for(proxy, Arc::clone(&self.direct))?,
            None => Arc::clone(&self.direct),
        };
        Ok(self.registry.dialer_for(tunnel, forward)?)
    }

    /// Relay an accepted TCP connection over a tunnel.
    #[instrument(skip_all, fields(tunnel = %tunnel, proxy = ?proxy.map(|p| p.to_string())))]
    pub async fn tcp_to_tunnel(
        &self,
        local: TcpStream,
        tunnel: &TunnelEndpoint,
        proxy: Option<&TunnelEndpoint>,
    ) -> Result<RelayTerminated, BridgeError> {
        let dialer = match self.dialer_for(tunnel, proxy) {
            Ok(dialer) => dialer,
            Err(e) => {
                close_after_failed_dial(&RawConnection::from_tcp(local)).await;
                enter(SessionState::Closed);
                return Err(e);
            }
        };
        self.tcp_over(local, dialer.as_ref(), &tunnel.relay_target())
            .await
    }

    /// Relay an accepted TCP connection through an already built dialer chain.
    ///
    /// Listeners build the chain once at bind and call this per connection.
    pub async fn tcp_over(
        &self,
        local: TcpStream,
        dialer: &dyn Dialer,
        target: &str,
    ) -> Result<RelayTerminated, BridgeError> {
        let local: Arc<dyn StreamConnection> = Arc::new(RawConnection::from_tcp(local));

        enter(SessionState::Dialing);
        let remote = match dialer.dial(target).await {
            Ok(remote) => remote,
            Err(e) => {
                close_after_failed_dial(local.as_ref()).await;
                enter(SessionState::Closed);
                return Err(e.into());
            }
        };
        enter(SessionState::Connected);
        info!(
            local = ?local.peer_addr(),
            remote = ?remote.peer_addr(),
            "tunnel connected"
        );

        Ok(run_relay(local, Arc::from(remote)).await)
    }

    /// Relay an accepted tunnel connection to a TCP target.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn tunnel_to_tcp(
        &self,
        tunnel: Box<dyn StreamConnection>,
        target: &str,
    ) -> Result<RelayTerminated, BridgeError> {
        let tunnel: Arc<dyn StreamConnection> = Arc::from(tunnel);

        enter(SessionState::Dialing);
        let remote = match self.direct.dial(target).await {
            Ok(remote) => remote,
            Err(source) => {
                close_after_failed_dial(tunnel.as_ref()).await;
                enter(SessionState::Closed);
                return Err(BridgeError::Target {
                    addr: target.to_string(),
                    source,
                });
            }
        };
        enter(SessionState::Connected);
        debug!(remote = ?remote.peer_addr(), "target connected");

        Ok(run_relay(tunnel, Arc::from(remote)).await)
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

async fn run_relay(
    local: Arc<dyn StreamConnection>,
    remote: Arc<dyn StreamConnection>,
) -> RelayTerminated {
    enter(SessionState::Relaying);
    let outcome = relay(Arc::clone(&local), Arc::clone(&remote)).await;

    enter(SessionState::Closing);
    relay::close_pair(local.as_ref(), remote.as_ref()).await;
    enter(SessionState::Closed);

    if outcome.is_clean() {
        info!(
            direction = %outcome.direction,
            bytes_local_to_remote = outcome.bytes_local_to_remote,
            bytes_remote_to_local = outcome.bytes_remote_to_local,
            "relay finished"
        );
    } else {
        warn!(
            direction = %outcome.direction,
            cause = %outcome.cause,
            bytes_local_to_remote = outcome.bytes_local_to_remote,
            bytes_remote_to_local = outcome.bytes_remote_to_local,
            "relay terminated"
        );
    }
    outcome
}

async fn close_after_failed_dial(accepted: &dyn StreamConnection) {
    if let Err(e) = accepted.close().await {
        warn!(error = %e, "failed to close accepted connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::ProxyChainConfig;
    use crate::dialer::testing::CountingDialer;
    use crate::error::DialError;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn bridge_with(direct: Arc<CountingDialer>) -> Bridge {
        Bridge::new(DialerRegistry::with_config(ProxyChainConfig::default()))
            .with_direct_dialer(direct)
    }

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    #[tokio::test]
    async fn test_unsupported_tunnel_scheme_closes_accepted_socket() {
        let direct = Arc::new(CountingDialer::default());
        let bridge = bridge_with(direct.clone());
        let (mut client, accepted) = tcp_pair().await;

        let tunnel = TunnelEndpoint::parse("ftp://files.example.com/db:5432").unwrap();
        let err = bridge.tcp_to_tunnel(accepted, &tunnel, None).await.unwrap_err();
        assert!(matches!(err, BridgeError::Dial(DialError::UnsupportedScheme(_))));
        assert_eq!(direct.dials.load(Ordering::SeqCst), 0);

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_tcp_over_reuses_prebuilt_dialer() {
        let bridge = Bridge::new(DialerRegistry::new());
        let dialer = Arc::new(CountingDialer::default());

        for _ in 0..3 {
            let (mut client, accepted) = tcp_pair().await;
            let err = bridge
                .tcp_over(accepted, dialer.as_ref(), "db:5432")
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeError::Dial(DialError::Connect { .. })));

            let mut rest = Vec::new();
            tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut rest))
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsupported_proxy_scheme_rejected() {
        let direct = Arc::new(CountingDialer::default());
        let bridge = bridge_with(direct.clone());
        let tunnel = TunnelEndpoint::parse("ws://bridge.local/db:5432").unwrap();
        let proxy = TunnelEndpoint::parse("socks5://proxy.local:1080").unwrap();

        let result = bridge.dialer_for(&tunnel, Some(&proxy));
        assert!(matches!(
            result,
            Err(BridgeError::Dial(DialError::UnsupportedScheme(s))) if s == "socks5"
        ));
        assert_eq!(direct.dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tunnel_to_tcp_target_failure() {
        let bridge = bridge_with(Arc::new(CountingDialer::default()));
        let (near, mut far) = tokio::io::duplex(64);
        let tunnel = Box::new(RawConnection::new(near, Default::default()));

        let err = bridge.tunnel_to_tcp(tunnel, "db:5432").await.unwrap_err();
        assert!(matches!(err, BridgeError::Target { ref addr, .. } if addr == "db:5432"));

        // The tunnel side was shut down.
        let mut rest = Vec::new();
        far.read_to_end(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_to_tcp_relays() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = echo.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = echo.accept().await.unwrap();
            let (mut r, mut w) = socket.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let bridge = Bridge::new(DialerRegistry::new());
        let (near, mut far) = tokio::io::duplex(1024);
        let tunnel = Box::new(RawConnection::new(near, Default::default()));
        let session = tokio::spawn(async move { bridge.tunnel_to_tcp(tunnel, &target).await });

        far.write_all(b"PING\n").await.unwrap();
        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PING\n");

        drop(far);
        let outcome = tokio::time::timeout(Duration::from_secs(1), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.bytes_local_to_remote, 5);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Dialing.to_string(), "dialing");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
