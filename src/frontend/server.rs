//! Tunnel server: accepts WebSocket upgrades and relays each one to the TCP
//! address named by the request path.

use super::{ListenerError, tls};
use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::dialer::{DialerRegistry, DirectDialer};
use crate::metrics::{MetricsCollector, Role};
use crate::stream::{Addrs, BoxedIo, StreamConnection, WebSocketStreamAdapter};
use crate::util::SessionId;
use bytes::Bytes;
use http::header::{
    CONNECTION, CONTENT_TYPE, HeaderValue, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role as WsRole;
use tracing::{debug, error, info, instrument, warn};

const WEBSOCKET_VERSION: &str = "13";

/// Accepts `ws://` (or `wss://` with a certificate) tunnels.
pub struct TunnelServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    context: Arc<ServerContext>,
}

struct ServerContext {
    name: String,
    bridge: Bridge,
    heartbeat: Duration,
    metrics: MetricsCollector,
}

impl TunnelServer {
    pub async fn bind(
        config: &ServerConfig,
        metrics: MetricsCollector,
    ) -> Result<Self, ListenerError> {
        let tls = config.tls.as_ref().map(tls::acceptor).transpose()?;
        let bridge = Bridge::new(DialerRegistry::new())
            .with_direct_dialer(Arc::new(DirectDialer::new(config.connect_timeout)));

        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: config.listen,
                source,
            })?;

        info!(
            name = %config.name,
            listen = ?listener.local_addr().ok(),
            scheme = if tls.is_some() { "wss" } else { "ws" },
            heartbeat = ?config.heartbeat,
            "tunnel server bound"
        );

        Ok(Self {
            listener,
            tls,
            context: Arc::new(ServerContext {
                name: config.name.clone(),
                bridge,
                heartbeat: config.heartbeat,
                metrics,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve tunnels until shutdown. Established tunnels keep relaying.
    #[instrument(skip_all, fields(server = %self.context.name))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("tunnel server starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.handle_connection(stream, addr),
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }

                _ = shutdown.recv() => {
                    info!("tunnel server shutting down");
                    break;
                }
            }
        }
    }

    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        let tls = self.tls.clone();
        let context = Arc::clone(&self.context);
        let addrs = Addrs {
            local: stream.local_addr().ok(),
            peer: Some(client_addr),
        };

        tokio::spawn(async move {
            if let Err(e) = stream.set_nodelay(true) {
                warn!(error = %e, "failed to set TCP_NODELAY");
            }

            let io: BoxedIo = match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => Box::new(stream),
                    Err(e) => {
                        debug!(client = %client_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => Box::new(stream),
            };

            let service = service_fn(move |mut req: Request<Incoming>| {
                let response = accept_tunnel(&mut req, &context, addrs);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(io), service)
                .with_upgrades()
                .await
            {
                debug!(client = %client_addr, error = %e, "connection error");
            }
        });
    }
}

/// Answer an upgrade request and, on success, start the relay once the
/// connection has switched protocols.
fn accept_tunnel<B>(
    req: &mut Request<B>,
    context: &Arc<ServerContext>,
    addrs: Addrs,
) -> Response<Full<Bytes>> {
    let target = req.uri().path().trim_start_matches('/').to_string();
    if target.is_empty() {
        let mut response = text(StatusCode::BAD_REQUEST, "empty remote address");
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        return response;
    }

    info!(target = %target, client = ?addrs.peer, "tunnel requested");

    let accept_key = match check_upgrade(req.method(), req.headers()) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
        return text(StatusCode::BAD_REQUEST, "connection cannot be upgraded");
    };

    let context = Arc::clone(context);
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(target = %target, error = %e, "upgrade failed");
                return;
            }
        };
        let ws =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), WsRole::Server, None).await;
        let tunnel = WebSocketStreamAdapter::new(ws, context.heartbeat, addrs);
        relay_session(&context, Box::new(tunnel), &target).await;
    });

    let mut response = text(StatusCode::SWITCHING_PROTOCOLS, Bytes::new());
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(value) = HeaderValue::from_str(&accept_key) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, value);
    }
    response
}

async fn relay_session(
    context: &ServerContext,
    tunnel: Box<dyn StreamConnection>,
    target: &str,
) {
    let session = SessionId::new();
    context.metrics.session_opened(&context.name, Role::Server);

    let start = Instant::now();
    let result = context.bridge.tunnel_to_tcp(tunnel, target).await;
    let duration = start.elapsed();
    context
        .metrics
        .session_closed(&context.name, Role::Server, &result, duration);

    match result {
        Ok(outcome) => debug!(
            session = %session,
            target = %target,
            duration_ms = duration.as_millis(),
            clean = outcome.is_clean(),
            "session completed"
        ),
        Err(e) => warn!(
            session = %session,
            target = %target,
            duration_ms = duration.as_millis(),
            error = %e,
            "session failed"
        ),
    }
}

/// Validate a WebSocket upgrade request, returning the `Sec-WebSocket-Accept`
/// value or the error response to send.
fn check_upgrade(method: &Method, headers: &HeaderMap) -> Result<String, Response<Full<Bytes>>> {
    if method != Method::GET {
        return Err(text(StatusCode::METHOD_NOT_ALLOWED, "request method is not GET"));
    }
    if !has_token(headers, &CONNECTION, "upgrade") {
        return Err(text(
            StatusCode::BAD_REQUEST,
            "'upgrade' token not found in 'Connection' header",
        ));
    }
    if !has_token(headers, &UPGRADE, "websocket") {
        return Err(text(
            StatusCode::BAD_REQUEST,
            "'websocket' token not found in 'Upgrade' header",
        ));
    }
    let version = headers.get(SEC_WEBSOCKET_VERSION).map(HeaderValue::as_bytes);
    if version != Some(WEBSOCKET_VERSION.as_bytes()) {
        let mut response = text(StatusCode::UPGRADE_REQUIRED, "unsupported version");
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WEBSOCKET_VERSION));
        return Err(response);
    }
    match headers.get(SEC_WEBSOCKET_KEY) {
        Some(key) if !key.is_empty() => Ok(derive_accept_key(key.as_bytes())),
        _ => Err(text(StatusCode::BAD_REQUEST, "missing 'Sec-WebSocket-Key' header")),
    }
}

fn has_token(headers: &HeaderMap, name: &http::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(path: &str) -> Request<()> {
        Request::builder()
            .uri(path)
            .header(CONNECTION, "keep-alive, Upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_VERSION, "13")
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap()
    }

    fn context() -> Arc<ServerContext> {
        Arc::new(ServerContext {
            name: "edge".to_string(),
            bridge: Bridge::new(DialerRegistry::new()),
            heartbeat: Duration::ZERO,
            metrics: MetricsCollector::new(),
        })
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        for path in ["/", "//"] {
            let mut req = upgrade_request(path);
            let response = accept_tunnel(&mut req, &context(), Addrs::default());
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
        }
    }

    #[test]
    fn test_check_upgrade_accept_key() {
        let req = upgrade_request("/db:5432");
        let key = check_upgrade(req.method(), req.headers()).unwrap();
        assert_eq!(key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_check_upgrade_rejections() {
        let req = Request::builder().uri("/db:5432").body(()).unwrap();
        let err = check_upgrade(req.method(), req.headers()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = check_upgrade(&Method::POST, upgrade_request("/x").headers()).unwrap_err();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);

        let mut req = upgrade_request("/db:5432");
        req.headers_mut()
            .insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        let err = check_upgrade(req.method(), req.headers()).unwrap_err();
        assert_eq!(err.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(err.headers()[SEC_WEBSOCKET_VERSION], "13");
    }

    #[tokio::test]
    async fn test_request_without_upgrade_extension() {
        let mut req = upgrade_request("/db:5432");
        let response = accept_tunnel(&mut req, &context(), Addrs::default());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config: ServerConfig =
            serde_yaml::from_str("name: edge\nlisten: \"127.0.0.1:0\"\n").unwrap();
        let server = TunnelServer::bind(&config, MetricsCollector::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(server.tls.is_none());
    }
}
