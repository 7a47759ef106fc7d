//! WebSocket tunnel legs.

use super::base::BaseDialer;
use super::Dialer;
use crate::error::DialError;
use crate::stream::{StreamConnection, WebSocketStreamAdapter};
use async_trait::async_trait;
use http::header::AUTHORIZATION;
use std::time::Duration;
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, instrument};

/// Opens a WebSocket to the hop's URL and exposes it as a byte stream.
///
/// The raw socket comes from the forward dialer, so the handshake may itself
/// run through a CONNECT or POST proxy leg.
pub struct WebSocketDialer {
    base: BaseDialer,
    heartbeat_interval: Duration,
}

impl WebSocketDialer {
    pub fn new(base: BaseDialer) -> Self {
        let heartbeat_interval = base.config().heartbeat_interval;
        Self {
            base,
            heartbeat_interval,
        }
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    /// The URL path selects what the tunnel server relays to; `addr` is not
    /// used.
    #[instrument(skip(self), fields(tunnel = %self.base.endpoint()))]
    async fn dial(&self, _addr: &str) -> Result<Box<dyn StreamConnection>, DialError> {
        let endpoint = self.base.endpoint();
        let target = endpoint.to_string();

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|source| DialError::Handshake {
                target: target.clone(),
                source,
            })?;
        let headers = request.headers_mut();
        for (name, value) in &self.base.config().headers {
            headers.append(name.clone(), value.clone());
        }
        if let Some((name, value)) = self.base.auth(AUTHORIZATION)? {
            headers.insert(name, value);
        }

        let (io, addrs) = self.base.connect_raw().await?;
        let handshake = async {
            client_async(request, io)
                .await
                .map_err(|source| handshake_error(&target, source))
        };
        let (ws, response) = self.base.within_dial_timeout(handshake).await?;
        debug!(status = %response.status(), "websocket tunnel established");

        Ok(Box::new(WebSocketStreamAdapter::new(
            ws,
            self.heartbeat_interval,
            addrs,
        )))
    }
}

fn handshake_error(target: &str, source: WsError) -> DialError {
    match source {
        WsError::Http(response) => DialError::Protocol {
            target: target.to_string(),
            status: response.status().as_u16(),
            status_line: format!("{:?} {}", response.version(), response.status()),
        },
        source => DialError::Handshake {
            target: target.to_string(),
            source,
        },
    }
}
