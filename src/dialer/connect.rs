//! HTTP CONNECT hops.

use super::base::BaseDialer;
use super::Dialer;
use crate::error::DialError;
use crate::stream::{RawConnection, StreamConnection};
use async_trait::async_trait;
use http::Method;
use http::header::PROXY_AUTHORIZATION;
use tokio::io::BufReader;
use tracing::{debug, instrument};

/// Tunnels through a proxy with `CONNECT host:port`.
///
/// After a 2xx response the socket carries bytes verbatim, so the returned
/// connection is the raw (possibly TLS) stream itself.
pub struct ConnectDialer {
    base: BaseDialer,
}

impl ConnectDialer {
    pub fn new(base: BaseDialer) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Dialer for ConnectDialer {
    #[instrument(skip(self), fields(proxy = %self.base.endpoint()))]
    async fn dial(&self, addr: &str) -> Result<Box<dyn StreamConnection>, DialError> {
        let target = if addr.is_empty() {
            self.base.endpoint().authority()
        } else {
            addr.to_string()
        };
        let request = self
            .base
            .build_request(Method::CONNECT, &target, &target, PROXY_AUTHORIZATION)?;

        let (io, addrs) = self.base.connect_raw().await?;
        let mut reader = BufReader::new(io);
        let head = self.base.handshake(&mut reader, &request).await?;
        debug!(status = head.status, target = %target, "CONNECT tunnel established");

        // Bytes the proxy sent after the response head stay in the reader.
        Ok(Box::new(RawConnection::new(reader, addrs)))
    }
}
