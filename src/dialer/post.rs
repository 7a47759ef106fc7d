//! Chunked HTTP POST hops.

use super::base::BaseDialer;
use super::Dialer;
use crate::error::DialError;
use crate::stream::{ChunkedStreamAdapter, StreamConnection};
use async_trait::async_trait;
use http::header::{AUTHORIZATION, HeaderValue, TRANSFER_ENCODING};
use http::Method;
use tokio::io::BufReader;
use tracing::{debug, instrument};

/// Carries the stream inside a `POST` body in both directions.
///
/// The request head is sent without a body; once the server answers 2xx,
/// request and response bodies become the live channel, framed with chunked
/// transfer coding.
pub struct PostDialer {
    base: BaseDialer,
}

impl PostDialer {
    pub fn new(base: BaseDialer) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Dialer for PostDialer {
    /// The hop's own URL path is the request target; `addr` is not used.
    #[instrument(skip(self), fields(endpoint = %self.base.endpoint()))]
    async fn dial(&self, _addr: &str) -> Result<Box<dyn StreamConnection>, DialError> {
        let endpoint = self.base.endpoint();
        let mut request = self.base.build_request(
            Method::POST,
            &endpoint.request_target(),
            &endpoint.host_header(),
            AUTHORIZATION,
        )?;
        request
            .headers_mut()
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let (io, addrs) = self.base.connect_raw().await?;
        let mut reader = BufReader::new(io);
        let head = self.base.handshake(&mut reader, &request).await?;
        debug!(status = head.status, "chunked POST channel established");

        Ok(Box::new(ChunkedStreamAdapter::new(reader, addrs)))
    }
}
