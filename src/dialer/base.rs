//! Connection setup shared by the HTTP-based dialers.

use super::config::ProxyChainConfig;
use super::endpoint::TunnelEndpoint;
use super::response::{ResponseHead, expect_success};
use super::{Dialer, tls};
use crate::auth::AuthProvider;
use crate::error::DialError;
use crate::stream::{Addrs, BoxedIo, CLOSE_GRACE};
use http::header::{HOST, HeaderName, HeaderValue};
use http::{Method, Request, Version};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::debug;

/// Raw connection, TLS upgrade and request construction for one hop.
pub struct BaseDialer {
    endpoint: TunnelEndpoint,
    forward: Arc<dyn Dialer>,
    tls: Option<Arc<rustls::ClientConfig>>,
    server_name: String,
    config: ProxyChainConfig,
}

impl BaseDialer {
    pub fn new(
        endpoint: TunnelEndpoint,
        forward: Arc<dyn Dialer>,
        config: &ProxyChainConfig,
    ) -> Result<Self, DialError> {
        let scheme = endpoint
            .known_scheme()
            .ok_or_else(|| DialError::UnsupportedScheme(endpoint.scheme().to_string()))?;
        let tls = if scheme.is_secure() {
            Some(tls::client_config(&config.tls)?)
        } else {
            None
        };
        let server_name = config
            .tls
            .server_name
            .clone()
            .unwrap_or_else(|| endpoint.server_name());

        Ok(Self {
            endpoint,
            forward,
            tls,
            server_name,
            config: config.clone(),
        })
    }

    pub fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &ProxyChainConfig {
        &self.config
    }

    /// Open a connection to the hop, upgrading to TLS for secure schemes.
    pub async fn connect_raw(&self) -> Result<(BoxedIo, Addrs), DialError> {
        let conn = self.forward.dial(&self.endpoint.authority()).await?;
        let addrs = Addrs {
            local: conn.local_addr(),
            peer: conn.peer_addr(),
        };
        let io = conn.into_io();

        match &self.tls {
            Some(config) => {
                let handshake = tls::connect(io, &self.server_name, Arc::clone(config));
                let io = self.within_dial_timeout(handshake).await?;
                Ok((io, addrs))
            }
            None => Ok((io, addrs)),
        }
    }

    /// Build a handshake request for this hop.
    ///
    /// Caller headers are merged in; credentials from the endpoint URL are
    /// added under `auth_header`.
    pub fn build_request(
        &self,
        method: Method,
        target: &str,
        host: &str,
        auth_header: HeaderName,
    ) -> Result<Request<()>, DialError> {
        let mut request = Request::builder()
            .method(method)
            .uri(target)
            .version(Version::HTTP_11)
            .body(())
            .map_err(|e| DialError::InvalidHeader(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(HOST, header_value(host)?);
        for (name, value) in &self.config.headers {
            headers.append(name.clone(), value.clone());
        }
        if let Some((name, value)) = self.auth(auth_header)? {
            headers.insert(name, value);
        }
        Ok(request)
    }

    /// Basic auth for the endpoint's credentials, if it has any.
    pub fn auth(&self, header: HeaderName) -> Result<Option<(HeaderName, HeaderValue)>, DialError> {
        let Some(credentials) = self.endpoint.credentials() else {
            return Ok(None);
        };
        let auth = credentials.basic().with_header(header);
        Ok(Some((auth.header_name(), header_value(&auth.header_value())?)))
    }

    /// Send `request` and wait for a 2xx response.
    ///
    /// On any failure the connection is shut down before the error is
    /// returned, so no socket outlives a failed attempt.
    pub async fn handshake(
        &self,
        reader: &mut BufReader<BoxedIo>,
        request: &Request<()>,
    ) -> Result<ResponseHead, DialError> {
        let target = self.endpoint.to_string();
        let head = encode_request_head(request);

        let result = async {
            let io = reader.get_mut();
            io.write_all(&head).await?;
            io.flush().await
        }
        .await
        .map_err(|source| DialError::Io {
            target: target.clone(),
            source,
        });

        let result = match result {
            Ok(()) => expect_success(reader, &target, self.config.dial_timeout).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            debug!(target = %target, error = %e, "handshake failed, closing connection");
            let _ = tokio::time::timeout(CLOSE_GRACE, reader.get_mut().shutdown()).await;
        }
        result
    }

    /// Apply the dial timeout to a handshake step.
    pub async fn within_dial_timeout<F, T>(&self, step: F) -> Result<T, DialError>
    where
        F: Future<Output = Result<T, DialError>>,
    {
        within(self.config.dial_timeout, &self.endpoint.to_string(), step).await
    }
}

pub(crate) async fn within<F, T>(limit: Duration, target: &str, step: F) -> Result<T, DialError>
where
    F: Future<Output = Result<T, DialError>>,
{
    if limit.is_zero() {
        return step.await;
    }
    match tokio::time::timeout(limit, step).await {
        Ok(result) => result,
        Err(_) => Err(DialError::Timeout {
            target: target.to_string(),
            timeout: limit,
        }),
    }
}

fn header_value(value: &str) -> Result<HeaderValue, DialError> {
    HeaderValue::from_str(value).map_err(|e| DialError::InvalidHeader(e.to_string()))
}

/// Serialize the request line and headers.
pub fn encode_request_head(request: &Request<()>) -> Vec<u8> {
    let mut head = Vec::with_capacity(256);
    let request_line = format!("{} {} HTTP/1.1\r\n", request.method(), request.uri());
    head.extend_from_slice(request_line.as_bytes());
    for (name, value) in request.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::DirectDialer;
    use http::header::{AUTHORIZATION, PROXY_AUTHORIZATION};

    fn base(url: &str, config: &ProxyChainConfig) -> BaseDialer {
        let forward: Arc<dyn Dialer> = Arc::new(DirectDialer::new(Duration::from_secs(1)));
        BaseDialer::new(TunnelEndpoint::parse(url).unwrap(), forward, config).unwrap()
    }

    #[test]
    fn test_connect_request_head() {
        let dialer = base("http://bob:pw@proxy.local:3128", &ProxyChainConfig::default());
        let request = dialer
            .build_request(
                Method::CONNECT,
                "db.internal:5432",
                "db.internal:5432",
                PROXY_AUTHORIZATION,
            )
            .unwrap();

        let head = String::from_utf8(encode_request_head(&request)).unwrap();
        assert!(head.starts_with("CONNECT db.internal:5432 HTTP/1.1\r\n"));
        assert!(head.contains("host: db.internal:5432\r\n"));
        assert!(head.contains("proxy-authorization: Basic Ym9iOnB3\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_extra_headers_merged() {
        let mut config = ProxyChainConfig::default();
        config
            .headers
            .insert("x-team", HeaderValue::from_static("ops"));
        let dialer = base("https://tunnel.example.com/relay", &config);

        let request = dialer
            .build_request(Method::POST, "/relay", "tunnel.example.com", AUTHORIZATION)
            .unwrap();
        assert_eq!(request.headers()["x-team"], "ops");
        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert_eq!(request.uri(), "/relay");
    }

    #[test]
    fn test_server_name_defaults_to_host() {
        let dialer = base("wss://bridge.example.com", &ProxyChainConfig::default());
        assert_eq!(dialer.server_name, "bridge.example.com");
        assert!(dialer.tls.is_some());

        let mut config = ProxyChainConfig::default();
        config.tls.server_name = Some("front.example.net".to_string());
        let dialer = base("wss://10.1.2.3", &config);
        assert_eq!(dialer.server_name, "front.example.net");
    }

    #[test]
    fn test_plain_scheme_has_no_tls() {
        let dialer = base("ws://bridge.example.com", &ProxyChainConfig::default());
        assert!(dialer.tls.is_none());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let forward: Arc<dyn Dialer> = Arc::new(DirectDialer::new(Duration::from_secs(1)));
        let endpoint = TunnelEndpoint::parse("socks5://proxy:1080").unwrap();
        let result = BaseDialer::new(endpoint, forward, &ProxyChainConfig::default());
        assert!(matches!(result, Err(DialError::UnsupportedScheme(s)) if s == "socks5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_reports_timeout() {
        let result: Result<(), DialError> = within(Duration::from_secs(1), "proxy", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DialError::Timeout { .. })));
    }
}
