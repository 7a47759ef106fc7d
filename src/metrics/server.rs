//! Prometheus metrics HTTP server.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serves `/metrics` and `/health` over HTTP/1.1.
pub struct MetricsServer {
    listener: TcpListener,
    path: Arc<String>,
    collector: MetricsCollector,
}

impl MetricsServer {
    pub async fn bind(
        address: SocketAddr,
        path: String,
        collector: MetricsCollector,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            path: Arc::new(path),
            collector,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            address = ?self.listener.local_addr().ok(),
            path = %self.path,
            "metrics server started"
        );

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let collector = self.collector.clone();
                            let path = Arc::clone(&self.path);

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let response = handle_request(&req, &collector, &path);
                                    async move { Ok::<_, Infallible>(response) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

fn handle_request<B>(
    req: &Request<B>,
    collector: &MetricsCollector,
    metrics_path: &str,
) -> Response<Full<Bytes>> {
    let path = req.uri().path();
    debug!(path = %path, method = %req.method(), "metrics request");

    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n");
    }

    if path == metrics_path {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, collector.registry()) {
            error!(error = %e, "failed to encode metrics");
            return text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics\n");
        }
        let mut response = text(StatusCode::OK, buffer);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
        response
    } else if path == "/health" || path == "/healthz" {
        text(StatusCode::OK, "OK\n")
    } else {
        text(StatusCode::NOT_FOUND, "Not found\n")
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
