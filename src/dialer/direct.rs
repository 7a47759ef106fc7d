//! Plain TCP dialing, the last hop of every chain.

use super::Dialer;
use super::base::within;
use crate::error::DialError;
use crate::stream::{RawConnection, StreamConnection};
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

/// Opens TCP connections with an optional connect timeout.
#[derive(Debug, Clone)]
pub struct DirectDialer {
    connect_timeout: Duration,
}

impl DirectDialer {
    /// A zero timeout waits for the OS to give up.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Connect to `addr` (`host:port`) and return the socket.
    #[instrument(skip(self), fields(connect_timeout = ?self.connect_timeout))]
    pub async fn connect(&self, addr: &str) -> Result<TcpStream, DialError> {
        debug!("opening tcp connection");
        let stream = self.bounded(addr, TcpStream::connect(addr)).await?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY");
        }
        Ok(stream)
    }

    async fn bounded<F, T>(&self, addr: &str, connect: F) -> Result<T, DialError>
    where
        F: Future<Output = io::Result<T>>,
    {
        let connect = async {
            connect.await.map_err(|source| {
                debug!(error = %source, "tcp connect failed");
                DialError::Connect {
                    addr: addr.to_string(),
                    source,
                }
            })
        };
        within(self.connect_timeout, addr, connect).await
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, addr: &str) -> Result<Box<dyn StreamConnection>, DialError> {
        let stream = self.connect(addr).await?;
        Ok(Box::new(RawConnection::from_tcp(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let conn = DirectDialer::new(Duration::from_secs(5))
            .dial(&addr.to_string())
            .await
            .unwrap();
        assert_eq!(conn.peer_addr(), Some(addr));

        let mut buf = [0u8; 2];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &b"hi"[..n]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fires() {
        let dialer = DirectDialer::new(Duration::from_millis(100));
        let unanswered = std::future::pending::<io::Result<TcpStream>>();

        let result = dialer.bounded("db:5432", unanswered).await;
        match result {
            Err(DialError::Timeout { target, timeout }) => {
                assert_eq!(target, "db:5432");
                assert_eq!(timeout, Duration::from_millis(100));
            }
            Err(e) => panic!("expected timeout error, got: {:?}", e),
            Ok(_) => panic!("expected timeout error"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_waits_for_os() {
        let dialer = DirectDialer::new(Duration::ZERO);
        let slow = async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Err::<(), _>(io::Error::from(io::ErrorKind::TimedOut))
        };

        let result = dialer.bounded("db:5432", slow).await;
        assert!(matches!(result, Err(DialError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = DirectDialer::new(Duration::from_secs(5))
            .dial(&addr.to_string())
            .await;
        match result {
            Err(DialError::Connect { addr: a, .. }) => assert_eq!(a, addr.to_string()),
            Err(e) => panic!("expected connect error, got: {:?}", e),
            Ok(_) => panic!("expected connect error"),
        }
    }
}
