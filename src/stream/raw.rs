//! Byte-transparent connection over any async transport.

use super::control::StreamControl;
use super::{Addrs, AsyncStream, BoxedIo, CLOSE_GRACE, StreamConnection};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// A [`StreamConnection`] that passes bytes through unchanged.
///
/// Used for plain TCP sockets, TLS streams and established CONNECT tunnels.
pub struct RawConnection<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    control: StreamControl,
    addrs: Addrs,
}

impl<S: AsyncStream + 'static> RawConnection<S> {
    pub fn new(io: S, addrs: Addrs) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            control: StreamControl::new(),
            addrs,
        }
    }
}

impl RawConnection<TcpStream> {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let addrs = Addrs {
            local: stream.local_addr().ok(),
            peer: stream.peer_addr().ok(),
        };
        Self::new(stream, addrs)
    }
}

#[async_trait]
impl<S: AsyncStream + 'static> StreamConnection for RawConnection<S> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.control
            .read(async { self.reader.lock().await.read(buf).await })
            .await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.control
            .write(async {
                let mut writer = self.writer.lock().await;
                writer.write_all(buf).await?;
                writer.flush().await?;
                Ok(buf.len())
            })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        if !self.control.close() {
            return Ok(());
        }

        let shutdown = async { self.writer.lock().await.shutdown().await };
        match tokio::time::timeout(CLOSE_GRACE, shutdown).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(peer = ?self.addrs.peer, "shutdown did not finish within grace period");
                Ok(())
            }
        }
    }

    fn set_deadline(&self, deadline: Option<Instant>) {
        self.control.set_deadline(deadline);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.local
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.addrs.peer
    }

    fn into_io(self: Box<Self>) -> BoxedIo {
        let this = *self;
        let reader = this.reader.into_inner();
        let writer = this.writer.into_inner();
        Box::new(reader.unsplit(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_read_write_through_duplex() {
        let (near, mut far) = duplex(64);
        let conn = RawConnection::new(near, Addrs::default());

        assert_eq!(conn.write(b"hello").await.unwrap(), 5);
        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        far.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_signals_eof() {
        let (near, mut far) = duplex(64);
        let conn = RawConnection::new(near, Addrs::default());

        conn.close().await.unwrap();
        conn.close().await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
        assert!(conn.write(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_close_releases_blocked_reader() {
        let (near, _far) = duplex(64);
        let conn = Arc::new(RawConnection::new(near, Addrs::default()));

        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                conn.read(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should be released")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_into_io_keeps_stream_usable() {
        let (near, mut far) = duplex(64);
        let conn: Box<dyn StreamConnection> = Box::new(RawConnection::new(near, Addrs::default()));

        let mut io = conn.into_io();
        io.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_from_tcp_records_addresses() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = TcpStream::connect(addr).await.unwrap();
        let conn = RawConnection::from_tcp(stream);
        let _ = accept.await.unwrap();

        assert_eq!(conn.peer_addr(), Some(addr));
        assert!(conn.local_addr().is_some());
    }
}
