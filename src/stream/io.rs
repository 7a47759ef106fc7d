//! `AsyncRead`/`AsyncWrite` view of a [`StreamConnection`].
//!
//! Dialer hops are layered: TLS, HTTP and WebSocket handshakes all need a
//! plain byte stream underneath. `StreamIo` lets any connection produced by
//! a forward dialer serve as that stream.

use super::StreamConnection;
use bytes::{Buf, BytesMut};
use futures::future::BoxFuture;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const READ_CHUNK: usize = 16 * 1024;

pub struct StreamIo {
    conn: Arc<dyn StreamConnection>,
    pending: BytesMut,
    read: Option<BoxFuture<'static, io::Result<Vec<u8>>>>,
    write: Option<BoxFuture<'static, io::Result<usize>>>,
    shutdown: Option<BoxFuture<'static, io::Result<()>>>,
}

impl StreamIo {
    pub fn new(conn: Box<dyn StreamConnection>) -> Self {
        Self::from_arc(Arc::from(conn))
    }

    pub fn from_arc(conn: Arc<dyn StreamConnection>) -> Self {
        Self {
            conn,
            pending: BytesMut::new(),
            read: None,
            write: None,
            shutdown: None,
        }
    }
}

impl AsyncRead for StreamIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending.is_empty() {
            let n = this.pending.len().min(buf.remaining());
            buf.put_slice(&this.pending[..n]);
            this.pending.advance(n);
            return Poll::Ready(Ok(()));
        }

        let read = this.read.get_or_insert_with(|| {
            let conn = Arc::clone(&this.conn);
            Box::pin(async move {
                let mut chunk = vec![0u8; READ_CHUNK];
                let n = conn.read(&mut chunk).await?;
                chunk.truncate(n);
                Ok(chunk)
            })
        });
        let result = ready!(read.as_mut().poll(cx));
        this.read = None;

        let data = result?;
        let n = data.len().min(buf.remaining());
        buf.put_slice(&data[..n]);
        this.pending.extend_from_slice(&data[n..]);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for StreamIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        let write = this.write.get_or_insert_with(|| {
            let conn = Arc::clone(&this.conn);
            let data = buf.to_vec();
            Box::pin(async move { conn.write(&data).await })
        });
        let result = ready!(write.as_mut().poll(cx));
        this.write = None;
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(write) = this.write.as_mut() {
            let result = ready!(write.as_mut().poll(cx));
            this.write = None;
            result?;
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;

        let this = self.get_mut();
        let shutdown = this.shutdown.get_or_insert_with(|| {
            let conn = Arc::clone(&this.conn);
            Box::pin(async move { conn.close().await })
        });
        let result = ready!(shutdown.as_mut().poll(cx));
        this.shutdown = None;
        Poll::Ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Addrs, RawConnection};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_small_reads_keep_leftover() {
        let (near, mut far) = duplex(64);
        let mut io = StreamIo::new(Box::new(RawConnection::new(near, Addrs::default())));

        far.write_all(b"abcdef").await.unwrap();

        let mut two = [0u8; 2];
        io.read_exact(&mut two).await.unwrap();
        assert_eq!(&two, b"ab");
        let mut four = [0u8; 4];
        io.read_exact(&mut four).await.unwrap();
        assert_eq!(&four, b"cdef");
    }

    #[tokio::test]
    async fn test_write_and_shutdown() {
        let (near, mut far) = duplex(64);
        let mut io = StreamIo::new(Box::new(RawConnection::new(near, Addrs::default())));

        io.write_all(b"through").await.unwrap();
        io.shutdown().await.unwrap();

        let mut received = Vec::new();
        far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"through");
    }
}
