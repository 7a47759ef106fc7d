//! Fake dialers for unit tests.

use super::Dialer;
use crate::error::DialError;
use crate::stream::{Addrs, RawConnection, StreamConnection};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

/// Counts dial attempts and refuses every one of them.
#[derive(Debug, Default)]
pub(crate) struct CountingDialer {
    pub dials: AtomicUsize,
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, addr: &str) -> Result<Box<dyn StreamConnection>, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Err(DialError::Connect {
            addr: addr.to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        })
    }
}

/// Hands out in-memory pipes; the far end of each goes to the test.
pub(crate) struct PipeDialer {
    peers: mpsc::UnboundedSender<(String, DuplexStream)>,
}

impl PipeDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, DuplexStream)>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { peers }), rx)
    }
}

#[async_trait]
impl Dialer for PipeDialer {
    async fn dial(&self, addr: &str) -> Result<Box<dyn StreamConnection>, DialError> {
        let (near, far) = tokio::io::duplex(64 * 1024);
        self.peers
            .send((addr.to_string(), far))
            .map_err(|_| DialError::Connect {
                addr: addr.to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            })?;
        Ok(Box::new(RawConnection::new(near, Addrs::default())))
    }
}

/// Read a request head byte by byte, leaving the body unread.
pub(crate) async fn read_request_head(io: &mut DuplexStream) -> String {
    // A one-byte buffer keeps everything after the head in the pipe.
    let mut reader = BufReader::with_capacity(1, io);
    let mut head = String::new();
    loop {
        let n = reader.read_line(&mut head).await.unwrap();
        if n == 0 || head.ends_with("\r\n\r\n") {
            return head;
        }
    }
}
