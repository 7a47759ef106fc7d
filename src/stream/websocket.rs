//! WebSocket connection as a byte stream.

use super::control::StreamControl;
use super::heartbeat::HeartbeatController;
use super::{Addrs, AsyncStream, BoxedIo, CLOSE_GRACE, StreamConnection, StreamIo};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

struct Inbound<S> {
    messages: SplitStream<WebSocketStream<S>>,
    pending: Bytes,
}

/// [`StreamConnection`] over a WebSocket.
///
/// Each write is sent as exactly one binary message. Reads expose message
/// payloads as a continuous byte stream; empty messages are skipped and a
/// close frame reads as end of stream. The sink mutex is shared with the
/// heartbeat so data frames and pings never interleave.
pub struct WebSocketStreamAdapter<S> {
    sink: Arc<Mutex<WsSink<S>>>,
    inbound: Mutex<Inbound<S>>,
    heartbeat: Option<HeartbeatController>,
    control: Arc<StreamControl>,
    closing: AtomicBool,
    addrs: Addrs,
}

impl<S: AsyncStream + 'static> WebSocketStreamAdapter<S> {
    /// Wrap an established WebSocket. A non-zero `heartbeat` starts keepalive.
    pub fn new(ws: WebSocketStream<S>, heartbeat: Duration, addrs: Addrs) -> Self {
        let (sink, messages) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        let control = Arc::new(StreamControl::new());
        let heartbeat =
            HeartbeatController::start(heartbeat, Arc::clone(&sink), Arc::clone(&control));

        Self {
            sink,
            inbound: Mutex::new(Inbound {
                messages,
                pending: Bytes::new(),
            }),
            heartbeat,
            control,
            closing: AtomicBool::new(false),
            addrs,
        }
    }

    pub fn heartbeat(&self) -> Option<&HeartbeatController> {
        self.heartbeat.as_ref()
    }
}

#[async_trait]
impl<S: AsyncStream + 'static> StreamConnection for WebSocketStreamAdapter<S> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.control
            .read(async {
                let mut inbound = self.inbound.lock().await;
                loop {
                    if !inbound.pending.is_empty() {
                        let n = inbound.pending.len().min(buf.len());
                        buf[..n].copy_from_slice(&inbound.pending[..n]);
                        inbound.pending.advance(n);
                        return Ok(n);
                    }

                    match inbound.messages.next().await {
                        Some(Ok(Message::Binary(data))) => inbound.pending = Bytes::from(data),
                        Some(Ok(Message::Text(text))) => {
                            inbound.pending = Bytes::from(text.into_bytes())
                        }
                        Some(Ok(Message::Pong(_))) => {
                            if let Some(heartbeat) = &self.heartbeat {
                                heartbeat.on_pong();
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => return Ok(0),
                        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                            return Ok(0);
                        }
                        Some(Err(WsError::Io(e))) => return Err(e),
                        Some(Err(e)) => return Err(io::Error::other(e)),
                    }
                }
            })
            .await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.control
            .write(async {
                let mut sink = self.sink.lock().await;
                sink.send(Message::Binary(buf.to_vec()))
                    .await
                    .map_err(into_io_error)?;
                Ok(buf.len())
            })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.stop().await;
        }

        let close_frame = async { self.sink.lock().await.close().await };
        let result = tokio::time::timeout(CLOSE_GRACE, close_frame).await;
        self.control.close();

        match result {
            Ok(Err(e)) => match into_io_error(e) {
                e if is_disconnect(&e) => Ok(()),
                e => Err(e),
            },
            _ => Ok(()),
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
        Box::new(StreamIo::new(self))
    }
}

fn into_io_error(e: WsError) -> io::Error {
    match e {
        WsError::Io(e) => e,
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            io::Error::new(io::ErrorKind::NotConnected, e)
        }
        e => io::Error::other(e),
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair(
        heartbeat: Duration,
    ) -> (WebSocketStreamAdapter<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (client, server) = duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        (WebSocketStreamAdapter::new(client, heartbeat, Addrs::default()), server)
    }

    #[tokio::test]
    async fn test_write_sends_one_binary_message() {
        let (adapter, mut peer) = pair(Duration::ZERO).await;

        assert_eq!(adapter.write(b"hello").await.unwrap(), 5);
        assert_eq!(adapter.write(b"").await.unwrap(), 0);
        assert_eq!(adapter.write(b"again").await.unwrap(), 5);

        assert_eq!(peer.next().await.unwrap().unwrap(), Message::Binary(b"hello".to_vec()));
        assert_eq!(peer.next().await.unwrap().unwrap(), Message::Binary(b"again".to_vec()));
    }

    #[tokio::test]
    async fn test_read_skips_empty_messages_and_splits_large_ones() {
        let (adapter, mut peer) = pair(Duration::ZERO).await;

        peer.send(Message::Binary(Vec::new())).await.unwrap();
        peer.send(Message::Binary(b"abcdef".to_vec())).await.unwrap();
        peer.send(Message::Text("xyz".to_string())).await.unwrap();

        let mut buf = [0u8; 4];
        let n = adapter.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = adapter.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        let n = adapter.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"xyz");
    }

    #[tokio::test]
    async fn test_close_frame_reads_as_eof() {
        let (adapter, mut peer) = pair(Duration::ZERO).await;

        peer.close(None).await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(adapter.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_stops_heartbeat_and_sends_close_frame() {
        let (adapter, mut peer) = pair(Duration::from_secs(30)).await;
        assert!(adapter.heartbeat().is_some());

        adapter.close().await.unwrap();
        adapter.close().await.unwrap();

        assert!(matches!(peer.next().await, Some(Ok(Message::Close(_)))));
        assert!(adapter.write(b"late").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_idle_stream_alive_until_pongs_stop() {
        let interval = Duration::from_secs(1);
        let (adapter, peer) = pair(interval).await;
        let adapter = Arc::new(adapter);

        // Reading on the peer side answers pings with pongs.
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let responder = tokio::spawn(async move {
            let mut peer = peer;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return peer,
                    msg = peer.next() => if msg.is_none() { return peer },
                }
            }
        });

        let reader = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                adapter.read(&mut buf).await
            })
        };

        tokio::time::sleep(3 * interval + Duration::from_millis(500)).await;
        assert!(!reader.is_finished());

        stop_tx.send(()).unwrap();
        let _silent_peer = responder.await.unwrap();

        let result = tokio::time::timeout(2 * interval + Duration::from_millis(500), reader)
            .await
            .expect("read should fail once pongs stop")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }
}
