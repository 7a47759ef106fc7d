//! Uniform duplex byte streams.
//!
//! Every transport the bridge relays over (plain TCP, a CONNECT tunnel, a
//! chunked POST body, a WebSocket) is exposed as a [`StreamConnection`]. The
//! relay only ever sees this trait.

mod chunked;
mod control;
mod heartbeat;
mod io;
mod raw;
mod websocket;

pub use chunked::{ChunkedStreamAdapter, encode_chunk};
pub use control::StreamControl;
pub use heartbeat::HeartbeatController;
pub use io::StreamIo;
pub use raw::RawConnection;
pub use websocket::WebSocketStreamAdapter;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

/// How long `close` waits for a graceful shutdown before giving up.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Any byte stream a connection can be unwrapped into.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Type-erased transport used between dialer hops.
pub type BoxedIo = Box<dyn AsyncStream>;

/// Local and peer socket addresses of the underlying transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Addrs {
    pub local: Option<SocketAddr>,
    pub peer: Option<SocketAddr>,
}

/// A duplex byte stream.
///
/// Methods take `&self` so a single connection can be shared by the two relay
/// tasks. A read returning `Ok(0)` means the stream ended cleanly. A write
/// either transfers the whole buffer or fails. Errors are never retried.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    /// Read the next bytes into `buf`.
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write `buf` and return the number of bytes transferred.
    async fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Close the stream. A second call is a no-op.
    ///
    /// Pending reads and writes on other tasks fail once the stream is closed.
    async fn close(&self) -> std::io::Result<()>;

    /// Fail reads and writes that have not completed by `deadline`.
    ///
    /// `None` clears the deadline.
    fn set_deadline(&self, deadline: Option<Instant>);

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Unwrap into a plain byte stream for the next protocol layer.
    fn into_io(self: Box<Self>) -> BoxedIo;
}
