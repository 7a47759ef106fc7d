//! Bidirectional copy between two streams.

use crate::stream::StreamConnection;
use futures::future::{Either, select};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Size of the per-direction copy buffer.
pub const BUFFER_LEN: usize = 32 * 1024;

/// Which way bytes were flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the accepted connection to the dialed one.
    LocalToRemote,
    /// From the dialed connection back to the accepted one.
    RemoteToLocal,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::LocalToRemote => "local_to_remote",
            Direction::RemoteToLocal => "remote_to_local",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one direction of a relay stopped.
#[derive(Debug, Error)]
pub enum Termination {
    #[error("end of stream")]
    Eof,

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("short write: {written} of {expected} bytes transferred")]
    TransferLengthMismatch { expected: usize, written: usize },
}

/// Outcome of a relay: the first direction to stop and why.
///
/// Byte counts cover both directions up to the moment the relay returned.
#[derive(Debug, Error)]
#[error("relay {direction} ended: {cause}")]
pub struct RelayTerminated {
    pub direction: Direction,
    #[source]
    pub cause: Termination,
    pub bytes_local_to_remote: u64,
    pub bytes_remote_to_local: u64,
}

impl RelayTerminated {
    /// Whether the relay ended by a peer closing its side.
    pub fn is_clean(&self) -> bool {
        matches!(self.cause, Termination::Eof)
    }
}

/// Copy bytes both ways until either direction stops.
///
/// The direction that stops first decides the outcome. The other copy task
/// is left running; it finishes once the caller closes both streams.
pub async fn relay(
    local: Arc<dyn StreamConnection>,
    remote: Arc<dyn StreamConnection>,
) -> RelayTerminated {
    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));

    let outbound = spawn_copy(
        Arc::clone(&local),
        Arc::clone(&remote),
        Arc::clone(&sent),
    );
    let inbound = spawn_copy(remote, local, Arc::clone(&received));

    let (direction, cause) = match select(outbound, inbound).await {
        Either::Left((result, _abandoned)) => (Direction::LocalToRemote, joined(result)),
        Either::Right((result, _abandoned)) => (Direction::RemoteToLocal, joined(result)),
    };

    RelayTerminated {
        direction,
        cause,
        bytes_local_to_remote: sent.load(Ordering::Relaxed),
        bytes_remote_to_local: received.load(Ordering::Relaxed),
    }
}

/// Run [`relay`] and then close both streams.
pub async fn relay_and_close(
    local: Arc<dyn StreamConnection>,
    remote: Arc<dyn StreamConnection>,
) -> RelayTerminated {
    let outcome = relay(Arc::clone(&local), Arc::clone(&remote)).await;
    close_pair(local.as_ref(), remote.as_ref()).await;
    outcome
}

/// Close both streams, logging failures.
pub async fn close_pair(local: &dyn StreamConnection, remote: &dyn StreamConnection) {
    let (local_closed, remote_closed) = tokio::join!(local.close(), remote.close());
    if let Err(e) = local_closed {
        warn!(error = %e, "failed to close local connection");
    }
    if let Err(e) = remote_closed {
        warn!(error = %e, "failed to close remote connection");
    }
}

fn spawn_copy(
    from: Arc<dyn StreamConnection>,
    to: Arc<dyn StreamConnection>,
    counter: Arc<AtomicU64>,
) -> JoinHandle<Termination> {
    tokio::spawn(async move { copy(from.as_ref(), to.as_ref(), &counter).await })
}

/// Copy one direction. Each read is written in full before the next read.
async fn copy(
    from: &dyn StreamConnection,
    to: &dyn StreamConnection,
    counter: &AtomicU64,
) -> Termination {
    let mut buf = vec![0u8; BUFFER_LEN];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) => return Termination::Eof,
            Ok(n) => n,
            Err(e) => return Termination::Read(e),
        };
        match to.write(&buf[..n]).await {
            Ok(written) if written == n => {
                counter.fetch_add(n as u64, Ordering::Relaxed);
            }
            Ok(written) => {
                counter.fetch_add(written as u64, Ordering::Relaxed);
                return Termination::TransferLengthMismatch {
                    expected: n,
                    written,
                };
            }
            Err(e) => return Termination::Write(e),
        }
    }
}

fn joined(result: Result<Termination, tokio::task::JoinError>) -> Termination {
    result.unwrap_or_else(|e| {
        debug!(error = %e, "relay task did not complete");
        Termination::Read(io::Error::other(e))
    })
}
