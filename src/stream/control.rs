//! Close signal and deadlines shared by every stream adapter.

use std::future::Future;
use std::io;
use tokio::sync::watch;
use tokio::time::Instant;

/// Close flag plus read and write deadlines for one stream.
///
/// Every read and write of an adapter runs inside [`StreamControl::read`] or
/// [`StreamControl::write`], which abandon the operation as soon as the
/// stream is closed or the deadline passes. Deadlines can move while an
/// operation is pending.
#[derive(Debug)]
pub struct StreamControl {
    closed: watch::Sender<bool>,
    read_deadline: watch::Sender<Option<Instant>>,
    write_deadline: watch::Sender<Option<Instant>>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            closed: watch::channel(false).0,
            read_deadline: watch::channel(None).0,
            write_deadline: watch::channel(None).0,
        }
    }

    /// Mark the stream closed. Returns `true` only for the first call.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.read_deadline.send_replace(deadline);
        self.write_deadline.send_replace(deadline);
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.read_deadline.send_replace(deadline);
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        *self.read_deadline.borrow()
    }

    pub async fn read<F, T>(&self, op: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        self.guard(&self.read_deadline, op).await
    }

    pub async fn write<F, T>(&self, op: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        self.guard(&self.write_deadline, op).await
    }

    async fn guard<F, T>(&self, deadline: &watch::Sender<Option<Instant>>, op: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let mut closed = self.closed.subscribe();
        let mut deadline = deadline.subscribe();
        tokio::pin!(op);

        loop {
            if *closed.borrow_and_update() {
                return Err(closed_error());
            }
            let at = *deadline.borrow_and_update();
            let expired = async move {
                match at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                result = &mut op => return result,
                _ = closed.changed() => {}
                _ = deadline.changed() => {}
                () = expired => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded"));
                }
            }
        }
    }
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream closed")
}
