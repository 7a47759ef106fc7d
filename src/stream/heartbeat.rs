//! WebSocket keepalive.

use super::control::StreamControl;
use futures::{Sink, SinkExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Periodic ping sender plus pong-driven read deadline.
///
/// Pings go through the same sink mutex as data frames. Every pong pushes the
/// stream's read deadline to `2 x interval` from now, so a peer that stops
/// answering fails the next read.
pub struct HeartbeatController {
    interval: Duration,
    control: Arc<StreamControl>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatController {
    /// Start pinging through `sink`. Returns `None` when `interval` is zero.
    pub fn start<K>(
        interval: Duration,
        sink: Arc<Mutex<K>>,
        control: Arc<StreamControl>,
    ) -> Option<Self>
    where
        K: Sink<Message> + Unpin + Send + 'static,
        K::Error: fmt::Display + Send,
    {
        if interval.is_zero() {
            return None;
        }

        control.set_read_deadline(Some(Instant::now() + 2 * interval));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(ping_loop(interval, sink, cancel.clone()));
        debug!(interval = ?interval, "heartbeat started");

        Some(Self {
            interval,
            control,
            cancel,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// Record a pong from the peer.
    pub fn on_pong(&self) {
        self.control
            .set_read_deadline(Some(Instant::now() + 2 * self.interval));
    }

    /// Stop pinging and wait until the ping task has exited.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(error = %e, "heartbeat task ended abnormally");
            }
        }
    }
}

impl Drop for HeartbeatController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn ping_loop<K>(interval: Duration, sink: Arc<Mutex<K>>, cancel: CancellationToken)
where
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: fmt::Display + Send,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let ping = async {
            let mut sink = sink.lock().await;
            sink.send(Message::Ping(Vec::new())).await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = ping => {
                if let Err(e) = result {
                    debug!(error = %e, "heartbeat ping failed");
                }
            }
        }
    }

    debug!("heartbeat stopped");
}
