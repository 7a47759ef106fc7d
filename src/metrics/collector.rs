//! Metrics collector using prometheus-client.
//!
//! Tracks bridge sessions, relayed bytes and dial failures per listener.

use crate::bridge::{Direction, RelayTerminated};
use crate::error::BridgeError;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Which side of the tunnel a listener sits on.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Role {
    /// Accepts TCP and dials a tunnel.
    Client,
    /// Accepts tunnels and dials TCP.
    Server,
}

/// Labels identifying a listener.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ListenerLabels {
    pub listener: String,
    pub role: Role,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BytesLabels {
    pub listener: String,
    pub role: Role,
    pub direction: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub listener: String,
    pub role: Role,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DialFailureLabels {
    pub listener: String,
    pub role: Role,
    pub reason: String,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    sessions_total: Family<OutcomeLabels, Counter>,
    active_sessions: Family<ListenerLabels, Gauge>,
    session_duration_seconds: Family<ListenerLabels, Histogram>,
    bytes_total: Family<BytesLabels, Counter>,
    dial_failures_total: Family<DialFailureLabels, Counter>,
    registry: Registry,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let sessions_total = Family::<OutcomeLabels, Counter>::default();
        let active_sessions = Family::<ListenerLabels, Gauge>::default();
        // Buckets: 10ms up to roughly 10 hours
        let session_duration_seconds =
            Family::<ListenerLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 4.0, 12))
            });
        let bytes_total = Family::<BytesLabels, Counter>::default();
        let dial_failures_total = Family::<DialFailureLabels, Counter>::default();

        registry.register(
            "tcpbridge_sessions",
            "Finished bridge sessions by outcome",
            sessions_total.clone(),
        );
        registry.register(
            "tcpbridge_active_sessions",
            "Bridge sessions currently dialing or relaying",
            active_sessions.clone(),
        );
        registry.register(
            "tcpbridge_session_duration_seconds",
            "Bridge session duration in seconds",
            session_duration_seconds.clone(),
        );
        registry.register(
            "tcpbridge_bytes",
            "Bytes relayed",
            bytes_total.clone(),
        );
        registry.register(
            "tcpbridge_dial_failures",
            "Failed tunnel or target dials by reason",
            dial_failures_total.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                sessions_total,
                active_sessions,
                session_duration_seconds,
                bytes_total,
                dial_failures_total,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn session_opened(&self, listener: &str, role: Role) {
        self.inner
            .active_sessions
            .get_or_create(&listener_labels(listener, role))
            .inc();
    }

    /// Record a finished session and decrement the active gauge.
    pub fn session_closed(
        &self,
        listener: &str,
        role: Role,
        result: &Result<RelayTerminated, BridgeError>,
        duration: Duration,
    ) {
        let labels = listener_labels(listener, role);
        self.inner.active_sessions.get_or_create(&labels).dec();
        self.inner
            .session_duration_seconds
            .get_or_create(&labels)
            .observe(duration.as_secs_f64());

        let outcome = match result {
            Ok(relay) => {
                self.record_bytes(listener, role, relay);
                if relay.is_clean() { "closed" } else { "error" }
            }
            Err(e) => {
                self.record_dial_failure(listener, role, e);
                "dial_failed"
            }
        };
        self.inner
            .sessions_total
            .get_or_create(&OutcomeLabels {
                listener: listener.to_string(),
                role,
                outcome: outcome.to_string(),
            })
            .inc();
    }

    fn record_bytes(&self, listener: &str, role: Role, relay: &RelayTerminated) {
        for (direction, bytes) in [
            (Direction::LocalToRemote, relay.bytes_local_to_remote),
            (Direction::RemoteToLocal, relay.bytes_remote_to_local),
        ] {
            self.inner
                .bytes_total
                .get_or_create(&BytesLabels {
                    listener: listener.to_string(),
                    role,
                    direction: direction.as_str().to_string(),
                })
                .inc_by(bytes);
        }
    }

    fn record_dial_failure(&self, listener: &str, role: Role, error: &BridgeError) {
        let reason = match error {
            BridgeError::Dial(e) | BridgeError::Target { source: e, .. } => e.reason(),
        };
        self.inner
            .dial_failures_total
            .get_or_create(&DialFailureLabels {
                listener: listener.to_string(),
                role,
                reason: reason.to_string(),
            })
            .inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn listener_labels(listener: &str, role: Role) -> ListenerLabels {
    ListenerLabels {
        listener: listener.to_string(),
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Termination;
    use crate::error::DialError;
    use prometheus_client::encoding::text::encode;

    fn encoded(collector: &MetricsCollector) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, collector.registry()).unwrap();
        buffer
    }

    #[test]
    fn test_session_lifecycle() {
        let collector = MetricsCollector::new();
        collector.session_opened("ssh", Role::Client);
        collector.session_closed(
            "ssh",
            Role::Client,
            &Ok(RelayTerminated {
                direction: Direction::RemoteToLocal,
                cause: Termination::Eof,
                bytes_local_to_remote: 1024,
                bytes_remote_to_local: 2048,
            }),
            Duration::from_millis(250),
        );

        let output = encoded(&collector);
        assert!(output.contains(
            "tcpbridge_active_sessions{listener=\"ssh\",role=\"Client\"} 0"
        ));
        assert!(output.contains(
            "tcpbridge_bytes_total{listener=\"ssh\",role=\"Client\",\
             direction=\"remote_to_local\"} 2048"
        ));
        assert!(output.contains("outcome=\"closed\""));
    }

    #[test]
    fn test_dial_failure_reason() {
        let collector = MetricsCollector::new();
        collector.session_opened("edge", Role::Server);
        collector.session_closed(
            "edge",
            Role::Server,
            &Err(BridgeError::Target {
                addr: "db:5432".to_string(),
                source: DialError::Timeout {
                    target: "db:5432".to_string(),
                    timeout: Duration::from_secs(1),
                },
            }),
            Duration::from_secs(1),
        );

        let output = encoded(&collector);
        assert!(output.contains(
            "tcpbridge_dial_failures_total{listener=\"edge\",role=\"Server\",reason=\"timeout\"} 1"
        ));
        assert!(output.contains("outcome=\"dial_failed\""));
    }
}
