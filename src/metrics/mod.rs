//! Metrics collection and exposition.

mod collector;
mod server;

pub use collector::{MetricsCollector, Role};
pub use server::MetricsServer;
