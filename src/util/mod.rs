//! Logging, session ids and shutdown handling.

mod logging;
mod session_id;
mod shutdown;

pub use logging::{init_logging, log_filter};
pub use session_id::SessionId;
pub use shutdown::ShutdownSignal;
