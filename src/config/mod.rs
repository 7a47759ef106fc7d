//! Configuration loading, parsing, and validation.

mod loader;
mod proxy;
mod types;
mod validation;

pub use loader::{ConfigError, load_config, parse_config};
pub use proxy::{ENV_KEYWORD, NO_PROXY_KEYWORD, ProxySetting, bypasses};
pub use types::*;
pub use validation::validate_config;
