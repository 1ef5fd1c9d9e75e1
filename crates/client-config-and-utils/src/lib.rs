//! Core types, configuration, and utilities for the Commons client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_BASE_URL, DEFAULT_AVATAR_PATH, DEFAULT_AVATAR_TIMEOUT_SECS,
    DEFAULT_EXPIRY_BUFFER_SECS, DEFAULT_LANDING_ROUTE, DEFAULT_LOGIN_ROUTE, DEFAULT_LOG_LEVEL,
    DEFAULT_WATCHDOG_INTERVAL_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, AppendLogWriter};
pub use paths::Paths;
