//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default API base URL (can be overridden at compile time via COMMONS_API_BASE_URL env var).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("COMMONS_API_BASE_URL") {
    Some(url) => url,
    None => "http://localhost:3000/api",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Route the client lands on after a successful login or registration.
pub const DEFAULT_LANDING_ROUTE: &str = "/dashboard";

/// Route the client is sent to when the session ends.
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Bundled fallback avatar asset.
pub const DEFAULT_AVATAR_PATH: &str = "/images/profile/default-avatar.png";

/// Seconds of slack subtracted from a token's expiry to tolerate clock
/// skew and in-flight request latency.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

/// How often the expiry watchdog re-checks the stored access token.
pub const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 5;

/// Upper bound on avatar presigned-URL resolution.
pub const DEFAULT_AVATAR_TIMEOUT_SECS: u64 = 5;

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Backend API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Route pushed after a successful login/registration.
    #[serde(default = "default_landing_route")]
    pub landing_route: String,
    /// Route pushed when the session ends.
    #[serde(default = "default_login_route")]
    pub login_route: String,
    /// Fallback avatar asset path.
    #[serde(default = "default_avatar_path")]
    pub default_avatar_path: String,
    /// Expiry buffer in seconds.
    #[serde(default = "default_expiry_buffer_secs")]
    pub expiry_buffer_secs: i64,
    /// Watchdog re-check interval in seconds.
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    /// Avatar resolution timeout in seconds.
    #[serde(default = "default_avatar_timeout_secs")]
    pub avatar_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_landing_route() -> String {
    DEFAULT_LANDING_ROUTE.to_string()
}

fn default_login_route() -> String {
    DEFAULT_LOGIN_ROUTE.to_string()
}

fn default_avatar_path() -> String {
    DEFAULT_AVATAR_PATH.to_string()
}

fn default_expiry_buffer_secs() -> i64 {
    DEFAULT_EXPIRY_BUFFER_SECS
}

fn default_watchdog_interval_secs() -> u64 {
    DEFAULT_WATCHDOG_INTERVAL_SECS
}

fn default_avatar_timeout_secs() -> u64 {
    DEFAULT_AVATAR_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            landing_route: DEFAULT_LANDING_ROUTE.to_string(),
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            default_avatar_path: DEFAULT_AVATAR_PATH.to_string(),
            expiry_buffer_secs: DEFAULT_EXPIRY_BUFFER_SECS,
            watchdog_interval_secs: DEFAULT_WATCHDOG_INTERVAL_SECS,
            avatar_timeout_secs: DEFAULT_AVATAR_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("COMMONS_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CoreResult<()> {
        Url::parse(&self.api_base_url)
            .map_err(|e| CoreError::Config(format!("Invalid api_base_url: {}", e)))?;
        Ok(())
    }
}
