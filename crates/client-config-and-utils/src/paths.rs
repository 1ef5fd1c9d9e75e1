//! File system paths for the client.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths for the client runtime.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for client runtime files (~/.commons)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.commons`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".commons"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.commons).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.commons/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the durable session storage file path (~/.commons/session.json).
    ///
    /// This is the client's analog of browser local storage: a small
    /// key/value map that survives restarts.
    pub fn session_file(&self) -> PathBuf {
        self.base_dir.join("session.json")
    }

    /// Get the logs directory (~/.commons/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the structured log file path (~/.commons/logs/client.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("client.jsonl")
    }

    /// Ensure the base and logs directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
