use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "sequencer.toml";

/// Peers that are infrastructure rather than hardware and are never locked.
pub const DEFAULT_IGNORED_PEERS: [&str; 6] = ["hub", "keys", "msg", "iic", "gen2", "sequencepanel"];

/// Engine settings stored as TOML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Days a concluded sequence stays visible in the directory
    pub retention_days: i64,
    /// Poll period of abort/finish requests waiting for conclusion
    pub poll_interval_ms: u64,
    /// Time limit of sub-commands that do not ask for one
    pub default_time_limit_secs: u64,
    /// Extra time granted on top of a sub-command's own limit before the engine gives up on it
    pub dispatch_grace_secs: u64,
    pub ignored_peers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            poll_interval_ms: 50,
            default_time_limit_secs: 60,
            dispatch_grace_secs: 5,
            ignored_peers: DEFAULT_IGNORED_PEERS.iter().map(|p| p.to_string()).collect(),
            database_url: None,
        }
    }
}

impl EngineConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn default_time_limit(&self) -> Duration {
        Duration::from_secs(self.default_time_limit_secs)
    }

    pub fn dispatch_grace(&self) -> Duration {
        Duration::from_secs(self.dispatch_grace_secs)
    }

    /// Reads the config, falling back to defaults when the file is missing or unreadable.
    pub async fn read(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path).await {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "Config loaded successfully");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(path, content).await?;
        debug!(path = %path.display(), "Config saved successfully");

        Ok(())
    }
}
