//! On-disk client configuration, load-or-create at `~/.wincloud/config.json`.

use crate::cloud::DEFAULT_CHUNK_SIZE;
use crate::error::{ArchiveError, Result};
use crate::keystore::USER_DIR;
use crate::split::SplitRatio;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Network tuning for the upload/download coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bounded retry attempts for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Chunk threshold and chunk size for large uploads, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the WinCloud server.
    pub server_url: String,
    /// Local/cloud split applied to each file's compressed bytes.
    pub split: SplitRatio,
    /// Compressed streams below this many bytes stay entirely local.
    pub keep_local_below: u64,
    /// Coordinator tuning.
    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8443".to_string(),
            split: SplitRatio::default(),
            keep_local_below: 4096,
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    /// Fixed per-user config path.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| ArchiveError::Config("home directory not found".to_string()))?;
        Ok(home.join(USER_DIR).join(CONFIG_FILE))
    }

    /// Load the config, writing defaults on first run. Unknown keys are
    /// tolerated; missing keys take their defaults.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&text)
                .map_err(|e| ArchiveError::Config(format!("{}: {e}", path.display())))?;
            if config.network.chunk_size == 0 {
                return Err(ArchiveError::Config(format!(
                    "{}: chunk_size must be at least 1 byte",
                    path.display()
                )));
            }
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Persist the config as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ArchiveError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}
