//! Server configuration, stored as TOML.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Directory holding upload data and sidecars.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL used in `Location` headers. Derived from `Host` when unset.
    #[serde(default)]
    pub public_url: Option<String>,

    /// Largest accepted upload in bytes (unlimited when unset).
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Largest accepted PATCH body in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Unfinished uploads older than this are swept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Browser origins allowed by CORS. `"*"` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3001))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_chunk_size() -> u64 {
    64 * 1024 * 1024
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".into(),
        "http://localhost:3001".into(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            public_url: None,
            max_size: None,
            max_chunk_size: default_max_chunk_size(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// PATCH body limit for the router.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_chunk_size).unwrap_or(usize::MAX)
    }
}
