//! Client configuration, stored as TOML.

use std::path::Path;
use std::time::Duration;

use chunkline_transfer::{DEFAULT_CHUNK_SIZE, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::ClientError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Collection URL uploads are created at.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bytes per PATCH request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Delay before each retry of a failed request. Its length is the retry budget.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Fraction of each retry delay applied as ± random jitter, 0 to 1.
    #[serde(default)]
    pub retry_jitter: f64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How often transfer speed is re-sampled.
    #[serde(default = "default_speed_sample_interval_ms")]
    pub speed_sample_interval_ms: u64,
}

fn default_endpoint() -> String {
    "http://localhost:3001/api/uploads".into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![0, 3_000, 5_000, 10_000, 20_000]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_speed_sample_interval_ms() -> u64 {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            chunk_size: default_chunk_size(),
            retry_delays_ms: default_retry_delays_ms(),
            retry_jitter: 0.0,
            request_timeout_secs: default_request_timeout_secs(),
            speed_sample_interval_ms: default_speed_sample_interval_ms(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "client configuration loaded");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_schedule(
            self.retry_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
        .with_jitter(self.retry_jitter)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn speed_sample_interval(&self) -> Duration {
        Duration::from_millis(self.speed_sample_interval_ms)
    }
}
