//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Serde defaults for every field
//! - JSON loading
//! - Clamping of nonsensical values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modules::throttle::{millis, normalize_bounds};

pub const DEFAULT_PROXY_PROVIDER_URL: &str = "https://free-proxy-list.net/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tunables of a [`crate::StealthScraper`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Connect timeouts a single proxy may accumulate before eviction.
    pub max_proxy_timeouts: u32,
    /// Session-wide connect timeouts tolerated without a proxy.
    pub max_connect_timeouts: u32,
    pub max_read_timeouts: u32,
    pub max_connection_errors: u32,
    pub max_chunked_encoding_errors: u32,
    /// Hard cap on attempts for one fetch, whatever the failure mix.
    pub max_attempts: u32,
    /// Also evict the active proxy on a read timeout below the ceiling.
    pub evict_proxy_on_read_timeout: bool,
    pub stealth_mode: bool,
    pub proxy_file: PathBuf,
    pub user_agent_file: PathBuf,
    pub proxy_provider_url: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 350,
            max_delay_ms: 1000,
            connect_timeout_ms: 6030,
            read_timeout_ms: 6030,
            max_proxy_timeouts: 3,
            max_connect_timeouts: 3,
            max_read_timeouts: 3,
            max_connection_errors: 3,
            max_chunked_encoding_errors: 3,
            max_attempts: 50,
            evict_proxy_on_read_timeout: false,
            stealth_mode: false,
            proxy_file: PathBuf::from("files/proxy.txt"),
            user_agent_file: PathBuf::from("files/user_agents.txt"),
            proxy_provider_url: DEFAULT_PROXY_PROVIDER_URL.to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ScraperConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Clamp delays to `0 < min < max`, timeouts to at least 1ms and every
    /// ceiling to at least 1.
    pub fn normalized(mut self) -> Self {
        let (min, max) = normalize_bounds(
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        );
        self.min_delay_ms = millis(min);
        self.max_delay_ms = millis(max);
        self.connect_timeout_ms = self.connect_timeout_ms.max(1);
        self.read_timeout_ms = self.read_timeout_ms.max(1);

        for ceiling in [
            &mut self.max_proxy_timeouts,
            &mut self.max_connect_timeouts,
            &mut self.max_read_timeouts,
            &mut self.max_connection_errors,
            &mut self.max_chunked_encoding_errors,
            &mut self.max_attempts,
        ] {
            *ceiling = (*ceiling).max(1);
        }
        self
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
