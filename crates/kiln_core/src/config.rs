//! Configuration for kiln services.
//!
//! Binaries fill these in from flags, environment, or a JSON file; the
//! defaults match a single-host deployment rooted at `./data`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Storage roots
    pub storage: StorageConfig,
    /// Execution engine settings
    pub executor: ExecutorConfig,
    /// HTTP server settings
    pub server: ServerConfig,
}

/// Storage roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for catalog snapshot and execution log
    pub data_dir: PathBuf,
    /// Root for source checkouts
    pub repo_dir: PathBuf,
    /// Root for produced executables
    pub binary_dir: PathBuf,
}

impl StorageConfig {
    /// Derive all roots from a single data directory
    #[must_use]
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            repo_dir: data_dir.join("repos"),
            binary_dir: data_dir.join("binaries"),
            data_dir,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::rooted_at("./data")
    }
}

/// Execution engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout applied when a request has none, in seconds
    pub default_timeout_secs: u64,
    /// Advertised concurrency limit (not enforced)
    pub max_concurrent: usize,
    /// Per-stream capture cap in bytes
    pub max_output_bytes: usize,
    /// How long to keep draining pipes after the process exits, in milliseconds
    pub drain_grace_ms: u64,
}

impl ExecutorConfig {
    /// Default timeout as a [`Duration`]
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Drain grace period as a [`Duration`]
    #[must_use]
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Set the default timeout
    #[must_use]
    pub fn with_default_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Set the capture cap
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 5 * 60,
            max_concurrent: 10,
            max_output_bytes: 4 * 1024 * 1024, // 4 MiB
            drain_grace_ms: 500,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Token required on every non-public route
    pub admin_token: Option<String>,
}

impl ServerConfig {
    /// `host:port` bind address
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            admin_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KilnConfig::default();
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert_eq!(config.storage.repo_dir, PathBuf::from("./data/repos"));
        assert_eq!(config.storage.binary_dir, PathBuf::from("./data/binaries"));
        assert_eq!(config.executor.default_timeout(), Duration::from_secs(300));
        assert_eq!(config.executor.max_concurrent, 10);
        assert_eq!(config.server.bind_address(), "localhost:8080");
    }

    #[test]
    fn test_partial_json() {
        let config: KilnConfig =
            serde_json::from_str(r#"{"executor":{"default_timeout_secs":7}}"#).unwrap();
        assert_eq!(config.executor.default_timeout_secs, 7);
        assert_eq!(config.executor.max_concurrent, 10);
        assert_eq!(config.server.port, 8080);
    }
}
