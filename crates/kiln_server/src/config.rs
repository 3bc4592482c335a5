//! Server configuration from flags, environment and an optional JSON file.
//!
//! Precedence, lowest first: built-in defaults, the `--config` file, then
//! flags (each flag falls back to its `KILN_*` environment variable).

use clap::Parser;
use kiln_core::{KilnConfig, StorageConfig};
use std::path::{Path, PathBuf};

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`KilnConfig`]
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The server refuses to start unauthenticated
    #[error("an admin token is required (--admin-token or KILN_ADMIN_TOKEN)")]
    MissingAdminToken,
}

/// Command-line arguments
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "kiln-server")]
#[command(about = "Build and run artifacts from source repositories over HTTP", long_about = None)]
#[command(version)]
pub struct Args {
    /// JSON config file
    #[arg(short, long, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen host
    #[arg(long, env = "KILN_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(short, long, env = "KILN_PORT")]
    pub port: Option<u16>,

    /// Data directory; repository and binary roots default beneath it
    #[arg(long, env = "KILN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Source checkout root
    #[arg(long, env = "KILN_REPO_DIR")]
    pub repo_dir: Option<PathBuf>,

    /// Produced binary root
    #[arg(long, env = "KILN_BINARY_DIR")]
    pub binary_dir: Option<PathBuf>,

    /// Token required on every route except health
    #[arg(long, env = "KILN_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Default execution timeout in seconds
    #[arg(long, env = "KILN_EXECUTOR_TIMEOUT")]
    pub default_timeout: Option<u64>,

    /// Advertised concurrency limit
    #[arg(long, env = "KILN_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    /// Per-stream output capture cap in bytes
    #[arg(long, env = "KILN_MAX_OUTPUT_BYTES")]
    pub max_output_bytes: Option<usize>,

    /// Emit logs as JSON
    #[arg(long, env = "KILN_LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    /// Resolve the effective configuration
    ///
    /// # Errors
    ///
    /// Returns error if the config file cannot be loaded or no admin token
    /// is configured
    pub fn resolve(&self) -> Result<KilnConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_file(path)?,
            None => KilnConfig::default(),
        };

        if let Some(data_dir) = &self.data_dir {
            config.storage = StorageConfig::rooted_at(data_dir);
        }
        if let Some(repo_dir) = &self.repo_dir {
            config.storage.repo_dir = repo_dir.clone();
        }
        if let Some(binary_dir) = &self.binary_dir {
            config.storage.binary_dir = binary_dir.clone();
        }

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(token) = &self.admin_token {
            config.server.admin_token = Some(token.clone());
        }

        if let Some(secs) = self.default_timeout {
            config.executor.default_timeout_secs = secs;
        }
        if let Some(max) = self.max_concurrent {
            config.executor.max_concurrent = max;
        }
        if let Some(bytes) = self.max_output_bytes {
            config.executor.max_output_bytes = bytes;
        }

        match config.server.admin_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(config),
            _ => Err(ConfigError::MissingAdminToken),
        }
    }
}

fn load_file(path: &Path) -> Result<KilnConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
