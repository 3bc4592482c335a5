//! Execution requests and records.

use crate::error::{CoreError, CoreResult};
use crate::id::{ArtifactId, ExecutionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Process launched, not yet finished
    Running,
    /// Process exited with code zero
    Completed,
    /// Process exited abnormally, was stopped, or its context was cancelled
    Failed,
    /// Deadline elapsed before the process exited
    Timeout,
}

impl ExecutionStatus {
    /// Whether the run has left `running`
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A single `KEY=VALUE` environment entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name
    pub key: String,
    /// Variable value
    pub value: String,
}

impl EnvVar {
    /// Parse a `KEY=VALUE` entry
    ///
    /// # Errors
    ///
    /// Returns error if there is no `=` or the key is empty
    pub fn parse(entry: &str) -> CoreResult<Self> {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Self {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => Err(CoreError::validation(
                "env",
                format!("expected KEY=VALUE, got {:?}", entry),
            )),
        }
    }
}

/// Request to run a built artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Artifact to run
    #[serde(alias = "binary_id")]
    pub artifact_id: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Additional `KEY=VALUE` environment entries
    #[serde(default)]
    pub env: Vec<String>,
    /// Standard input content
    #[serde(default)]
    pub stdin: Option<String>,
    /// Timeout override in seconds; `0` or absent uses the engine default
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ExecutionRequest {
    /// Create a request with no arguments
    #[must_use]
    pub fn new(artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            ..Default::default()
        }
    }

    /// Set positional arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment entry
    #[must_use]
    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    /// Set standard input
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Set the timeout override in seconds
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Parsed environment entries
    ///
    /// # Errors
    ///
    /// Returns error on the first malformed entry
    pub fn env_vars(&self) -> CoreResult<Vec<EnvVar>> {
        self.env.iter().map(|e| EnvVar::parse(e)).collect()
    }

    /// Timeout override, `None` when the default applies
    #[must_use]
    pub fn timeout_override(&self) -> Option<std::time::Duration> {
        match self.timeout {
            Some(secs) if secs > 0 => Some(std::time::Duration::from_secs(secs)),
            _ => None,
        }
    }
}

/// Outcome of one run of one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Execution identifier
    pub id: ExecutionId,
    /// Artifact that was run
    pub artifact_id: ArtifactId,
    /// Run state
    pub status: ExecutionStatus,
    /// Process exit code; `-1` when the OS reported none
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Standard output hit the capture cap
    #[serde(default)]
    pub stdout_truncated: bool,
    /// Standard error hit the capture cap
    #[serde(default)]
    pub stderr_truncated: bool,
    /// Launch time
    pub started_at: DateTime<Utc>,
    /// Completion time
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionRecord {
    /// Create a fresh `running` record
    #[must_use]
    pub fn start(artifact_id: ArtifactId) -> Self {
        Self {
            id: ExecutionId::new(),
            artifact_id,
            status: ExecutionStatus::Running,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
        }
    }

    /// Move the record to a terminal state and stamp the finish time
    pub fn finish(&mut self, status: ExecutionStatus, exit_code: i32) {
        let finished = Utc::now();
        self.status = status;
        self.exit_code = exit_code;
        self.duration_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished);
    }
}
