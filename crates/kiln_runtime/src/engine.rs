//! Execution engine.
//!
//! Launches a built artifact as a child process, enforces its deadline,
//! captures bounded output and supports out-of-band cancellation through
//! the [`LiveJobRegistry`].

use crate::capture;
use crate::registry::LiveJobRegistry;
use kiln_core::{
    ArtifactId, CoreError, ExecutionId, ExecutionRecord, ExecutionRequest, ExecutionStatus,
    ExecutorConfig,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit code recorded when the OS reports none
pub const NO_EXIT_CODE: i32 = -1;

/// Execution engine error.
///
/// Only failures before the process starts are errors; anything after
/// launch ends up in the record's terminal state.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Request rejected before launch
    #[error("Invalid execution request: {0}")]
    InvalidRequest(#[from] CoreError),

    /// The process could not be started
    #[error("Failed to launch {}: {source}", binary.display())]
    LaunchFailure {
        /// Executable that was launched
        binary: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// No live execution with this id
    #[error("Execution not found or already finished: {id}")]
    NotFound {
        /// Requested id
        id: ExecutionId,
    },
}

/// How the process left the wait loop
enum Exit {
    Exited(io::Result<ExitStatus>),
    DeadlineElapsed,
    Cancelled,
}

/// Runs artifacts and tracks live runs
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    config: ExecutorConfig,
    registry: LiveJobRegistry,
}

impl ExecutionEngine {
    /// Create an engine with its own registry
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            registry: LiveJobRegistry::new(),
        }
    }

    /// Engine settings
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Live job registry
    #[must_use]
    pub fn registry(&self) -> &LiveJobRegistry {
        &self.registry
    }

    /// Run `binary` for `request` to completion.
    ///
    /// Cancelling `ctx` terminates the process; the run is then recorded
    /// as `failed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed request and `LaunchFailure`
    /// if the process cannot be started
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        binary: &Path,
        request: &ExecutionRequest,
    ) -> Result<ExecutionRecord, ExecutionError> {
        self.execute_observed(ctx, binary, request, None).await
    }

    /// Like [`execute`](Self::execute), sending the execution id to
    /// `observer` as soon as the run is registered and before it is spawned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed request and `LaunchFailure`
    /// if the process cannot be started
    pub async fn execute_observed(
        &self,
        ctx: &CancellationToken,
        binary: &Path,
        request: &ExecutionRequest,
        observer: Option<oneshot::Sender<ExecutionId>>,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let artifact_id = ArtifactId::parse(&request.artifact_id)?;
        let env = request.env_vars()?;
        let timeout = request
            .timeout_override()
            .unwrap_or_else(|| self.config.default_timeout());

        let mut record = ExecutionRecord::start(artifact_id);
        let token = ctx.child_token();
        let guard = self.registry.register(record.id.clone(), token.clone());
        if let Some(observer) = observer {
            // The caller may have stopped listening; the run proceeds regardless.
            let _ = observer.send(record.id.clone());
        }

        let mut cmd = Command::new(binary);
        cmd.args(&request.args)
            .envs(env.iter().map(|var| (var.key.as_str(), var.value.as_str())))
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| {
            tracing::warn!(
                execution_id = %record.id,
                binary = %binary.display(),
                error = %source,
                "process launch failed"
            );
            ExecutionError::LaunchFailure {
                binary: binary.to_path_buf(),
                source,
            }
        })?;

        tracing::info!(
            execution_id = %record.id,
            artifact_id = %record.artifact_id,
            pid = child.id().unwrap_or_default(),
            timeout_secs = timeout.as_secs(),
            "execution started"
        );

        let stdin_task = feed_stdin(&mut child, request.stdin.clone());
        let stdout = capture::shared(self.config.max_output_bytes);
        let stderr = capture::shared(self.config.max_output_bytes);
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(capture::drain(pipe, stdout.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(capture::drain(pipe, stderr.clone())));

        let exit = tokio::select! {
            status = child.wait() => Exit::Exited(status),
            () = tokio::time::sleep(timeout) => Exit::DeadlineElapsed,
            () = token.cancelled() => Exit::Cancelled,
        };

        let (status, exit_code) = match exit {
            Exit::Exited(Ok(status)) if status.success() => (ExecutionStatus::Completed, 0),
            Exit::Exited(Ok(status)) => {
                (ExecutionStatus::Failed, status.code().unwrap_or(NO_EXIT_CODE))
            }
            Exit::Exited(Err(e)) => {
                tracing::warn!(execution_id = %record.id, error = %e, "waiting on process failed");
                terminate(&mut child).await;
                (ExecutionStatus::Failed, NO_EXIT_CODE)
            }
            Exit::DeadlineElapsed => {
                terminate(&mut child).await;
                (ExecutionStatus::Timeout, NO_EXIT_CODE)
            }
            Exit::Cancelled => {
                let code = terminate(&mut child)
                    .await
                    .and_then(|s| s.code())
                    .unwrap_or(NO_EXIT_CODE);
                (ExecutionStatus::Failed, code)
            }
        };
        drop(guard);
        // Stamped before draining so the duration excludes the drain grace.
        record.finish(status, exit_code);

        self.finish_capture(&record.id, [stdin_task, stdout_task, stderr_task])
            .await;
        (record.stdout, record.stdout_truncated) = capture::snapshot(&stdout);
        (record.stderr, record.stderr_truncated) = capture::snapshot(&stderr);

        tracing::info!(
            execution_id = %record.id,
            artifact_id = %record.artifact_id,
            status = %record.status,
            exit_code = record.exit_code,
            duration_ms = record.duration_ms,
            "execution finished"
        );
        Ok(record)
    }

    /// Stop a live execution.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` is unknown or already finished
    pub fn stop(&self, id: &ExecutionId) -> Result<(), ExecutionError> {
        if self.registry.stop(id) {
            tracing::info!(execution_id = %id, "execution stop requested");
            Ok(())
        } else {
            Err(ExecutionError::NotFound { id: id.clone() })
        }
    }

    /// Wait up to the drain grace for the I/O tasks, then abort them.
    ///
    /// Descendants of the child can hold its pipes open after it exits.
    async fn finish_capture(&self, id: &ExecutionId, tasks: [Option<JoinHandle<()>>; 3]) {
        let mut tasks: Vec<JoinHandle<()>> = tasks.into_iter().flatten().collect();
        let grace = self.config.drain_grace();
        let drained = tokio::time::timeout(grace, async {
            for task in &mut tasks {
                let _ = task.await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::debug!(
                execution_id = %id,
                grace_ms = grace.as_millis() as u64,
                "output still open after exit; abandoning"
            );
        }
        for task in &tasks {
            task.abort();
        }
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// Write `input` to the child's stdin on a separate task, then close it
fn feed_stdin(child: &mut Child, input: Option<String>) -> Option<JoinHandle<()>> {
    let mut pipe = child.stdin.take()?;
    let input = input?;
    Some(tokio::spawn(async move {
        if let Err(e) = pipe.write_all(input.as_bytes()).await {
            // A process that exits without reading its input closes the pipe.
            tracing::debug!(error = %e, "stdin write failed");
            return;
        }
        let _ = pipe.shutdown().await;
    }))
}

/// Kill the child and reap it, returning its exit status if available
async fn terminate(child: &mut Child) -> Option<ExitStatus> {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "kill failed; process may have already exited");
    }
    child.wait().await.ok()
}
