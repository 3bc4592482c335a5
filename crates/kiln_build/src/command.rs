//! External command execution for build steps.

use std::io;
use std::process::Stdio;
use tokio::process::Command;

/// Output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard output followed by standard error
    pub combined: String,
}

/// Error from running an external command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        /// Rendered command line
        command: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The program exited unsuccessfully
    #[error("`{command}` exited with {status}\nOutput: {output}")]
    Failed {
        /// Rendered command line
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Human-readable exit status
        status: String,
        /// Combined stdout and stderr
        output: String,
    },

    /// Filesystem preparation failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    /// Combined output of the failed command, if any
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Failed { output, .. } => Some(output),
            _ => None,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Render a command line for diagnostics
#[must_use]
pub fn render(cmd: &Command) -> String {
    let std = cmd.as_std();
    let mut line = std.get_program().to_string_lossy().into_owned();
    for arg in std.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Run `cmd` to completion, capturing its output.
///
/// # Errors
///
/// Returns `Spawn` if the program cannot be started, `Failed` on a
/// non-zero exit with the combined output attached
pub async fn run(mut cmd: Command) -> Result<CommandOutput, CommandError> {
    let command = render(&cmd);
    tracing::debug!(command = %command, "running build command");

    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let mut combined = stdout.clone();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        let code = output.status.code();
        return Err(CommandError::Failed {
            command,
            code,
            status: describe_code(code),
            output: combined,
        });
    }

    Ok(CommandOutput { stdout, combined })
}
