//! Compilation of fetched sources.

use crate::command::{self, CommandError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Compiles a checkout into a single executable
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile the package at `source/build_path` into `output`
    ///
    /// # Errors
    ///
    /// Returns error if the toolchain fails or the output cannot be placed
    async fn compile(
        &self,
        source: &Path,
        build_path: &str,
        output: &Path,
    ) -> Result<(), CommandError>;
}

/// [`Compiler`] backed by `go build`
#[derive(Debug, Clone)]
pub struct GoCompiler {
    /// Go executable
    program: PathBuf,
}

impl GoCompiler {
    /// Use `go` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("go"),
        }
    }

    /// Use a specific go executable
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GoCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Compiler for GoCompiler {
    async fn compile(
        &self,
        source: &Path,
        build_path: &str,
        output: &Path,
    ) -> Result<(), CommandError> {
        let package_dir = source.join(build_path);
        if !package_dir.is_dir() {
            return Err(CommandError::io(
                format!("build path {} is not a directory", package_dir.display()),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        // The toolchain runs inside the package directory; a relative output
        // path would land there instead of under the binary root.
        let output = std::path::absolute(output)
            .map_err(|e| CommandError::io(format!("failed to resolve {}", output.display()), e))?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| {
                    CommandError::io(format!("failed to create {}", parent.display()), e)
                })?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("build")
            .arg("-o")
            .arg(&output)
            .arg(".")
            .current_dir(&package_dir)
            .env("CGO_ENABLED", "0");
        command::run(cmd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_build_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = GoCompiler::new()
            .compile(dir.path(), "cmd/missing", &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Io { .. }));
        assert!(err.to_string().contains("cmd/missing"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_toolchain_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // `false` stands in for a toolchain that rejects the package.
        let err = GoCompiler::with_program("false")
            .compile(dir.path(), "", &dir.path().join("bin").join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Failed { .. }));
        assert!(dir.path().join("bin").is_dir());
    }
}
