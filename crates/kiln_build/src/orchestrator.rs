//! Build orchestration.
//!
//! Drives one artifact through fetch, revision read, compile and install.
//! The orchestrator never touches the catalog: it returns the built
//! artifact or a stage-tagged error, and the caller records the outcome.

use crate::command::CommandError;
use crate::compiler::Compiler;
use crate::fetcher::SourceFetcher;
use chrono::Utc;
use kiln_core::artifact::version_from_revision;
use kiln_core::{Artifact, ArtifactId};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pipeline stage a build failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    /// Clone or update of the source
    Fetch,
    /// Reading the checked-out revision
    Revision,
    /// Toolchain invocation
    Compile,
    /// Placing the executable
    Install,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetch => "fetch",
            Self::Revision => "revision",
            Self::Compile => "compile",
            Self::Install => "install",
        };
        f.write_str(s)
    }
}

/// Build error, tagged by stage
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Source fetch failed
    #[error("fetch failed for {artifact_id}: {source}")]
    Fetch {
        /// Artifact being built
        artifact_id: ArtifactId,
        /// Underlying command error
        #[source]
        source: CommandError,
    },

    /// Revision could not be read
    #[error("revision read failed for {artifact_id}: {source}")]
    Revision {
        /// Artifact being built
        artifact_id: ArtifactId,
        /// Underlying command error
        #[source]
        source: CommandError,
    },

    /// Compilation failed
    #[error("compile failed for {artifact_id}: {source}")]
    Compile {
        /// Artifact being built
        artifact_id: ArtifactId,
        /// Underlying command error
        #[source]
        source: CommandError,
    },

    /// Executable could not be installed
    #[error("install failed for {artifact_id} at {}: {source}", path.display())]
    Install {
        /// Artifact being built
        artifact_id: ArtifactId,
        /// Expected executable location
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Stage that failed
    #[must_use]
    pub fn stage(&self) -> BuildStage {
        match self {
            Self::Fetch { .. } => BuildStage::Fetch,
            Self::Revision { .. } => BuildStage::Revision,
            Self::Compile { .. } => BuildStage::Compile,
            Self::Install { .. } => BuildStage::Install,
        }
    }

    /// Combined output of the failing command, if any
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Fetch { source, .. }
            | Self::Revision { source, .. }
            | Self::Compile { source, .. } => source.output(),
            Self::Install { .. } => None,
        }
    }
}

/// Where checkouts and executables live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    /// Root for source checkouts
    pub repo_dir: PathBuf,
    /// Root for produced executables
    pub binary_dir: PathBuf,
}

impl BuildLayout {
    /// Create a layout
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>, binary_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            binary_dir: binary_dir.into(),
        }
    }

    /// Per-artifact checkout directory
    #[must_use]
    pub fn checkout_dir(&self, id: &ArtifactId) -> PathBuf {
        self.repo_dir.join(format!("repo_{}", id))
    }

    /// Per-artifact executable path
    #[must_use]
    pub fn binary_path(&self, id: &ArtifactId) -> PathBuf {
        self.binary_dir.join(id.as_str())
    }
}

/// Coordinates a [`SourceFetcher`] and a [`Compiler`]
#[derive(Clone)]
pub struct BuildOrchestrator {
    fetcher: Arc<dyn SourceFetcher>,
    compiler: Arc<dyn Compiler>,
    layout: BuildLayout,
}

impl BuildOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        compiler: Arc<dyn Compiler>,
        layout: BuildLayout,
    ) -> Self {
        Self {
            fetcher,
            compiler,
            layout,
        }
    }

    /// Storage layout
    #[must_use]
    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    /// Build `artifact`, returning a copy marked ready.
    ///
    /// `artifact` itself is never modified; on error nothing about it changes.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage with its diagnostics
    pub async fn build(&self, artifact: &Artifact) -> Result<Artifact, BuildError> {
        let id = &artifact.id;
        let checkout = self.layout.checkout_dir(id);
        let output = self.layout.binary_path(id);

        tracing::info!(
            artifact_id = %id,
            repo_url = %artifact.repo_url,
            branch = %artifact.branch,
            "build started"
        );

        self.fetcher
            .clone_or_update(&artifact.repo_url, &artifact.branch, &checkout)
            .await
            .map_err(|source| BuildError::Fetch {
                artifact_id: id.clone(),
                source,
            })?;

        let revision = self
            .fetcher
            .revision(&checkout)
            .await
            .map_err(|source| BuildError::Revision {
                artifact_id: id.clone(),
                source,
            })?;
        let version = version_from_revision(&revision);
        if version.is_empty() {
            return Err(BuildError::Revision {
                artifact_id: id.clone(),
                source: CommandError::io(
                    "source control reported an empty revision",
                    io::Error::from(io::ErrorKind::InvalidData),
                ),
            });
        }

        self.compiler
            .compile(&checkout, &artifact.build_path, &output)
            .await
            .map_err(|source| BuildError::Compile {
                artifact_id: id.clone(),
                source,
            })?;

        mark_executable(&output)
            .await
            .map_err(|source| BuildError::Install {
                artifact_id: id.clone(),
                path: output.clone(),
                source,
            })?;

        let mut built = artifact.clone();
        built.mark_ready(output, version, Utc::now());
        tracing::info!(
            artifact_id = %id,
            version = built.version.as_deref().unwrap_or_default(),
            "build finished"
        );
        Ok(built)
    }
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn mark_executable(path: &Path) -> io::Result<()> {
    tokio::fs::metadata(path).await.map(|_| ())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiln_core::{ArtifactSpec, ArtifactState};
    use std::sync::Mutex;

    /// Fetcher that records calls and returns a fixed revision
    pub(crate) struct FakeFetcher {
        pub revision: String,
        pub fail_fetch: bool,
        pub calls: Mutex<Vec<PathBuf>>,
    }

    impl FakeFetcher {
        pub(crate) fn new(revision: &str) -> Self {
            Self {
                revision: revision.to_string(),
                fail_fetch: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn clone_or_update(
            &self,
            _repo_url: &str,
            _branch: &str,
            target: &Path,
        ) -> Result<(), CommandError> {
            self.calls.lock().unwrap().push(target.to_path_buf());
            if self.fail_fetch {
                return Err(CommandError::Failed {
                    command: "git clone".to_string(),
                    code: Some(128),
                    status: "exit code 128".to_string(),
                    output: "fatal: repository not found".to_string(),
                });
            }
            Ok(())
        }

        async fn revision(&self, _checkout: &Path) -> Result<String, CommandError> {
            Ok(self.revision.clone())
        }
    }

    /// Compiler that writes a placeholder file, or fails
    pub(crate) struct FakeCompiler {
        pub fail: bool,
    }

    #[async_trait]
    impl Compiler for FakeCompiler {
        async fn compile(
            &self,
            _source: &Path,
            _build_path: &str,
            output: &Path,
        ) -> Result<(), CommandError> {
            if self.fail {
                return Err(CommandError::Failed {
                    command: "go build".to_string(),
                    code: Some(1),
                    status: "exit code 1".to_string(),
                    output: "main.go:1: syntax error".to_string(),
                });
            }
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await.unwrap();
            }
            tokio::fs::write(output, b"#!/bin/sh\n").await.unwrap();
            Ok(())
        }
    }

    fn make_artifact() -> Artifact {
        Artifact::from_spec(
            ArtifactId::new(),
            ArtifactSpec::new("hello", "https://example.com/hello.git", "main"),
        )
    }

    fn orchestrator(dir: &Path, fetcher: FakeFetcher, compiler: FakeCompiler) -> BuildOrchestrator {
        BuildOrchestrator::new(
            Arc::new(fetcher),
            Arc::new(compiler),
            BuildLayout::new(dir.join("repos"), dir.join("binaries")),
        )
    }

    #[test]
    fn test_layout_paths() {
        let layout = BuildLayout::new("/data/repos", "/data/binaries");
        let id = ArtifactId::parse("abc").unwrap();
        assert_eq!(layout.checkout_dir(&id), PathBuf::from("/data/repos/repo_abc"));
        assert_eq!(layout.binary_path(&id), PathBuf::from("/data/binaries/abc"));
    }

    #[tokio::test]
    async fn test_successful_build_sets_version_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            dir.path(),
            FakeFetcher::new("abcdef1234567890\n"),
            FakeCompiler { fail: false },
        );
        let artifact = make_artifact();

        let built = orch.build(&artifact).await.unwrap();
        assert_eq!(built.state, ArtifactState::Ready);
        assert_eq!(built.version.as_deref(), Some("abcdef12"));
        assert_eq!(
            built.binary_location.as_deref(),
            Some(orch.layout().binary_path(&artifact.id).as_path())
        );
        assert!(built.last_built.is_some());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(orch.layout().binary_path(&artifact.id))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = FakeFetcher::new("abcdef12");
        fetcher.fail_fetch = true;
        let orch = orchestrator(dir.path(), fetcher, FakeCompiler { fail: false });
        let artifact = make_artifact();

        let err = orch.build(&artifact).await.unwrap_err();
        assert_eq!(err.stage(), BuildStage::Fetch);
        assert_eq!(err.output(), Some("fatal: repository not found"));
        assert!(!orch.layout().binary_path(&artifact.id).exists());
    }

    #[tokio::test]
    async fn test_compile_failure_leaves_artifact_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            dir.path(),
            FakeFetcher::new("abcdef12"),
            FakeCompiler { fail: true },
        );

        let mut artifact = make_artifact();
        artifact.mark_ready(PathBuf::from("/previous/binary"), "00000000".to_string(), Utc::now());
        let before = artifact.clone();

        let err = orch.build(&artifact).await.unwrap_err();
        assert_eq!(err.stage(), BuildStage::Compile);
        assert!(err.output().unwrap().contains("syntax error"));
        assert_eq!(artifact, before);
    }

    #[tokio::test]
    async fn test_empty_revision_fails() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), FakeFetcher::new("  \n"), FakeCompiler { fail: false });

        let err = orch.build(&make_artifact()).await.unwrap_err();
        assert_eq!(err.stage(), BuildStage::Revision);
    }

    #[tokio::test]
    async fn test_checkout_is_per_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new("abcdef12"));
        let orch = BuildOrchestrator::new(
            fetcher.clone(),
            Arc::new(FakeCompiler { fail: false }),
            BuildLayout::new(dir.path().join("repos"), dir.path().join("binaries")),
        );

        let a = make_artifact();
        let b = make_artifact();
        orch.build(&a).await.unwrap();
        orch.build(&b).await.unwrap();

        let calls = fetcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1]);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(BuildStage::Compile.to_string(), "compile");
    }
}
