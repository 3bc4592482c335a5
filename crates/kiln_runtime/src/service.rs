//! Caller-facing operations.
//!
//! [`KilnService`] ties the catalog, build orchestrator, execution engine
//! and execution log together. Raw string identifiers from callers are
//! parsed here, so nothing below this layer sees an unchecked id.

use crate::engine::{ExecutionEngine, ExecutionError};
use chrono::{DateTime, Utc};
use kiln_build::{
    BuildError, BuildLayout, BuildOrchestrator, Compiler, GitFetcher, GoCompiler, InFlightBuilds,
    SourceFetcher,
};
use kiln_core::{
    Artifact, ArtifactId, ArtifactPatch, ArtifactSpec, ArtifactState, CoreError, ExecutionId,
    ExecutionRecord, ExecutionRequest, KilnConfig,
};
use kiln_storage::snapshot::SnapshotError;
use kiln_storage::{ArtifactCatalog, CatalogError, ExecutionLog, ExecutionLogError};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Service result type
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service error
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Identifier failed the path-safety check
    #[error("Invalid identifier: {reason}")]
    InvalidIdentifier {
        /// Why it was rejected
        reason: String,
    },

    /// Input failed validation
    #[error("{0}")]
    Validation(CoreError),

    /// Unknown artifact or execution
    #[error("{kind} not found: {id}")]
    NotFound {
        /// `artifact` or `execution`
        kind: &'static str,
        /// Requested id
        id: String,
    },

    /// Identifier already in use
    #[error("Artifact already exists: {id}")]
    AlreadyExists {
        /// Conflicting id
        id: ArtifactId,
    },

    /// Artifact has no runnable binary
    #[error("Artifact {id} is not runnable (state: {state})")]
    NotRunnable {
        /// Artifact id
        id: ArtifactId,
        /// Current state
        state: ArtifactState,
    },

    /// A build of this artifact is already running
    #[error("Build already in progress for artifact {id}")]
    BuildInProgress {
        /// Artifact id
        id: ArtifactId,
    },

    /// Build failed; the artifact is now `failed`
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Persistence failure
    #[error("Storage failure: {0}")]
    Storage(#[from] SnapshotError),

    /// Process could not be started
    #[error(transparent)]
    Launch(ExecutionError),

    /// Background build task ended abnormally
    #[error("Build task failed: {reason}")]
    TaskFailed {
        /// Join error message
        reason: String,
    },
}

impl From<CoreError> for ServiceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidId { reason } => Self::InvalidIdentifier { reason },
            other => Self::Validation(other),
        }
    }
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound { id } => Self::NotFound {
                kind: "artifact",
                id: id.to_string(),
            },
            CatalogError::AlreadyExists { id } => Self::AlreadyExists { id },
            CatalogError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<ExecutionLogError> for ServiceError {
    fn from(err: ExecutionLogError) -> Self {
        match err {
            ExecutionLogError::NotFound { id } => Self::NotFound {
                kind: "execution",
                id: id.to_string(),
            },
            ExecutionLogError::AlreadyExists { id } | ExecutionLogError::NotFinished { id } => {
                let reason = format!("cannot record {}", id);
                Self::Validation(CoreError::validation("execution", reason))
            }
            ExecutionLogError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<ExecutionError> for ServiceError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::InvalidRequest(e) => e.into(),
            ExecutionError::NotFound { id } => Self::NotFound {
                kind: "execution",
                id: id.to_string(),
            },
            launch @ ExecutionError::LaunchFailure { .. } => Self::Launch(launch),
        }
    }
}

/// Handle on a background build
#[derive(Debug)]
pub struct BuildTicket {
    artifact: Artifact,
    handle: JoinHandle<ServiceResult<Artifact>>,
}

impl BuildTicket {
    /// The artifact as it was when the build was accepted (`building`)
    #[must_use]
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Wait for the build and return the artifact as recorded afterwards
    ///
    /// # Errors
    ///
    /// Returns `Build` if a stage failed (the artifact is then `failed`),
    /// or the storage error that prevented recording the outcome
    pub async fn wait(self) -> ServiceResult<Artifact> {
        self.handle.await.map_err(|e| ServiceError::TaskFailed {
            reason: e.to_string(),
        })?
    }
}

/// Liveness summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Always `ok` while the service answers
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Registered artifacts
    pub artifacts: usize,
    /// Builds in flight
    pub builds_in_progress: usize,
    /// Executions in flight
    pub running_executions: usize,
    /// Configured concurrency hint
    pub max_concurrent: usize,
    /// Report time
    pub timestamp: DateTime<Utc>,
}

/// The kiln service
#[derive(Clone)]
pub struct KilnService {
    catalog: Arc<ArtifactCatalog>,
    executions: Arc<ExecutionLog>,
    orchestrator: Arc<BuildOrchestrator>,
    builds: InFlightBuilds,
    engine: Arc<ExecutionEngine>,
    config: Arc<KilnConfig>,
}

impl KilnService {
    /// Open the service with the git and go adapters
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the data directory cannot be opened
    pub async fn open(config: KilnConfig) -> ServiceResult<Self> {
        Self::with_toolchain(config, Arc::new(GitFetcher::new()), Arc::new(GoCompiler::new())).await
    }

    /// Open the service with custom fetch and compile adapters
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the data directory cannot be opened
    pub async fn with_toolchain(
        config: KilnConfig,
        fetcher: Arc<dyn SourceFetcher>,
        compiler: Arc<dyn Compiler>,
    ) -> ServiceResult<Self> {
        let data_dir = &config.storage.data_dir;
        let catalog = ArtifactCatalog::open(data_dir).await?;
        let executions = ExecutionLog::open(data_dir).await?;
        let layout = BuildLayout::new(&config.storage.repo_dir, &config.storage.binary_dir);

        tracing::info!(
            data_dir = %data_dir.display(),
            repo_dir = %layout.repo_dir.display(),
            binary_dir = %layout.binary_dir.display(),
            "kiln service ready"
        );

        Ok(Self {
            catalog: Arc::new(catalog),
            executions: Arc::new(executions),
            orchestrator: Arc::new(BuildOrchestrator::new(fetcher, compiler, layout)),
            builds: InFlightBuilds::new(),
            engine: Arc::new(ExecutionEngine::new(config.executor.clone())),
            config: Arc::new(config),
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    /// Artifact catalog
    #[must_use]
    pub fn catalog(&self) -> &ArtifactCatalog {
        &self.catalog
    }

    /// Execution engine
    #[must_use]
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Register a new artifact in state `pending`
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an invalid spec, or `Storage`
    pub async fn register_artifact(&self, spec: ArtifactSpec) -> ServiceResult<Artifact> {
        spec.validate()?;
        let id = self
            .catalog
            .register(Artifact::from_spec(ArtifactId::new(), spec))
            .await?;
        tracing::info!(artifact_id = %id, "artifact registered");
        Ok(self.catalog.get(&id).await?)
    }

    /// All artifacts in registration order
    pub async fn list_artifacts(&self) -> Vec<Artifact> {
        self.catalog.list().await
    }

    /// Look up one artifact
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` or `NotFound`
    pub async fn get_artifact(&self, id: &str) -> ServiceResult<Artifact> {
        let id = ArtifactId::parse(id)?;
        Ok(self.catalog.get(&id).await?)
    }

    /// Edit caller-owned fields of an artifact
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier`, `Validation`, `NotFound` or `Storage`
    pub async fn update_artifact(&self, id: &str, patch: ArtifactPatch) -> ServiceResult<Artifact> {
        let id = ArtifactId::parse(id)?;
        patch.validate()?;
        let updated = self.catalog.modify(&id, |artifact| artifact.apply(patch)).await?;
        tracing::info!(artifact_id = %id, "artifact updated");
        Ok(updated)
    }

    /// Remove an artifact and its produced binary.
    ///
    /// The identifier is checked before any filesystem access.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier`, `NotFound` or `Storage`
    pub async fn delete_artifact(&self, id: &str) -> ServiceResult<Artifact> {
        let id = ArtifactId::parse(id)?;
        let removed = self.catalog.delete(&id).await?;

        remove_binary(&id, &self.orchestrator.layout().binary_path(&id)).await;
        tracing::info!(artifact_id = %id, "artifact deleted");
        Ok(removed)
    }

    /// Start a background build.
    ///
    /// The artifact enters `building` before this returns. The outcome is
    /// written to the catalog when the build ends, whether or not anyone
    /// waits on the ticket.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier`, `NotFound`, `BuildInProgress` or `Storage`
    pub async fn request_build(&self, id: &str) -> ServiceResult<BuildTicket> {
        let id = ArtifactId::parse(id)?;
        let permit = self
            .builds
            .try_acquire(&id)
            .ok_or_else(|| ServiceError::BuildInProgress { id: id.clone() })?;

        // The in-memory transition survives a snapshot failure, so the build
        // must still run to move the artifact out of `building`.
        let artifact = match self.catalog.modify(&id, Artifact::mark_building).await {
            Ok(artifact) => artifact,
            Err(CatalogError::Storage(e)) => {
                tracing::warn!(
                    artifact_id = %id,
                    error = %e,
                    "building state not persisted; building anyway"
                );
                self.catalog.get(&id).await?
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(artifact_id = %id, "build accepted");

        let catalog = Arc::clone(&self.catalog);
        let orchestrator = Arc::clone(&self.orchestrator);
        let snapshot = artifact.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let outcome = orchestrator.build(&snapshot).await;
            let binary = orchestrator.layout().binary_path(&snapshot.id);
            record_build_outcome(&catalog, &snapshot.id, &binary, outcome).await
        });

        Ok(BuildTicket { artifact, handle })
    }

    /// Run a `ready` artifact to completion and record the result
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier`, `NotFound`, `NotRunnable`,
    /// `Validation` for a malformed request, or `Launch`
    pub async fn execute(&self, request: ExecutionRequest) -> ServiceResult<ExecutionRecord> {
        self.execute_with(&CancellationToken::new(), request, None).await
    }

    /// Like [`execute`](Self::execute), under a caller context and with an
    /// optional observer that receives the execution id once registered
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute)
    pub async fn execute_with(
        &self,
        ctx: &CancellationToken,
        request: ExecutionRequest,
        observer: Option<oneshot::Sender<ExecutionId>>,
    ) -> ServiceResult<ExecutionRecord> {
        let id = ArtifactId::parse(&request.artifact_id)?;
        let artifact = self.catalog.get(&id).await?;
        let binary = artifact
            .runnable_binary()
            .ok_or_else(|| ServiceError::NotRunnable {
                id: id.clone(),
                state: artifact.state,
            })?;

        let record = self
            .engine
            .execute_observed(ctx, binary, &request, observer)
            .await?;

        if let Err(e) = self.executions.save(&record).await {
            tracing::error!(execution_id = %record.id, error = %e, "failed to record execution");
        }
        Ok(record)
    }

    /// Look up a finished execution
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier`, `NotFound` or `Storage`
    pub async fn get_execution(&self, id: &str) -> ServiceResult<ExecutionRecord> {
        let id = ExecutionId::parse(id)?;
        Ok(self.executions.get(&id).await?)
    }

    /// Stop a running execution
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier`, or `NotFound` if the execution is
    /// unknown or already finished
    pub fn stop_execution(&self, id: &str) -> ServiceResult<()> {
        let id = ExecutionId::parse(id)?;
        Ok(self.engine.stop(&id)?)
    }

    /// Liveness summary
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            artifacts: self.catalog.len().await,
            builds_in_progress: self.builds.len(),
            running_executions: self.engine.registry().len(),
            max_concurrent: self.config.executor.max_concurrent,
            timestamp: Utc::now(),
        }
    }
}

/// Apply a build outcome to the catalog.
///
/// Only lifecycle fields are written, so edits made while the build ran
/// are kept. If the artifact was deleted meanwhile, `binary` is removed.
async fn record_build_outcome(
    catalog: &ArtifactCatalog,
    id: &ArtifactId,
    binary: &Path,
    outcome: Result<Artifact, BuildError>,
) -> ServiceResult<Artifact> {
    let result = match outcome {
        Ok(built) => {
            let recorded = catalog
                .modify(id, |artifact| {
                    artifact.state = built.state;
                    artifact.binary_location = built.binary_location.clone();
                    artifact.version = built.version.clone();
                    artifact.last_built = built.last_built;
                })
                .await;
            recorded.map_err(ServiceError::from)
        }
        Err(e) => {
            tracing::error!(
                artifact_id = %id,
                stage = %e.stage(),
                error = %e,
                output = e.output().unwrap_or_default(),
                "build failed"
            );
            match catalog.modify(id, Artifact::mark_failed).await {
                Ok(_) => Err(ServiceError::Build(e)),
                Err(store) => Err(store.into()),
            }
        }
    };

    match &result {
        Err(ServiceError::NotFound { .. }) => {
            tracing::warn!(artifact_id = %id, "artifact deleted during build; outcome dropped");
            remove_binary(id, binary).await;
        }
        Err(ServiceError::Storage(e)) => {
            tracing::error!(artifact_id = %id, error = %e, "failed to persist build outcome");
        }
        _ => {}
    }
    result
}

/// Best-effort removal of a produced binary
async fn remove_binary(id: &ArtifactId, binary: &Path) {
    match tokio::fs::remove_file(binary).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(
                artifact_id = %id,
                path = %binary.display(),
                error = %e,
                "failed to remove binary"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiln_build::CommandError;
    use kiln_core::{ExecutionStatus, StorageConfig};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct StaticFetcher {
        revision: String,
        fail: bool,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn clone_or_update(
            &self,
            _repo_url: &str,
            _branch: &str,
            _target: &Path,
        ) -> Result<(), CommandError> {
            if self.fail {
                return Err(CommandError::Failed {
                    command: "git clone".to_string(),
                    code: Some(128),
                    status: "exit code 128".to_string(),
                    output: "fatal: not found".to_string(),
                });
            }
            Ok(())
        }

        async fn revision(&self, _checkout: &Path) -> Result<String, CommandError> {
            Ok(self.revision.clone())
        }
    }

    /// Writes a placeholder output; optionally blocks until released
    struct PlaceholderCompiler {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl PlaceholderCompiler {
        fn new() -> Self {
            Self { gate: Mutex::new(None) }
        }

        fn gated(rx: oneshot::Receiver<()>) -> Self {
            Self {
                gate: Mutex::new(Some(rx)),
            }
        }
    }

    #[async_trait]
    impl Compiler for PlaceholderCompiler {
        async fn compile(
            &self,
            _source: &Path,
            _build_path: &str,
            output: &Path,
        ) -> Result<(), CommandError> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            tokio::fs::create_dir_all(output.parent().unwrap()).await.unwrap();
            tokio::fs::write(output, b"placeholder").await.unwrap();
            Ok(())
        }
    }

    fn config(dir: &TempDir) -> KilnConfig {
        KilnConfig {
            storage: StorageConfig::rooted_at(dir.path()),
            ..Default::default()
        }
    }

    async fn service(dir: &TempDir, fail_fetch: bool) -> KilnService {
        KilnService::with_toolchain(
            config(dir),
            Arc::new(StaticFetcher {
                revision: "abcdef1234567890".to_string(),
                fail: fail_fetch,
            }),
            Arc::new(PlaceholderCompiler::new()),
        )
        .await
        .unwrap()
    }

    fn spec() -> ArtifactSpec {
        ArtifactSpec::new("hello", "https://example.com/hello.git", "main")
    }

    /// Point an artifact at a binary directly, bypassing the build
    async fn make_ready(service: &KilnService, id: &ArtifactId, binary: &str) {
        service
            .catalog()
            .modify(id, |a| {
                a.mark_ready(PathBuf::from(binary), "deadbeef".to_string(), Utc::now());
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;

        let artifact = svc.register_artifact(spec()).await.unwrap();
        assert_eq!(artifact.state, ArtifactState::Pending);
        assert!(artifact.binary_location.is_none());

        let fetched = svc.get_artifact(artifact.id.as_str()).await.unwrap();
        assert_eq!(fetched, artifact);
        assert_eq!(svc.list_artifacts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_spec() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;

        let err = svc
            .register_artifact(ArtifactSpec::new(
                "x",
                "https://example.com/x.git",
                "--upload-pack=evil",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(svc.list_artifacts().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;
        let artifact = svc.register_artifact(spec()).await.unwrap();

        let patch = ArtifactPatch {
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        let updated = svc.update_artifact(artifact.id.as_str(), patch).await.unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.repo_url, artifact.repo_url);
        assert_eq!(updated.created_at, artifact.created_at);
    }

    #[tokio::test]
    async fn test_delete_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;

        let err = svc.delete_artifact("../etc").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidIdentifier { .. }));
    }

    #[tokio::test]
    async fn test_delete_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;

        let err = svc.delete_artifact("missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { kind: "artifact", .. }));
    }

    #[tokio::test]
    async fn test_build_success() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;
        let artifact = svc.register_artifact(spec()).await.unwrap();

        let ticket = svc.request_build(artifact.id.as_str()).await.unwrap();
        assert_eq!(ticket.artifact().state, ArtifactState::Building);

        let built = ticket.wait().await.unwrap();
        assert_eq!(built.state, ArtifactState::Ready);
        assert_eq!(built.version.as_deref(), Some("abcdef12"));
        let location = built.binary_location.clone().unwrap();
        assert!(location.exists());

        let stored = svc.get_artifact(artifact.id.as_str()).await.unwrap();
        assert_eq!(stored, built);

        svc.delete_artifact(artifact.id.as_str()).await.unwrap();
        assert!(!location.exists());
    }

    #[tokio::test]
    async fn test_build_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, true).await;
        let artifact = svc.register_artifact(spec()).await.unwrap();

        let err = svc
            .request_build(artifact.id.as_str())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Build(BuildError::Fetch { .. })));

        let stored = svc.get_artifact(artifact.id.as_str()).await.unwrap();
        assert_eq!(stored.state, ArtifactState::Failed);
        assert!(stored.binary_location.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_build_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (release, gate) = oneshot::channel();
        let svc = KilnService::with_toolchain(
            config(&dir),
            Arc::new(StaticFetcher {
                revision: "0123456789".to_string(),
                fail: false,
            }),
            Arc::new(PlaceholderCompiler::gated(gate)),
        )
        .await
        .unwrap();
        let artifact = svc.register_artifact(spec()).await.unwrap();

        let first = svc.request_build(artifact.id.as_str()).await.unwrap();
        let err = svc.request_build(artifact.id.as_str()).await.unwrap_err();
        assert!(matches!(err, ServiceError::BuildInProgress { .. }));
        assert_eq!(svc.health().await.builds_in_progress, 1);

        release.send(()).unwrap();
        first.wait().await.unwrap();
        assert_eq!(svc.health().await.builds_in_progress, 0);
        assert!(svc.request_build(artifact.id.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn test_build_keeps_concurrent_edits() {
        let dir = tempfile::tempdir().unwrap();
        let (release, gate) = oneshot::channel();
        let svc = KilnService::with_toolchain(
            config(&dir),
            Arc::new(StaticFetcher {
                revision: "0123456789".to_string(),
                fail: false,
            }),
            Arc::new(PlaceholderCompiler::gated(gate)),
        )
        .await
        .unwrap();
        let artifact = svc.register_artifact(spec()).await.unwrap();

        let ticket = svc.request_build(artifact.id.as_str()).await.unwrap();
        let patch = ArtifactPatch {
            description: Some("edited mid-build".to_string()),
            ..Default::default()
        };
        svc.update_artifact(artifact.id.as_str(), patch).await.unwrap();
        release.send(()).unwrap();

        let built = ticket.wait().await.unwrap();
        assert_eq!(built.description, "edited mid-build");
        assert_eq!(built.version.as_deref(), Some("01234567"));
    }

    #[tokio::test]
    async fn test_build_proceeds_when_snapshot_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;
        let artifact = svc.register_artifact(spec()).await.unwrap();
        make_ready(&svc, &artifact.id, "/bin/sh").await;

        // A non-empty directory where the snapshot belongs makes the rename fail.
        let blocker = svc.catalog().snapshot_path().to_path_buf();
        std::fs::remove_file(&blocker).unwrap();
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        let ticket = svc.request_build(artifact.id.as_str()).await.unwrap();
        assert_eq!(ticket.artifact().state, ArtifactState::Building);

        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));

        let stored = svc.get_artifact(artifact.id.as_str()).await.unwrap();
        assert_eq!(stored.state, ArtifactState::Ready);
        assert!(stored.binary_location.is_some());
        assert_eq!(svc.health().await.builds_in_progress, 0);
    }

    #[tokio::test]
    async fn test_delete_during_build_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let (release, gate) = oneshot::channel();
        let svc = KilnService::with_toolchain(
            config(&dir),
            Arc::new(StaticFetcher {
                revision: "0123456789".to_string(),
                fail: false,
            }),
            Arc::new(PlaceholderCompiler::gated(gate)),
        )
        .await
        .unwrap();
        let artifact = svc.register_artifact(spec()).await.unwrap();
        let binary = svc.config().storage.binary_dir.join(artifact.id.as_str());

        let ticket = svc.request_build(artifact.id.as_str()).await.unwrap();
        svc.delete_artifact(artifact.id.as_str()).await.unwrap();
        release.send(()).unwrap();

        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { kind: "artifact", .. }));
        assert!(!binary.exists());
    }

    #[tokio::test]
    async fn test_execute_requires_ready() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;
        let artifact = svc.register_artifact(spec()).await.unwrap();

        let err = svc
            .execute(ExecutionRequest::new(artifact.id.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::NotRunnable {
                state: ArtifactState::Pending,
                ..
            }
        ));

        let err = svc.execute(ExecutionRequest::new("missing")).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_records_result() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;
        let artifact = svc.register_artifact(spec()).await.unwrap();
        make_ready(&svc, &artifact.id, "/bin/sh").await;

        let request = ExecutionRequest::new(artifact.id.as_str())
            .with_args(["-c", r#"printf '%s' "$1""#, "sh", "hello"]);
        let record = svc.execute(request).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.exit_code, 0);
        assert_eq!(record.stdout, "hello");

        let stored = svc.get_execution(record.id.as_str()).await.unwrap();
        assert_eq!(stored, record);

        // Survives a restart.
        drop(svc);
        let reopened = service(&dir, false).await;
        assert_eq!(reopened.get_execution(record.id.as_str()).await.unwrap(), record);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_execution() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;
        let artifact = svc.register_artifact(spec()).await.unwrap();
        make_ready(&svc, &artifact.id, "/bin/sh").await;

        let (tx, rx) = oneshot::channel();
        let request =
            ExecutionRequest::new(artifact.id.as_str()).with_args(["-c", "exec sleep 10"]);
        let runner = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.execute_with(&CancellationToken::new(), request, Some(tx))
                    .await
            })
        };

        let id = rx.await.unwrap();
        assert_eq!(svc.health().await.running_executions, 1);
        svc.stop_execution(id.as_str()).unwrap();

        let record = runner.await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(matches!(
            svc.stop_execution(id.as_str()),
            Err(ServiceError::NotFound { kind: "execution", .. })
        ));
    }

    #[tokio::test]
    async fn test_execution_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;

        assert!(matches!(
            svc.get_execution("../../etc/passwd").await,
            Err(ServiceError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            svc.get_execution("unknown").await,
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(svc.stop_execution("unknown"), Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, false).await;
        svc.register_artifact(spec()).await.unwrap();

        let health = svc.health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.artifacts, 1);
        assert_eq!(health.running_executions, 0);
        assert_eq!(health.max_concurrent, 10);
    }
}
