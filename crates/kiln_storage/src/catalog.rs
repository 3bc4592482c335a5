//! Artifact catalog.
//!
//! The whole catalog lives in memory behind a reader/writer lock and is
//! written through to a single JSON snapshot on every mutation. Writers
//! hold the exclusive lock across both the in-memory change and the
//! snapshot write, so two writers can never persist out of order.

use crate::snapshot::{self, SnapshotError};
use chrono::Utc;
use indexmap::IndexMap;
use kiln_core::{Artifact, ArtifactId};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Directory under the data root holding the snapshot
pub const METADATA_DIR: &str = "metadata";

/// Snapshot file name
pub const SNAPSHOT_FILE: &str = "artifacts.json";

/// Catalog error
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// No artifact with this id
    #[error("Artifact not found: {id}")]
    NotFound {
        /// Requested id
        id: ArtifactId,
    },

    /// Registration reused an id
    #[error("Artifact already exists: {id}")]
    AlreadyExists {
        /// Conflicting id
        id: ArtifactId,
    },

    /// Snapshot could not be read or written.
    ///
    /// On a failed write the in-memory catalog already holds the change;
    /// the next successful write brings the snapshot back in line.
    #[error("Catalog storage failure: {0}")]
    Storage(#[from] SnapshotError),
}

/// Concurrency-safe, snapshot-backed registry of artifacts
pub struct ArtifactCatalog {
    /// Snapshot location
    snapshot_path: PathBuf,
    /// Artifacts in registration order
    artifacts: RwLock<IndexMap<ArtifactId, Artifact>>,
}

impl ArtifactCatalog {
    /// Open the catalog stored under `data_dir`, loading any existing snapshot.
    ///
    /// A missing snapshot yields an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns error if the metadata directory cannot be created or the
    /// snapshot cannot be read or decoded
    pub async fn open(data_dir: &Path) -> Result<Self, CatalogError> {
        let dir = data_dir.join(METADATA_DIR);
        snapshot::ensure_dir(&dir).await?;

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let artifacts: IndexMap<ArtifactId, Artifact> =
            snapshot::read_optional(&snapshot_path).await?.unwrap_or_default();

        tracing::info!(
            path = %snapshot_path.display(),
            artifacts = artifacts.len(),
            "artifact catalog loaded"
        );

        Ok(Self {
            snapshot_path,
            artifacts: RwLock::new(artifacts),
        })
    }

    /// Snapshot file location
    #[must_use]
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Register a new artifact, stamping its timestamps.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the id is taken, or `Storage` if the
    /// snapshot write fails (the artifact stays registered in memory)
    pub async fn register(&self, mut artifact: Artifact) -> Result<ArtifactId, CatalogError> {
        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(&artifact.id) {
            return Err(CatalogError::AlreadyExists { id: artifact.id });
        }

        let now = Utc::now();
        artifact.created_at = now;
        artifact.updated_at = now;
        let id = artifact.id.clone();
        artifacts.insert(id.clone(), artifact);

        self.persist(&artifacts).await?;
        tracing::debug!(artifact_id = %id, "artifact registered");
        Ok(id)
    }

    /// Get an artifact by id
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such artifact exists
    pub async fn get(&self, id: &ArtifactId) -> Result<Artifact, CatalogError> {
        self.artifacts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound { id: id.clone() })
    }

    /// List all artifacts in registration order
    pub async fn list(&self) -> Vec<Artifact> {
        self.artifacts.read().await.values().cloned().collect()
    }

    /// Number of registered artifacts
    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    /// Whether the catalog is empty
    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }

    /// Replace an existing artifact.
    ///
    /// The stored id and creation time win over whatever `artifact` carries.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such artifact exists, or `Storage` if the
    /// snapshot write fails
    pub async fn update(
        &self,
        id: &ArtifactId,
        artifact: Artifact,
    ) -> Result<Artifact, CatalogError> {
        self.modify(id, move |current| {
            let created_at = current.created_at;
            *current = artifact;
            current.id = id.clone();
            current.created_at = created_at;
        })
        .await
    }

    /// Apply `f` to an existing artifact under the write lock.
    ///
    /// This is the read-modify-write primitive used for lifecycle
    /// transitions, so a transition never overwrites fields changed by a
    /// concurrent writer between a separate `get` and `update`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such artifact exists, or `Storage` if the
    /// snapshot write fails
    pub async fn modify<F>(&self, id: &ArtifactId, f: F) -> Result<Artifact, CatalogError>
    where
        F: FnOnce(&mut Artifact),
    {
        let mut artifacts = self.artifacts.write().await;
        let updated = {
            let current = artifacts
                .get_mut(id)
                .ok_or_else(|| CatalogError::NotFound { id: id.clone() })?;
            f(current);
            current.updated_at = Utc::now();
            current.clone()
        };

        self.persist(&artifacts).await?;
        Ok(updated)
    }

    /// Remove an artifact, returning what was stored
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such artifact exists, or `Storage` if the
    /// snapshot write fails
    pub async fn delete(&self, id: &ArtifactId) -> Result<Artifact, CatalogError> {
        let mut artifacts = self.artifacts.write().await;
        let removed = artifacts
            .shift_remove(id)
            .ok_or_else(|| CatalogError::NotFound { id: id.clone() })?;

        self.persist(&artifacts).await?;
        tracing::debug!(artifact_id = %id, "artifact deleted");
        Ok(removed)
    }

    /// Write the full catalog. Callers hold the write lock.
    async fn persist(
        &self,
        artifacts: &IndexMap<ArtifactId, Artifact>,
    ) -> Result<(), CatalogError> {
        if let Err(e) = snapshot::write_atomic(&self.snapshot_path, artifacts).await {
            tracing::error!(
                path = %self.snapshot_path.display(),
                error = %e,
                "catalog snapshot write failed; memory and disk diverge until the next write"
            );
            return Err(e.into());
        }
        Ok(())
    }
}
