//! Managed artifacts and their build lifecycle.

use crate::error::{CoreError, CoreResult};
use crate::id::ArtifactId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Number of revision characters kept as the artifact version
pub const VERSION_LEN: usize = 8;

/// Lifecycle state of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactState {
    /// Registered, never built
    Pending,
    /// A build is in flight
    Building,
    /// Last build succeeded; runnable
    Ready,
    /// Last build failed
    Failed,
}

impl ArtifactState {
    /// Whether an artifact in this state may be executed
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Registration input for a new artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Repository URL
    pub repo_url: String,
    /// Branch to build
    pub branch: String,
    /// Path inside the repository to build
    #[serde(default)]
    pub build_path: String,
}

impl ArtifactSpec {
    /// Create a spec with empty description and build path
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        repo_url: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            repo_url: repo_url.into(),
            branch: branch.into(),
            build_path: String::new(),
        }
    }

    /// Set the build subpath
    #[must_use]
    pub fn with_build_path(mut self, build_path: impl Into<String>) -> Self {
        self.build_path = build_path.into();
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Validate every field
    ///
    /// # Errors
    ///
    /// Returns the first field that fails validation
    pub fn validate(&self) -> CoreResult<()> {
        validate_name(&self.name)?;
        validate_description(&self.description)?;
        validate_repo_url(&self.repo_url)?;
        validate_branch(&self.branch)?;
        validate_build_path(&self.build_path)
    }
}

/// Caller-editable fields of an artifact. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPatch {
    /// New display name
    #[serde(default)]
    pub name: Option<String>,
    /// New description
    #[serde(default)]
    pub description: Option<String>,
    /// New repository URL
    #[serde(default)]
    pub repo_url: Option<String>,
    /// New branch
    #[serde(default)]
    pub branch: Option<String>,
    /// New build subpath
    #[serde(default)]
    pub build_path: Option<String>,
}

impl ArtifactPatch {
    /// Validate the fields that are present
    ///
    /// # Errors
    ///
    /// Returns the first field that fails validation
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        if let Some(url) = &self.repo_url {
            validate_repo_url(url)?;
        }
        if let Some(branch) = &self.branch {
            validate_branch(branch)?;
        }
        if let Some(path) = &self.build_path {
            validate_build_path(path)?;
        }
        Ok(())
    }

    /// Whether the patch changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.repo_url.is_none()
            && self.branch.is_none()
            && self.build_path.is_none()
    }
}

/// A managed build target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Immutable identifier
    pub id: ArtifactId,
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Repository URL
    pub repo_url: String,
    /// Branch to build
    pub branch: String,
    /// Path inside the repository to build
    #[serde(default)]
    pub build_path: String,
    /// Location of the produced executable; set iff `state == Ready`
    #[serde(default)]
    pub binary_location: Option<PathBuf>,
    /// Short revision of the source last compiled
    #[serde(default)]
    pub version: Option<String>,
    /// Lifecycle state
    pub state: ArtifactState,
    /// Time of the last successful build
    #[serde(default)]
    pub last_built: Option<DateTime<Utc>>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    /// Create a pending artifact from a registration spec
    #[must_use]
    pub fn from_spec(id: ArtifactId, spec: ArtifactSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: spec.name,
            description: spec.description,
            repo_url: spec.repo_url,
            branch: spec.branch,
            build_path: spec.build_path,
            binary_location: None,
            version: None,
            state: ArtifactState::Pending,
            last_built: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a caller patch
    pub fn apply(&mut self, patch: ArtifactPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(url) = patch.repo_url {
            self.repo_url = url;
        }
        if let Some(branch) = patch.branch {
            self.branch = branch;
        }
        if let Some(path) = patch.build_path {
            self.build_path = path;
        }
    }

    /// Enter the `building` state.
    ///
    /// The previous binary is no longer advertised while a build is in flight.
    pub fn mark_building(&mut self) {
        self.state = ArtifactState::Building;
        self.binary_location = None;
    }

    /// Record a successful build
    pub fn mark_ready(
        &mut self,
        binary_location: PathBuf,
        version: String,
        built_at: DateTime<Utc>,
    ) {
        self.state = ArtifactState::Ready;
        self.binary_location = Some(binary_location);
        self.version = Some(version);
        self.last_built = Some(built_at);
    }

    /// Record a failed build
    pub fn mark_failed(&mut self) {
        self.state = ArtifactState::Failed;
        self.binary_location = None;
    }

    /// Executable location if the artifact is runnable
    #[must_use]
    pub fn runnable_binary(&self) -> Option<&Path> {
        if self.state.is_runnable() {
            self.binary_location.as_deref()
        } else {
            None
        }
    }
}

/// Derive the artifact version from a source revision.
///
/// Keeps the first [`VERSION_LEN`] characters of the trimmed revision.
#[must_use]
pub fn version_from_revision(revision: &str) -> String {
    revision.trim().chars().take(VERSION_LEN).collect()
}

fn validate_name(name: &str) -> CoreResult<()> {
    let len = name.chars().count();
    if name.trim().is_empty() {
        return Err(CoreError::validation("name", "must not be empty"));
    }
    if len > 255 {
        return Err(CoreError::validation("name", "must be at most 255 characters"));
    }
    Ok(())
}

fn validate_description(description: &str) -> CoreResult<()> {
    if description.chars().count() > 1000 {
        return Err(CoreError::validation(
            "description",
            "must be at most 1000 characters",
        ));
    }
    Ok(())
}

fn validate_repo_url(url: &str) -> CoreResult<()> {
    if url.is_empty() {
        return Err(CoreError::validation("repo_url", "must not be empty"));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(CoreError::validation("repo_url", "must not contain whitespace"));
    }
    if url.starts_with('-') {
        return Err(CoreError::validation("repo_url", "must not start with '-'"));
    }
    Ok(())
}

fn validate_branch(branch: &str) -> CoreResult<()> {
    if branch.is_empty() {
        return Err(CoreError::validation("branch", "must not be empty"));
    }
    if branch.starts_with('-') {
        return Err(CoreError::validation("branch", "must not start with '-'"));
    }
    if branch.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CoreError::validation("branch", "must not contain whitespace"));
    }
    Ok(())
}

fn validate_build_path(path: &str) -> CoreResult<()> {
    let path = Path::new(path);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(CoreError::validation("build_path", "must not contain '..'"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::validation("build_path", "must be relative"));
            }
        }
    }
    Ok(())
}
