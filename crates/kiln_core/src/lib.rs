//! Kiln Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Everything here is serializable and shared by storage, build, runtime and server.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod execution;
pub mod id;

// Re-exports
pub use artifact::{Artifact, ArtifactPatch, ArtifactSpec, ArtifactState};
pub use config::{ExecutorConfig, KilnConfig, ServerConfig, StorageConfig};
pub use error::{CoreError, CoreResult};
pub use execution::{EnvVar, ExecutionRecord, ExecutionRequest, ExecutionStatus};
pub use id::{ArtifactId, ExecutionId};
