//! Kiln Storage
//!
//! Write-through artifact catalog and append-only execution log.
//! Both persist JSON documents under a single data directory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod execution_log;
pub mod snapshot;

pub use catalog::{ArtifactCatalog, CatalogError};
pub use execution_log::{ExecutionLog, ExecutionLogError};
