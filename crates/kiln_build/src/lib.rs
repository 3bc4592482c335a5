//! Kiln Build
//!
//! Turns a registered artifact into an executable: fetch the source,
//! read its revision, compile, install.
//! Source control and toolchain access sit behind swappable traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod compiler;
pub mod fetcher;
pub mod inflight;
pub mod orchestrator;

pub use command::{CommandError, CommandOutput};
pub use compiler::{Compiler, GoCompiler};
pub use fetcher::{GitFetcher, SourceFetcher};
pub use inflight::{BuildPermit, InFlightBuilds};
pub use orchestrator::{BuildError, BuildLayout, BuildOrchestrator, BuildStage};
