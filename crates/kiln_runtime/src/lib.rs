//! Kiln Runtime
//!
//! Process execution for built artifacts and the service facade that
//! drives artifacts from registration through build to execution.
//! Handles timeouts, cancellation and bounded output capture.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod engine;
pub mod registry;
pub mod service;

pub use capture::CappedBuffer;
pub use engine::{ExecutionEngine, ExecutionError, NO_EXIT_CODE};
pub use registry::{LiveJobGuard, LiveJobRegistry};
pub use service::{BuildTicket, HealthReport, KilnService, ServiceError, ServiceResult};
