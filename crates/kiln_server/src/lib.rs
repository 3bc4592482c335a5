//! Kiln Server
//!
//! HTTP API over the kiln service: artifact management, background
//! builds, synchronous execution and cancellation of running executions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

pub use api::{API_PREFIX, ApiState, build_router};
pub use auth::AdminToken;
pub use config::{Args, ConfigError};
pub use error::ApiError;
