//! Live job registry.
//!
//! Maps in-flight execution ids to the token that cancels them. The map is
//! only used to find a run to stop; it never outlives the process it names.

use kiln_core::ExecutionId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

type Jobs = Arc<RwLock<HashMap<ExecutionId, CancellationToken>>>;

/// Registry of running executions
#[derive(Debug, Clone, Default)]
pub struct LiveJobRegistry {
    jobs: Jobs,
}

impl LiveJobRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run. The entry is removed when the returned guard drops.
    #[must_use]
    pub fn register(&self, id: ExecutionId, token: CancellationToken) -> LiveJobGuard {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), token);
        LiveJobGuard {
            id,
            jobs: Arc::clone(&self.jobs),
        }
    }

    /// Cancel a live run.
    ///
    /// Returns `false` if `id` is unknown or already finished.
    pub fn stop(&self, id: &ExecutionId) -> bool {
        // Clone under the read lock, cancel after releasing it.
        let token = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();

        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether `id` is running
    #[must_use]
    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of running executions
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is running
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration handle; deregisters on drop
#[derive(Debug)]
pub struct LiveJobGuard {
    id: ExecutionId,
    jobs: Jobs,
}

impl LiveJobGuard {
    /// Registered execution id
    #[must_use]
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }
}

impl Drop for LiveJobGuard {
    fn drop(&mut self) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
