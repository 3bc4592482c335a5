//! At most one in-flight build per artifact.

use kiln_core::ArtifactId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Set of artifacts with a build in progress
#[derive(Debug, Clone, Default)]
pub struct InFlightBuilds {
    active: Arc<Mutex<HashSet<ArtifactId>>>,
}

impl InFlightBuilds {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the build slot for `id`.
    ///
    /// Returns `None` while another permit for the same artifact is alive.
    #[must_use]
    pub fn try_acquire(&self, id: &ArtifactId) -> Option<BuildPermit> {
        if self.lock().insert(id.clone()) {
            Some(BuildPermit {
                id: id.clone(),
                active: Arc::clone(&self.active),
            })
        } else {
            None
        }
    }

    /// Whether a build for `id` is in progress
    #[must_use]
    pub fn is_building(&self, id: &ArtifactId) -> bool {
        self.lock().contains(id)
    }

    /// Number of builds in progress
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no build is in progress
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<ArtifactId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to build one artifact; released on drop
#[derive(Debug)]
pub struct BuildPermit {
    id: ArtifactId,
    active: Arc<Mutex<HashSet<ArtifactId>>>,
}

impl BuildPermit {
    /// Artifact this permit covers
    #[must_use]
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.id
    }
}

impl Drop for BuildPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected() {
        let builds = InFlightBuilds::new();
        let id = ArtifactId::new();

        let permit = builds.try_acquire(&id).unwrap();
        assert_eq!(permit.artifact_id(), &id);
        assert!(builds.is_building(&id));
        assert!(builds.try_acquire(&id).is_none());

        drop(permit);
        assert!(!builds.is_building(&id));
        assert!(builds.try_acquire(&id).is_some());
    }

    #[test]
    fn test_independent_artifacts() {
        let builds = InFlightBuilds::new();
        let _a = builds.try_acquire(&ArtifactId::new()).unwrap();
        let _b = builds.try_acquire(&ArtifactId::new()).unwrap();
        assert_eq!(builds.len(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let builds = InFlightBuilds::new();
        let other = builds.clone();
        let id = ArtifactId::new();

        let _permit = builds.try_acquire(&id).unwrap();
        assert!(other.try_acquire(&id).is_none());
    }
}
