//! Deferred, artifact-scoped deletion.
//!
//! Requests hand [`CleanupTask`]s to a [`CleanupScheduler`] once their
//! response has been delivered. A pool of [`CleanupWorkers`] drains the queue
//! and asks the [`CleanupCoordinator`] to release exactly the artifact named by
//! each task. No task empties a whole area.

pub mod coordinator;
pub mod scheduler;

use crate::artifact::{Artifact, RequestId};
use std::fmt;

pub use coordinator::CleanupCoordinator;
pub use scheduler::{CleanupScheduler, CleanupStats, CleanupWorkers};

/// A deferred cleanup action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupTask {
    /// Release one artifact on behalf of `requested_by`.
    DeleteArtifact {
        artifact: Artifact,
        requested_by: RequestId,
    },
}

impl CleanupTask {
    /// Delete `artifact` on behalf of the request that owns it.
    pub fn delete(artifact: Artifact) -> Self {
        let requested_by = artifact.owner();
        CleanupTask::DeleteArtifact {
            artifact,
            requested_by,
        }
    }

    pub fn artifact(&self) -> &Artifact {
        match self {
            CleanupTask::DeleteArtifact { artifact, .. } => artifact,
        }
    }

    pub fn requested_by(&self) -> RequestId {
        match self {
            CleanupTask::DeleteArtifact { requested_by, .. } => *requested_by,
        }
    }
}

impl fmt::Display for CleanupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupTask::DeleteArtifact {
                artifact,
                requested_by,
            } => write!(f, "delete {} for request {}", artifact, requested_by),
        }
    }
}

/// Result of executing one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The artifact existed and was removed.
    Deleted,
    /// Already released; nothing to do.
    AlreadyGone,
}
