//! Executes cleanup tasks against the shared areas.

use crate::artifact::{Areas, Released};
use crate::cleanup::{CleanupOutcome, CleanupTask};
use crate::error::{PicvoiceError, Result};

/// Performs deletions on behalf of the cleanup workers.
///
/// Every task names one artifact and the request asking for its removal. The
/// coordinator refuses to touch an artifact owned by anyone else, so a late or
/// misrouted task can never reach into another in-flight request.
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    areas: Areas,
}

impl CleanupCoordinator {
    pub fn new(areas: Areas) -> Self {
        Self { areas }
    }

    pub fn areas(&self) -> &Areas {
        &self.areas
    }

    /// Run one task. Blocking.
    pub fn execute(&self, task: &CleanupTask) -> Result<CleanupOutcome> {
        match task {
            CleanupTask::DeleteArtifact {
                artifact,
                requested_by,
            } => {
                if artifact.owner() != *requested_by {
                    return Err(PicvoiceError::OwnershipViolation {
                        artifact: artifact.to_string(),
                        owner: artifact.owner().to_string(),
                        requested_by: requested_by.to_string(),
                    });
                }

                let outcome = match self.areas.get(artifact.area()).release(artifact)? {
                    Released::Removed => CleanupOutcome::Deleted,
                    Released::AlreadyGone => CleanupOutcome::AlreadyGone,
                };
                tracing::debug!("Cleanup {}: {:?}", artifact, outcome);
                Ok(outcome)
            }
        }
    }

    /// Whether a failed task is worth another attempt.
    ///
    /// Only I/O trouble can clear up on its own; ownership and area mismatches
    /// will fail the same way every time.
    pub fn is_retryable(error: &PicvoiceError) -> bool {
        matches!(
            error,
            PicvoiceError::FileSystem { .. } | PicvoiceError::Io(_)
        )
    }
}
