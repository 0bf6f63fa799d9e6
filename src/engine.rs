//! Sync Decision Engine - decides and performs the operation for one repository
//!
//! | state              | action |
//! |--------------------|--------|
//! | URL unresolvable   | skip (failure) |
//! | absent             | clone  |
//! | not a repository   | skip   |
//! | uncommitted changes| skip   |
//! | clean clone        | pull   |
//!
//! The engine never deletes, resets, stashes, or force-updates anything. Every
//! error is turned into a failed [`OperationOutcome`] here.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::git::{pull_was_noop, GitOps};
use crate::probe::{Prober, RepositoryState};
use crate::target::{resolve, RepositoryTarget};

/// Operation chosen for a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Clone,
    Pull,
    Skip,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            SyncAction::Clone => "clone",
            SyncAction::Pull => "pull",
            SyncAction::Skip => "skip",
        })
    }
}

/// Result of processing one repository
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub source_url: String,
    /// `None` only when the URL could not be resolved to a path
    pub target: Option<RepositoryTarget>,
    /// State observed before acting
    pub observed: Option<RepositoryState>,
    pub action: SyncAction,
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    /// Repository identifier for summaries
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => target.full_name(),
            None => self.source_url.clone(),
        }
    }

    /// Deliberate no-op, not a failure
    pub fn is_skip(&self) -> bool {
        self.action == SyncAction::Skip && self.success
    }

    pub(crate) fn failed(source_url: &str, message: impl Into<String>) -> Self {
        Self {
            source_url: source_url.to_string(),
            target: None,
            observed: None,
            action: SyncAction::Skip,
            success: false,
            message: message.into(),
        }
    }
}

/// Dry-run view of what [`SyncEngine::sync`] would do
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub target: RepositoryTarget,
    pub state: RepositoryState,
    pub action: SyncAction,
}

#[derive(Clone)]
pub struct SyncEngine {
    git: Arc<dyn GitOps>,
    prober: Prober,
}

impl SyncEngine {
    pub fn new(git: Arc<dyn GitOps>) -> Self {
        let prober = Prober::new(git.clone());
        Self { git, prober }
    }

    /// Map an observed state to an action. Anything uncertain is skipped.
    pub fn decide(state: RepositoryState) -> SyncAction {
        match state {
            RepositoryState::Absent => SyncAction::Clone,
            RepositoryState::ValidClone => SyncAction::Pull,
            RepositoryState::InvalidDirectory | RepositoryState::DirtyWorkingTree => SyncAction::Skip,
        }
    }

    /// Resolve and probe without executing anything
    pub async fn plan(&self, source_url: &str, backup_root: &Path) -> Result<SyncPlan, SyncError> {
        let target = resolve(source_url, backup_root)?;
        let state = self.prober.probe(&target.local_path).await?;
        Ok(SyncPlan {
            action: Self::decide(state),
            target,
            state,
        })
    }

    /// Bring one repository up to date
    pub async fn sync(&self, source_url: &str, backup_root: &Path) -> OperationOutcome {
        let target = match resolve(source_url, backup_root) {
            Ok(target) => target,
            Err(e) => {
                error!(repo = %source_url, "Skipping repository: {}", e);
                return OperationOutcome::failed(source_url, e.to_string());
            }
        };

        let label = target.full_name();
        info!(repo = %label, path = %target.local_path.display(), "Processing repository");

        let state = match self.prober.probe(&target.local_path).await {
            Ok(state) => state,
            Err(e) => {
                warn!(repo = %label, "Status check did not finish: {}", e);
                return OperationOutcome {
                    target: Some(target),
                    ..OperationOutcome::failed(source_url, e.to_string())
                };
            }
        };
        let (action, result) = match Self::decide(state) {
            SyncAction::Clone => (SyncAction::Clone, self.clone_into(&target, &label).await),
            SyncAction::Pull => (SyncAction::Pull, self.update(&target, &label).await),
            SyncAction::Skip => (SyncAction::Skip, Ok(skip_reason(state, &target, &label))),
        };

        let (success, message) = match result {
            Ok(message) => (true, message),
            Err(e) => {
                error!(repo = %label, "{} failed: {}", action, e);
                (false, e.to_string())
            }
        };

        OperationOutcome {
            source_url: target.source_url.clone(),
            target: Some(target),
            observed: Some(state),
            action,
            success,
            message,
        }
    }

    async fn clone_into(&self, target: &RepositoryTarget, label: &str) -> Result<String, SyncError> {
        if let Some(parent) = target.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SyncError::Filesystem {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        info!(repo = %label, "Cloning {} -> {}", target.source_url, target.local_path.display());
        self.git
            .clone_repo(&target.source_url, &target.local_path, label)
            .await?;

        info!(repo = %label, "Clone succeeded");
        Ok(format!("cloned into {}", target.local_path.display()))
    }

    async fn update(&self, target: &RepositoryTarget, label: &str) -> Result<String, SyncError> {
        info!(repo = %label, "Pulling latest changes");
        let output = self.git.pull(&target.local_path, label).await?;

        if pull_was_noop(&output) {
            info!(repo = %label, "Already up to date");
            Ok("already up to date".to_string())
        } else {
            info!(repo = %label, "Pull completed");
            Ok("pulled latest changes".to_string())
        }
    }
}

fn skip_reason(state: RepositoryState, target: &RepositoryTarget, label: &str) -> String {
    match state {
        RepositoryState::DirtyWorkingTree => {
            warn!(
                repo = %label,
                "Uncommitted changes detected in {}; skipping to avoid data loss",
                target.local_path.display()
            );
            "skipped: uncommitted local changes (or status unavailable)".to_string()
        }
        _ => {
            warn!(
                repo = %label,
                "{} exists but is not a git repository; skipping",
                target.local_path.display()
            );
            format!("skipped: {} is not a git repository", target.local_path.display())
        }
    }
}
