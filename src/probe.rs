//! Repository Prober - classifies what currently sits at a target path

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::git::GitOps;

/// What was found at a repository's local path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryState {
    /// Nothing exists at the path
    Absent,
    /// A git working tree with no pending changes
    ValidClone,
    /// Something exists but it is not a git working tree
    InvalidDirectory,
    /// A git working tree with staged, unstaged, or untracked entries, or one
    /// whose status could not be determined
    DirtyWorkingTree,
}

impl RepositoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryState::Absent => "absent",
            RepositoryState::ValidClone => "clean",
            RepositoryState::InvalidDirectory => "not a repository",
            RepositoryState::DirtyWorkingTree => "dirty",
        }
    }
}

impl fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inspects local paths without modifying them
#[derive(Clone)]
pub struct Prober {
    git: Arc<dyn GitOps>,
}

impl Prober {
    pub fn new(git: Arc<dyn GitOps>) -> Self {
        Self { git }
    }

    /// Classify `path`. Anything that cannot be inspected is reported as a
    /// state the engine will skip; the only error is an interrupted status
    /// query, which says nothing about the working tree.
    pub async fn probe(&self, path: &Path) -> Result<RepositoryState, SyncError> {
        // symlink_metadata so a dangling symlink counts as occupied
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RepositoryState::Absent),
            Err(e) => {
                warn!("Cannot inspect {}: {}", path.display(), e);
                return Ok(RepositoryState::InvalidDirectory);
            }
        };

        if !metadata.is_dir() && !path.is_dir() {
            return Ok(RepositoryState::InvalidDirectory);
        }

        // `.git` is a directory for normal clones and a file for worktrees
        match tokio::fs::symlink_metadata(path.join(".git")).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RepositoryState::InvalidDirectory),
            Err(e) => {
                warn!("Cannot inspect git metadata in {}: {}", path.display(), e);
                return Ok(RepositoryState::InvalidDirectory);
            }
        }

        let state = match self.git.status(path).await {
            Ok(entries) if entries.is_empty() => RepositoryState::ValidClone,
            Ok(entries) => {
                debug!(
                    "{} has {} uncommitted entries, first: {}",
                    path.display(),
                    entries.len(),
                    entries[0]
                );
                RepositoryState::DirtyWorkingTree
            }
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                warn!(
                    "Could not determine working tree status of {}, treating it as dirty: {}",
                    path.display(),
                    e
                );
                RepositoryState::DirtyWorkingTree
            }
        };
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::{GitCall, ScriptedGit};
    use tempfile::TempDir;

    fn prober(git: ScriptedGit) -> (Prober, Arc<ScriptedGit>) {
        let git = Arc::new(git);
        (Prober::new(git.clone()), git)
    }

    #[tokio::test]
    async fn test_missing_path_is_absent() {
        let temp = TempDir::new().unwrap();
        let (prober, git) = prober(ScriptedGit::new());

        let state = prober.probe(&temp.path().join("acme/widget")).await.unwrap();

        assert_eq!(state, RepositoryState::Absent);
        assert!(git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_directory_without_git_metadata_is_invalid() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "hello").unwrap();
        let (prober, git) = prober(ScriptedGit::new());

        assert_eq!(prober.probe(temp.path()).await.unwrap(), RepositoryState::InvalidDirectory);
        assert!(git.calls().is_empty(), "status must not run on invalid directories");
    }

    #[tokio::test]
    async fn test_plain_file_is_invalid() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("widget");
        std::fs::write(&file, "not a repo").unwrap();
        let (prober, _git) = prober(ScriptedGit::new());

        assert_eq!(prober.probe(&file).await.unwrap(), RepositoryState::InvalidDirectory);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_is_not_absent() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("widget");
        std::os::unix::fs::symlink(temp.path().join("missing"), &link).unwrap();
        let (prober, _git) = prober(ScriptedGit::new());

        assert_eq!(prober.probe(&link).await.unwrap(), RepositoryState::InvalidDirectory);
    }

    #[tokio::test]
    async fn test_clean_repository_is_valid() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let (prober, git) = prober(ScriptedGit::new());

        assert_eq!(prober.probe(temp.path()).await.unwrap(), RepositoryState::ValidClone);
        assert_eq!(
            git.calls(),
            vec![GitCall::Status {
                dir: temp.path().to_path_buf()
            }]
        );
    }

    #[tokio::test]
    async fn test_gitfile_worktree_is_recognised() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".git"), "gitdir: /elsewhere/.git/worktrees/w").unwrap();
        let (prober, _git) = prober(ScriptedGit::new());

        assert_eq!(prober.probe(temp.path()).await.unwrap(), RepositoryState::ValidClone);
    }

    #[tokio::test]
    async fn test_pending_changes_make_repository_dirty() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();

        for entries in [&[" M src/lib.rs"][..], &["?? scratch.txt"], &["A  new.rs", "D  old.rs"]] {
            let (prober, _git) = prober(ScriptedGit::new().dirty(entries));
            assert_eq!(prober.probe(temp.path()).await.unwrap(), RepositoryState::DirtyWorkingTree);
        }
    }

    #[tokio::test]
    async fn test_status_failure_is_treated_as_dirty() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let (prober, _git) = prober(ScriptedGit::new().broken_status());

        assert_eq!(prober.probe(temp.path()).await.unwrap(), RepositoryState::DirtyWorkingTree);
    }

    #[tokio::test]
    async fn test_interrupted_status_is_not_a_state() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let (prober, _git) = prober(ScriptedGit::new().interrupted_status());

        let err = prober.probe(temp.path()).await.unwrap_err();

        assert!(err.is_interrupted());
    }
}
