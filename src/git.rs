//! Git operations used by the sync engine
//!
//! [`GitOps`] is the seam between the decision logic and the git binary, so
//! the engine can be exercised without network access.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::config::GitConfig;
use crate::error::SyncError;
use crate::exec::{CommandExecutor, CommandOutput, CommandSpec};

/// The git operations the sync engine depends on
#[async_trait]
pub trait GitOps: Send + Sync {
    /// `git clone` `url` into `dest`, streaming progress under `label`
    async fn clone_repo(&self, url: &str, dest: &Path, label: &str) -> Result<CommandOutput, SyncError>;

    /// `git pull` inside `dir`, streaming progress under `label`
    async fn pull(&self, dir: &Path, label: &str) -> Result<CommandOutput, SyncError>;

    /// Porcelain status lines for the working tree at `dir`; empty means clean
    async fn status(&self, dir: &Path) -> Result<Vec<String>, SyncError>;
}

/// git CLI backed implementation of [`GitOps`]
pub struct GitClient {
    config: GitConfig,
    executor: CommandExecutor,
}

impl GitClient {
    /// Create a new Git client with the given configuration
    pub fn new(config: GitConfig, executor: CommandExecutor) -> Self {
        Self { config, executor }
    }

    fn command(&self) -> CommandSpec {
        // Credential prompts would hang an unattended run
        CommandSpec::new(&self.config.binary).env("GIT_TERMINAL_PROMPT", "0")
    }

    fn clone_spec(&self, url: &str, dest: &Path) -> CommandSpec {
        let mut spec = self.command().arg("clone");
        if self.config.progress {
            spec = spec.arg("--progress");
        }
        // `--` so a URL beginning with `-` is never read as an option
        spec.arg("--").arg(url).arg(dest)
    }

    fn pull_spec(&self, dir: &Path) -> CommandSpec {
        let mut spec = self.command().arg("pull");
        if self.config.fast_forward_only {
            spec = spec.arg("--ff-only");
        }
        if self.config.progress {
            spec = spec.arg("--progress");
        }
        spec.current_dir(dir)
    }

    fn status_spec(&self, dir: &Path) -> CommandSpec {
        // Explicit untracked mode so a user's status.showUntrackedFiles=no
        // cannot hide new files from the dirty check. Only stdout is porcelain;
        // warnings on stderr must not count as entries.
        self.command()
            .args(["status", "--porcelain", "--untracked-files=normal"])
            .current_dir(dir)
            .separate_stderr()
    }
}

#[async_trait]
impl GitOps for GitClient {
    async fn clone_repo(&self, url: &str, dest: &Path, label: &str) -> Result<CommandOutput, SyncError> {
        self.executor.execute(&self.clone_spec(url, dest), label).await
    }

    async fn pull(&self, dir: &Path, label: &str) -> Result<CommandOutput, SyncError> {
        self.executor.execute(&self.pull_spec(dir), label).await
    }

    async fn status(&self, dir: &Path) -> Result<Vec<String>, SyncError> {
        let output = self
            .executor
            .capture(&self.status_spec(dir))
            .await
            .map_err(|e| match e {
                SyncError::Interrupted { .. } => e,
                other => SyncError::Probe {
                    path: dir.to_path_buf(),
                    message: other.to_string(),
                },
            })?;
        debug!("{} status entries in {}", output.lines.len(), dir.display());
        Ok(output.lines)
    }
}

/// Whether `git pull` output reports that nothing changed
pub fn pull_was_noop(output: &CommandOutput) -> bool {
    output.contains("Already up to date") || output.contains("Already up-to-date")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use assert_matches::assert_matches;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn client(config: GitConfig) -> GitClient {
        let executor = CommandExecutor::new(Arc::new(crate::exec::TracingSink), Shutdown::new());
        GitClient::new(config, executor)
    }

    fn args(spec: &CommandSpec) -> Vec<String> {
        spec.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_clone_command_shape() {
        let git = client(GitConfig::default());
        let spec = git.clone_spec(
            "https://example.com/acme/widget.git",
            &PathBuf::from("/backups/acme/widget"),
        );

        assert_eq!(spec.program, "git");
        assert_eq!(
            args(&spec),
            vec![
                "clone",
                "--progress",
                "--",
                "https://example.com/acme/widget.git",
                "/backups/acme/widget"
            ]
        );
        assert!(spec.cwd.is_none());
        assert!(spec.merge_stderr);
        assert!(spec
            .envs
            .iter()
            .any(|(k, v)| k == "GIT_TERMINAL_PROMPT" && v == "0"));
    }

    #[test]
    fn test_pull_command_shape() {
        let git = client(GitConfig::default());
        let dir = PathBuf::from("/backups/acme/widget");
        let spec = git.pull_spec(&dir);

        assert_eq!(args(&spec), vec!["pull", "--ff-only", "--progress"]);
        assert_eq!(spec.cwd.as_deref(), Some(dir.as_path()));

        let quiet = client(GitConfig {
            progress: false,
            fast_forward_only: false,
            ..Default::default()
        });
        assert_eq!(args(&quiet.pull_spec(&dir)), vec!["pull"]);
    }

    #[test]
    fn test_status_command_is_read_only() {
        let git = client(GitConfig {
            binary: "/usr/local/bin/git".to_string(),
            ..Default::default()
        });
        let spec = git.status_spec(&PathBuf::from("/backups/acme/widget"));

        assert_eq!(spec.program, "/usr/local/bin/git");
        assert_eq!(
            args(&spec),
            vec!["status", "--porcelain", "--untracked-files=normal"]
        );
        assert!(!spec.merge_stderr, "stderr must not be parsed as porcelain");
    }

    #[test]
    fn test_option_like_url_stays_positional() {
        let git = client(GitConfig::default());
        let spec = git.clone_spec("--upload-pack=touch pwned", &PathBuf::from("/b/x/y"));

        let args = args(&spec);
        let separator = args.iter().position(|a| a == "--").unwrap();
        let url = args.iter().position(|a| a == "--upload-pack=touch pwned").unwrap();
        assert!(separator < url);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_status_failure_becomes_probe_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let git = client(GitConfig {
            binary: "false".to_string(),
            ..Default::default()
        });

        let err = git.status(temp.path()).await.unwrap_err();

        assert_matches!(err, SyncError::Probe { ref path, .. } if path == temp.path());
    }

    /// Writes an executable stand-in for git that prints `stderr` and exits 0
    /// with nothing on stdout
    #[cfg(unix)]
    fn fake_git(dir: &Path, stderr: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-git");
        std::fs::write(&path, format!("#!/bin/sh\necho '{}' >&2\nexit 0\n", stderr)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_status_warnings_are_not_entries() {
        let bin = tempfile::TempDir::new().unwrap();
        let repo = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(repo.path().join(".git")).unwrap();
        let git = Arc::new(client(GitConfig {
            binary: fake_git(bin.path(), "warning: unable to access /home/u/.config/git/attributes"),
            ..Default::default()
        }));

        assert_eq!(git.status(repo.path()).await.unwrap(), Vec::<String>::new());

        let prober = crate::probe::Prober::new(git);
        assert_eq!(
            prober.probe(repo.path()).await.unwrap(),
            crate::probe::RepositoryState::ValidClone
        );
    }

    #[test]
    fn test_pull_noop_detection() {
        let noop = CommandOutput {
            lines: vec!["Already up to date.".to_string()],
            dropped: 0,
        };
        let updated = CommandOutput {
            lines: vec![
                "Updating abc123..def456".to_string(),
                "Fast-forward".to_string(),
            ],
            dropped: 0,
        };

        assert!(pull_was_noop(&noop));
        assert!(!pull_was_noop(&updated));
    }
}
