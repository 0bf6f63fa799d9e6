/// Common test utilities and helpers for evergit tests
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Whether a usable git binary is on PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Skip the current test when git is missing
macro_rules! require_git {
    () => {
        if !common::git_available() {
            eprintln!("git not found in PATH, skipping");
            return;
        }
    };
}

/// Run git in `dir` with a fixed identity, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> Output {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=evergit tests",
            "-c",
            "user.email=tests@evergit.invalid",
            "-c",
            "init.defaultBranch=main",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .output()
        .expect("Failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

/// Isolated directories for one test: local "remotes", a backup root, and
/// a config directory standing in for XDG_CONFIG_HOME
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub remotes: PathBuf,
    pub backup_root: PathBuf,
    pub config_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let remotes = temp_dir.path().join("remotes");
        let backup_root = temp_dir.path().join("backups");
        let config_dir = temp_dir.path().join("config");
        std::fs::create_dir_all(&remotes).expect("Failed to create remotes dir");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            remotes,
            backup_root,
            config_dir,
        }
    }

    /// Create a repository with one commit at `remotes/<owner>/<name>` and
    /// return its `file://` URL
    pub fn create_remote(&self, owner: &str, name: &str) -> String {
        let repo = self.remote_path(owner, name);
        std::fs::create_dir_all(&repo).expect("Failed to create remote dir");
        git(&repo, &["init", "--quiet"]);
        self.commit_file(owner, name, "README.md", "# widget\n");
        format!("file://{}", repo.display())
    }

    pub fn remote_path(&self, owner: &str, name: &str) -> PathBuf {
        self.remotes.join(owner).join(name)
    }

    /// Add or change a file in a remote and commit it
    pub fn commit_file(&self, owner: &str, name: &str, file: &str, content: &str) {
        let repo = self.remote_path(owner, name);
        std::fs::write(repo.join(file), content).expect("Failed to write remote file");
        git(&repo, &["add", file]);
        git(&repo, &["commit", "--quiet", "-m", &format!("update {}", file)]);
    }

    /// Local copy of `owner/name` under the backup root
    pub fn backup_path(&self, owner: &str, name: &str) -> PathBuf {
        self.backup_root.join(owner).join(name)
    }

    /// Write a YAML config with no delay between repositories
    pub fn write_config(&self, repositories: &[&str]) -> PathBuf {
        let mut content = format!(
            "backup_root: {:?}\ndelay_seconds: 0\njitter: false\nrepositories:\n",
            self.backup_root.display().to_string()
        );
        for repository in repositories {
            content.push_str(&format!("  - {:?}\n", repository));
        }

        let config_path = self.config_dir.join("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// The compiled evergit binary, isolated from the user's configuration
    pub fn evergit(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_evergit"));
        command
            .env("XDG_CONFIG_HOME", &self.config_dir)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env_remove("RUST_LOG");
        command
    }
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
