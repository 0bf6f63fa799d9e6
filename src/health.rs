//! System health checks for evergit
//!
//! [`ensure_backup_root`] is the preflight every sync performs; an unwritable
//! backup root aborts the run. [`HealthCheck`] backs the `doctor` command.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;

/// Name of the scratch file used to prove the backup root is writable
const WRITE_PROBE: &str = ".evergit-write-test";

/// Create `path` if needed and verify files can be written inside it
pub fn ensure_backup_root(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create backup root: {:?}", path))?;

    let probe = path.join(WRITE_PROBE);
    std::fs::write(&probe, b"evergit")
        .with_context(|| format!("Backup root is not writable: {:?}", path))?;
    std::fs::remove_file(&probe)
        .with_context(|| format!("Failed to remove write probe: {:?}", probe))?;

    Ok(())
}

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Backup root status
    pub backup_root: CheckResult,
    /// SSH configuration status (warning only, not required)
    pub ssh: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    #[cfg(test)]
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git(&config.git.binary),
            backup_root: Self::check_backup_root(config),
            ssh: Self::check_ssh(),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.backup_root.passed
        // SSH is optional, not included in required checks
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.git, &self.backup_root, &self.ssh]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.backup_root, &self.ssh]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Check git installation
    fn check_git(binary: &str) -> CheckResult {
        match std::process::Command::new(binary).arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error(format!("'{} --version' failed", binary)),
            Err(_) => CheckResult::error_with_details(
                format!("Git not found: {}", binary),
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Check the backup root can be created and written to
    fn check_backup_root(config: &Config) -> CheckResult {
        let root = match config.expanded_backup_root() {
            Ok(root) => root,
            Err(e) => {
                return CheckResult::error_with_details("Invalid backup root path", e.to_string())
            }
        };

        match ensure_backup_root(&root) {
            Ok(()) => CheckResult::ok_with_details("Backup root writable", root.display().to_string()),
            Err(e) => CheckResult::error_with_details("Backup root not writable", format!("{:#}", e)),
        }
    }

    /// Check SSH configuration (warning only)
    fn check_ssh() -> CheckResult {
        let ssh_dir = dirs::home_dir().unwrap_or_default().join(".ssh");
        if !ssh_dir.exists() {
            return CheckResult::warning_with_details(
                "~/.ssh directory not found",
                "SSH URLs may not clone. Run: ssh-keygen -t ed25519",
            );
        }

        let ssh_keys = ["id_rsa", "id_ed25519", "id_ecdsa"];
        let found_keys: Vec<_> = ssh_keys
            .iter()
            .filter(|key| ssh_dir.join(key).exists())
            .copied()
            .collect();

        if found_keys.is_empty() {
            CheckResult::warning_with_details(
                "No SSH keys found",
                "SSH URLs may not clone. Run: ssh-keygen -t ed25519 -C \"your_email@example.com\"",
            )
        } else {
            CheckResult::ok_with_details("SSH keys found", found_keys.join(", "))
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("Git Installation", &self.git),
            ("Backup Root", &self.backup_root),
            ("SSH Configuration", &self.ssh),
        ]
    }
}
