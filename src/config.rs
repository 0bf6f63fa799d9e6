use anyhow::{bail, Context, Result};
use dirs::config_dir;
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Longest accepted pause between repositories: one day
pub const MAX_DELAY_SECONDS: f64 = 86_400.0;

/// Main configuration structure for evergit
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory of the backup tree
    #[serde(default = "default_backup_root")]
    pub backup_root: String,

    /// Remote repository URLs, processed in order
    #[serde(default, alias = "repos")]
    pub repositories: Vec<String>,

    /// Pause between consecutive repositories, in seconds
    #[serde(default = "default_delay_seconds", alias = "sleep_seconds")]
    pub delay_seconds: f64,

    /// Randomize each pause to between 50% and 150% of `delay_seconds`
    #[serde(default = "default_true", alias = "randomize_sleep")]
    pub jitter: bool,

    /// git invocation settings
    #[serde(default)]
    pub git: GitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// git invocation settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GitConfig {
    /// git executable (name on PATH or absolute path)
    #[serde(default = "default_git_binary")]
    pub binary: String,

    /// Ask git for progress output even though it is not writing to a terminal
    #[serde(default = "default_true")]
    pub progress: bool,

    /// Refuse pulls that would need a merge
    #[serde(default = "default_true")]
    pub fast_forward_only: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,

    /// Additional log file (appended to, never colored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Json,
}

/// Validated input for a single run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub backup_root: PathBuf,
    pub repositories: Vec<String>,
    pub delay_seconds: f64,
    pub jitter_enabled: bool,
}

/// On-disk configuration formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => ConfigFormat::Json,
            Some("toml") => ConfigFormat::Toml,
            // YAML is a superset of JSON, so it is the safest fallback
            _ => ConfigFormat::Yaml,
        }
    }
}

// Default value functions
fn default_backup_root() -> String {
    "~/evergit_backups".to_string()
}
fn default_delay_seconds() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            progress: default_true(),
            fast_forward_only: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            color: default_true(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
            repositories: Vec::new(),
            delay_seconds: default_delay_seconds(),
            jitter: default_true(),
            git: GitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Log file path with `~` and environment variables expanded
    pub fn expanded_file(&self) -> Result<Option<PathBuf>> {
        self.file
            .as_deref()
            .map(|file| {
                shellexpand::full(file)
                    .map(|expanded| PathBuf::from(expanded.as_ref()).clean())
                    .with_context(|| format!("Failed to expand log file path: {}", file))
            })
            .transpose()
    }
}

impl Config {
    /// Load from `path` when given, otherwise from the default location if a
    /// file exists there, otherwise fall back to built-in defaults. The second
    /// value is the file the configuration came from.
    pub fn discover(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = path {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        let default_path = Self::default_config_path()?;
        if default_path.exists() {
            let config = Self::load(&default_path)?;
            Ok((config, Some(default_path)))
        } else {
            Ok((Self::default(), None))
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content, ConfigFormat::from_path(path))
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse configuration text in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
        };
        Ok(config)
    }

    /// Save configuration to a file, in the format implied by its extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("evergit").join("config.yml"))
    }

    /// Expand `~` and environment variables in the backup root
    pub fn expanded_backup_root(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.backup_root)
            .with_context(|| format!("Failed to expand backup_root: {}", self.backup_root))?;

        if expanded.trim().is_empty() {
            bail!("backup_root must not be empty");
        }

        Ok(PathBuf::from(expanded.as_ref()).clean())
    }

    /// Validate and produce the input for a run
    pub fn run_config(&self) -> Result<RunConfig> {
        if !(0.0..=MAX_DELAY_SECONDS).contains(&self.delay_seconds) {
            bail!(
                "delay_seconds must be between 0 and {}, got {}",
                MAX_DELAY_SECONDS,
                self.delay_seconds
            );
        }

        let mut seen = HashSet::new();
        let repositories = self
            .repositories
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .filter(|url| {
                let first = seen.insert(url.to_string());
                if !first {
                    tracing::warn!("Ignoring duplicate repository entry: {}", url);
                }
                first
            })
            .map(str::to_string)
            .collect();

        Ok(RunConfig {
            backup_root: self.expanded_backup_root()?,
            repositories,
            delay_seconds: self.delay_seconds,
            jitter_enabled: self.jitter,
        })
    }
}
