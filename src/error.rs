//! Per-repository error kinds
//!
//! Everything in here is caught at the sync engine boundary and turned into a
//! failed [`OperationOutcome`](crate::engine::OperationOutcome). Setup failures
//! that abort the whole run (bad config, unwritable backup root) use `anyhow`
//! instead and never appear as a `SyncError`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving, probing, or updating a single repository
#[derive(Error, Debug)]
pub enum SyncError {
    /// Owner and name could not be isolated from the repository URL.
    #[error("cannot derive owner/name from repository URL '{url}': {reason}")]
    UrlParse { url: String, reason: String },

    /// The status query used to detect local changes could not run.
    #[error("status query failed in {}: {message}", path.display())]
    Probe { path: PathBuf, message: String },

    /// The external command could not be started at all.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external command ran and exited unsuccessfully.
    #[error("'{command}' {}: {}", describe_exit(*exit_code), output_or_placeholder(output))]
    Execution {
        command: String,
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        output: String,
    },

    /// The command was terminated because the run is shutting down.
    #[error("'{command}' interrupted by shutdown request")]
    Interrupted { command: String },

    /// A directory needed for the operation could not be created.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn url_parse(url: &str, reason: impl Into<String>) -> Self {
        Self::UrlParse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Exit code of a failed command, if this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

fn output_or_placeholder(output: &str) -> &str {
    if output.trim().is_empty() {
        "(no output)"
    } else {
        output
    }
}
