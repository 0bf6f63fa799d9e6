//! evergit - Safe, Non-Destructive Git Repository Backups
//!
//! evergit mirrors a configured list of remote repositories into a local backup
//! tree laid out as `<backup_root>/<owner>/<name>`, and keeps those copies up to
//! date on repeated runs. A copy holding uncommitted local work, or a path that
//! is occupied by something other than a git working tree, is skipped rather
//! than touched: the tool never deletes, resets, stashes, or force-updates.
//!
//! ## Modules
//!
//! - [`target`]: Maps a remote URL to its local path
//! - [`probe`]: Classifies what currently exists at that path
//! - [`exec`]: Runs subprocesses and streams their output line by line
//! - [`git`]: git operations behind the [`git::GitOps`] trait
//! - [`engine`]: Chooses and performs clone, pull, or skip for one repository
//! - [`sync`]: Processes the whole repository list with delays between entries
//! - [`config`]: Configuration management and parsing
//! - [`health`]: Preflight and `doctor` checks

pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod git;
pub mod health;
pub mod logging;
pub mod probe;
pub mod shutdown;
pub mod sync;
pub mod target;

pub use config::{Config, RunConfig};
pub use engine::{OperationOutcome, SyncAction, SyncEngine, SyncPlan};
pub use error::SyncError;
pub use git::{GitClient, GitOps};
pub use health::HealthCheck;
pub use probe::{Prober, RepositoryState};
pub use shutdown::Shutdown;
pub use sync::{DelayPolicy, RunCoordinator, RunSummary};
pub use target::{resolve, RepositoryTarget};
