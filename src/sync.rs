//! Run Coordinator - processes every configured repository in order
//!
//! Repositories are handled one at a time with a politeness delay between
//! them. Each one runs in its own task, so a panic while processing a single
//! repository is recorded as a failure instead of ending the run.

use rand::Rng;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::{RunConfig, MAX_DELAY_SECONDS};
use crate::engine::{OperationOutcome, SyncEngine, SyncPlan};
use crate::error::SyncError;
use crate::shutdown::Shutdown;

/// Results from a complete run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One entry per processed repository, in configuration order
    pub outcomes: Vec<OperationOutcome>,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
    /// The run was stopped by a shutdown signal before it finished
    pub interrupted: bool,
}

impl RunSummary {
    pub fn new(outcomes: Vec<OperationOutcome>, duration: Duration, interrupted: bool) -> Self {
        let mut succeeded = 0;
        let mut skipped = 0;
        let mut failed = 0;

        for outcome in &outcomes {
            if !outcome.success {
                failed += 1;
            } else if outcome.is_skip() {
                skipped += 1;
            } else {
                succeeded += 1;
            }
        }

        Self {
            outcomes,
            succeeded,
            skipped,
            failed,
            duration,
            interrupted,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

/// Pause inserted between consecutive repositories
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayPolicy {
    pub seconds: f64,
    pub jitter: bool,
}

impl DelayPolicy {
    pub fn new(seconds: f64, jitter: bool) -> Self {
        Self { seconds, jitter }
    }

    /// Base delay clamped to `[0, MAX_DELAY_SECONDS]`; NaN counts as zero
    fn base_seconds(&self) -> f64 {
        if self.seconds.is_nan() {
            return 0.0;
        }
        self.seconds.clamp(0.0, MAX_DELAY_SECONDS)
    }

    /// Shortest and longest delay [`sample`](Self::sample) can return
    pub fn bounds(&self) -> (Duration, Duration) {
        let seconds = self.base_seconds();
        if self.jitter {
            (
                Duration::from_secs_f64(seconds * 0.5),
                Duration::from_secs_f64(seconds * 1.5),
            )
        } else {
            let fixed = Duration::from_secs_f64(seconds);
            (fixed, fixed)
        }
    }

    /// Draw one delay: fixed, or uniform in `[0.5, 1.5]` times the base
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (low, high) = self.bounds();
        if low == high {
            return low;
        }
        Duration::from_secs_f64(rng.gen_range(low.as_secs_f64()..=high.as_secs_f64()))
    }
}

impl From<&RunConfig> for DelayPolicy {
    fn from(config: &RunConfig) -> Self {
        Self::new(config.delay_seconds, config.jitter_enabled)
    }
}

pub struct RunCoordinator {
    engine: SyncEngine,
    shutdown: Shutdown,
}

impl RunCoordinator {
    pub fn new(engine: SyncEngine, shutdown: Shutdown) -> Self {
        Self { engine, shutdown }
    }

    /// Process every repository in `config`, in order
    pub async fn run(&self, config: &RunConfig) -> RunSummary {
        let start_time = Instant::now();
        let delay = DelayPolicy::from(config);
        let (shortest, longest) = delay.bounds();
        debug!(
            "Delay between repositories: {:.2}s to {:.2}s",
            shortest.as_secs_f64(),
            longest.as_secs_f64()
        );
        let mut listener = self.shutdown.listener();
        let mut outcomes = Vec::with_capacity(config.repositories.len());
        let mut interrupted = self.shutdown.is_triggered();

        info!(
            "Starting sync of {} repositories into {}",
            config.repositories.len(),
            config.backup_root.display()
        );

        for (index, source_url) in config.repositories.iter().enumerate() {
            if interrupted {
                break;
            }

            if index > 0 {
                let pause = delay.sample(&mut rand::thread_rng());
                debug!("Waiting {:.2}s before the next repository", pause.as_secs_f64());
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = listener.recv() => {
                        interrupted = true;
                        break;
                    }
                }
            }

            outcomes.push(self.process(source_url, &config.backup_root).await);
            interrupted = self.shutdown.is_triggered();
        }

        if interrupted {
            info!(
                "Run interrupted; {} of {} repositories not started",
                config.repositories.len() - outcomes.len(),
                config.repositories.len()
            );
        }

        let summary = RunSummary::new(outcomes, start_time.elapsed(), interrupted);

        info!(
            "Sync completed in {:.2}s: {} successful, {} failed, {} skipped",
            summary.duration.as_secs_f64(),
            summary.succeeded,
            summary.failed,
            summary.skipped
        );

        summary
    }

    /// Resolve and probe every repository without changing anything
    pub async fn plan(&self, config: &RunConfig) -> Vec<(String, Result<SyncPlan, SyncError>)> {
        let mut plans = Vec::with_capacity(config.repositories.len());
        for source_url in &config.repositories {
            let plan = self.engine.plan(source_url, &config.backup_root).await;
            plans.push((source_url.clone(), plan));
        }
        plans
    }

    async fn process(&self, source_url: &str, backup_root: &Path) -> OperationOutcome {
        let engine = self.engine.clone();
        let url = source_url.to_string();
        let root = backup_root.to_path_buf();

        match tokio::spawn(async move { engine.sync(&url, &root).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(repo = %source_url, "Processing aborted unexpectedly: {}", e);
                OperationOutcome::failed(source_url, format!("internal error: {}", e))
            }
        }
    }
}
