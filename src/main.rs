use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use evergit::config::LoggingConfig;
use evergit::exec::{CommandExecutor, TracingSink};
use evergit::health::{ensure_backup_root, CheckResult};
use evergit::logging::init_logging;
use evergit::{Config, GitClient, HealthCheck, RunCoordinator, RunSummary, Shutdown, SyncAction, SyncEngine};

/// Exit status when the backup root cannot be used
const EXIT_UNWRITABLE_ROOT: u8 = 2;
/// Exit status after SIGINT/SIGTERM
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "evergit")]
#[command(about = "Safe, non-destructive git repository backups")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Override the configured backup root
    #[arg(long, global = true)]
    backup_root: Option<String>,

    /// Override the delay between repositories, in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    sleep: Option<f64>,

    /// Use the exact delay instead of a randomized one
    #[arg(long, alias = "non-random-sleep", global = true)]
    no_jitter: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone missing repositories and update clean ones (default)
    Sync {
        /// Show what would be done without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a starter configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// System health check and diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Some(Commands::Init { force }) = cli.command {
        init_logging(cli.verbose, &LoggingConfig::default(), cli.log_file.as_deref())?;
        cmd_init(&cli, force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let (mut config, source) = Config::discover(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    let log_file = match &cli.log_file {
        Some(path) => Some(path.clone()),
        None => config.logging.expanded_file()?,
    };
    init_logging(cli.verbose, &config.logging, log_file.as_deref())?;
    info!("Starting evergit v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => info!("Using configuration from {:?}", path),
        None => info!("No configuration file found, using defaults"),
    }

    match cli.command {
        None => cmd_sync(&config, false).await,
        Some(Commands::Sync { dry_run }) => cmd_sync(&config, dry_run).await,
        Some(Commands::Doctor) => Ok(cmd_doctor(&config)),
        Some(Commands::Init { .. }) => Ok(ExitCode::SUCCESS),
    }
}

/// Command-line flags take precedence over the configuration file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(root) = &cli.backup_root {
        config.backup_root = root.clone();
    }
    if let Some(sleep) = cli.sleep {
        config.delay_seconds = sleep;
    }
    if cli.no_jitter {
        config.jitter = false;
    }
}

/// Write a starter configuration file
fn cmd_init(cli: &Cli, force: bool) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        bail!(
            "Configuration already exists at {:?} (use --force to overwrite)",
            config_path
        );
    }

    let mut config = Config::default();
    apply_overrides(&mut config, cli);
    config.save(&config_path)?;

    info!("Configuration saved to: {:?}", config_path);

    println!("✅ evergit initialized successfully!");
    println!("   Config: {:?}", config_path);
    println!("   Backup root: {}", config.backup_root);
    println!("   Next: add repository URLs under 'repositories' and run 'evergit sync'");

    Ok(())
}

/// Sync every configured repository
async fn cmd_sync(config: &Config, dry_run: bool) -> Result<ExitCode> {
    let run_config = config.run_config()?;

    if run_config.repositories.is_empty() {
        warn!("No repositories configured");
        println!("⚠️  No repositories configured; nothing to do");
        return Ok(ExitCode::SUCCESS);
    }

    if !dry_run {
        if let Err(e) = ensure_backup_root(&run_config.backup_root) {
            error!("{:#}", e);
            eprintln!("❌ Cannot use backup root: {:#}", e);
            return Ok(ExitCode::from(EXIT_UNWRITABLE_ROOT));
        }
    }

    let shutdown = Shutdown::new();
    let signals = shutdown.listen_for_signals();

    let executor = CommandExecutor::new(Arc::new(TracingSink), shutdown.clone());
    let git = Arc::new(GitClient::new(config.git.clone(), executor));
    let coordinator = RunCoordinator::new(SyncEngine::new(git), shutdown.clone());

    if dry_run {
        print_plan(&coordinator.plan(&run_config).await, &run_config.backup_root);
        signals.abort();
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "🔄 Syncing {} repositories into {}",
        run_config.repositories.len(),
        run_config.backup_root.display()
    );

    let summary = coordinator.run(&run_config).await;
    signals.abort();

    print_summary(&summary);

    if summary.interrupted {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_plan(
    plans: &[(String, Result<evergit::SyncPlan, evergit::SyncError>)],
    backup_root: &Path,
) {
    println!("🔍 Dry run - nothing will be changed under {}", backup_root.display());

    for (source_url, plan) in plans {
        match plan {
            Ok(plan) => {
                let icon = match plan.action {
                    SyncAction::Clone => "📥",
                    SyncAction::Pull => "🔄",
                    SyncAction::Skip => "⏭️ ",
                };
                println!(
                    "   {} {:<5} {} ({})",
                    icon,
                    plan.action,
                    plan.target.full_name(),
                    plan.state
                );
            }
            Err(e) => println!("   ❌ skip  {}: {}", source_url, e),
        }
    }
}

fn print_summary(summary: &RunSummary) {
    if summary.interrupted {
        println!("\n🛑 Synchronization interrupted");
    } else {
        println!("\n🎉 Synchronization complete!");
    }
    println!("   📊 Total repositories: {}", summary.total());
    println!("   ✅ Successful operations: {}", summary.succeeded);
    println!("   ❌ Failed operations: {}", summary.failed);
    println!("   ⏭️  Skipped operations: {}", summary.skipped);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.skipped > 0 {
        println!("\n⏭️  Skipped:");
        for outcome in summary.outcomes.iter().filter(|o| o.is_skip()) {
            println!("   {}: {}", outcome.label(), outcome.message);
        }
    }

    if summary.failed > 0 {
        println!("\n🔍 Failed Operations:");
        for outcome in summary.failures() {
            println!("   ❌ {}: {}", outcome.label(), outcome.message);
        }
    }
}

/// Run system diagnostics
fn cmd_doctor(config: &Config) -> ExitCode {
    let health = HealthCheck::run(config);
    print_health_report(&health);

    if health.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 evergit System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    let errors = health.errors().len();
    let warnings = health.warnings().len();
    if health.all_passed() {
        if warnings == 0 {
            println!("✅ All checks passed");
        } else {
            println!("✅ All required checks passed ({} warning(s))", warnings);
        }
    } else {
        println!("❌ {} check(s) failed, {} warning(s)", errors, warnings);
    }
}
