//! tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over `--verbose`, which takes precedence over
//! the configured level. Console output goes to stderr so stdout only carries
//! command results.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
pub fn init_logging(verbose: bool, config: &LoggingConfig, log_file: Option<&Path>) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = default_directive(verbose, config);
            EnvFilter::try_new(directive)
                .with_context(|| format!("Invalid log level: {}", directive))?
        }
    };

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    if let Some(path) = log_file {
        let file = open_log_file(path)?;
        layers.push(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

fn default_directive(verbose: bool, config: &LoggingConfig) -> &str {
    if verbose {
        "debug"
    } else {
        config.level.as_str()
    }
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.color);

    match config.format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Full => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Open `path` for appending, creating it and its parent directories
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {:?}", path))
}
