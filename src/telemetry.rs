//! Tracing subscriber setup for the binary.
//!
//! Library code only emits events; installing the subscriber is left to
//! `main` so embedding applications keep control of global logging.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{CheckrunError, Result};

/// Executor log file, appended to across runs.
pub const LOG_FILE: &str = "pipeline_executor.log";

/// Build a subscriber that logs to stderr and to `<base_dir>/pipeline_executor.log`.
///
/// `RUST_LOG` wins over the default level (`info`, or `debug` when verbose).
pub fn init_subscriber(
    base_dir: &Path,
    verbose: bool,
) -> Result<impl Subscriber + Send + Sync + use<>> {
    fs::create_dir_all(base_dir)
        .map_err(|e| CheckrunError::io(format!("creating {}", base_dir.display()), e))?;
    let path = base_dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| CheckrunError::io(format!("opening {}", path.display()), e))?;

    let filter = env_filter(verbose);

    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer))
}

/// Console-only subscriber for commands that do not write run logs.
pub fn console_subscriber(verbose: bool) -> impl Subscriber + Send + Sync {
    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
