//! Tracing setup
//!
//! Console output at the level the user picked, plus a full trace of the
//! last run on disk.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::SeedcastError;

const DEFAULT_LOGS_DIR: &str = "logs";
const LOG_FILE_NAME: &str = "seedcast-last-run.log";

/// Installs the console and file layers and returns the log file path.
///
/// The file is `<logs_dir>/seedcast-last-run.log` (default `./logs`) and is
/// overwritten on every run. `RUST_LOG` overrides the console level.
///
/// # Errors
///
/// - `SeedcastError::Io` - Logs directory or file could not be created
/// - `SeedcastError::Configuration` - A global subscriber is already set
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> crate::Result<PathBuf> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR));
    create_dir_all(logs_path)?;
    let log_file_path = logs_path.join(LOG_FILE_NAME);
    let log_file = File::create(&log_file_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer()
        .with_target(false)
        .without_time()
        .with_filter(console_filter);

    // Wire lines are logged at debug, so the file keeps everything
    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SeedcastError::Configuration {
            reason: format!("tracing already initialized: {e}"),
        })?;

    tracing::debug!(
        "Tracing initialized: console={}, file={}",
        console_level,
        log_file_path.display()
    );
    Ok(log_file_path)
}

/// Console verbosity picked on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    /// Includes every wire line exchanged with the engine
    Debug,
    Trace,
}

impl CliLogLevel {
    /// # Examples
    /// ```
    /// use seedcast_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Info.as_tracing_level();
    /// assert_eq!(level, tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as clap::ValueEnum>::from_str(s, true).map_err(|_| format!("Invalid log level: {s}"))
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tracing_level().as_str().to_ascii_lowercase().as_str())
    }
}
