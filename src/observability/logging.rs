//! Process-wide `tracing` subscriber setup.
//!
//! JSON lines by default so pipeline logs can be ingested like the events
//! themselves; pretty output for local runs.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "GG_TELEMETRY_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(LogError::InvalidFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directive, e.g. `info` or `gg_telemetry=debug`.
    pub level: String,
    /// Appended to when set, stderr otherwise.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("invalid log format: {0} (expected json or pretty)")]
    InvalidFormat(String),
    #[error("cannot open log file {path}: {reason}")]
    FileOpen { path: String, reason: String },
    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Install the global subscriber. A second call fails with
/// [`LogError::AlreadyInitialized`].
///
/// `GG_TELEMETRY_LOG`, when set, replaces `config.level`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let directives = std::env::var(LOG_ENV).unwrap_or_else(|_| config.level.clone());
    let filter = EnvFilter::try_new(&directives).map_err(|e| LogError::InvalidFilter(e.to_string()))?;
    let writer = make_writer(config.output_path.as_deref())?;

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

fn make_writer(path: Option<&Path>) -> Result<BoxMakeWriter, LogError> {
    let Some(path) = path else {
        return Ok(BoxMakeWriter::new(std::io::stderr));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LogError::FileOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(BoxMakeWriter::new(std::sync::Mutex::new(file)))
}
