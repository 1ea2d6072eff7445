//! Logging setup shared by the agent and the controller.
//!
//! Everything is written to stderr: the controller's stdout carries the
//! combined tar stream and must never see a log line. An optional log
//! directory adds a daily-rolling file written through a non-blocking
//! appender; the returned guards must be held for the life of the process so
//! buffered lines are flushed on exit.

use crate::config::EnvParser;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" | "human" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive (e.g. `info`, `debug`, `docketd=trace`).
    pub level: String,
    pub format: LogFormat,
    /// Directory for a rolling log file, in addition to stderr.
    pub directory: Option<PathBuf>,
    /// File name prefix for the rolling log file.
    pub file_prefix: String,
}

/// Guards that flush non-blocking writers when dropped.
#[must_use = "dropping the guards stops background log flushing"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

impl LogConfig {
    /// Read `DOCKET_LOG_LEVEL`, `DOCKET_LOG_FORMAT` and `DOCKET_LOG_DIR`.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let format_raw = parser.get_string("LOG_FORMAT", "pretty").value;
        let directory = parser.get_optional_path("LOG_DIR").value;

        for err in parser.take_errors() {
            eprintln!("docket: ignoring bad logging configuration: {err}");
        }

        Self {
            level,
            format: LogFormat::parse(&format_raw).unwrap_or(LogFormat::Pretty),
            directory,
            file_prefix: "docket.log".to_string(),
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn with_file_prefix(mut self, prefix: &str) -> Self {
        self.file_prefix = prefix.to_string();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
            file_prefix: "docket.log".to_string(),
        }
    }
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let mut guards = Vec::new();

    let file_writer = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(writer)
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(config.filter());

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(file_writer.map(|w| fmt::layer().with_writer(w).with_ansi(false)))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true),
            )
            .with(file_writer.map(|w| fmt::layer().json().with_writer(w)))
            .try_init(),
    };
    result.context("failed to install tracing subscriber")?;

    Ok(LoggingGuards { _guards: guards })
}
