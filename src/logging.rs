// src/logging.rs
//
// Run-scoped logger. Instead of installing a process-wide subscriber,
// main builds a Dispatch from LogSettings and executes the run inside
// tracing::dispatcher::with_default, so every stage logs through the
// instance that was handed to it.

use crate::error::EstimatorError;
use crate::types::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "estimator.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    File,
    Console,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            Self::Error => "traffic_estimator=error",
            Self::Warning => "traffic_estimator=warn",
            Self::Info => "traffic_estimator=info",
            Self::Debug => "traffic_estimator=debug",
            Self::Trace => "traffic_estimator=trace",
        }
    }
}

impl FromStr for LogMode {
    type Err = EstimatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ENABLE" => Ok(Self::Enable),
            "DISABLE" => Ok(Self::Disable),
            other => Err(EstimatorError::config(format!("unknown log mode '{}'", other))),
        }
    }
}

impl FromStr for LogSink {
    type Err = EstimatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FILE" => Ok(Self::File),
            "CONSOLE" => Ok(Self::Console),
            "ALL" => Ok(Self::All),
            other => Err(EstimatorError::config(format!("unknown log type '{}'", other))),
        }
    }
}

impl FromStr for LogLevel {
    type Err = EstimatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Self::Error),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "INFO" => Ok(Self::Info),
            // BUFFER was a verbose level of the old logger
            "DEBUG" | "BUFFER" => Ok(Self::Debug),
            "TRACE" => Ok(Self::Trace),
            other => Err(EstimatorError::config(format!("unknown log level '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub mode: LogMode,
    pub sink: LogSink,
    pub level: LogLevel,
}

impl LogSettings {
    pub fn from_config(cfg: &LoggingConfig) -> Result<Self> {
        Ok(Self {
            mode: cfg.mode.parse()?,
            sink: cfg.sink.parse()?,
            level: cfg.level.parse()?,
        })
    }

    /// Build the dispatch for one run. File output goes to
    /// `<log_dir>/estimator.log`, created on demand.
    pub fn build(&self, log_dir: &Path) -> Result<Dispatch> {
        if self.mode == LogMode::Disable {
            return Ok(Dispatch::none());
        }

        let filter = EnvFilter::new(self.level.directive());
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false);

        let dispatch = match self.sink {
            LogSink::Console => Dispatch::new(builder.with_writer(std::io::stderr).finish()),
            LogSink::File => {
                let file = open_log_file(log_dir)?;
                Dispatch::new(builder.with_ansi(false).with_writer(Mutex::new(file)).finish())
            }
            LogSink::All => {
                let file = open_log_file(log_dir)?;
                let writer = std::io::stderr.and(Mutex::new(file));
                Dispatch::new(builder.with_ansi(false).with_writer(writer).finish())
            }
        };
        Ok(dispatch)
    }
}

fn open_log_file(log_dir: &Path) -> Result<File> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let path = log_dir.join(LOG_FILE_NAME);
    File::options()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))
}
