//! Logging setup for applications embedding the ZNP link
//!
//! The library crates only emit `tracing` events; the host application calls
//! [`init_logging`] once to install a subscriber.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or filter directive (e.g. `info`, `znp_link=debug`)
    pub level: String,
    /// Enable console output
    pub console: bool,
    /// Daily-rolling log file path
    pub file: Option<String>,
    /// Log format
    pub format: LogFormat,
    /// Enable ANSI colors in console output
    pub ansi: bool,
    /// Include span events
    pub span_events: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: None,
            format: LogFormat::Compact,
            ansi: true,
            span_events: false,
        }
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| crate::Error::logging(format!("invalid level: {}", e)))
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging with the given configuration
///
/// Returns a guard that must be kept alive for file logging to work
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers = Vec::new();
    let mut guard = None;

    if config.console {
        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_ansi(config.ansi)
                .with_target(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_ansi(config.ansi)
                .with_target(true)
                .with_span_events(span_events(config.span_events))
                .boxed(),
        };
        layers.push(layer.with_filter(build_filter(&config.level)?).boxed());
    }

    if let Some(file_path) = &config.file {
        let path = Path::new(file_path);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let file_appender = tracing_appender::rolling::daily(
            dir,
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("znp.log"),
        );
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .boxed(),
            LogFormat::Pretty | LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        };
        layers.push(layer.with_filter(build_filter(&config.level)?).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| crate::Error::logging(e.to_string()))?;

    Ok(guard)
}
