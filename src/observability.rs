//! Shared logging configuration and initialization.

use std::env;
use std::path::Path;

use chrono::{DateTime, SecondsFormat};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::factory::Function;
use crate::series::TimeSeries;

pub const LOG_LEVEL_VAR: &str = "METRIC_TRANSFORM_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "METRIC_TRANSFORM_LOG_FORMAT";
pub const LOG_TARGET_VAR: &str = "METRIC_TRANSFORM_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var(LOG_LEVEL_VAR) {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var(LOG_FORMAT_VAR) {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var(LOG_TARGET_VAR) {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

/// RFC 3339 rendering of an epoch-millisecond timestamp; out-of-range values stay numeric.
pub fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

pub fn log_app_start(config: &LoggingConfig, function: &str) {
    info!(
        component = "transform_series",
        event = "app.start",
        function,
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_series_loaded(path: &Path, series: &[TimeSeries]) {
    let first = series.iter().filter_map(TimeSeries::first_timestamp).min();
    let last = series.iter().filter_map(TimeSeries::last_timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => info!(
            component = "transform_series",
            event = "input.loaded",
            path = %path.display(),
            series = series.len(),
            first = %format_timestamp(first),
            last = %format_timestamp(last)
        ),
        _ => info!(
            component = "transform_series",
            event = "input.loaded",
            path = %path.display(),
            series = series.len()
        ),
    }
}

pub fn log_pager_chunk(
    function: Function,
    index: usize,
    chunks: usize,
    start: i64,
    end: i64,
    result: &[TimeSeries],
) {
    info!(
        component = "pager",
        event = "pager.chunk",
        function = %function,
        index,
        chunks,
        chunk_start = %format_timestamp(start),
        chunk_end = %format_timestamp(end),
        outputs = result.len(),
        datapoints = result.iter().map(|s| s.datapoints.len()).sum::<usize>()
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
