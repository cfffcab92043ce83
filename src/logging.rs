//! Structured logging initialization
//!
//! All diagnostics go through `tracing`. This module installs the subscriber:
//! an `EnvFilter` plus a JSON (production) or pretty (development) `fmt`
//! layer, optionally buffered through `tracing-appender`.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `RUST_LOG` | Full filter directive, wins over everything | unset |
//! | `SCGI_LOG_LEVEL` | trace/debug/info/warn/error | `info` |
//! | `SCGI_LOG_FORMAT` | json/pretty | `json` |
//! | `SCGI_LOG_ASYNC` | buffer output on a background thread | `true` |
//! | `SCGI_LOG_INCLUDE_LOCATION` | file:line in every event | `false` |

use anyhow::{Context, Result};
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset
    pub log_level: String,
    pub format: LogFormat,
    /// Write through a non-blocking background writer
    pub async_logging: bool,
    /// Include file:line location (dev only)
    pub include_location: bool,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl LogConfig {
    /// Parse configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("SCGI_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: LogFormat::parse(
                &env::var("SCGI_LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
            ),
            async_logging: env_flag("SCGI_LOG_ASYNC", true),
            include_location: env_flag("SCGI_LOG_INCLUDE_LOCATION", false),
        }
    }

    /// Verbose synchronous pretty output for local runs
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            async_logging: false,
            include_location: true,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// With async logging the returned guard flushes buffered lines on drop;
/// keep it alive for the lifetime of the process.
///
/// # Errors
///
/// A global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = if config.async_logging {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
        (BoxMakeWriter::new(non_blocking), Some(guard))
    } else {
        (BoxMakeWriter::new(std::io::stdout), None)
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
    }

    #[test]
    fn test_default_dev() {
        let config = LogConfig::default_dev();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.async_logging);
    }
}
