//! Tracing initialization.
//!
//! Everything logs through `tracing` macros; this module installs the
//! `tracing-subscriber` fmt layer. Output always goes to stderr because the
//! event builder's stdout carries binary data.
//!
//! # Example
//! ```no_run
//! use rust_evb::{config::EvbConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EvbConfig::load(None)?;
//! logging::init_from_config(&config)?;
//! info!(source_id = 3, "Source attached");
//! # Ok(())
//! # }
//! ```

use crate::config::EvbConfig;
use crate::error::EvbError;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    Pretty,
    /// Single-line format without colors
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    pub with_file_and_line: bool,
    pub with_thread_names: bool,
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: false,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the loaded configuration
    pub fn from_config(config: &EvbConfig) -> Result<Self, EvbError> {
        let level = parse_log_level(&config.logging.level)?;
        let format = parse_format(&config.logging.format)?;

        Ok(Self {
            level,
            format,
            with_ansi: format == OutputFormat::Pretty,
            ..Default::default()
        })
    }

    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the loaded configuration
pub fn init_from_config(config: &EvbConfig) -> Result<(), EvbError> {
    init(TracingConfig::from_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, which keeps tests and embedding applications happy.
pub fn init(config: TracingConfig) -> Result<(), EvbError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            if e
                .to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(EvbError::Logging(e.to_string()))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, EvbError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(EvbError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn parse_format(format: &str) -> Result<OutputFormat, EvbError> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        _ => Err(EvbError::Configuration(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        ))),
    }
}

fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}
