//! Configuration loading with Figment.
//!
//! Configuration is merged from, in increasing priority:
//! 1. Built-in defaults
//! 2. A TOML file (`evb.toml` unless a path is given)
//! 3. Environment variables prefixed with `RUST_EVB_`, `__` separating
//!    nested keys (e.g. `RUST_EVB_ORDERER__INSTANCE=east`)
//!
//! # Example
//! ```no_run
//! use rust_evb::config::EvbConfig;
//!
//! let config = EvbConfig::load(None)?;
//! println!("Orderer user: {}", config.orderer.user);
//! # Ok::<(), rust_evb::error::EvbError>(())
//! ```

use evb_core::TimestampPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::EvbError;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "evb.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RUST_EVB_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvbConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub orderer: OrdererConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub glom: GlomDefaults,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Where and as whom to find the orderer.
///
/// This is the explicit context handed to the orderer client; nothing about
/// service discovery lives in process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdererConfig {
    /// Host running both the port manager and the orderer.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port manager (service directory) port.
    #[serde(default = "default_directory_port")]
    pub directory_port: u16,
    /// User the orderer must be advertised under.
    #[serde(default = "default_user")]
    pub user: String,
    /// Optional orderer instance name.
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Read/write timeout on the orderer socket; none means block forever.
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,
}

impl Default for OrdererConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            directory_port: default_directory_port(),
            user: default_user(),
            instance: None,
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: None,
        }
    }
}

impl OrdererConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

/// Fragment source driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Sleep between driver polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Defaults for the event builder; command line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlomDefaults {
    /// Coincidence window in ticks.
    #[serde(default)]
    pub dt: Option<i64>,
    #[serde(default)]
    pub policy: TimestampPolicy,
    /// Source id stamped on built events.
    #[serde(default)]
    pub source_id: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_directory_port() -> u16 {
    30000
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    10
}

impl EvbConfig {
    /// Load and validate configuration.
    ///
    /// With `path = None` the default file is used if present; an explicit
    /// path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, EvbError> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(EvbError::Configuration(format!(
                        "Configuration file {} does not exist",
                        path.display()
                    )));
                }
                Toml::file(path)
            }
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        let config: EvbConfig = Figment::from(Serialized::defaults(EvbConfig::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), EvbError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(EvbError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(EvbError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.orderer.host.trim().is_empty() {
            return Err(EvbError::Configuration(
                "orderer.host must not be empty".to_string(),
            ));
        }

        if self.orderer.directory_port == 0 {
            return Err(EvbError::Configuration(
                "orderer.directory_port must be non-zero".to_string(),
            ));
        }

        if self.orderer.connect_timeout_ms == 0 {
            return Err(EvbError::Configuration(
                "orderer.connect_timeout_ms must be at least 1".to_string(),
            ));
        }

        if self.orderer.io_timeout_ms == Some(0) {
            return Err(EvbError::Configuration(
                "orderer.io_timeout_ms must be at least 1 when set".to_string(),
            ));
        }

        if self.orderer.user.trim().is_empty() {
            return Err(EvbError::Configuration(
                "orderer.user must not be empty".to_string(),
            ));
        }

        if self.source.poll_interval_ms == 0 {
            return Err(EvbError::Configuration(
                "source.poll_interval_ms must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
