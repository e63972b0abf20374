//! Command line of the `glom` binary.

use clap::Parser;
use evb_core::TimestampPolicy;
use rust_evb::config::GlomDefaults;
use std::path::PathBuf;

use crate::{GlomError, GlomSettings};

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "glom")]
#[command(
    about = "Build coincidence events from an ordered fragment stream",
    long_about = "Reads time-ordered event builder fragments on stdin and writes ring items \
                  on stdout. Fragments within --dt ticks of an event's first fragment are \
                  merged into one physics event."
)]
pub struct Cli {
    /// Coincidence window in timestamp ticks (required unless --nobuild)
    #[arg(long, allow_negative_numbers = true)]
    pub dt: Option<i64>,

    /// Emit every fragment as its own event
    #[arg(long)]
    pub nobuild: bool,

    /// Timestamp given to built events: earliest, latest or average
    #[arg(long = "timestamp-policy", value_name = "POLICY")]
    pub timestamp_policy: Option<TimestampPolicy>,

    /// Source id stamped on built events
    #[arg(long = "sourceid", value_name = "ID")]
    pub source_id: Option<u32>,

    /// Configuration file (defaults to ./evb.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Resolve the builder settings, command line first, then `defaults`.
    pub fn settings(&self, defaults: &GlomDefaults) -> Result<GlomSettings, GlomError> {
        let policy = self.timestamp_policy.unwrap_or(defaults.policy);
        let source_id = self.source_id.unwrap_or(defaults.source_id);

        if self.nobuild {
            let mut settings = GlomSettings::passthrough(source_id);
            settings.policy = policy;
            settings.dt = self.dt.or(defaults.dt).map_or(0, |dt| dt.max(0) as u64);
            return Ok(settings);
        }

        let dt = self.dt.or(defaults.dt).ok_or(GlomError::MissingWindow)?;
        let dt = u64::try_from(dt).map_err(|_| GlomError::InvalidWindow(dt))?;
        Ok(GlomSettings::building(dt, policy, source_id))
    }
}
