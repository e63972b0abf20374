//! `glom`: coincidence-window event builder.
//!
//! Reads the orderer's time-ordered fragment stream on stdin and writes
//! ring items on stdout. Logs go to stderr.
//!
//! ```bash
//! orderer-output | glom --dt=100 --timestamp-policy=earliest --sourceid=10 > events.bin
//! ```

// Use mimalloc for allocation-heavy event assembly
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use evb_glom::cli::Cli;
use evb_glom::{GlomError, GlomSettings};
use rust_evb::config::EvbConfig;
use rust_evb::logging::{self, parse_log_level, TracingConfig};
use std::io::{self, BufReader, BufWriter};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Until the subscriber is installed stderr is the only channel.
    let settings = match setup(cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("glom: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match build(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{:#}", e), "Event builder failed");
            ExitCode::FAILURE
        }
    }
}

/// Resolve settings and install logging.
fn setup(cli: Cli) -> Result<GlomSettings> {
    let config = EvbConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let settings = match cli.settings(&config.glom) {
        Ok(settings) => settings,
        Err(e @ (GlomError::MissingWindow | GlomError::InvalidWindow(_))) => {
            Cli::command()
                .error(ErrorKind::ValueValidation, e.to_string())
                .exit();
        }
        Err(e) => return Err(e.into()),
    };

    let mut tracing_config = TracingConfig::from_config(&config)?;
    if let Some(level) = &cli.log_level {
        tracing_config = tracing_config.with_level(parse_log_level(level)?);
    }
    logging::init(tracing_config)?;
    Ok(settings)
}

fn build(settings: GlomSettings) -> Result<()> {
    info!(
        dt = settings.dt,
        building = settings.building,
        policy = %settings.policy,
        source_id = settings.source_id,
        "Event builder starting"
    );

    let input = BufReader::new(io::stdin().lock());
    let output = BufWriter::new(io::stdout().lock());
    let stats = evb_glom::run(input, output, settings).context("Event building failed")?;

    info!(
        fragments = stats.fragments,
        events = stats.events,
        barriers = stats.barriers,
        unknown_payloads = stats.unknown_payloads,
        synthesized_abnormal_ends = stats.synthesized_abnormal_ends,
        "Event builder finished"
    );
    Ok(())
}
