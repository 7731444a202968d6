//! Controller engine binary for the phase-ring intersection controller.
//!
//! This is the main entry point that wires together configuration, the
//! controller, the scripted detector feed and the paced tick loop. It runs
//! until the configured time bound is reached or the process is interrupted.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `PHASERING_CONFIG` or `phasering-config.yaml`
//! 3. Create the simulation clock from the timer config
//! 4. Build and validate the controller
//! 5. Read the detector script
//! 6. Create run control and hook Ctrl-C to a clean stop
//! 7. Run the controller loop
//! 8. Log the result

mod error;
mod script;
mod status_log;

use std::path::PathBuf;
use std::sync::Arc;

use phasering_core::PhaseRingController;
use phasering_core::clock::{Clock, SimClock};
use phasering_core::config::{ConfigError, PhaseringConfig};
use phasering_core::operator::RunControl;
use phasering_core::runner;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::script::ScriptedInputs;
use crate::status_log::StatusLogger;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "PHASERING_CONFIG";

/// Configuration file used when the variable is unset.
const DEFAULT_CONFIG_PATH: &str = "phasering-config.yaml";

/// Configuration used when no file is found.
const DEMO_CONFIG: &str = include_str!("../demo-config.yaml");

/// Application entry point for the controller engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the run itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("phasering-engine starting");

    // 2. Load configuration.
    let contents = load_config_source()?;
    let config = PhaseringConfig::parse(&contents)?;
    info!(
        controller = %config.controller.name,
        groups = config.controller.group_list.len(),
        phases = config.controller.phases.len(),
        detectors = config.controller.detectors.len(),
        "Configuration loaded"
    );

    // 3. Create the simulation clock.
    let mut clock = SimClock::new(config.timer.time_step)?;
    info!(time_step = clock.time_step(), "Simulation clock initialized");

    // 4. Build the controller.
    let mut controller = PhaseRingController::new(&config.controller)?;

    // 5. Read the detector script.
    let mut source = ScriptedInputs::from_yaml(&contents)?;
    info!(events = source.remaining(), "Detector script loaded");

    // 6. Create run control.
    let control = Arc::new(RunControl::new(&config.timer, &config.run));
    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping");
                    control.request_stop();
                }
                Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
            }
        });
    }
    if config.run.max_seconds <= 0.0 {
        info!("No time bound configured, running until interrupted");
    }

    // 7. Run the controller.
    let mut callback = StatusLogger::new(config.run.status_mode);
    let result = runner::run_controller(
        &mut controller,
        &mut clock,
        &mut source,
        &control,
        &mut callback,
    )
    .await?;

    // 8. Log results.
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        seconds = clock.seconds(),
        started_at = %control.started_at(),
        status = %controller.status_line(),
        "phasering-engine shutdown complete"
    );

    Ok(())
}

/// Read the configuration document.
///
/// Uses the file named by `PHASERING_CONFIG`, else `phasering-config.yaml`
/// in the working directory, else the built-in demo.
fn load_config_source() -> Result<String, EngineError> {
    let path = std::env::var_os(CONFIG_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        info!(path = %path.display(), "Reading configuration");
        let contents = std::fs::read_to_string(&path).map_err(ConfigError::from)?;
        Ok(contents)
    } else {
        info!(path = %path.display(), "Config file not found, using built-in demo");
        Ok(DEMO_CONFIG.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn demo_config_builds_a_controller() {
        let config = PhaseringConfig::parse(DEMO_CONFIG).unwrap();
        let controller = PhaseRingController::new(&config.controller).unwrap();
        assert_eq!(controller.groups().len(), 2);
        assert!(config.run.max_seconds > 0.0);
        assert!(ScriptedInputs::from_yaml(DEMO_CONFIG).unwrap().remaining() > 0);
    }
}
