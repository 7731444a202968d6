//! Paced controller loop with operator controls.
//!
//! [`run_controller`] wraps the single-tick [`run_tick`] with:
//!
//! - **Bounded runs**: stop once simulated time reaches `max_seconds`
//! - **Pause/resume** and **clean stop** through [`RunControl`]
//! - **Real-time pacing**: one tick every `time_step / multiplier` seconds,
//!   measured against a running deadline so sleep overshoot does not
//!   accumulate; a multiplier of 0 runs as fast as possible
//!
//! [`run_tick`]: crate::tick::run_tick

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::clock::{Clock, ClockError, SimClock};
use crate::controller::PhaseRingController;
use crate::operator::{RunControl, RunEndReason};
use crate::tick::{self, TickInputs, TickSummary};

/// Errors that can occur during a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The clock could not advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// Result of a run.
#[derive(Debug)]
pub struct RunResult {
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// The last tick summary, if any tick ran.
    pub final_summary: Option<TickSummary>,
    /// Ticks run.
    pub total_ticks: u64,
}

/// Source of detector inputs, asked once per tick.
pub trait InputSource: Send {
    /// Inputs for the tick at `seconds`.
    fn inputs_at(&mut self, seconds: f64) -> TickInputs;
}

/// An input source that never reports anything.
pub struct NoInputs;

impl InputSource for NoInputs {
    fn inputs_at(&mut self, _seconds: f64) -> TickInputs {
        TickInputs::default()
    }
}

/// Callback invoked after each tick.
pub trait TickCallback: Send {
    /// Called after a tick completes.
    fn on_tick(&mut self, summary: &TickSummary, controller: &PhaseRingController);
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl TickCallback for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _controller: &PhaseRingController) {}
}

/// Run the controller until a termination condition is met.
///
/// Operator-queued inputs are merged over the source's inputs, later
/// entries winning.
///
/// # Errors
///
/// Returns [`RunnerError`] if the clock overflows.
pub async fn run_controller(
    controller: &mut PhaseRingController,
    clock: &mut SimClock,
    source: &mut dyn InputSource,
    control: &Arc<RunControl>,
    callback: &mut dyn TickCallback,
) -> Result<RunResult, RunnerError> {
    let mut last_summary: Option<TickSummary> = None;
    let mut total_ticks: u64 = 0;
    let mut deadline = Instant::now();

    info!(
        controller = %controller.name(),
        time_step = clock.time_step(),
        real_time_multiplier = control.real_time_multiplier(),
        max_seconds = control.max_seconds(),
        "Controller run starting"
    );

    loop {
        if control.is_paused() {
            info!("Run paused, waiting for resume...");
            control.wait_if_paused().await;
            info!("Run resumed");
            deadline = Instant::now();
        }

        let end_reason = if control.is_stop_requested() {
            Some(RunEndReason::OperatorStop)
        } else if control.time_limit_reached(clock.seconds()) {
            Some(RunEndReason::MaxSecondsReached)
        } else {
            None
        };
        if let Some(reason) = end_reason {
            control.set_end_reason(reason).await;
            info!(
                reason = ?reason,
                total_ticks,
                seconds = clock.seconds(),
                "Controller run ended"
            );
            return Ok(RunResult {
                end_reason: reason,
                final_summary: last_summary,
                total_ticks,
            });
        }

        let mut inputs = source.inputs_at(clock.seconds());
        for queued in control.drain_queued_inputs().await {
            inputs.occupancy.extend(queued.occupancy);
            inputs.zones.extend(queued.zones);
        }

        let summary = tick::run_tick(controller, &*clock, &inputs);
        total_ticks = total_ticks.saturating_add(1);
        callback.on_tick(&summary, controller);
        last_summary = Some(summary);

        clock.advance()?;

        let multiplier = control.real_time_multiplier();
        if multiplier > 0.0 {
            match Duration::try_from_secs_f64(clock.time_step() / multiplier) {
                Ok(period) => {
                    deadline += period;
                    let now = Instant::now();
                    if deadline < now {
                        // Fell behind; pace from here instead of bursting.
                        deadline = now;
                    }
                    tokio::time::sleep_until(deadline).await;
                }
                Err(e) => {
                    warn!(multiplier, error = %e, "Invalid tick period, running unpaced");
                }
            }
        }
    }
}
