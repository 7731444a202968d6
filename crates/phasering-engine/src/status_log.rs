//! Tick callback that logs controller status.
//!
//! In `update` mode the status line is logged every tick; in `change` mode
//! only when it differs from the last one logged. Each logged status is
//! followed by the group control messages as JSON at debug level.

use chrono::Utc;
use phasering_core::PhaseRingController;
use phasering_core::config::StatusMode;
use phasering_core::runner::TickCallback;
use phasering_core::tick::TickSummary;
use tracing::{debug, info, warn};

/// Callback that logs the controller status line.
pub struct StatusLogger {
    mode: StatusMode,
    last_line: Option<String>,
    logged: u64,
}

impl StatusLogger {
    /// Logger in the given mode.
    pub const fn new(mode: StatusMode) -> Self {
        Self {
            mode,
            last_line: None,
            logged: 0,
        }
    }

    /// Status lines logged so far.
    pub const fn logged(&self) -> u64 {
        self.logged
    }

    fn should_log(&self, line: &str) -> bool {
        match self.mode {
            StatusMode::Update => true,
            StatusMode::Change => self.last_line.as_deref() != Some(line),
        }
    }
}

impl TickCallback for StatusLogger {
    fn on_tick(&mut self, summary: &TickSummary, controller: &PhaseRingController) {
        let line = controller.status_line();
        if !self.should_log(&line) {
            return;
        }
        info!(
            controller = %controller.name(),
            step = summary.step,
            seconds = summary.seconds,
            heads = %controller.signal_head_states(),
            status = %line,
            "Controller status"
        );
        for message in controller.control_messages(Utc::now()) {
            match serde_json::to_string(&message) {
                Ok(json) => debug!(id = %message.id, payload = %json, "Group control message"),
                Err(e) => warn!(id = %message.id, error = %e, "Failed to encode control message"),
            }
        }
        self.logged = self.logged.saturating_add(1);
        self.last_line = Some(line);
    }
}
