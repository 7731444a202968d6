//! Scripted detector feed.
//!
//! The optional `script` section of the configuration lists detector events
//! at given simulation seconds:
//!
//! ```yaml
//! script:
//!   - { at: 0.0, detector: r1, occupied: true }
//!   - { at: 0.5, detector: r1, occupied: false }
//!   - { at: 30.0, detector: z1, zone: { flow: { entered: 3, exited: 0 } } }
//! ```
//!
//! Each event is delivered once, on the first tick at or after its second.
//! Detectors keep their last occupancy between events.

use phasering_core::clock::before;
use phasering_core::detector::ZoneReport;
use phasering_core::runner::InputSource;
use phasering_core::tick::TickInputs;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::EngineError;

/// One scripted detector event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptEvent {
    /// Simulation second of the event.
    pub at: f64,
    /// Detector name or external id.
    pub detector: String,
    /// New loop occupancy.
    #[serde(default)]
    pub occupied: Option<bool>,
    /// Zone report.
    #[serde(default)]
    pub zone: Option<ZoneReport>,
}

/// Input source replaying a script in time order.
#[derive(Debug, Default)]
pub struct ScriptedInputs {
    events: Vec<ScriptEvent>,
    next: usize,
}

impl ScriptedInputs {
    /// Source over `events`, sorted by time. Events with a non-finite time
    /// are dropped.
    pub fn new(mut events: Vec<ScriptEvent>) -> Self {
        events.retain(|e| {
            let keep = e.at.is_finite();
            if !keep {
                warn!(detector = %e.detector, "Script event with invalid time dropped");
            }
            keep
        });
        events.sort_by(|a, b| a.at.total_cmp(&b.at));
        Self { events, next: 0 }
    }

    /// Read the `script` section of a configuration document. A document
    /// without one yields an empty script.
    pub fn from_yaml(contents: &str) -> Result<Self, EngineError> {
        let raw: serde_yml::Value =
            serde_yml::from_str(contents).map_err(|e| EngineError::Script {
                message: format!("failed to parse config YAML: {e}"),
            })?;
        let Some(section) = raw.get("script") else {
            return Ok(Self::default());
        };
        let events: Vec<ScriptEvent> =
            serde_yml::from_value(section.clone()).map_err(|e| EngineError::Script {
                message: format!("failed to parse script section: {e}"),
            })?;
        Ok(Self::new(events))
    }

    /// Events not yet delivered.
    pub fn remaining(&self) -> usize {
        self.events.len().saturating_sub(self.next)
    }
}

impl InputSource for ScriptedInputs {
    fn inputs_at(&mut self, seconds: f64) -> TickInputs {
        let mut inputs = TickInputs::default();
        while let Some(event) = self.events.get(self.next) {
            if before(seconds, event.at) {
                break;
            }
            debug!(detector = %event.detector, at = event.at, seconds, "Script event delivered");
            if let Some(occupied) = event.occupied {
                inputs = inputs.with_occupancy(&event.detector, occupied);
            }
            if let Some(report) = &event.zone {
                inputs = inputs.with_zone(&event.detector, report.clone());
            }
            self.next = self.next.saturating_add(1);
        }
        inputs
    }
}
