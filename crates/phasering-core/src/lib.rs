//! Signal-group state machines, phase-ring scheduling and demand-based green
//! extension for a traffic-signal intersection controller.
//!
//! A controller ticks on a simulated clock. Each tick, detectors turn
//! occupancy into green requests and extension demand, extenders decide
//! whether green should be held, every signal group walks its hierarchical
//! state machine, and the phase-ring scheduler grants permission to the next
//! phase with demand.
//!
//! # Modules
//!
//! - [`clock`] -- Simulation clock and tolerant timing comparisons.
//! - [`config`] -- Configuration loading from `phasering-config.yaml` into
//!   strongly-typed structs, validation, runtime-reconfiguration parsing.
//! - [`state`] -- Hierarchical signal-group states.
//! - [`group`] -- [`SignalGroup`]: guards and transitions of one group.
//! - [`message`] -- Cross-group messages and their apply phase.
//! - [`detector`] -- Request, extension, group-extension and zone detectors.
//! - [`extender`] -- Loop and zone extenders, extension policies, safety
//!   overlay.
//! - [`phase`] -- Main phases and ring order.
//! - [`controller`] -- [`PhaseRingController`]: construction, accessors,
//!   runtime reconfiguration and export.
//! - [`scheduler`] -- Scan/Hold phase scheduling.
//! - [`status`] -- Status strings and group control messages.
//! - [`tick`] -- One controller tick.
//! - [`operator`] -- Shared run control (pause, stop, pacing, manual inputs).
//! - [`runner`] -- The paced async controller loop.
//!
//! [`SignalGroup`]: group::SignalGroup
//! [`PhaseRingController`]: controller::PhaseRingController

pub mod clock;
pub mod config;
pub mod controller;
pub mod detector;
pub mod extender;
pub mod group;
pub mod message;
pub mod operator;
pub mod phase;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod tick;

pub use clock::{Clock, SimClock};
pub use config::{ConfigError, ControllerConfig, PhaseringConfig};
pub use controller::PhaseRingController;
pub use group::{GroupId, SignalGroup};
pub use scheduler::SchedulerStatus;
pub use state::SignalState;
pub use tick::{TickInputs, TickSummary, run_tick};
