//! One controller tick.
//!
//! Order within a tick:
//!
//! 1. Detectors take their inputs (occupancy edges, re-asserts, zone reports).
//! 2. Extenders recompute their verdicts, in group order.
//! 3. Every group's state is snapshotted.
//! 4. Groups run their transitions, in group order.
//! 5. The scheduler runs Scan/Hold.
//!
//! Detector and scheduler messages are committed as they are produced.
//! Group messages follow [`MessageApply`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::clock::Clock;
use crate::config::MessageApply;
use crate::controller::PhaseRingController;
use crate::detector::ZoneReport;
use crate::group::GroupId;
use crate::message::{GroupMessage, apply_all};
use crate::scheduler::SchedulerStatus;
use crate::state::SignalState;

/// Upper bound on transitions a single group may take in one tick.
pub const MAX_CASCADE: usize = 16;

/// Detector inputs for one tick, keyed by detector name or external id.
///
/// Detectors absent from the maps keep their previous state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickInputs {
    /// Occupancy per detector.
    pub occupancy: BTreeMap<String, bool>,
    /// Zone reports per zone detector.
    pub zones: BTreeMap<String, ZoneReport>,
}

impl TickInputs {
    /// Set a detector's occupancy.
    #[must_use]
    pub fn with_occupancy(mut self, detector: &str, occupied: bool) -> Self {
        self.occupancy.insert(detector.to_owned(), occupied);
        self
    }

    /// Set a zone detector's report.
    #[must_use]
    pub fn with_zone(mut self, detector: &str, report: ZoneReport) -> Self {
        self.zones.insert(detector.to_owned(), report);
        self
    }

    /// Whether no detector has input this tick.
    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty() && self.zones.is_empty()
    }

    fn lookup<'a, T>(map: &'a BTreeMap<String, T>, name: &str, external_id: &str) -> Option<&'a T> {
        map.get(name).or_else(|| map.get(external_id))
    }
}

/// One group's state change over a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupTransition {
    /// The group.
    pub group: GroupId,
    /// State at the start of the tick.
    pub from: SignalState,
    /// State at the end of the tick.
    pub to: SignalState,
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    /// Controller step count after the tick.
    pub step: u64,
    /// Simulation second of the tick.
    pub seconds: f64,
    /// Groups whose state changed.
    pub changes: Vec<GroupTransition>,
    /// Phase (0-based) that started this tick.
    pub phase_started: Option<usize>,
    /// Scheduler status after the tick.
    pub status: SchedulerStatus,
    /// Every committed message, in commit order.
    pub messages: Vec<GroupMessage>,
}

/// Run one tick of `controller` at the clock's current time.
pub fn run_tick(
    controller: &mut PhaseRingController,
    clock: &dyn Clock,
    inputs: &TickInputs,
) -> TickSummary {
    let now = clock.seconds();
    let mut committed = Vec::new();

    update_detectors(controller, inputs, now, &mut committed);
    update_extenders(controller, now);

    for group in &mut controller.groups {
        group.snapshot_state();
    }
    run_groups(controller, now, &mut committed);

    let (scheduled, phase_started) = controller.schedule(now);
    committed.extend(scheduled);

    controller.step_count = controller.step_count.saturating_add(1);
    let changes: Vec<GroupTransition> = controller
        .groups
        .iter()
        .filter(|g| g.prev_state() != g.state())
        .map(|g| GroupTransition {
            group: g.id(),
            from: g.prev_state(),
            to: g.state(),
        })
        .collect();
    for change in &changes {
        debug!(
            controller = %controller.name,
            group = %controller.groups.get(change.group.index()).map_or("", |g| g.name()),
            from = %change.from,
            to = %change.to,
            seconds = now,
            "Group state changed"
        );
    }

    TickSummary {
        step: controller.step_count,
        seconds: now,
        changes,
        phase_started,
        status: controller.status,
        messages: committed,
    }
}

fn update_detectors(
    controller: &mut PhaseRingController,
    inputs: &TickInputs,
    now: f64,
    committed: &mut Vec<GroupMessage>,
) {
    for index in 0..controller.detectors.len() {
        let Some(detector) = controller.detectors.get_mut(index) else {
            continue;
        };
        let name = detector.name().to_owned();
        let external_id = detector.external_id().to_owned();
        let mut outgoing = Vec::new();
        if let Some(&occupied) = TickInputs::lookup(&inputs.occupancy, &name, &external_id) {
            outgoing.extend(detector.set_occupied(occupied, now, &controller.groups));
        }
        outgoing.extend(detector.reassert(&controller.groups));
        if let Some(report) = TickInputs::lookup(&inputs.zones, &name, &external_id) {
            detector.ingest(report);
        }
        apply_all(&mut controller.groups, &outgoing);
        committed.extend(outgoing);
    }
}

fn update_extenders(controller: &mut PhaseRingController, now: f64) {
    for index in 0..controller.groups.len() {
        let id = GroupId::new(index);
        let Some(group) = controller.groups.get(index) else {
            continue;
        };
        let (loop_index, zone_index) = (group.loop_extender, group.zone_extender);
        if let Some(extender) = loop_index.and_then(|i| controller.loop_extenders.get_mut(i)) {
            extender.update(&controller.detectors, &controller.groups, now);
        }
        if let Some(i) = zone_index {
            let conf_sum = controller.conflict_pressure(id);
            if let Some(extender) = controller.zone_extenders.get_mut(i) {
                extender.update(&mut controller.detectors, &controller.groups, conf_sum, now);
            }
        }
    }
}

fn run_groups(controller: &mut PhaseRingController, now: f64, committed: &mut Vec<GroupMessage>) {
    let deferred = controller.message_apply == MessageApply::Deferred;
    let mut pending = Vec::new();
    for index in 0..controller.groups.len() {
        let id = GroupId::new(index);
        let fixed_call = controller
            .groups
            .get(index)
            .is_some_and(|g| g.wants_fixed_request() && !g.request_green());
        if fixed_call {
            let call = GroupMessage::RequestGreen { group: id, on: true };
            apply_all(&mut controller.groups, &[call]);
            committed.push(call);
        }
        let extending = controller.group_extending(id);
        for _ in 0..MAX_CASCADE {
            let Some(group) = controller.groups.get(index) else {
                break;
            };
            let Some(to) = group.next_state(&controller.groups, now, extending) else {
                break;
            };
            let cascades = group.instant_transfer() && to.cascades();
            let Some(group) = controller.groups.get_mut(index) else {
                break;
            };
            let outgoing = group.enter(to, now);
            if deferred {
                pending.extend(outgoing);
            } else {
                apply_all(&mut controller.groups, &outgoing);
                committed.extend(outgoing);
            }
            if !cascades {
                break;
            }
        }
    }
    apply_all(&mut controller.groups, &pending);
    committed.extend(pending);
}
