//! End-to-end controller scenarios.
//!
//! Each scenario builds a controller from YAML, drives it tick by tick with
//! scripted detector inputs and checks timing and safety properties over
//! the whole run.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]

use std::collections::BTreeMap;

use phasering_core::clock::{Clock, SimClock};
use phasering_core::config::{DEFAULT_PRIORITY_LEVEL, ExtensionConfig, ExtensionMode, MessageApply, PhaseringConfig};
use phasering_core::extender::{DemandSample, decide};
use phasering_core::message::GroupMessage;
use phasering_core::state::{GreenStep, RedStep, SignalState};
use phasering_core::{GroupId, PhaseRingController, TickInputs, TickSummary, run_tick};

const TIME_STEP: f64 = 0.1;
const TOLERANCE: f64 = 1e-6;

const TWO_GROUPS: &str = r"
timer:
  time_step: 0.1
controller:
  name: crossing
  group_list: [g1, g2]
  signal_groups:
    g1: { min_green: 10, max_green: 60, min_red: 5, min_amber: 4, min_amber_red: 2 }
    g2: { min_green: 10, max_green: 60, min_red: 5, min_amber: 4, min_amber_red: 2 }
  intergreens:
    - [0, 3]
    - [3, 0]
  phases:
    - [1, 0]
    - [0, 1]
  detectors:
    r1: { type: request, request_groups: [g1], sumo_id: loop_g1 }
    r2: { type: request, request_groups: [g2] }
    e1: { type: extender, group: g1, ext_time: 2 }
    p2: { type: prio, group: g2 }
";

fn controller(yaml: &str) -> PhaseRingController {
    let config = PhaseringConfig::parse(yaml).unwrap();
    PhaseRingController::new(&config.controller).unwrap()
}

fn occupied_within(seconds: f64, from: f64, to: f64) -> bool {
    seconds + TOLERANCE >= from && seconds + TOLERANCE < to
}

/// Drive `controller` for `ticks` ticks, calling `observe` after each.
fn drive(
    controller: &mut PhaseRingController,
    ticks: u64,
    inputs: impl Fn(f64) -> TickInputs,
    mut observe: impl FnMut(&TickSummary, &PhaseRingController),
) -> SimClock {
    let mut clock = SimClock::new(TIME_STEP).unwrap();
    for _ in 0..ticks {
        let summary = run_tick(controller, &clock, &inputs(clock.seconds()));
        observe(&summary, controller);
        clock.advance().unwrap();
    }
    clock
}

/// Drive until `done` holds after a tick; returns that tick's summary.
fn drive_until(
    controller: &mut PhaseRingController,
    clock: &mut SimClock,
    inputs: impl Fn(f64) -> TickInputs,
    done: impl Fn(&PhaseRingController) -> bool,
) -> TickSummary {
    for _ in 0..100_000 {
        let summary = run_tick(controller, &*clock, &inputs(clock.seconds()));
        clock.advance().unwrap();
        if done(controller) {
            return summary;
        }
    }
    panic!("condition never reached");
}

fn top_level(state: SignalState) -> u8 {
    match state {
        SignalState::Start => 0,
        SignalState::Red(_) => 1,
        SignalState::AmberRed(_) => 2,
        SignalState::Green(_) => 3,
        SignalState::Amber(_) => 4,
    }
}

// =========================================================================
// Two-group clearance scenario
// =========================================================================

fn clearance_inputs(seconds: f64) -> TickInputs {
    TickInputs::default()
        .with_occupancy("loop_g1", occupied_within(seconds, 0.0, 0.5))
        .with_occupancy("r2", occupied_within(seconds, 1.0, 1.5))
        .with_occupancy("e1", occupied_within(seconds, 15.0, 20.0))
}

#[test]
fn conflicting_group_waits_for_intergreen_after_amber() {
    let mut c = controller(TWO_GROUPS);
    let g1 = GroupId::new(0);
    let g2 = GroupId::new(1);
    let mut g1_sequence = Vec::new();

    drive(&mut c, 400, clearance_inputs, |_, c| {
        let (a, b) = (c.group(g1).unwrap(), c.group(g2).unwrap());
        assert!(!(a.is_on() && b.is_on()), "both groups on at step {}", c.step_count());
        if g1_sequence.last() != Some(&a.state()) {
            g1_sequence.push(a.state());
        }
    });

    let a = c.group(g1).unwrap();
    let b = c.group(g2).unwrap();
    assert!((a.green_started_at().unwrap() - 7.0).abs() < TOLERANCE);
    // e1 released at 20 s extends for 2 s more.
    assert!((a.amber_started_at().unwrap() - 22.0).abs() < TOLERANCE);
    assert!((b.green_started_at().unwrap() - 28.0).abs() < TOLERANCE);
    assert!(b.green_started_at().unwrap() - a.amber_started_at().unwrap() >= 3.0 - TOLERANCE);

    let extending = g1_sequence
        .iter()
        .position(|s| matches!(s, SignalState::Green(GreenStep::Extending { .. })))
        .unwrap();
    assert!(matches!(g1_sequence[extending + 1], SignalState::Amber(_)));
    assert!(matches!(
        g1_sequence[extending + 2],
        SignalState::Red(RedStep::MinimumTime { .. })
    ));
}

#[test]
fn request_detector_matches_external_id() {
    let mut c = controller(TWO_GROUPS);
    let inputs = TickInputs::default().with_occupancy("loop_g1", true);
    let clock = SimClock::new(TIME_STEP).unwrap();
    let summary = run_tick(&mut c, &clock, &inputs);
    assert!(c.detector("r1").unwrap().loop_on());
    assert!(c.group(GroupId::new(0)).unwrap().request_green());
    assert_eq!(summary.changes.len(), 2);
    assert_eq!(c.next_phase(), Some(0));
}

// =========================================================================
// Long-run properties
// =========================================================================

const BUSY: &str = r"
controller:
  group_list: [north, east, walk]
  signal_groups:
    north: { min_green: 10, max_green: 25, min_red: 5, min_amber: 4, min_amber_red: 2 }
    east:  { min_green: 8, max_green: 30, min_red: 6, min_amber: 3, min_amber_red: 1 }
    walk:  { min_green: 6, max_green: 6, min_red: 5, min_amber: 2, min_amber_red: 1,
             delaying_groups: { north: 2 } }
  intergreens:
    - [0, 4, 0]
    - [5, 0, 6]
    - [0, 3, 0]
  phases:
    - [1, 0, 1]
    - [0, 1, 0]
  detectors:
    rn: { type: request, request_groups: [north] }
    re: { type: request, request_groups: [east] }
    rw: { type: request, request_groups: [walk] }
    en: { type: extender, group: north, ext_time: 3 }
    ee: { type: extender, group: east, ext_time: 2 }
";

fn busy_inputs(seconds: f64) -> TickInputs {
    let phase = |period: f64, offset: f64, on: f64| {
        let t = (seconds + TOLERANCE - offset).rem_euclid(period);
        t < on
    };
    TickInputs::default()
        .with_occupancy("rn", phase(17.0, 0.0, 1.0))
        .with_occupancy("re", phase(23.0, 5.0, 1.0))
        .with_occupancy("rw", phase(41.0, 9.0, 0.5))
        .with_occupancy("en", phase(7.0, 2.0, 4.5))
        .with_occupancy("ee", phase(5.0, 1.0, 2.0))
}

#[test]
fn long_run_keeps_cycle_order_minimums_and_clearances() {
    let mut c = controller(BUSY);
    let n = c.groups().len();
    let mut entered_at: Vec<(u8, f64)> = vec![(0, 0.0); n];
    let mut amber_at: Vec<Option<f64>> = vec![None; n];
    let mut greens = 0_usize;

    let config = PhaseringConfig::parse(BUSY).unwrap().controller;
    let timings: Vec<_> = config
        .group_list
        .iter()
        .map(|name| config.signal_groups[name].timing())
        .collect();
    let intergreens = config.intergreens.clone();

    drive(&mut c, 12_000, busy_inputs, |summary, c| {
        let now = summary.seconds;
        for change in &summary.changes {
            let i = change.group.index();
            let from = top_level(change.from);
            let to = top_level(change.to);
            if from == to {
                continue;
            }
            let expected = match from {
                0 | 4 => 1,
                level => level + 1,
            };
            assert_eq!(to, expected, "group {i} jumped from {from} to {to} at {now}");

            let (level, since) = entered_at[i];
            assert_eq!(level, from);
            let spent = now - since;
            let timing = timings[i];
            let minimum = match from {
                1 if since > 0.0 => timing.min_red,
                2 => timing.min_amber_red,
                3 => timing.min_green,
                4 => timing.min_amber,
                _ => 0.0,
            };
            assert!(spent + TOLERANCE >= minimum, "group {i} left {from} after {spent}s at {now}");
            if from == 3 {
                assert!(spent <= timing.max_green + TOLERANCE, "group {i} green {spent}s");
            }
            if to == 3 {
                greens += 1;
                for (j, delay) in intergreens[i].iter().enumerate() {
                    if *delay > 0.0 {
                        if let Some(amber) = amber_at[j] {
                            assert!(now - amber + TOLERANCE >= *delay, "clearance {j}->{i} at {now}");
                        }
                    }
                }
            }
            if to == 4 {
                amber_at[i] = Some(now);
            }
            entered_at[i] = (to, now);
        }
        for (i, a) in c.groups().iter().enumerate() {
            for conflict in a.conflicts() {
                let b = c.group(conflict.group).unwrap();
                assert!(!(a.is_on() && b.is_on()), "groups {i} and {} both on at {now}", conflict.group);
            }
        }
    });

    assert!(greens > 20, "only {greens} greens served");
}

#[test]
fn fixed_time_group_cycles_without_detectors() {
    const FIXED: &str = r"
controller:
  group_list: [a, b]
  signal_groups:
    a: { min_green: 5, max_green: 5, min_red: 3, min_amber: 3, min_amber_red: 1, request_type: fixed }
    b: { min_green: 5, max_green: 5, min_red: 3, min_amber: 3, min_amber_red: 1, request_type: fixed }
  intergreens: [[0, 2], [2, 0]]
  phases: [[1, 0], [0, 1]]
";
    let mut c = controller(FIXED);
    let mut greens = [0_u32; 2];
    drive(&mut c, 2_000, |_| TickInputs::default(), |summary, _| {
        for change in &summary.changes {
            if matches!(change.to, SignalState::Green(_)) && !matches!(change.from, SignalState::Green(_)) {
                greens[change.group.index()] += 1;
            }
        }
    });
    assert!(greens[0] >= 3 && greens[1] >= 3, "greens served: {greens:?}");
}

#[test]
fn extending_green_ends_at_max_green() {
    let mut c = controller(TWO_GROUPS);
    let inputs = |s: f64| {
        TickInputs::default()
            .with_occupancy("r1", occupied_within(s, 0.0, 0.5))
            .with_occupancy("r2", occupied_within(s, 1.0, 1.5))
            .with_occupancy("e1", true)
    };
    drive(&mut c, 1_000, inputs, |_, _| {});
    let g1 = c.group(GroupId::new(0)).unwrap();
    let green = g1.green_started_at().unwrap();
    let amber = g1.amber_started_at().unwrap();
    assert!((amber - green - 60.0).abs() < TOLERANCE);
}

// =========================================================================
// Priority
// =========================================================================

#[test]
fn priority_call_raises_conflicts_and_resets_at_min_green() {
    let mut c = controller(TWO_GROUPS);
    let g1 = GroupId::new(0);
    let g2 = GroupId::new(1);
    let mut clock = SimClock::new(TIME_STEP).unwrap();
    let inputs = |s: f64| TickInputs::default().with_occupancy("p2", occupied_within(s, 1.0, 1.5));

    let summary = drive_until(&mut c, &mut clock, inputs, |c| c.detector("p2").unwrap().loop_on());
    assert!((summary.seconds - 1.0).abs() < TOLERANCE);
    assert_eq!(c.group(g2).unwrap().own_request_level(), 4);
    assert_eq!(c.group(g1).unwrap().other_request_level(), 4);

    let entered = drive_until(&mut c, &mut clock, inputs, |c| {
        c.group(g2).unwrap().state().in_min_green_window()
    });
    assert!(entered.messages.iter().any(|m| matches!(
        m,
        GroupMessage::ResetOtherLevel { group } if *group == g1
    )));
    assert_eq!(c.group(g2).unwrap().own_request_level(), DEFAULT_PRIORITY_LEVEL);
    assert_eq!(c.group(g1).unwrap().other_request_level(), DEFAULT_PRIORITY_LEVEL);
}

#[test]
fn priority_levels_hold_until_min_green_window() {
    let mut c = controller(TWO_GROUPS);
    let g1 = GroupId::new(0);
    let g2 = GroupId::new(1);
    let inputs = |s: f64| TickInputs::default().with_occupancy("p2", occupied_within(s, 1.0, 1.5));
    drive(&mut c, 400, inputs, |summary, c| {
        let b = c.group(g2).unwrap();
        let started = b.state().in_min_green_window() || b.state().is_on();
        if summary.seconds > 1.0 && !started && b.green_started_at().is_none() {
            assert_eq!(b.own_request_level(), 4, "level dropped early at {}", summary.seconds);
            assert_eq!(c.group(g1).unwrap().other_request_level(), 4);
        }
        if started {
            assert_eq!(b.own_request_level(), DEFAULT_PRIORITY_LEVEL);
        }
    });
}

// =========================================================================
// Message apply order
// =========================================================================

const REMAIN: &str = r"
controller:
  group_list: [g1, g2]
  signal_groups:
    g1: { min_green: 10, max_green: 60, min_red: 5, min_amber: 4, min_amber_red: 2 }
    g2: { min_green: 10, max_green: 60, min_red: 5, min_amber: 4, min_amber_red: 2,
          green_end: remain }
  intergreens: [[0, 3], [3, 0]]
  phases: [[1, 0], [0, 1]]
  detectors:
    r1: { type: request, request_groups: [g1] }
    r2: { type: request, request_groups: [g2] }
";

fn remain_inputs(seconds: f64) -> TickInputs {
    TickInputs::default()
        .with_occupancy("r2", occupied_within(seconds, 0.0, 0.5))
        .with_occupancy("r1", occupied_within(seconds, 20.0, 20.5))
}

fn yield_delay(apply: MessageApply) -> f64 {
    let mut config = PhaseringConfig::parse(REMAIN).unwrap().controller;
    config.message_apply = apply;
    let mut c = PhaseRingController::new(&config).unwrap();
    let mut force_green_at = None;
    drive(&mut c, 300, remain_inputs, |summary, _| {
        for change in &summary.changes {
            if change.group == GroupId::new(0)
                && change.to == SignalState::Red(RedStep::ForceGreen)
                && force_green_at.is_none()
            {
                force_green_at = Some(summary.seconds);
            }
        }
    });
    let g2 = c.group(GroupId::new(1)).unwrap();
    g2.amber_started_at().unwrap() - force_green_at.unwrap()
}

#[test]
fn immediate_apply_lets_later_groups_react_in_the_same_tick() {
    assert!(yield_delay(MessageApply::Immediate).abs() < TOLERANCE);
}

#[test]
fn deferred_apply_delays_reaction_by_one_tick() {
    assert!((yield_delay(MessageApply::Deferred) - TIME_STEP).abs() < TOLERANCE);
}

#[test]
fn summary_lists_committed_messages() {
    let mut c = controller(REMAIN);
    let clock = SimClock::new(TIME_STEP).unwrap();
    let summary = run_tick(&mut c, &clock, &TickInputs::default().with_occupancy("r1", true));
    assert!(summary.messages.iter().any(|m| matches!(
        m,
        GroupMessage::RequestGreen { group, on: true } if *group == GroupId::new(0)
    )));
    assert!(summary.messages.iter().any(|m| matches!(
        m,
        GroupMessage::Permit { granted: true, .. }
    )));
}

// =========================================================================
// Extension policy and configuration round trip
// =========================================================================

#[test]
fn ratio_policy_follows_documented_numbers() {
    let config = ExtensionConfig {
        ext_mode: ExtensionMode::Ratio,
        ..ExtensionConfig::default()
    };
    let sample = |vehcount, conf_sum| DemandSample {
        vehcount,
        momentum: vehcount,
        conf_sum,
        green_time_used: 0.0,
    };
    assert!(decide(&config, &sample(7, 0)).extend);
    assert!(!decide(&config, &sample(1, 5)).extend);
    assert!(decide(&config, &sample(2, 5)).extend);
}

#[test]
fn exported_config_survives_yaml_round_trip() {
    let c = controller(BUSY);
    let exported = c.export_config();
    let yaml = serde_yml::to_string(&exported).unwrap();
    let reparsed: phasering_core::ControllerConfig = serde_yml::from_str(&yaml).unwrap();
    let rebuilt = PhaseRingController::new(&reparsed).unwrap();
    assert_eq!(rebuilt.conflict_matrix(), c.conflict_matrix());
    assert_eq!(rebuilt.phase_matrix(), c.phase_matrix());
    let timings = |c: &PhaseRingController| -> BTreeMap<String, _> {
        c.groups()
            .iter()
            .map(|g| (g.name().to_owned(), g.timing()))
            .collect()
    };
    assert_eq!(timings(&rebuilt), timings(&c));
    assert_eq!(rebuilt.detectors().len(), c.detectors().len());
}

#[test]
fn invalid_configs_are_rejected() {
    let one_way = TWO_GROUPS.replace("- [3, 0]", "- [0, 0]");
    assert!(matches!(
        PhaseRingController::new(&PhaseringConfig::parse(&one_way).unwrap().controller),
        Err(phasering_core::ConfigError::OneWayConflict { .. })
    ));
    let short_phase = TWO_GROUPS.replace("- [0, 1]", "- [0]");
    assert!(matches!(
        PhaseRingController::new(&PhaseringConfig::parse(&short_phase).unwrap().controller),
        Err(phasering_core::ConfigError::PhaseRowLength { .. })
    ));
    let unknown_side = TWO_GROUPS.replace(
        "g2: { min_green: 10,",
        "g2: { side_requests: [g7], min_green: 10,",
    );
    assert!(matches!(
        PhaseRingController::new(&PhaseringConfig::parse(&unknown_side).unwrap().controller),
        Err(phasering_core::ConfigError::UnknownGroup { .. })
    ));
}
