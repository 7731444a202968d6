//! Status strings and control messages derived from controller state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::controller::PhaseRingController;
use crate::scheduler::SchedulerStatus;

/// Snapshot of a controller for logs and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    /// Controller name.
    pub controller: String,
    /// Ticks run.
    pub step: u64,
    /// Simulation second.
    pub seconds: f64,
    /// One status character per group.
    pub groups: String,
    /// One signal-head code per group.
    pub heads: String,
    /// Current phase, 1-based.
    pub current_phase: Option<usize>,
    /// Next phase, 1-based.
    pub next_phase: Option<usize>,
    /// Scheduler status.
    pub status: SchedulerStatus,
    /// Per group: `1` extending, `0` not extending, `N` no extender.
    pub extenders: String,
    /// Per group: `1` requesting green, `0` not.
    pub requests: String,
}

/// Per-group message for downstream signal-head drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupControlMessage {
    /// `<controller>.group.<number>`.
    pub id: String,
    /// Wall-clock time of the message.
    pub tstamp: DateTime<Utc>,
    /// Legacy status character.
    pub substate: char,
    /// 1-based group number.
    pub group: usize,
    /// Whether the group shows anything but red.
    pub green: bool,
}

impl PhaseRingController {
    /// Legacy status character per group.
    pub fn group_status_chars(&self) -> String {
        self.groups.iter().map(|g| g.status_char()).collect()
    }

    /// Signal-head code per group: `r`, `u`, `g` or `y`.
    pub fn signal_head_states(&self) -> String {
        self.groups.iter().map(|g| g.state().aspect().code()).collect()
    }

    /// Per group, whether it is not red.
    pub fn green_states(&self) -> Vec<bool> {
        self.groups.iter().map(|g| !g.is_red()).collect()
    }

    /// Per group: `1` extending, `0` not extending, `N` no extender.
    pub fn extender_states(&self) -> String {
        self.groups
            .iter()
            .map(|g| {
                if !self.has_extender(g.id()) {
                    'N'
                } else if self.group_extending(g.id()) {
                    '1'
                } else {
                    '0'
                }
            })
            .collect()
    }

    /// Per group: `1` when requesting green.
    pub fn request_states(&self) -> String {
        self.groups
            .iter()
            .map(|g| if g.has_green_request() { '1' } else { '0' })
            .collect()
    }

    /// Status snapshot at `seconds`.
    pub fn controller_status(&self, seconds: f64) -> ControllerStatus {
        ControllerStatus {
            controller: self.name.clone(),
            step: self.step_count,
            seconds,
            groups: self.group_status_chars(),
            heads: self.signal_head_states(),
            current_phase: self.current_phase.map(|p| p.saturating_add(1)),
            next_phase: self.next_phase.map(|p| p.saturating_add(1)),
            status: self.status,
            extenders: self.extender_states(),
            requests: self.request_states(),
        }
    }

    /// Compact status line, e.g. `a15 REQ:100 EXT:N10 (cur:PH:2, next:None) Hold`.
    pub fn status_line(&self) -> String {
        let phase = |p: Option<usize>| {
            p.map_or_else(|| "None".to_owned(), |p| format!("PH:{}", p.saturating_add(1)))
        };
        format!(
            "{} REQ:{} EXT:{} (cur:{}, next:{}) {}",
            self.group_status_chars(),
            self.request_states(),
            self.extender_states(),
            phase(self.current_phase),
            phase(self.next_phase),
            self.status
        )
    }

    /// One control message per group, stamped `tstamp`.
    pub fn control_messages(&self, tstamp: DateTime<Utc>) -> Vec<GroupControlMessage> {
        self.groups
            .iter()
            .map(|g| GroupControlMessage {
                id: format!("{}.group.{}", self.name, g.id().number()),
                tstamp,
                substate: g.status_char(),
                group: g.id().number(),
                green: !g.is_red(),
            })
            .collect()
    }
}
