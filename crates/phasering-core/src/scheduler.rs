//! Scan/Hold phase scheduling.
//!
//! In `Scan` the controller looks for the next phase with demand, scanning
//! the ring from the current phase onward, and grants its groups permission
//! to start. Once one of them starts, that phase becomes current and the
//! controller holds it until every member has left its minimum green.
//!
//! Permission never starts a green on its own; each group still walks its
//! red sub-states.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DEFAULT_PRIORITY_LEVEL;
use crate::controller::PhaseRingController;
use crate::message::{GroupMessage, apply_all};
use crate::phase::ring_order;

/// Scheduler state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerStatus {
    /// Looking for the next phase to serve.
    #[default]
    Scan,
    /// Serving the current phase until its minimum greens are over.
    Hold,
}

impl std::fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Scan => "Scan",
            Self::Hold => "Hold",
        })
    }
}

impl PhaseRingController {
    /// First phase in ring order, starting at the current one, with a
    /// member requesting green.
    pub fn find_next_phase(&self) -> Option<usize> {
        ring_order(self.phases.len(), self.current_phase)
            .into_iter()
            .find(|&index| {
                self.phases.get(index).is_some_and(|phase| {
                    phase
                        .groups
                        .iter()
                        .filter_map(|&id| self.group(id))
                        .any(|g| g.has_green_request())
                })
            })
    }

    /// Permission messages for a phase: each requesting member whose
    /// conflicts have passed their active green is permitted, and its
    /// conflicts lose any permission they held.
    fn grant_phase(&self, index: usize) -> Vec<GroupMessage> {
        let Some(phase) = self.phases.get(index) else {
            return Vec::new();
        };
        let mut outgoing = Vec::new();
        for group in phase.groups.iter().filter_map(|&id| self.group(id)) {
            if group.has_green_request() && group.conflicting_active_green_passed(&self.groups) {
                outgoing.push(GroupMessage::Permit {
                    group: group.id(),
                    granted: true,
                });
                outgoing.extend(group.conflicts().iter().map(|c| GroupMessage::Permit {
                    group: c.group,
                    granted: false,
                }));
            }
        }
        outgoing
    }

    fn phase_started(&self, index: usize) -> bool {
        self.phases.get(index).is_some_and(|phase| {
            phase
                .groups
                .iter()
                .filter_map(|&id| self.group(id))
                .any(|g| g.state().is_starting())
        })
    }

    fn phase_min_greens_over(&self, index: usize) -> bool {
        self.phases.get(index).is_none_or(|phase| {
            phase
                .groups
                .iter()
                .filter_map(|&id| self.group(id))
                .all(|g| !g.state().in_min_green_window())
        })
    }

    /// Run one scheduler step and commit its messages. Returns the messages
    /// and the phase (0-based) that started, if any.
    pub(crate) fn schedule(&mut self, now: f64) -> (Vec<GroupMessage>, Option<usize>) {
        let mut outgoing = Vec::new();

        if self.status == SchedulerStatus::Scan {
            self.next_phase = self.find_next_phase();
            if let Some(next) = self.next_phase {
                outgoing.extend(self.grant_phase(next));
            }
        }

        for group in self.groups.iter().filter(|g| g.state().in_min_green_window()) {
            outgoing.push(GroupMessage::Permit {
                group: group.id(),
                granted: false,
            });
            if group.own_request_level() > DEFAULT_PRIORITY_LEVEL {
                outgoing.push(GroupMessage::OwnLevel {
                    group: group.id(),
                    level: DEFAULT_PRIORITY_LEVEL,
                });
                outgoing.extend(
                    group
                        .conflicts()
                        .iter()
                        .map(|c| GroupMessage::ResetOtherLevel { group: c.group }),
                );
            }
        }

        let mut started = None;
        if let Some(next) = self.next_phase.filter(|&next| self.phase_started(next)) {
            if let Some(phase) = self.phases.get(next) {
                for &id in &phase.groups {
                    if let Some(group) = self.groups.get_mut(id.index()) {
                        group.mark_phase_started(now);
                    }
                }
                info!(
                    controller = %self.name,
                    phase = phase.number,
                    seconds = now,
                    "New phase started"
                );
            }
            self.current_phase = Some(next);
            self.next_phase = None;
            self.status = SchedulerStatus::Hold;
            started = Some(next);
        }

        if self.status == SchedulerStatus::Hold {
            if let Some(current) = self.current_phase {
                outgoing.extend(self.grant_phase(current));
                if self.phase_min_greens_over(current) {
                    self.status = SchedulerStatus::Scan;
                }
            }
        }

        apply_all(&mut self.groups, &outgoing);
        (outgoing, started)
    }
}
