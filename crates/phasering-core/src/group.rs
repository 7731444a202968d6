//! Signal group: the state machine of one movement.
//!
//! A group decides its own transitions from its timers, its demand and
//! permission flags, and the states of the groups it conflicts with. It
//! never writes another group: everything it asks of others is returned
//! as [`GroupMessage`] values for the tick to commit.
//!
//! Groups live in one flat vector owned by the controller and refer to each
//! other by [`GroupId`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{before, elapsed_at_least};
use crate::config::{
    DEFAULT_PRIORITY_LEVEL, ExtensionConfig, GreenEnd, GroupConfig, GroupTiming, RequestType,
};
use crate::message::GroupMessage;
use crate::state::{FixedStep, GreenStep, RedStep, SignalState};

/// Position of a group in the controller's group list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(usize);

impl GroupId {
    /// Wrap a 0-based group position.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The 0-based position.
    pub const fn index(self) -> usize {
        self.0
    }

    /// The 1-based number used in control messages.
    pub const fn number(self) -> usize {
        self.0.saturating_add(1)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.number())
    }
}

/// A conflicting group and the clearance owed to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conflict {
    /// The conflicting group.
    pub group: GroupId,
    /// Seconds from that group's amber start to this group's green start.
    pub delay: f64,
}

/// A group whose green start must precede this group's start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartDelay {
    /// The delaying group.
    pub group: GroupId,
    /// Seconds after the delaying group's green start.
    pub delay: f64,
}

/// State machine and flags of one signal group.
#[derive(Debug, Clone)]
pub struct SignalGroup {
    id: GroupId,
    name: String,
    timing: GroupTiming,
    request_type: RequestType,
    priority: Option<u8>,
    repeat_extension: bool,
    extension: ExtensionConfig,
    instant_transfer: bool,

    state: SignalState,
    prev_state: SignalState,
    red_started_at: Option<f64>,
    amber_started_at: Option<f64>,
    green_started_at: Option<f64>,
    phase_started_at: Option<f64>,

    request_green: bool,
    permit_green: bool,
    end_green_requested: bool,
    own_request_level: u8,
    other_request_level: u8,

    conflicts: Vec<Conflict>,
    non_conflicting: Vec<GroupId>,
    delaying: Vec<StartDelay>,
    disabling: Vec<GroupId>,
    side_requests: Vec<GroupId>,

    pub(crate) loop_extender: Option<usize>,
    pub(crate) zone_extender: Option<usize>,
}

impl SignalGroup {
    /// Create a group in the start state with no relations.
    pub fn new(id: GroupId, name: &str, config: &GroupConfig, instant_transfer: bool) -> Self {
        Self {
            id,
            name: name.to_owned(),
            timing: config.timing(),
            request_type: config.request_type,
            priority: config.priority,
            repeat_extension: config.repeat_extension,
            extension: config.extension,
            instant_transfer,
            state: SignalState::Start,
            prev_state: SignalState::Start,
            red_started_at: None,
            amber_started_at: None,
            green_started_at: None,
            phase_started_at: None,
            request_green: false,
            permit_green: false,
            end_green_requested: false,
            own_request_level: DEFAULT_PRIORITY_LEVEL,
            other_request_level: DEFAULT_PRIORITY_LEVEL,
            conflicts: Vec::new(),
            non_conflicting: Vec::new(),
            delaying: Vec::new(),
            disabling: Vec::new(),
            side_requests: Vec::new(),
            loop_extender: None,
            zone_extender: None,
        }
    }

    // -----------------------------------------------------------------------
    // Identity and configuration
    // -----------------------------------------------------------------------

    /// Position in the controller.
    pub const fn id(&self) -> GroupId {
        self.id
    }

    /// Configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current timing parameters.
    pub const fn timing(&self) -> GroupTiming {
        self.timing
    }

    /// Where requests come from.
    pub const fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Configured request level for detector calls, if any.
    pub const fn priority(&self) -> Option<u8> {
        self.priority
    }

    /// Whether returning demand moves a resting green back to extension.
    pub const fn repeat_extension(&self) -> bool {
        self.repeat_extension
    }

    /// Zone-extender parameters.
    pub const fn extension(&self) -> ExtensionConfig {
        self.extension
    }

    /// Whether transitions cascade within a tick.
    pub const fn instant_transfer(&self) -> bool {
        self.instant_transfer
    }

    pub(crate) const fn set_timing(&mut self, timing: GroupTiming) {
        self.timing = timing;
    }

    // -----------------------------------------------------------------------
    // Relations
    // -----------------------------------------------------------------------

    /// Conflicting groups with their clearance times.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Groups that may be green together with this one.
    pub fn non_conflicting(&self) -> &[GroupId] {
        &self.non_conflicting
    }

    /// Groups whose green start must precede this group's start.
    pub fn delaying(&self) -> &[StartDelay] {
        &self.delaying
    }

    /// Groups that wait for this group's green start.
    pub fn disabling(&self) -> &[GroupId] {
        &self.disabling
    }

    /// Groups whose request mirrors this one.
    pub fn side_requests(&self) -> &[GroupId] {
        &self.side_requests
    }

    pub(crate) fn set_conflicts(&mut self, conflicts: Vec<Conflict>, non_conflicting: Vec<GroupId>) {
        self.conflicts = conflicts;
        self.non_conflicting = non_conflicting;
    }

    pub(crate) fn set_delaying(&mut self, delaying: Vec<StartDelay>) {
        self.delaying = delaying;
    }

    pub(crate) fn add_disabling(&mut self, group: GroupId) {
        if !self.disabling.contains(&group) {
            self.disabling.push(group);
        }
    }

    pub(crate) fn set_side_requests(&mut self, side_requests: Vec<GroupId>) {
        self.side_requests = side_requests;
    }

    // -----------------------------------------------------------------------
    // State and timestamps
    // -----------------------------------------------------------------------

    /// Current leaf state.
    pub const fn state(&self) -> SignalState {
        self.state
    }

    /// Leaf state at the start of the current tick's group phase.
    pub const fn prev_state(&self) -> SignalState {
        self.prev_state
    }

    /// Second the current or last red started.
    pub const fn red_started_at(&self) -> Option<f64> {
        self.red_started_at
    }

    /// Second the current or last amber started.
    pub const fn amber_started_at(&self) -> Option<f64> {
        self.amber_started_at
    }

    /// Second the current or last green started.
    pub const fn green_started_at(&self) -> Option<f64> {
        self.green_started_at
    }

    /// Second the group's phase last started.
    pub const fn phase_started_at(&self) -> Option<f64> {
        self.phase_started_at
    }

    pub(crate) const fn snapshot_state(&mut self) {
        self.prev_state = self.state;
    }

    pub(crate) const fn mark_phase_started(&mut self, now: f64) {
        self.phase_started_at = Some(now);
    }

    /// Green, amber or amber-red.
    pub const fn is_on(&self) -> bool {
        self.state.is_on()
    }

    /// Green or amber.
    pub const fn is_green_or_amber(&self) -> bool {
        self.state.is_green_or_amber()
    }

    /// Red as seen by conflicting groups.
    pub const fn is_red(&self) -> bool {
        self.state.is_red()
    }

    // -----------------------------------------------------------------------
    // Demand, permission and priority
    // -----------------------------------------------------------------------

    /// Raw request flag.
    pub const fn request_green(&self) -> bool {
        self.request_green
    }

    /// Whether the group wants green; fixed-time groups always do outside
    /// green and amber.
    pub const fn has_green_request(&self) -> bool {
        self.request_green || self.wants_fixed_request()
    }

    /// Fixed-time group outside green and amber.
    pub(crate) const fn wants_fixed_request(&self) -> bool {
        matches!(self.request_type, RequestType::Fixed) && !self.state.is_green_or_amber()
    }

    /// Permission granted by the scheduler.
    pub const fn permit_green(&self) -> bool {
        self.permit_green
    }

    /// A conflicting group has asked this group to end its green.
    pub const fn end_green_requested(&self) -> bool {
        self.end_green_requested
    }

    /// Level of this group's own pending call.
    pub const fn own_request_level(&self) -> u8 {
        self.own_request_level
    }

    /// Highest level of a competing call from a conflicting group.
    pub const fn other_request_level(&self) -> u8 {
        self.other_request_level
    }

    /// Request setter. Returns whether the write was accepted.
    pub(crate) const fn accept_request(&mut self, on: bool) -> bool {
        if on && self.state.is_green_or_amber() {
            return false;
        }
        self.request_green = on;
        true
    }

    pub(crate) const fn mirror_request(&mut self, on: bool) {
        self.request_green = on;
    }

    pub(crate) const fn request_end_green(&mut self) {
        self.end_green_requested = true;
    }

    pub(crate) const fn set_permit(&mut self, granted: bool) {
        self.permit_green = granted;
    }

    pub(crate) const fn set_own_level(&mut self, level: u8) {
        self.own_request_level = level;
    }

    pub(crate) const fn raise_other_level(&mut self, level: u8) {
        if level > self.other_request_level {
            self.other_request_level = level;
        }
    }

    pub(crate) const fn reset_other_level(&mut self) {
        self.other_request_level = DEFAULT_PRIORITY_LEVEL;
    }

    /// Legacy status character, refined by request and permission in Red
    /// `CanEnd`.
    pub const fn status_char(&self) -> char {
        let base = self.state.base_status_char();
        if base != 'b' {
            return base;
        }
        let mut code = base;
        if self.has_green_request() {
            code = 'c';
        }
        if matches!(self.request_type, RequestType::Fixed) {
            code = 'C';
        }
        if self.permit_green {
            code = 'e';
        }
        code
    }

    // -----------------------------------------------------------------------
    // Guards over the whole group set
    // -----------------------------------------------------------------------

    /// Every conflicting group is red (amber counts as red).
    pub fn all_conflicts_red(&self, groups: &[Self]) -> bool {
        self.conflicts
            .iter()
            .all(|c| groups.get(c.group.index()).is_none_or(Self::is_red))
    }

    /// No conflicting group is on and each conflict's clearance since its
    /// amber start has elapsed.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn intergreens_passed(&self, groups: &[Self], now: f64) -> bool {
        self.conflicts.iter().all(|c| {
            groups.get(c.group.index()).is_none_or(|other| {
                !other.is_on()
                    && other
                        .amber_started_at
                        .is_none_or(|at| !before(now, at + c.delay))
            })
        })
    }

    /// Every delaying group started green long enough ago.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn start_delays_passed(&self, groups: &[Self], now: f64) -> bool {
        self.delaying.iter().all(|d| {
            groups
                .get(d.group.index())
                .and_then(|g| g.green_started_at)
                .is_none_or(|at| !before(now, at + d.delay))
        })
    }

    /// Every conflicting group has finished its active green.
    pub fn conflicting_active_green_passed(&self, groups: &[Self]) -> bool {
        self.conflicts.iter().all(|c| {
            groups
                .get(c.group.index())
                .is_none_or(|g| g.state.active_green_passed())
        })
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// The state this group moves to now, if any guard holds.
    ///
    /// `extending` is the combined verdict of the group's extenders; a group
    /// without extenders is never extending.
    pub(crate) fn next_state(&self, groups: &[Self], now: f64, extending: bool) -> Option<SignalState> {
        match self.state {
            SignalState::Start => Some(SignalState::Red(RedStep::Init)),
            SignalState::Red(RedStep::Exit) => Some(SignalState::AmberRed(FixedStep::Init)),
            SignalState::Red(step) => self.next_red(step, groups, now).map(SignalState::Red),
            SignalState::AmberRed(step) => match step {
                FixedStep::Exit => Some(SignalState::Green(GreenStep::Init)),
                _ => next_fixed(step, now, self.timing.min_amber_red).map(SignalState::AmberRed),
            },
            SignalState::Green(step) => self.next_green(step, now, extending),
            SignalState::Amber(step) => match step {
                FixedStep::Exit => Some(SignalState::Red(RedStep::Init)),
                _ => next_fixed(step, now, self.timing.min_amber).map(SignalState::Amber),
            },
        }
    }

    fn next_red(&self, step: RedStep, groups: &[Self], now: f64) -> Option<RedStep> {
        match step {
            RedStep::Init => Some(RedStep::MinimumTime { since: now }),
            RedStep::MinimumTime { since } => {
                elapsed_at_least(since, now, self.timing.min_red).then_some(RedStep::CanEnd)
            }
            RedStep::CanEnd => {
                (self.has_green_request() && self.permit_green).then_some(RedStep::ForceGreen)
            }
            RedStep::ForceGreen => self
                .all_conflicts_red(groups)
                .then_some(RedStep::WaitIntergreen),
            RedStep::WaitIntergreen => (self.intergreens_passed(groups, now)
                && self.start_delays_passed(groups, now))
            .then_some(RedStep::Exit),
            RedStep::Exit => None,
        }
    }

    fn next_green(&self, step: GreenStep, now: f64, extending: bool) -> Option<SignalState> {
        let ended = |since: f64| match self.timing.green_end {
            GreenEnd::AfterExt => SignalState::Green(GreenStep::Exit),
            GreenEnd::Remain => SignalState::Green(GreenStep::RemainGreen { since }),
        };
        match step {
            GreenStep::Init => Some(SignalState::Green(GreenStep::MinimumTime { since: now })),
            GreenStep::MinimumTime { since } => {
                elapsed_at_least(since, now, self.timing.min_green).then(|| {
                    SignalState::Green(GreenStep::Extending {
                        since: self.green_started_at.unwrap_or(since),
                    })
                })
            }
            GreenStep::Extending { since } => {
                let max_reached = elapsed_at_least(since, now, self.timing.max_green);
                (!extending || max_reached).then(|| ended(since))
            }
            GreenStep::RemainGreen { since } => {
                if extending && self.repeat_extension {
                    Some(SignalState::Green(GreenStep::Extending { since }))
                } else if self.end_green_requested {
                    Some(SignalState::Green(GreenStep::Exit))
                } else {
                    None
                }
            }
            GreenStep::Exit => Some(SignalState::Amber(FixedStep::Init)),
        }
    }

    /// Enter `to`, applying entry effects to this group. Returns the
    /// messages entry owes to other groups.
    pub(crate) fn enter(&mut self, to: SignalState, now: f64) -> Vec<GroupMessage> {
        let mut outgoing = Vec::new();
        if std::mem::discriminant(&self.state) != std::mem::discriminant(&to) {
            match to {
                SignalState::Red(_) => self.red_started_at = Some(now),
                SignalState::Green(_) => self.green_started_at = Some(now),
                SignalState::Amber(_) => self.amber_started_at = Some(now),
                SignalState::Start | SignalState::AmberRed(_) => {}
            }
        }
        match to {
            SignalState::Green(GreenStep::Init) => {
                self.request_green = false;
                outgoing.extend(
                    self.side_requests
                        .iter()
                        .map(|&group| GroupMessage::MirrorRequest { group, on: false }),
                );
            }
            SignalState::Red(RedStep::ForceGreen | RedStep::WaitIntergreen) => {
                self.end_green_requested = false;
                outgoing.extend(
                    self.conflicts
                        .iter()
                        .map(|c| GroupMessage::EndGreen { group: c.group }),
                );
            }
            _ => {}
        }
        self.state = to;
        outgoing
    }
}

fn next_fixed(step: FixedStep, now: f64, duration: f64) -> Option<FixedStep> {
    match step {
        FixedStep::Init => Some(FixedStep::MinimumTime { since: now }),
        FixedStep::MinimumTime { since } => {
            elapsed_at_least(since, now, duration).then_some(FixedStep::Exit)
        }
        FixedStep::Exit => None,
    }
}
