//! Hierarchical signal-group states.
//!
//! A group is always in exactly one leaf state. The top level cycles
//! `Start -> Red -> AmberRed -> Green -> Amber -> Red -> ...` and each top
//! level carries its own sub-state. Sub-states that time something hold the
//! second at which they were entered, so guards need no extra bookkeeping.

use std::fmt;

/// Red sub-states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RedStep {
    /// Just entered red.
    Init,
    /// Serving the minimum red time.
    MinimumTime {
        /// Second at which the minimum timer started.
        since: f64,
    },
    /// Minimum red served; waiting for request and permission.
    CanEnd,
    /// Asked conflicting groups to end their green.
    ForceGreen,
    /// Conflicts are red; waiting for intergreens and start delays.
    WaitIntergreen,
    /// Leaving red for amber-red.
    Exit,
}

/// Sub-states of the fixed-time aspects (amber and amber-red).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixedStep {
    /// Just entered the aspect.
    Init,
    /// Serving the fixed duration.
    MinimumTime {
        /// Second at which the timer started.
        since: f64,
    },
    /// Duration served.
    Exit,
}

/// Vehicle-actuated green sub-states.
///
/// The minimum timer carries its own start; the extension states carry the
/// green start, which is the reference point for the maximum green.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GreenStep {
    /// Just entered green.
    Init,
    /// Serving the minimum green.
    MinimumTime {
        /// Second at which the minimum green started.
        since: f64,
    },
    /// Green held while demand lasts, up to the maximum.
    Extending {
        /// Second at which the green started.
        since: f64,
    },
    /// Extension over; green rests until a conflict asks for the right of way.
    RemainGreen {
        /// Second at which the green started.
        since: f64,
    },
    /// Leaving green for amber.
    Exit,
}

/// Leaf state of a signal group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalState {
    /// Before the first tick.
    Start,
    /// Red aspect.
    Red(RedStep),
    /// Amber-red (red with amber, before green).
    AmberRed(FixedStep),
    /// Green aspect.
    Green(GreenStep),
    /// Amber aspect (after green).
    Amber(FixedStep),
}

/// Coarse aspect shown by the signal head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aspect {
    /// Red, including the start state.
    Red,
    /// Red with amber.
    AmberRed,
    /// Green.
    Green,
    /// Amber.
    Amber,
}

impl Aspect {
    /// Single-character head code (`r`, `u`, `g`, `y`).
    pub const fn code(self) -> char {
        match self {
            Self::Red => 'r',
            Self::AmberRed => 'u',
            Self::Green => 'g',
            Self::Amber => 'y',
        }
    }
}

impl SignalState {
    /// Aspect of the top-level state.
    pub const fn aspect(self) -> Aspect {
        match self {
            Self::Start | Self::Red(_) => Aspect::Red,
            Self::AmberRed(_) => Aspect::AmberRed,
            Self::Green(_) => Aspect::Green,
            Self::Amber(_) => Aspect::Amber,
        }
    }

    /// Green, amber or amber-red.
    pub const fn is_on(self) -> bool {
        matches!(self, Self::Green(_) | Self::Amber(_) | Self::AmberRed(_))
    }

    /// Top-level green.
    pub const fn is_green(self) -> bool {
        matches!(self, Self::Green(_))
    }

    /// Green or amber.
    pub const fn is_green_or_amber(self) -> bool {
        matches!(self, Self::Green(_) | Self::Amber(_))
    }

    /// Red as seen by a conflicting group deciding whether it may start.
    ///
    /// Amber counts as red here: clearance after amber is enforced by the
    /// intergreen check, not by this predicate. A group that has started
    /// waiting for its intergreens is no longer red.
    pub const fn is_red(self) -> bool {
        matches!(
            self,
            Self::Start
                | Self::Amber(_)
                | Self::Red(
                    RedStep::Init
                        | RedStep::MinimumTime { .. }
                        | RedStep::CanEnd
                        | RedStep::ForceGreen
                )
        )
    }

    /// Exactly `Red_MinimumTime`.
    pub const fn is_red_started(self) -> bool {
        matches!(self, Self::Red(RedStep::MinimumTime { .. }))
    }

    /// The group has committed to green and is clearing its way.
    pub const fn is_starting(self) -> bool {
        matches!(
            self,
            Self::Red(RedStep::WaitIntergreen) | Self::AmberRed(FixedStep::MinimumTime { .. })
        )
    }

    /// From intergreen wait until the end of minimum green.
    pub const fn in_min_green_window(self) -> bool {
        matches!(
            self,
            Self::Red(RedStep::WaitIntergreen)
                | Self::AmberRed(FixedStep::MinimumTime { .. })
                | Self::Green(GreenStep::MinimumTime { .. })
        )
    }

    /// The group's active green is over and it can yield without delay.
    pub const fn active_green_passed(self) -> bool {
        matches!(
            self,
            Self::Green(GreenStep::RemainGreen { .. })
                | Self::Amber(FixedStep::MinimumTime { .. })
                | Self::Red(RedStep::MinimumTime { .. } | RedStep::CanEnd)
        )
    }

    /// Whether reaching this state re-attempts a transition in the same tick
    /// when instant transfer is on.
    pub(crate) const fn cascades(self) -> bool {
        !matches!(
            self,
            Self::Green(GreenStep::Extending { .. } | GreenStep::RemainGreen { .. })
        )
    }

    /// Legacy single-character status code before request refinement.
    pub const fn base_status_char(self) -> char {
        match self {
            Self::Red(RedStep::MinimumTime { .. }) => 'a',
            Self::Red(RedStep::CanEnd) => 'b',
            Self::Red(RedStep::ForceGreen) => 'f',
            Self::Red(RedStep::WaitIntergreen) => 'g',
            Self::AmberRed(FixedStep::MinimumTime { .. }) => '0',
            Self::Green(GreenStep::MinimumTime { .. }) => '1',
            Self::Green(GreenStep::Extending { .. }) => '5',
            Self::Green(GreenStep::RemainGreen { .. }) => '4',
            Self::Amber(FixedStep::MinimumTime { .. }) => '>',
            _ => '*',
        }
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (top, sub) = match self {
            Self::Start => return f.write_str("Start"),
            Self::Red(step) => (
                "Red",
                match step {
                    RedStep::Init => "Init",
                    RedStep::MinimumTime { .. } => "MinimumTime",
                    RedStep::CanEnd => "CanEnd",
                    RedStep::ForceGreen => "ForceGreen",
                    RedStep::WaitIntergreen => "WaitIntergreen",
                    RedStep::Exit => "Exit",
                },
            ),
            Self::AmberRed(step) => ("AmberRed", fixed_name(*step)),
            Self::Green(step) => (
                "Green",
                match step {
                    GreenStep::Init => "Init",
                    GreenStep::MinimumTime { .. } => "MinimumTime",
                    GreenStep::Extending { .. } => "Extending",
                    GreenStep::RemainGreen { .. } => "RemainGreen",
                    GreenStep::Exit => "Exit",
                },
            ),
            Self::Amber(step) => ("Amber", fixed_name(*step)),
        };
        write!(f, "{top}_{sub}")
    }
}

const fn fixed_name(step: FixedStep) -> &'static str {
    match step {
        FixedStep::Init => "Init",
        FixedStep::MinimumTime { .. } => "MinimumTime",
        FixedStep::Exit => "Exit",
    }
}
