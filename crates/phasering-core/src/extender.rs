//! Green extension.
//!
//! A group can have two extenders. The loop extender follows extension and
//! group-extension detectors: it extends while any of them does. The zone
//! extender weighs the group's own zone demand against the demand queued on
//! its conflicts and applies one of four [`ExtensionMode`] policies, with an
//! optional safety overlay for connected vehicles caught in the option zone.
//!
//! A group without extenders never extends.

use serde::{Deserialize, Serialize};

use crate::clock::before;
use crate::config::{ExtensionConfig, ExtensionMode};
use crate::detector::Detector;
use crate::group::{GroupId, SignalGroup};
use crate::state::{GreenStep, SignalState};

/// Demand seen by a zone extender in one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DemandSample {
    /// Weighted vehicles on the group's own zones.
    pub vehcount: u32,
    /// Weighted moving vehicles on the group's own zones.
    pub momentum: u32,
    /// Sum of the conflicting groups' vehicle counts.
    pub conf_sum: u32,
    /// Seconds of green used so far. Zero while the group is not green, so
    /// a start time left over from the previous cycle does not discount
    /// the threshold of the next one.
    pub green_time_used: f64,
}

/// Outcome of one extension decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether green should be extended.
    pub extend: bool,
    /// Threshold the demand was compared against.
    pub threshold: f64,
}

/// Decide whether demand justifies extending green.
#[allow(clippy::arithmetic_side_effects)]
pub fn decide(config: &ExtensionConfig, sample: &DemandSample) -> Decision {
    let discounted = || {
        if config.time_discount > 0.0 {
            config.ext_threshold * (1.0 + sample.green_time_used / config.time_discount)
        } else {
            config.ext_threshold
        }
    };
    let threshold = match config.ext_mode {
        ExtensionMode::Absolute | ExtensionMode::Ratio => config.ext_threshold,
        ExtensionMode::DiscountedRatio | ExtensionMode::DiscountedMomentum => discounted(),
    };
    if sample.conf_sum == 0 && sample.vehcount == 0 {
        return Decision { extend: false, threshold };
    }
    let ratio_exceeds = |own: u32| {
        sample.conf_sum == 0 || f64::from(own) / f64::from(sample.conf_sum) > threshold
    };
    let extend = match config.ext_mode {
        ExtensionMode::Absolute => f64::from(sample.vehcount) > threshold,
        ExtensionMode::Ratio | ExtensionMode::DiscountedRatio => ratio_exceeds(sample.vehcount),
        ExtensionMode::DiscountedMomentum => ratio_exceeds(sample.momentum),
    };
    Decision { extend, threshold }
}

/// Extends while any of its extension or group-extension detectors does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopExtender {
    group: GroupId,
    detectors: Vec<usize>,
    extend: bool,
}

impl LoopExtender {
    /// Extender for `group` over the detectors at the given indices.
    pub const fn new(group: GroupId, detectors: Vec<usize>) -> Self {
        Self {
            group,
            detectors,
            extend: false,
        }
    }

    /// Owning group.
    pub const fn group(&self) -> GroupId {
        self.group
    }

    /// Indices of the detectors followed.
    pub fn detectors(&self) -> &[usize] {
        &self.detectors
    }

    /// Verdict of the last update.
    pub const fn extend(&self) -> bool {
        self.extend
    }

    pub(crate) fn update(&mut self, detectors: &[Detector], groups: &[SignalGroup], now: f64) {
        self.extend = self
            .detectors
            .iter()
            .filter_map(|&i| detectors.get(i))
            .any(|d| d.is_extending(now, groups));
    }
}

/// Zone extender status, including the safety overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    /// Not extending.
    #[default]
    Idle,
    /// Extending on demand.
    Extending,
    /// Demand dropped during extension; safety window opened.
    SafetyStarted,
    /// Extending for a connected vehicle with a short gap.
    SafetyActive,
    /// Safety window closed.
    SafetyEnded,
}

impl ExtensionStatus {
    /// Whether this status holds green.
    pub const fn extends(self) -> bool {
        matches!(self, Self::Extending | Self::SafetyStarted | Self::SafetyActive)
    }
}

/// Demand-ratio extender over a group's zone detectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneExtender {
    group: GroupId,
    detectors: Vec<usize>,
    config: ExtensionConfig,
    vehcount: u32,
    momentum: u32,
    conf_sum: u32,
    threshold: f64,
    status: ExtensionStatus,
    ext_ended_at: Option<f64>,
}

impl ZoneExtender {
    /// Extender for `group` over the zone detectors at the given indices.
    pub const fn new(group: GroupId, detectors: Vec<usize>, config: ExtensionConfig) -> Self {
        Self {
            group,
            detectors,
            config,
            vehcount: 0,
            momentum: 0,
            conf_sum: 0,
            threshold: config.ext_threshold,
            status: ExtensionStatus::Idle,
            ext_ended_at: None,
        }
    }

    /// Owning group.
    pub const fn group(&self) -> GroupId {
        self.group
    }

    /// Indices of the zone detectors summed.
    pub fn detectors(&self) -> &[usize] {
        &self.detectors
    }

    /// Policy parameters.
    pub const fn config(&self) -> ExtensionConfig {
        self.config
    }

    /// Own weighted vehicle count from the last update.
    pub const fn vehcount(&self) -> u32 {
        self.vehcount
    }

    /// Own moving vehicle count from the last update.
    pub const fn momentum(&self) -> u32 {
        self.momentum
    }

    /// Conflict pressure from the last update.
    pub const fn conf_sum(&self) -> u32 {
        self.conf_sum
    }

    /// Threshold applied in the last update.
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Current status.
    pub const fn status(&self) -> ExtensionStatus {
        self.status
    }

    /// Second at which demand last dropped during a safety-enabled extension.
    pub const fn ext_ended_at(&self) -> Option<f64> {
        self.ext_ended_at
    }

    /// Verdict of the last update.
    pub const fn extend(&self) -> bool {
        self.status.extends()
    }

    /// Recompute demand and status. `conf_sum` is the conflicts' pressure
    /// as currently known.
    #[allow(clippy::arithmetic_side_effects)]
    pub(crate) fn update(
        &mut self,
        detectors: &mut [Detector],
        groups: &[SignalGroup],
        conf_sum: u32,
        now: f64,
    ) {
        let own: Vec<&Detector> = self.detectors.iter().filter_map(|&i| detectors.get(i)).collect();
        self.vehcount = own.iter().fold(0_u32, |sum, d| sum.saturating_add(d.veh_count()));
        self.momentum = own
            .iter()
            .fold(0_u32, |sum, d| sum.saturating_add(d.momentum(groups)));
        let short_gap = own.iter().any(|d| d.short_gap_found());
        self.conf_sum = conf_sum;

        let group = groups.get(self.group.index());
        let green_time_used = group
            .filter(|g| g.state().is_green())
            .and_then(SignalGroup::green_started_at)
            .map_or(0.0, |at| (now - at).max(0.0));
        let in_extension = group.is_some_and(|g| {
            matches!(g.state(), SignalState::Green(GreenStep::Extending { .. }))
        });

        let previous = self.status;
        self.status = match previous {
            ExtensionStatus::Idle | ExtensionStatus::Extending | ExtensionStatus::SafetyEnded => {
                let decision = decide(
                    &self.config,
                    &DemandSample {
                        vehcount: self.vehcount,
                        momentum: self.momentum,
                        conf_sum,
                        green_time_used,
                    },
                );
                self.threshold = decision.threshold;
                if decision.extend {
                    ExtensionStatus::Extending
                } else if self.config.safety_ext
                    && previous == ExtensionStatus::Extending
                    && in_extension
                {
                    self.ext_ended_at = Some(now);
                    ExtensionStatus::SafetyStarted
                } else if previous == ExtensionStatus::SafetyEnded {
                    ExtensionStatus::SafetyEnded
                } else {
                    ExtensionStatus::Idle
                }
            }
            ExtensionStatus::SafetyStarted | ExtensionStatus::SafetyActive => {
                let within = self
                    .ext_ended_at
                    .is_some_and(|at| before(now, at + self.config.safety_time));
                if within && short_gap {
                    ExtensionStatus::SafetyActive
                } else {
                    ExtensionStatus::SafetyEnded
                }
            }
        };

        let extend = self.extend();
        let safety = matches!(
            self.status,
            ExtensionStatus::SafetyStarted | ExtensionStatus::SafetyActive
        );
        for &i in &self.detectors {
            if let Some(detector) = detectors.get_mut(i) {
                detector.set_extension_flags(extend, safety);
            }
        }
    }
}
