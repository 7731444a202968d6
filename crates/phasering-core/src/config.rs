//! Configuration loading and typed config structures for the controller.
//!
//! The canonical configuration lives in `phasering-config.yaml`. This
//! module defines strongly-typed structs that mirror the YAML structure,
//! a loader, and the validation that runs before a controller is built.
//! It also parses the loosely typed JSON values used for runtime
//! reconfiguration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Default minimum green in seconds.
pub const MINIMUM_GREEN: f64 = 10.0;
/// Default maximum green in seconds.
pub const MAXIMUM_GREEN: f64 = 60.0;
/// Default minimum red in seconds.
pub const MINIMUM_RED: f64 = 5.0;
/// Default amber duration in seconds.
pub const AMBER: f64 = 4.0;
/// Default amber-red duration in seconds.
pub const AMBER_RED: f64 = 2.0;
/// Request priority level of an ordinary call.
pub const DEFAULT_PRIORITY_LEVEL: u8 = 2;
/// Request priority level of a `prio` detector without an explicit level.
pub const PRIORITY_DETECTOR_LEVEL: u8 = 4;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The group list is empty.
    #[error("at least one signal group must be configured")]
    NoGroups,

    /// A group name appears twice in the group list.
    #[error("group {name} is listed more than once")]
    DuplicateGroup {
        /// The repeated group name.
        name: String,
    },

    /// A required field is absent.
    #[error("{entity}: missing required field {field}")]
    MissingField {
        /// Group or detector the field belongs to.
        entity: String,
        /// Name of the missing field.
        field: String,
    },

    /// A timing field is not numeric.
    #[error("{entity}: {field} must be a number, got {value}")]
    NotANumber {
        /// Group the field belongs to.
        entity: String,
        /// Name of the offending field.
        field: String,
        /// The rejected value as text.
        value: String,
    },

    /// A timing field is negative or not finite.
    #[error("{entity}: {field} must be a non-negative finite number, got {value}")]
    InvalidTiming {
        /// Group the field belongs to.
        entity: String,
        /// Name of the offending field.
        field: String,
        /// The rejected value.
        value: f64,
    },

    /// A relation names a group that does not exist.
    #[error("{context} refers to unknown group {name}")]
    UnknownGroup {
        /// Where the reference was found.
        context: String,
        /// The unknown group name.
        name: String,
    },

    /// The intergreen matrix is not square over the group list.
    #[error("intergreen matrix must be {expected}x{expected}: row {row} has {found} entries")]
    IntergreenShape {
        /// Number of configured groups.
        expected: usize,
        /// Offending row index (equal to `expected` when rows are missing).
        row: usize,
        /// Entries found in that row (or number of rows).
        found: usize,
    },

    /// An intergreen entry is negative or not finite.
    #[error("intergreen ({row},{column}) must be a non-negative number, got {value}")]
    InvalidIntergreen {
        /// Row index.
        row: usize,
        /// Column index.
        column: usize,
        /// The rejected value as text.
        value: String,
    },

    /// A group is configured to conflict with itself.
    #[error("group {group} cannot conflict with itself")]
    SelfConflict {
        /// The offending group.
        group: String,
    },

    /// A conflict is declared in one direction only.
    #[error("conflict between {first} and {second} is not mutual")]
    OneWayConflict {
        /// Group with the nonzero entry.
        first: String,
        /// Group with the zero entry.
        second: String,
    },

    /// A phase row does not cover every group.
    #[error("phase {phase} has {found} entries, expected one per group ({expected})")]
    PhaseRowLength {
        /// 1-based phase number.
        phase: usize,
        /// Number of configured groups.
        expected: usize,
        /// Entries found.
        found: usize,
    },

    /// A phase cell is not 0 or 1.
    #[error("phase {phase} column {column} must be 0 or 1, got {value}")]
    PhaseCell {
        /// 1-based phase number.
        phase: usize,
        /// 0-based group column.
        column: usize,
        /// The rejected value as text.
        value: String,
    },

    /// Two conflicting groups are members of the same phase.
    #[error("phase {phase} contains conflicting groups {first} and {second}")]
    PhaseConflict {
        /// 1-based phase number.
        phase: usize,
        /// First group.
        first: String,
        /// Second group.
        second: String,
    },

    /// Extension mode outside 1..=4.
    #[error("extension mode must be 1-4, got {mode}")]
    ExtensionMode {
        /// The rejected mode.
        mode: u8,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration document.
///
/// Mirrors the structure of `phasering-config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseringConfig {
    /// Simulation time settings.
    #[serde(default)]
    pub timer: TimerConfig,

    /// The intersection controller.
    pub controller: ControllerConfig,

    /// Run boundaries and status output.
    #[serde(default)]
    pub run: RunConfig,
}

impl PhaseringConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }
}

/// Simulation time settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Seconds per tick.
    #[serde(default = "default_time_step")]
    pub time_step: f64,

    /// Simulated seconds per wall-clock second (0 = run unpaced).
    #[serde(default = "default_real_time_multiplier")]
    pub real_time_multiplier: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            time_step: default_time_step(),
            real_time_multiplier: default_real_time_multiplier(),
        }
    }
}

/// When the engine logs controller status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMode {
    /// Every tick.
    #[default]
    Update,
    /// Only when the status line changes.
    Change,
}

/// Run boundaries and status output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Stop after this many simulated seconds (0 = unbounded).
    #[serde(default)]
    pub max_seconds: f64,

    /// Status logging mode.
    #[serde(default)]
    pub status_mode: StatusMode,
}

/// How a group leaves the extension period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreenEnd {
    /// End green as soon as extension stops.
    #[default]
    AfterExt,
    /// Rest in green until a conflict asks for the right of way.
    Remain,
}

/// Where a group's green request comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Requests are raised by detectors.
    #[default]
    Detector,
    /// The group always requests green.
    Fixed,
}

/// When cross-group messages are committed during a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageApply {
    /// After each transition, in group order.
    #[default]
    Immediate,
    /// After every group has ticked.
    Deferred,
}

/// Timing parameters of one group, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupTiming {
    /// Minimum green.
    pub min_green: f64,
    /// Maximum green measured from the start of minimum green.
    pub max_green: f64,
    /// Minimum red.
    pub min_red: f64,
    /// Amber duration.
    pub min_amber: f64,
    /// Amber-red duration.
    pub min_amber_red: f64,
    /// Behaviour when extension ends.
    pub green_end: GreenEnd,
}

impl Default for GroupTiming {
    fn default() -> Self {
        Self {
            min_green: MINIMUM_GREEN,
            max_green: MAXIMUM_GREEN,
            min_red: MINIMUM_RED,
            min_amber: AMBER,
            min_amber_red: AMBER_RED,
            green_end: GreenEnd::AfterExt,
        }
    }
}

impl GroupTiming {
    /// Name/value pairs of the numeric fields, in a fixed order.
    const fn numeric_fields(&self) -> [(&'static str, f64); 5] {
        [
            ("min_green", self.min_green),
            ("max_green", self.max_green),
            ("min_red", self.min_red),
            ("min_amber", self.min_amber),
            ("min_amber_red", self.min_amber_red),
        ]
    }

    /// Reject negative or non-finite values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTiming`] naming the first bad field.
    pub fn validate(&self, group: &str) -> Result<(), ConfigError> {
        for (field, value) in self.numeric_fields() {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidTiming {
                    entity: group.to_owned(),
                    field: field.to_owned(),
                    value,
                });
            }
        }
        if self.max_green < self.min_green {
            warn!(
                group,
                min_green = self.min_green,
                max_green = self.max_green,
                "max_green below min_green, green ends at minimum"
            );
        }
        Ok(())
    }
}

/// Demand-estimation policy of a zone extender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ExtensionMode {
    /// Extend while the own count exceeds the threshold.
    Absolute,
    /// Extend while own/conflicting demand exceeds the threshold.
    Ratio,
    /// As [`Self::Ratio`] with a threshold growing over green time.
    #[default]
    DiscountedRatio,
    /// As [`Self::DiscountedRatio`] using moving traffic only.
    DiscountedMomentum,
}

impl TryFrom<u8> for ExtensionMode {
    type Error = ConfigError;

    fn try_from(mode: u8) -> Result<Self, Self::Error> {
        match mode {
            1 => Ok(Self::Absolute),
            2 => Ok(Self::Ratio),
            3 => Ok(Self::DiscountedRatio),
            4 => Ok(Self::DiscountedMomentum),
            _ => Err(ConfigError::ExtensionMode { mode }),
        }
    }
}

impl From<ExtensionMode> for u8 {
    fn from(mode: ExtensionMode) -> Self {
        match mode {
            ExtensionMode::Absolute => 1,
            ExtensionMode::Ratio => 2,
            ExtensionMode::DiscountedRatio => 3,
            ExtensionMode::DiscountedMomentum => 4,
        }
    }
}

/// Zone-extender parameters of one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Decision policy.
    #[serde(default)]
    pub ext_mode: ExtensionMode,

    /// Base threshold.
    #[serde(default = "default_ext_threshold")]
    pub ext_threshold: f64,

    /// Seconds of green after which the discounted threshold has doubled.
    #[serde(default = "default_time_discount")]
    pub time_discount: f64,

    /// Enable the safety-extension overlay.
    #[serde(default)]
    pub safety_ext: bool,

    /// Longest safety extension in seconds.
    #[serde(default = "default_safety_time")]
    pub safety_time: f64,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            ext_mode: ExtensionMode::default(),
            ext_threshold: default_ext_threshold(),
            time_discount: default_time_discount(),
            safety_ext: false,
            safety_time: default_safety_time(),
        }
    }
}

/// Configuration of one signal group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Minimum green in seconds.
    pub min_green: f64,
    /// Maximum green in seconds.
    pub max_green: f64,
    /// Minimum red in seconds.
    pub min_red: f64,
    /// Amber duration in seconds.
    pub min_amber: f64,
    /// Amber-red duration in seconds.
    pub min_amber_red: f64,

    /// Behaviour when extension ends.
    #[serde(default)]
    pub green_end: GreenEnd,

    /// Where requests come from.
    #[serde(default)]
    pub request_type: RequestType,

    /// Request level of this group's detector calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// Groups whose green start delays this group: name -> seconds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub delaying_groups: BTreeMap<String, f64>,

    /// Groups whose request mirrors this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_requests: Vec<String>,

    /// Let returning demand move a resting green back to extension.
    #[serde(default)]
    pub repeat_extension: bool,

    /// Zone-extender parameters.
    #[serde(default)]
    pub extension: ExtensionConfig,
}

impl GroupConfig {
    /// A detector-requested group with default timings.
    pub fn with_timing(timing: GroupTiming) -> Self {
        Self {
            min_green: timing.min_green,
            max_green: timing.max_green,
            min_red: timing.min_red,
            min_amber: timing.min_amber,
            min_amber_red: timing.min_amber_red,
            green_end: timing.green_end,
            request_type: RequestType::Detector,
            priority: None,
            delaying_groups: BTreeMap::new(),
            side_requests: Vec::new(),
            repeat_extension: false,
            extension: ExtensionConfig::default(),
        }
    }

    /// The timing part of this group.
    pub const fn timing(&self) -> GroupTiming {
        GroupTiming {
            min_green: self.min_green,
            max_green: self.max_green,
            min_red: self.min_red,
            min_amber: self.min_amber,
            min_amber_red: self.min_amber_red,
            green_end: self.green_end,
        }
    }
}

/// Detector kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorType {
    /// Raises green requests.
    Request,
    /// Extends green while occupied.
    Extender,
    /// Extends green for a while after another group turns green.
    Groupext,
    /// Counts vehicles in a zone.
    E3detector,
    /// Raises high-priority green requests.
    Prio,
}

/// Configuration of one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Detector kind.
    #[serde(rename = "type")]
    pub kind: DetectorType,

    /// Groups requested by a request detector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_groups: Vec<String>,

    /// Owning group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Handle of the physical detector in the feeding system.
    #[serde(default, alias = "sumo_id", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Extension time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_time: Option<f64>,

    /// Group whose green start drives a group-extension detector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extgroup: Option<String>,

    /// Request priority level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// Enable connected-vehicle processing.
    #[serde(default, alias = "v2x-on")]
    pub v2x: bool,
}

impl DetectorConfig {
    /// Check the fields required by the detector kind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for the first absent field.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let missing = |field: &str| ConfigError::MissingField {
            entity: name.to_owned(),
            field: field.to_owned(),
        };
        match self.kind {
            DetectorType::Request if self.request_groups.is_empty() => {
                Err(missing("request_groups"))
            }
            DetectorType::Extender | DetectorType::Groupext | DetectorType::E3detector
            | DetectorType::Prio
                if self.group.is_none() =>
            {
                Err(missing("group"))
            }
            DetectorType::Extender | DetectorType::Groupext if self.ext_time.is_none() => {
                Err(missing("ext_time"))
            }
            DetectorType::Groupext if self.extgroup.is_none() => Err(missing("extgroup")),
            _ => Ok(()),
        }
    }
}

/// Configuration of a whole intersection controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller name used in logs and control messages.
    #[serde(default = "default_controller_name")]
    pub name: String,

    /// Ordered group names; the order defines matrix columns and tick order.
    pub group_list: Vec<String>,

    /// Per-group configuration.
    pub signal_groups: BTreeMap<String, GroupConfig>,

    /// Intergreen matrix: entry (i, j) is the clearance from group j's
    /// amber start to group i's green start; zero means no conflict.
    pub intergreens: Vec<Vec<f64>>,

    /// Phase ring: one row per phase, one 0/1 cell per group.
    pub phases: Vec<Vec<u8>>,

    /// Detectors by name.
    #[serde(default)]
    pub detectors: BTreeMap<String, DetectorConfig>,

    /// Re-attempt transitions within the same tick.
    #[serde(default = "default_true")]
    pub instant_transfer: bool,

    /// When cross-group messages are committed.
    #[serde(default)]
    pub message_apply: MessageApply,
}

impl ControllerConfig {
    /// Validate the whole controller configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_list.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        let mut seen = BTreeSet::new();
        for name in &self.group_list {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateGroup { name: name.clone() });
            }
            let group = self
                .signal_groups
                .get(name)
                .ok_or_else(|| ConfigError::MissingField {
                    entity: name.clone(),
                    field: "signal_groups".to_owned(),
                })?;
            group.timing().validate(name)?;
            for delaying in group.delaying_groups.keys() {
                self.require_group(delaying, &format!("{name} delaying_groups"))?;
            }
            for (delaying, seconds) in &group.delaying_groups {
                if !seconds.is_finite() || *seconds < 0.0 {
                    return Err(ConfigError::InvalidTiming {
                        entity: name.clone(),
                        field: format!("delaying_groups.{delaying}"),
                        value: *seconds,
                    });
                }
            }
            for side in &group.side_requests {
                self.require_group(side, &format!("{name} side_requests"))?;
            }
        }
        for name in self.signal_groups.keys() {
            self.require_group(name, "signal_groups")?;
        }
        validate_intergreens(&self.group_list, &self.intergreens)?;
        validate_phases(&self.group_list, &self.intergreens, &self.phases)?;
        for (name, detector) in &self.detectors {
            detector.validate(name)?;
        }
        Ok(())
    }

    fn require_group(&self, name: &str, context: &str) -> Result<(), ConfigError> {
        if self.group_list.iter().any(|g| g == name) {
            Ok(())
        } else {
            Err(ConfigError::UnknownGroup {
                context: context.to_owned(),
                name: name.to_owned(),
            })
        }
    }
}

/// Check that the intergreen matrix is square, non-negative and mutual.
///
/// # Errors
///
/// Returns the first shape or value error found.
pub fn validate_intergreens(groups: &[String], matrix: &[Vec<f64>]) -> Result<(), ConfigError> {
    let expected = groups.len();
    if matrix.len() != expected {
        return Err(ConfigError::IntergreenShape {
            expected,
            row: expected,
            found: matrix.len(),
        });
    }
    for (row, entries) in matrix.iter().enumerate() {
        if entries.len() != expected {
            return Err(ConfigError::IntergreenShape {
                expected,
                row,
                found: entries.len(),
            });
        }
        for (column, value) in entries.iter().enumerate() {
            if !value.is_finite() || *value < 0.0 {
                return Err(ConfigError::InvalidIntergreen {
                    row,
                    column,
                    value: value.to_string(),
                });
            }
        }
    }
    for (i, name) in groups.iter().enumerate() {
        for (j, other) in groups.iter().enumerate() {
            let forward = cell(matrix, i, j) > 0.0;
            let backward = cell(matrix, j, i) > 0.0;
            if i == j && forward {
                return Err(ConfigError::SelfConflict {
                    group: name.clone(),
                });
            }
            if forward && !backward {
                return Err(ConfigError::OneWayConflict {
                    first: name.clone(),
                    second: other.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Check that every phase row covers the groups with 0/1 cells and holds
/// no conflicting pair.
///
/// # Errors
///
/// Returns the first shape, cell or conflict error found.
pub fn validate_phases(
    groups: &[String],
    intergreens: &[Vec<f64>],
    phases: &[Vec<u8>],
) -> Result<(), ConfigError> {
    for (index, row) in phases.iter().enumerate() {
        let phase = index.saturating_add(1);
        if row.len() != groups.len() {
            return Err(ConfigError::PhaseRowLength {
                phase,
                expected: groups.len(),
                found: row.len(),
            });
        }
        if let Some((column, value)) = row.iter().enumerate().find(|(_, v)| **v > 1) {
            return Err(ConfigError::PhaseCell {
                phase,
                column,
                value: value.to_string(),
            });
        }
        let members: Vec<usize> = row
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == 1)
            .map(|(i, _)| i)
            .collect();
        for &a in &members {
            for &b in &members {
                if cell(intergreens, a, b) > 0.0 {
                    return Err(ConfigError::PhaseConflict {
                        phase,
                        first: groups.get(a).cloned().unwrap_or_default(),
                        second: groups.get(b).cloned().unwrap_or_default(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn cell(matrix: &[Vec<f64>], row: usize, column: usize) -> f64 {
    matrix
        .get(row)
        .and_then(|r| r.get(column))
        .copied()
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Runtime reconfiguration values
// ---------------------------------------------------------------------------

/// Read a number from a JSON value that may also be a numeric string.
///
/// # Errors
///
/// Returns [`ConfigError::NotANumber`] for anything else.
pub fn number_from_value(entity: &str, field: &str, value: &Value) -> Result<f64, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::NotANumber {
            entity: entity.to_owned(),
            field: field.to_owned(),
            value: value.to_string(),
        })
}

/// Build a group timing from a JSON parameter object.
///
/// All five numeric fields are required; `green_end` is optional and keeps
/// `current` when absent.
///
/// # Errors
///
/// Returns [`ConfigError::MissingField`], [`ConfigError::NotANumber`] or
/// [`ConfigError::InvalidTiming`].
pub fn timing_from_value(
    group: &str,
    params: &Value,
    current: GroupTiming,
) -> Result<GroupTiming, ConfigError> {
    let field = |name: &str| -> Result<f64, ConfigError> {
        let raw = params.get(name).ok_or_else(|| ConfigError::MissingField {
            entity: group.to_owned(),
            field: name.to_owned(),
        })?;
        number_from_value(group, name, raw)
    };
    let green_end = match params.get("green_end") {
        None | Some(Value::Null) => current.green_end,
        Some(raw) => serde_json::from_value::<GreenEnd>(raw.clone()).map_err(|_err| {
            ConfigError::NotANumber {
                entity: group.to_owned(),
                field: "green_end".to_owned(),
                value: raw.to_string(),
            }
        })?,
    };
    let timing = GroupTiming {
        min_green: field("min_green")?,
        max_green: field("max_green")?,
        min_red: field("min_red")?,
        min_amber: field("min_amber")?,
        min_amber_red: field("min_amber_red")?,
        green_end,
    };
    timing.validate(group)?;
    Ok(timing)
}

/// Parse an intergreen matrix from JSON rows.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidIntergreen`] for a non-numeric cell.
pub fn intergreens_from_values(rows: &[Vec<Value>]) -> Result<Vec<Vec<f64>>, ConfigError> {
    rows.iter()
        .enumerate()
        .map(|(row, cells)| {
            cells
                .iter()
                .enumerate()
                .map(|(column, raw)| {
                    number_from_value("intergreens", "cell", raw).map_err(|_err| {
                        ConfigError::InvalidIntergreen {
                            row,
                            column,
                            value: raw.to_string(),
                        }
                    })
                })
                .collect()
        })
        .collect()
}

/// Parse a phase ring from JSON rows of 0/1 cells.
///
/// # Errors
///
/// Returns [`ConfigError::PhaseCell`] for a cell that is not 0 or 1.
pub fn phases_from_values(rows: &[Vec<Value>]) -> Result<Vec<Vec<u8>>, ConfigError> {
    rows.iter()
        .enumerate()
        .map(|(index, cells)| {
            cells
                .iter()
                .enumerate()
                .map(|(column, raw)| phase_cell(raw).ok_or_else(|| ConfigError::PhaseCell {
                    phase: index.saturating_add(1),
                    column,
                    value: raw.to_string(),
                }))
                .collect()
        })
        .collect()
}

fn phase_cell(raw: &Value) -> Option<u8> {
    match raw {
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(0),
            Some(1) => Some(1),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "0" => Some(0),
            "1" => Some(1),
            _ => None,
        },
        Value::Bool(b) => Some(u8::from(*b)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_time_step() -> f64 {
    0.1
}

const fn default_real_time_multiplier() -> f64 {
    1.0
}

const fn default_ext_threshold() -> f64 {
    0.25
}

const fn default_time_discount() -> f64 {
    60.0
}

const fn default_safety_time() -> f64 {
    10.0
}

const fn default_true() -> bool {
    true
}

fn default_controller_name() -> String {
    "intersection".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const TWO_GROUPS: &str = r"
timer:
  time_step: 0.1
controller:
  name: test
  group_list: [g1, g2]
  signal_groups:
    g1: { min_green: 10, max_green: 40, min_red: 5, min_amber: 4, min_amber_red: 2 }
    g2: { min_green: 8, max_green: 30, min_red: 5, min_amber: 3, min_amber_red: 1, green_end: remain, request_type: fixed }
  intergreens:
    - [0, 3]
    - [4, 0]
  phases:
    - [1, 0]
    - [0, 1]
  detectors:
    d1: { type: request, request_groups: [g1], sumo_id: loop1 }
    e1: { type: extender, group: g1, ext_time: 2.5 }
";

    fn two_groups() -> PhaseringConfig {
        PhaseringConfig::parse(TWO_GROUPS).unwrap()
    }

    #[test]
    fn parses_full_document() {
        let config = two_groups();
        assert_eq!(config.controller.group_list, vec!["g1", "g2"]);
        let g2 = config.controller.signal_groups.get("g2").unwrap();
        assert_eq!(g2.green_end, GreenEnd::Remain);
        assert_eq!(g2.request_type, RequestType::Fixed);
        assert_eq!(g2.extension.ext_mode, ExtensionMode::DiscountedRatio);
        let d1 = config.controller.detectors.get("d1").unwrap();
        assert_eq!(d1.external_id.as_deref(), Some("loop1"));
        assert!(config.controller.instant_transfer);
        assert_eq!(config.run.status_mode, StatusMode::Update);
        assert!(config.controller.validate().is_ok());
    }

    #[test]
    fn missing_timing_field_is_rejected() {
        let yaml = TWO_GROUPS.replace("min_red: 5, min_amber: 4, ", "min_amber: 4, ");
        assert!(matches!(
            PhaseringConfig::parse(&yaml),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn unknown_side_request_is_rejected() {
        let mut config = two_groups().controller;
        if let Some(g1) = config.signal_groups.get_mut("g1") {
            g1.side_requests.push("g9".to_owned());
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownGroup { name, .. }) if name == "g9"
        ));
    }

    #[test]
    fn phase_row_length_mismatch_is_rejected() {
        let mut config = two_groups().controller;
        config.phases.push(vec![1, 0, 0]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PhaseRowLength { phase: 3, expected: 2, found: 3 })
        ));
    }

    #[test]
    fn phase_cell_outside_binary_is_rejected() {
        let mut config = two_groups().controller;
        config.phases = vec![vec![2, 0]];
        assert!(matches!(config.validate(), Err(ConfigError::PhaseCell { .. })));
    }

    #[test]
    fn conflicting_pair_in_one_phase_is_rejected() {
        let mut config = two_groups().controller;
        config.phases = vec![vec![1, 1]];
        assert!(matches!(config.validate(), Err(ConfigError::PhaseConflict { .. })));
    }

    #[test]
    fn one_way_conflict_is_rejected() {
        let mut config = two_groups().controller;
        config.intergreens = vec![vec![0.0, 3.0], vec![0.0, 0.0]];
        assert!(matches!(config.validate(), Err(ConfigError::OneWayConflict { .. })));
    }

    #[test]
    fn non_square_intergreens_are_rejected() {
        let mut config = two_groups().controller;
        config.intergreens = vec![vec![0.0, 3.0]];
        assert!(matches!(config.validate(), Err(ConfigError::IntergreenShape { .. })));
    }

    #[test]
    fn extension_mode_out_of_range_is_rejected() {
        let yaml = TWO_GROUPS.replace(
            "min_amber: 4, min_amber_red: 2 }",
            "min_amber: 4, min_amber_red: 2, extension: { ext_mode: 7 } }",
        );
        assert!(PhaseringConfig::parse(&yaml).is_err());
    }

    #[test]
    fn detector_without_ext_time_is_rejected() {
        let mut config = two_groups().controller;
        if let Some(e1) = config.detectors.get_mut("e1") {
            e1.ext_time = None;
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { field, .. }) if field == "ext_time"
        ));
    }

    #[test]
    fn timing_values_accept_numeric_strings() {
        let params = json!({
            "min_green": "12", "max_green": 50, "min_red": 5,
            "min_amber": "3.5", "min_amber_red": 2, "green_end": "remain"
        });
        let timing = timing_from_value("g1", &params, GroupTiming::default()).unwrap();
        assert!((timing.min_green - 12.0).abs() < 1e-9);
        assert!((timing.min_amber - 3.5).abs() < 1e-9);
        assert_eq!(timing.green_end, GreenEnd::Remain);
    }

    #[test]
    fn non_numeric_timing_is_rejected() {
        let params = json!({
            "min_green": "long", "max_green": 50, "min_red": 5,
            "min_amber": 3, "min_amber_red": 2
        });
        assert!(matches!(
            timing_from_value("g1", &params, GroupTiming::default()),
            Err(ConfigError::NotANumber { field, .. }) if field == "min_green"
        ));
    }

    #[test]
    fn missing_timing_param_is_rejected() {
        let params = json!({ "min_green": 10, "max_green": 50 });
        assert!(matches!(
            timing_from_value("g1", &params, GroupTiming::default()),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn phase_values_must_be_binary() {
        let rows = vec![vec![json!(1), json!("0")], vec![json!(0), json!(1)]];
        assert_eq!(phases_from_values(&rows).unwrap(), vec![vec![1, 0], vec![0, 1]]);
        let bad = vec![vec![json!(1), json!(2)]];
        assert!(matches!(phases_from_values(&bad), Err(ConfigError::PhaseCell { column: 1, .. })));
        let text = vec![vec![json!("x"), json!(0)]];
        assert!(phases_from_values(&text).is_err());
    }

    #[test]
    fn intergreen_values_must_be_numeric() {
        let rows = vec![vec![json!(0), json!("3")], vec![json!(4.5), json!(0)]];
        let matrix = intergreens_from_values(&rows).unwrap();
        assert!((cell(&matrix, 1, 0) - 4.5).abs() < 1e-9);
        let bad = vec![vec![json!(0), json!({})]];
        assert!(intergreens_from_values(&bad).is_err());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("phasering-config.yaml");
        if path.exists() {
            let config = PhaseringConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
            assert!(config.unwrap().controller.validate().is_ok());
        }
    }
}
