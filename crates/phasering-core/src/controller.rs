//! The phase-ring controller: groups, detectors, extenders and the phase
//! ring of one intersection.
//!
//! Construction validates the whole [`ControllerConfig`] and wires the
//! relations between groups by index. The per-tick behaviour lives in
//! [`crate::tick`] and [`crate::scheduler`]; this module owns the data,
//! the accessors and runtime reconfiguration.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use crate::config::{
    ConfigError, ControllerConfig, DetectorConfig, GroupConfig, MessageApply, intergreens_from_values,
    phases_from_values, timing_from_value, validate_intergreens, validate_phases,
};
use crate::detector::{Detector, DetectorKind};
use crate::extender::{LoopExtender, ZoneExtender};
use crate::group::{Conflict, GroupId, SignalGroup, StartDelay};
use crate::phase::MainPhase;
use crate::scheduler::SchedulerStatus;

/// Controller of one intersection.
#[derive(Debug, Clone)]
pub struct PhaseRingController {
    pub(crate) name: String,
    pub(crate) message_apply: MessageApply,
    pub(crate) groups: Vec<SignalGroup>,
    pub(crate) phases: Vec<MainPhase>,
    pub(crate) detectors: Vec<Detector>,
    pub(crate) detector_configs: BTreeMap<String, DetectorConfig>,
    pub(crate) loop_extenders: Vec<LoopExtender>,
    pub(crate) zone_extenders: Vec<ZoneExtender>,
    pub(crate) status: SchedulerStatus,
    pub(crate) current_phase: Option<usize>,
    pub(crate) next_phase: Option<usize>,
    pub(crate) step_count: u64,
}

impl PhaseRingController {
    /// Build a controller from a validated configuration.
    ///
    /// Detectors that refer to unknown groups are left out with a warning.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found by validation.
    pub fn new(config: &ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let names = &config.group_list;
        let lookup = |name: &str| names.iter().position(|g| g == name).map(GroupId::new);
        let resolve = |name: &str, context: &str| {
            lookup(name).ok_or_else(|| ConfigError::UnknownGroup {
                context: context.to_owned(),
                name: name.to_owned(),
            })
        };

        let mut groups = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            let group_config = group_config(config, name)?;
            groups.push(SignalGroup::new(
                GroupId::new(index),
                name,
                group_config,
                config.instant_transfer,
            ));
        }
        apply_intergreens(&mut groups, &config.intergreens);

        for (index, name) in names.iter().enumerate() {
            let group_config = group_config(config, name)?;
            let mut delaying = Vec::with_capacity(group_config.delaying_groups.len());
            for (other, delay) in &group_config.delaying_groups {
                let other = resolve(other, "delaying_groups")?;
                delaying.push(StartDelay { group: other, delay: *delay });
                if let Some(disabled_by) = groups.get_mut(other.index()) {
                    disabled_by.add_disabling(GroupId::new(index));
                }
            }
            let side_requests = group_config
                .side_requests
                .iter()
                .map(|other| resolve(other, "side_requests"))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(group) = groups.get_mut(index) {
                group.set_delaying(delaying);
                group.set_side_requests(side_requests);
            }
        }

        let detectors: Vec<Detector> = config
            .detectors
            .iter()
            .filter_map(|(name, detector)| Detector::bind(name, detector, lookup))
            .collect();

        let mut controller = Self {
            name: config.name.clone(),
            message_apply: config.message_apply,
            groups,
            phases: build_phases(&config.phases),
            detectors,
            detector_configs: config.detectors.clone(),
            loop_extenders: Vec::new(),
            zone_extenders: Vec::new(),
            status: SchedulerStatus::Scan,
            current_phase: None,
            next_phase: None,
            step_count: 0,
        };
        controller.attach_extenders();
        info!(
            controller = %controller.name,
            groups = controller.groups.len(),
            phases = controller.phases.len(),
            detectors = controller.detectors.len(),
            "Controller built"
        );
        Ok(controller)
    }

    fn attach_extenders(&mut self) {
        for group in &mut self.groups {
            let id = group.id();
            let owned = |want_zone: bool| -> Vec<usize> {
                self.detectors
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| d.group() == Some(id))
                    .filter(|(_, d)| match d.kind() {
                        DetectorKind::Zone(_) => want_zone,
                        DetectorKind::Extension { .. } | DetectorKind::GroupExtension { .. } => {
                            !want_zone
                        }
                        DetectorKind::Request { .. } => false,
                    })
                    .map(|(i, _)| i)
                    .collect()
            };
            let loops = owned(false);
            if !loops.is_empty() {
                group.loop_extender = Some(self.loop_extenders.len());
                self.loop_extenders.push(LoopExtender::new(id, loops));
            }
            let zones = owned(true);
            if !zones.is_empty() {
                group.zone_extender = Some(self.zone_extenders.len());
                self.zone_extenders
                    .push(ZoneExtender::new(id, zones, group.extension()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When cross-group messages are committed.
    pub const fn message_apply(&self) -> MessageApply {
        self.message_apply
    }

    /// Groups in configuration order.
    pub fn groups(&self) -> &[SignalGroup] {
        &self.groups
    }

    /// Group by id.
    pub fn group(&self, id: GroupId) -> Option<&SignalGroup> {
        self.groups.get(id.index())
    }

    /// Group by name.
    pub fn group_by_name(&self, name: &str) -> Option<&SignalGroup> {
        self.groups.iter().find(|g| g.name() == name)
    }

    /// The phase ring.
    pub fn phases(&self) -> &[MainPhase] {
        &self.phases
    }

    /// Bound detectors.
    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Detector by name or external id.
    pub fn detector(&self, key: &str) -> Option<&Detector> {
        self.detectors
            .iter()
            .find(|d| d.name() == key || d.external_id() == key)
    }

    /// Loop extenders.
    pub fn loop_extenders(&self) -> &[LoopExtender] {
        &self.loop_extenders
    }

    /// Zone extenders.
    pub fn zone_extenders(&self) -> &[ZoneExtender] {
        &self.zone_extenders
    }

    /// Loop extender of a group.
    pub fn loop_extender_of(&self, id: GroupId) -> Option<&LoopExtender> {
        self.group(id)
            .and_then(|g| g.loop_extender)
            .and_then(|i| self.loop_extenders.get(i))
    }

    /// Zone extender of a group.
    pub fn zone_extender_of(&self, id: GroupId) -> Option<&ZoneExtender> {
        self.group(id)
            .and_then(|g| g.zone_extender)
            .and_then(|i| self.zone_extenders.get(i))
    }

    /// Whether the group has any extender.
    pub fn has_extender(&self, id: GroupId) -> bool {
        self.loop_extender_of(id).is_some() || self.zone_extender_of(id).is_some()
    }

    /// Combined verdict of the group's extenders; false without extenders.
    pub fn group_extending(&self, id: GroupId) -> bool {
        self.loop_extender_of(id).is_some_and(LoopExtender::extend)
            || self.zone_extender_of(id).is_some_and(ZoneExtender::extend)
    }

    /// Sum of the conflicting groups' zone vehicle counts.
    pub fn conflict_pressure(&self, id: GroupId) -> u32 {
        self.group(id).map_or(0, |group| {
            group
                .conflicts()
                .iter()
                .filter_map(|c| self.zone_extender_of(c.group))
                .fold(0_u32, |sum, e| sum.saturating_add(e.vehcount()))
        })
    }

    /// Scheduler status.
    pub const fn status(&self) -> SchedulerStatus {
        self.status
    }

    /// Phase being served, 0-based.
    pub const fn current_phase(&self) -> Option<usize> {
        self.current_phase
    }

    /// Phase granted permission and waiting to start, 0-based.
    pub const fn next_phase(&self) -> Option<usize> {
        self.next_phase
    }

    /// Ticks run so far.
    pub const fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Intergreen matrix rebuilt from the groups' conflicts.
    pub fn conflict_matrix(&self) -> Vec<Vec<f64>> {
        let n = self.groups.len();
        self.groups
            .iter()
            .map(|group| {
                let mut row = vec![0.0; n];
                for conflict in group.conflicts() {
                    if let Some(cell) = row.get_mut(conflict.group.index()) {
                        *cell = conflict.delay;
                    }
                }
                row
            })
            .collect()
    }

    /// Phase ring as 0/1 rows.
    pub fn phase_matrix(&self) -> Vec<Vec<u8>> {
        let n = self.groups.len();
        self.phases.iter().map(|p| p.to_row(n)).collect()
    }

    fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name().to_owned()).collect()
    }

    fn name_of(&self, id: GroupId) -> String {
        self.group(id).map(|g| g.name().to_owned()).unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Runtime reconfiguration
    // -----------------------------------------------------------------------

    /// Replace one group's timing from a JSON parameter object.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownGroup`] or the first invalid field.
    pub fn set_group_params(&mut self, name: &str, params: &Value) -> Result<(), ConfigError> {
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name() == name)
            .ok_or_else(|| ConfigError::UnknownGroup {
                context: "group params".to_owned(),
                name: name.to_owned(),
            })?;
        let timing = timing_from_value(name, params, group.timing())?;
        group.set_timing(timing);
        info!(group = name, min_green = timing.min_green, max_green = timing.max_green, "Group timing updated");
        Ok(())
    }

    /// Replace timings from a list of parameter objects, each naming its
    /// group under `name`. Stops at the first error; earlier entries stay
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for an entry without a name, or
    /// any error of [`Self::set_group_params`].
    pub fn update_group_params(&mut self, params: &[Value]) -> Result<(), ConfigError> {
        for entry in params {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ConfigError::MissingField {
                    entity: "group params".to_owned(),
                    field: "name".to_owned(),
                })?
                .to_owned();
            self.set_group_params(&name, entry)?;
        }
        Ok(())
    }

    /// Replace the intergreen matrix from JSON rows and rebuild conflicts.
    ///
    /// # Errors
    ///
    /// Returns the first cell or shape error, or
    /// [`ConfigError::PhaseConflict`] when the new matrix makes two members
    /// of a phase conflict; the controller is unchanged.
    pub fn update_intergreens(&mut self, rows: &[Vec<Value>]) -> Result<(), ConfigError> {
        let matrix = intergreens_from_values(rows)?;
        self.set_intergreens(&matrix)
    }

    fn set_intergreens(&mut self, matrix: &[Vec<f64>]) -> Result<(), ConfigError> {
        let names = self.group_names();
        validate_intergreens(&names, matrix)?;
        validate_phases(&names, matrix, &self.phase_matrix())?;
        apply_intergreens(&mut self.groups, matrix);
        info!(controller = %self.name, "Intergreen matrix updated");
        Ok(())
    }

    /// Replace the phase ring from JSON rows. Scanning restarts from the
    /// first phase.
    ///
    /// # Errors
    ///
    /// Returns the first cell, length or conflict error; the controller is
    /// unchanged.
    pub fn update_phases(&mut self, rows: &[Vec<Value>]) -> Result<(), ConfigError> {
        let phases = phases_from_values(rows)?;
        validate_phases(&self.group_names(), &self.conflict_matrix(), &phases)?;
        self.phases = build_phases(&phases);
        self.current_phase = None;
        self.next_phase = None;
        self.status = SchedulerStatus::Scan;
        info!(controller = %self.name, phases = self.phases.len(), "Phase ring updated");
        Ok(())
    }

    /// Apply the timings of matching groups and the intergreen matrix of a
    /// full configuration document.
    ///
    /// # Errors
    ///
    /// Returns the first invalid timing, intergreen or phase-conflict error.
    /// Everything is checked before anything is applied.
    pub fn apply_config(&mut self, config: &ControllerConfig) -> Result<(), ConfigError> {
        let mut timings = Vec::new();
        for (name, group_config) in &config.signal_groups {
            let timing = group_config.timing();
            timing.validate(name)?;
            if let Some(index) = self.groups.iter().position(|g| g.name() == name) {
                timings.push((index, timing));
            }
        }
        let names = self.group_names();
        validate_intergreens(&names, &config.intergreens)?;
        validate_phases(&names, &config.intergreens, &self.phase_matrix())?;
        for (index, timing) in timings {
            if let Some(group) = self.groups.get_mut(index) {
                group.set_timing(timing);
            }
        }
        self.set_intergreens(&config.intergreens)
    }

    /// Reconstruct the configuration this controller runs with.
    pub fn export_config(&self) -> ControllerConfig {
        let signal_groups = self
            .groups
            .iter()
            .map(|group| {
                let mut config = GroupConfig::with_timing(group.timing());
                config.request_type = group.request_type();
                config.priority = group.priority();
                config.repeat_extension = group.repeat_extension();
                config.extension = group.extension();
                config.delaying_groups = group
                    .delaying()
                    .iter()
                    .map(|d| (self.name_of(d.group), d.delay))
                    .collect();
                config.side_requests = group
                    .side_requests()
                    .iter()
                    .map(|&id| self.name_of(id))
                    .collect();
                (group.name().to_owned(), config)
            })
            .collect();
        ControllerConfig {
            name: self.name.clone(),
            group_list: self.group_names(),
            signal_groups,
            intergreens: self.conflict_matrix(),
            phases: self.phase_matrix(),
            detectors: self.detector_configs.clone(),
            instant_transfer: self.groups.first().is_none_or(SignalGroup::instant_transfer),
            message_apply: self.message_apply,
        }
    }
}

fn group_config<'a>(config: &'a ControllerConfig, name: &str) -> Result<&'a GroupConfig, ConfigError> {
    config
        .signal_groups
        .get(name)
        .ok_or_else(|| ConfigError::MissingField {
            entity: name.to_owned(),
            field: "signal_groups".to_owned(),
        })
}

/// Rebuild every group's conflict list from an intergreen matrix.
///
/// Row `i`, column `j` is the clearance group `i` waits after group `j`
/// turned amber; zero means the pair does not conflict.
fn apply_intergreens(groups: &mut [SignalGroup], matrix: &[Vec<f64>]) {
    let n = groups.len();
    for (index, group) in groups.iter_mut().enumerate() {
        let row = matrix.get(index).map_or(&[][..], Vec::as_slice);
        let mut conflicts = Vec::new();
        let mut non_conflicting = Vec::new();
        for column in (0..n).filter(|&c| c != index) {
            let delay = row.get(column).copied().unwrap_or(0.0);
            if delay > 0.0 {
                conflicts.push(Conflict { group: GroupId::new(column), delay });
            } else {
                non_conflicting.push(GroupId::new(column));
            }
        }
        group.set_conflicts(conflicts, non_conflicting);
    }
}

fn build_phases(rows: &[Vec<u8>]) -> Vec<MainPhase> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| MainPhase::from_row(index, row))
        .collect()
}
