//! Detectors: turn occupancy and zone reports into demand.
//!
//! Four kinds are supported:
//!
//! - **Request** (also `prio`): a rising edge calls green for its groups and
//!   carries a request priority level.
//! - **Extension**: extends green while occupied and for `ext_time` after.
//! - **Group extension**: extends green for `ext_time` after another group
//!   turned green.
//! - **Zone**: weighted vehicle count over a stretch of road, fed either by
//!   tracked objects or by entry/exit counts.
//!
//! Detectors never write to groups. Edges and re-asserts return
//! [`GroupMessage`] values for the tick to commit.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::before;
use crate::config::{DEFAULT_PRIORITY_LEVEL, DetectorConfig, DetectorType, PRIORITY_DETECTOR_LEVEL};
use crate::group::{GroupId, SignalGroup};
use crate::message::GroupMessage;

/// Mean speed (m/s) below which zone traffic counts as stationary.
pub const STATIONARY_SPEED: f64 = 0.2;

/// Weight of a truck or bus.
const TRUCK_WEIGHT: u32 = 3;

/// Weight of a tram, large enough to win any ratio.
const TRAM_WEIGHT: u32 = 101;

/// Option zone for connected vehicles, metres from the stop line.
const OPTION_ZONE_MIN: f64 = 40.0;
const OPTION_ZONE_MAX: f64 = 120.0;

/// Gap to the leading vehicle below which a connected vehicle is at risk.
const SAFE_GAP: f64 = 30.0;

/// Class of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    /// Passenger car.
    Car,
    /// Truck or bus.
    Truck,
    /// Tram.
    Tram,
    /// Bicycle.
    Bicycle,
    /// Connected vehicle reporting its position.
    V2x,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

impl VehicleClass {
    /// Weight of one object of this class in the zone's vehicle count.
    /// Bicycles do not count towards motor traffic demand.
    pub const fn weight(self) -> u32 {
        match self {
            Self::Bicycle => 0,
            Self::Car | Self::V2x | Self::Unknown => 1,
            Self::Truck => TRUCK_WEIGHT,
            Self::Tram => TRAM_WEIGHT,
        }
    }
}

/// An object currently inside a zone detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneObject {
    /// Tracking identifier.
    pub id: String,
    /// Object class.
    pub class: VehicleClass,
    /// Speed in m/s.
    pub speed: f64,
    /// Distance to the stop line in metres, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_line_distance: Option<f64>,
    /// Gap to the vehicle in front in metres, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_gap: Option<f64>,
}

impl ZoneObject {
    /// A connected vehicle in the option zone following too closely.
    fn short_gap(&self) -> bool {
        if self.class != VehicleClass::V2x {
            return false;
        }
        let in_option_zone = self
            .stop_line_distance
            .is_some_and(|d| d > OPTION_ZONE_MIN && d < OPTION_ZONE_MAX);
        let too_close = self.leader_gap.is_some_and(|g| g > 0.0 && g < SAFE_GAP);
        in_option_zone && too_close
    }
}

/// One tick's report for a zone detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneReport {
    /// Every object currently inside the zone.
    Objects(Vec<ZoneObject>),
    /// Vehicles that entered and left since the previous report.
    Flow {
        /// Vehicles that entered.
        entered: u32,
        /// Vehicles that left.
        exited: u32,
    },
}

/// Running counters of a zone detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneState {
    vehicles: u32,
    objects: usize,
    mean_speed: Option<f64>,
    short_gap: bool,
    extend_on: bool,
    safety_active: bool,
}

impl ZoneState {
    /// Weighted vehicle count.
    pub const fn vehicles(&self) -> u32 {
        self.vehicles
    }

    /// Raw number of objects in the last object report.
    pub const fn objects(&self) -> usize {
        self.objects
    }

    /// Mean object speed, unknown for flow reports.
    pub const fn mean_speed(&self) -> Option<f64> {
        self.mean_speed
    }

    /// A connected vehicle with a short gap was seen in the last report.
    pub const fn short_gap(&self) -> bool {
        self.short_gap
    }

    /// The owning extender is extending.
    pub const fn extend_on(&self) -> bool {
        self.extend_on
    }

    /// The owning extender is in a safety extension.
    pub const fn safety_active(&self) -> bool {
        self.safety_active
    }

    #[allow(clippy::cast_precision_loss, clippy::arithmetic_side_effects)]
    fn ingest_objects(&mut self, detector: &str, objects: &[ZoneObject], v2x: bool) {
        let mut vehicles: u32 = 0;
        let mut speed_sum = 0.0;
        let mut short_gap = false;
        for object in objects {
            if object.class == VehicleClass::Unknown {
                warn!(detector, object = %object.id, "Unknown vehicle class, counted without weight");
            }
            vehicles = vehicles.saturating_add(object.class.weight());
            speed_sum += object.speed;
            if v2x && object.short_gap() {
                short_gap = true;
            }
        }
        self.vehicles = vehicles;
        self.objects = objects.len();
        self.mean_speed = (!objects.is_empty()).then(|| speed_sum / objects.len() as f64);
        self.short_gap = short_gap;
    }

    fn ingest_flow(&mut self, detector: &str, entered: u32, exited: u32) {
        let inside = self.vehicles.saturating_add(entered);
        if exited > inside {
            warn!(detector, inside, exited, "Zone count drifted below zero, clamped");
        }
        self.vehicles = inside.saturating_sub(exited);
        self.mean_speed = None;
        self.short_gap = false;
    }
}

/// Kind-specific detector data.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorKind {
    /// Calls green for its groups.
    Request {
        /// Groups called on a rising edge.
        groups: Vec<GroupId>,
    },
    /// Extends while occupied and for `ext_time` after.
    Extension {
        /// Extension time in seconds.
        ext_time: f64,
    },
    /// Extends for `ext_time` after another group turned green.
    GroupExtension {
        /// Extension time in seconds.
        ext_time: f64,
        /// The group whose green start is followed.
        ext_group: GroupId,
    },
    /// Weighted count of vehicles in a zone.
    Zone(ZoneState),
}

/// A detector bound to groups of one controller.
#[derive(Debug, Clone)]
pub struct Detector {
    name: String,
    config: DetectorConfig,
    kind: DetectorKind,
    group: Option<GroupId>,
    priority: Option<u8>,
    loop_on: bool,
    detection_at: Option<f64>,
    detection_end_at: Option<f64>,
}

impl Detector {
    /// Bind a detector configuration to the controller's groups.
    ///
    /// Returns `None`, with a warning, when a group the detector depends
    /// on does not exist; such a detector produces no demand. A request
    /// detector keeps the groups that do exist, and an unknown owning
    /// group only costs it the owner.
    pub fn bind(
        name: &str,
        config: &DetectorConfig,
        lookup: impl Fn(&str) -> Option<GroupId>,
    ) -> Option<Self> {
        let resolve = |group: &str| {
            let found = lookup(group);
            if found.is_none() {
                warn!(detector = name, group, "Detector refers to unknown group, ignored");
            }
            found
        };
        let group = match (config.kind, config.group.as_deref()) {
            (DetectorType::Request, None) => None,
            (DetectorType::Request, Some(owner)) => resolve(owner),
            (_, Some(owner)) => Some(resolve(owner)?),
            (_, None) => {
                warn!(detector = name, "Detector has no owning group, ignored");
                return None;
            }
        };
        let (kind, priority) = match config.kind {
            DetectorType::Request => {
                let groups: Vec<GroupId> =
                    config.request_groups.iter().filter_map(|g| resolve(g)).collect();
                if groups.is_empty() {
                    return None;
                }
                (DetectorKind::Request { groups }, config.priority)
            }
            DetectorType::Prio => (
                DetectorKind::Request {
                    groups: group.into_iter().collect(),
                },
                Some(config.priority.unwrap_or(PRIORITY_DETECTOR_LEVEL)),
            ),
            DetectorType::Extender => (
                DetectorKind::Extension {
                    ext_time: config.ext_time.unwrap_or(0.0),
                },
                None,
            ),
            DetectorType::Groupext => {
                let ext_group = resolve(config.extgroup.as_deref().unwrap_or_default())?;
                (
                    DetectorKind::GroupExtension {
                        ext_time: config.ext_time.unwrap_or(0.0),
                        ext_group,
                    },
                    None,
                )
            }
            DetectorType::E3detector => (DetectorKind::Zone(ZoneState::default()), None),
        };
        Some(Self {
            name: name.to_owned(),
            config: config.clone(),
            kind,
            group,
            priority,
            loop_on: false,
            detection_at: None,
            detection_end_at: None,
        })
    }

    /// Configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// External handle, falling back to the name.
    pub fn external_id(&self) -> &str {
        self.config.external_id.as_deref().unwrap_or(&self.name)
    }

    /// Configuration the detector was bound from.
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Kind-specific data.
    pub const fn kind(&self) -> &DetectorKind {
        &self.kind
    }

    /// Owning group, if any.
    pub const fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Current occupancy pulse.
    pub const fn loop_on(&self) -> bool {
        self.loop_on
    }

    /// Second of the last rising edge.
    pub const fn detection_at(&self) -> Option<f64> {
        self.detection_at
    }

    /// Second of the last falling edge.
    pub const fn detection_end_at(&self) -> Option<f64> {
        self.detection_end_at
    }

    /// Counters of a zone detector.
    pub const fn zone(&self) -> Option<&ZoneState> {
        match &self.kind {
            DetectorKind::Zone(zone) => Some(zone),
            _ => None,
        }
    }

    /// Record occupancy. A rising edge of a request detector calls its
    /// groups and propagates its priority level.
    pub(crate) fn set_occupied(
        &mut self,
        occupied: bool,
        now: f64,
        groups: &[SignalGroup],
    ) -> Vec<GroupMessage> {
        if occupied == self.loop_on {
            return Vec::new();
        }
        self.loop_on = occupied;
        if !occupied {
            self.detection_end_at = Some(now);
            return Vec::new();
        }
        self.detection_at = Some(now);
        let DetectorKind::Request { groups: targets } = &self.kind else {
            return Vec::new();
        };
        let mut outgoing = Vec::new();
        for &target in targets {
            let Some(group) = groups.get(target.index()) else {
                continue;
            };
            let level = self
                .priority
                .or(group.priority())
                .unwrap_or(DEFAULT_PRIORITY_LEVEL);
            outgoing.push(GroupMessage::RequestGreen { group: target, on: true });
            outgoing.push(GroupMessage::OwnLevel { group: target, level });
            outgoing.extend(
                group
                    .conflicts()
                    .iter()
                    .map(|c| GroupMessage::RaiseOtherLevel { group: c.group, level }),
            );
        }
        outgoing
    }

    /// Re-call groups that have just turned red while still occupied.
    pub(crate) fn reassert(&self, groups: &[SignalGroup]) -> Vec<GroupMessage> {
        let DetectorKind::Request { groups: targets } = &self.kind else {
            return Vec::new();
        };
        if !self.loop_on {
            return Vec::new();
        }
        targets
            .iter()
            .filter(|t| groups.get(t.index()).is_some_and(|g| g.state().is_red_started()))
            .map(|&group| GroupMessage::RequestGreen { group, on: true })
            .collect()
    }

    /// Feed a zone report. Reports for other kinds are ignored.
    pub(crate) fn ingest(&mut self, report: &ZoneReport) {
        let v2x = self.config.v2x;
        let DetectorKind::Zone(zone) = &mut self.kind else {
            warn!(detector = self.name, "Zone report for a non-zone detector, ignored");
            return;
        };
        match report {
            ZoneReport::Objects(objects) => zone.ingest_objects(&self.name, objects, v2x),
            ZoneReport::Flow { entered, exited } => {
                zone.ingest_flow(&self.name, *entered, *exited);
            }
        }
    }

    /// Whether this detector currently asks for green extension.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn is_extending(&self, now: f64, groups: &[SignalGroup]) -> bool {
        match &self.kind {
            DetectorKind::Request { .. } => self.loop_on,
            DetectorKind::Extension { ext_time } => {
                self.loop_on
                    || self
                        .detection_end_at
                        .is_some_and(|end| before(now, end + ext_time))
            }
            DetectorKind::GroupExtension { ext_time, ext_group } => groups
                .get(ext_group.index())
                .filter(|g| g.state().is_green())
                .and_then(SignalGroup::green_started_at)
                .is_some_and(|at| before(now, at + ext_time)),
            DetectorKind::Zone(zone) => zone.vehicles > 0,
        }
    }

    /// Weighted vehicle count (zone detectors only).
    pub fn veh_count(&self) -> u32 {
        self.zone().map_or(0, ZoneState::vehicles)
    }

    /// Vehicle count of moving traffic while the owning group is on.
    pub fn momentum(&self, groups: &[SignalGroup]) -> u32 {
        let Some(zone) = self.zone() else {
            return 0;
        };
        let owner_on = self
            .group
            .and_then(|g| groups.get(g.index()))
            .is_some_and(SignalGroup::is_on);
        let stationary = zone.mean_speed.is_some_and(|s| s < STATIONARY_SPEED);
        if owner_on && !stationary {
            zone.vehicles
        } else {
            0
        }
    }

    /// A short gap was found in the last zone report.
    pub fn short_gap_found(&self) -> bool {
        self.zone().is_some_and(ZoneState::short_gap)
    }

    pub(crate) fn set_extension_flags(&mut self, extend_on: bool, safety_active: bool) {
        if let DetectorKind::Zone(zone) = &mut self.kind {
            zone.extend_on = extend_on;
            zone.safety_active = safety_active;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::{GroupConfig, GroupTiming};
    use crate::group::Conflict;
    use crate::state::{GreenStep, RedStep, SignalState};

    fn groups() -> Vec<SignalGroup> {
        let config = GroupConfig::with_timing(GroupTiming::default());
        let mut groups = vec![
            SignalGroup::new(GroupId::new(0), "g1", &config, true),
            SignalGroup::new(GroupId::new(1), "g2", &config, true),
        ];
        groups[0].set_conflicts(vec![Conflict { group: GroupId::new(1), delay: 3.0 }], Vec::new());
        groups[1].set_conflicts(vec![Conflict { group: GroupId::new(0), delay: 3.0 }], Vec::new());
        groups
    }

    fn lookup(name: &str) -> Option<GroupId> {
        match name {
            "g1" => Some(GroupId::new(0)),
            "g2" => Some(GroupId::new(1)),
            _ => None,
        }
    }

    fn config(kind: DetectorType) -> DetectorConfig {
        DetectorConfig {
            kind,
            request_groups: Vec::new(),
            group: Some("g1".to_owned()),
            external_id: None,
            ext_time: Some(2.0),
            extgroup: Some("g2".to_owned()),
            priority: None,
            v2x: false,
        }
    }

    fn object(class: VehicleClass, speed: f64) -> ZoneObject {
        ZoneObject {
            id: format!("{class:?}-{speed}"),
            class,
            speed,
            stop_line_distance: None,
            leader_gap: None,
        }
    }

    #[test]
    fn rising_edge_requests_with_priority() {
        let mut cfg = config(DetectorType::Prio);
        cfg.request_groups.clear();
        let mut det = Detector::bind("p1", &cfg, lookup).unwrap();
        let out = det.set_occupied(true, 1.0, &groups());
        assert_eq!(
            out,
            vec![
                GroupMessage::RequestGreen { group: GroupId::new(0), on: true },
                GroupMessage::OwnLevel { group: GroupId::new(0), level: PRIORITY_DETECTOR_LEVEL },
                GroupMessage::RaiseOtherLevel { group: GroupId::new(1), level: PRIORITY_DETECTOR_LEVEL },
            ]
        );
        assert_eq!(det.detection_at(), Some(1.0));
        assert!(det.set_occupied(true, 1.1, &groups()).is_empty());
    }

    #[test]
    fn request_detector_drops_unknown_groups() {
        let mut cfg = config(DetectorType::Request);
        cfg.group = None;
        cfg.request_groups = vec!["g2".to_owned(), "nowhere".to_owned()];
        let det = Detector::bind("r1", &cfg, lookup).unwrap();
        assert_eq!(det.kind(), &DetectorKind::Request { groups: vec![GroupId::new(1)] });

        cfg.request_groups = vec!["nowhere".to_owned()];
        assert!(Detector::bind("r2", &cfg, lookup).is_none());
    }

    #[test]
    fn detector_with_unknown_owner_is_excluded() {
        let mut cfg = config(DetectorType::Extender);
        cfg.group = Some("g9".to_owned());
        assert!(Detector::bind("e1", &cfg, lookup).is_none());
    }

    #[test]
    fn request_detector_survives_unknown_owner() {
        let mut cfg = config(DetectorType::Request);
        cfg.group = Some("g9".to_owned());
        cfg.request_groups = vec!["g2".to_owned()];
        let det = Detector::bind("r1", &cfg, lookup).unwrap();
        assert_eq!(det.group(), None);
        assert!(matches!(
            det.kind(),
            DetectorKind::Request { groups } if groups == &[GroupId::new(1)]
        ));

        let mut prio = config(DetectorType::Prio);
        prio.group = Some("g9".to_owned());
        assert!(Detector::bind("p1", &prio, lookup).is_none());
    }

    #[test]
    fn reassert_only_in_red_minimum() {
        let mut cfg = config(DetectorType::Request);
        cfg.request_groups = vec!["g1".to_owned()];
        let mut det = Detector::bind("r1", &cfg, lookup).unwrap();
        let mut gs = groups();
        let _ = det.set_occupied(true, 0.0, &gs);
        assert!(det.reassert(&gs).is_empty());
        let _ = gs[0].enter(SignalState::Red(RedStep::MinimumTime { since: 1.0 }), 1.0);
        assert_eq!(
            det.reassert(&gs),
            vec![GroupMessage::RequestGreen { group: GroupId::new(0), on: true }]
        );
    }

    #[test]
    fn extension_detector_holds_for_ext_time() {
        let mut det = Detector::bind("e1", &config(DetectorType::Extender), lookup).unwrap();
        let gs = groups();
        assert!(!det.is_extending(0.0, &gs));
        let _ = det.set_occupied(true, 1.0, &gs);
        assert!(det.is_extending(1.5, &gs));
        let _ = det.set_occupied(false, 2.0, &gs);
        assert!(det.is_extending(3.9, &gs));
        assert!(!det.is_extending(4.0, &gs));
    }

    #[test]
    fn group_extension_follows_other_green_start() {
        let det = Detector::bind("x1", &config(DetectorType::Groupext), lookup).unwrap();
        let mut gs = groups();
        assert!(!det.is_extending(0.0, &gs));
        let _ = gs[1].enter(SignalState::Green(GreenStep::Init), 10.0);
        assert!(det.is_extending(11.0, &gs));
        assert!(!det.is_extending(12.0, &gs));
    }

    #[test]
    fn zone_weights_vehicle_classes() {
        let mut det = Detector::bind("z1", &config(DetectorType::E3detector), lookup).unwrap();
        det.ingest(&ZoneReport::Objects(vec![
            object(VehicleClass::Car, 10.0),
            object(VehicleClass::Truck, 8.0),
            object(VehicleClass::Bicycle, 4.0),
            object(VehicleClass::Unknown, 6.0),
        ]));
        assert_eq!(det.veh_count(), 1 + 3 + 1);
        assert_eq!(det.zone().unwrap().objects(), 4);
        assert!(VehicleClass::Bicycle.weight() < VehicleClass::Car.weight());
        det.ingest(&ZoneReport::Objects(vec![object(VehicleClass::Tram, 5.0)]));
        assert_eq!(det.veh_count(), 101);
    }

    #[test]
    fn bicycles_alone_do_not_occupy_a_zone() {
        let mut det = Detector::bind("z1", &config(DetectorType::E3detector), lookup).unwrap();
        det.ingest(&ZoneReport::Objects(vec![
            object(VehicleClass::Bicycle, 4.0),
            object(VehicleClass::Bicycle, 5.0),
        ]));
        assert_eq!(det.veh_count(), 0);
        assert_eq!(det.zone().unwrap().objects(), 2);
        det.ingest(&ZoneReport::Objects(vec![
            object(VehicleClass::Bicycle, 4.0),
            object(VehicleClass::Car, 5.0),
        ]));
        assert_eq!(det.veh_count(), 1);
    }

    #[test]
    fn zone_flow_clamps_negative_drift() {
        let mut det = Detector::bind("z1", &config(DetectorType::E3detector), lookup).unwrap();
        det.ingest(&ZoneReport::Flow { entered: 3, exited: 1 });
        assert_eq!(det.veh_count(), 2);
        det.ingest(&ZoneReport::Flow { entered: 0, exited: 5 });
        assert_eq!(det.veh_count(), 0);
    }

    #[test]
    fn momentum_ignores_queued_traffic_and_red_owner() {
        let mut det = Detector::bind("z1", &config(DetectorType::E3detector), lookup).unwrap();
        let mut gs = groups();
        det.ingest(&ZoneReport::Objects(vec![object(VehicleClass::Car, 9.0)]));
        assert_eq!(det.momentum(&gs), 0);
        let _ = gs[0].enter(SignalState::Green(GreenStep::Init), 0.0);
        assert_eq!(det.momentum(&gs), 1);
        det.ingest(&ZoneReport::Objects(vec![object(VehicleClass::Car, 0.1)]));
        assert_eq!(det.momentum(&gs), 0);
    }

    #[test]
    fn short_gap_needs_v2x_in_option_zone() {
        let mut cfg = config(DetectorType::E3detector);
        cfg.v2x = true;
        let mut det = Detector::bind("z1", &cfg, lookup).unwrap();
        let mut close = object(VehicleClass::V2x, 12.0);
        close.stop_line_distance = Some(80.0);
        close.leader_gap = Some(12.0);
        det.ingest(&ZoneReport::Objects(vec![close.clone()]));
        assert!(det.short_gap_found());

        close.stop_line_distance = Some(20.0);
        det.ingest(&ZoneReport::Objects(vec![close]));
        assert!(!det.short_gap_found());
    }
}
