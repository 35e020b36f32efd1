//! Failure detection for the tracked (autonomous) vehicles.
//!
//! The detector runs once per step, after every vehicle has moved. Road
//! departures and collisions are recorded when they begin, and line
//! crossings each time the anchor's path crosses a marking.

use crate::math::{heading_difference, Point2d, Segment};
use crate::network::{Direction, LaneSide, LineKind, MarkingKind, Network};
use crate::vehicle::Vehicle;
use crate::{EntityId, EntitySet, VehicleSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A faster vehicle within this many degrees of the tracked vehicle's
/// heading is taken to have run into it.
const SAME_BEARING: f64 = 45.0;

/// The categories of failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LeaveRoad,
    CrossCentreLine,
    CrossNearSideLine,
    CrossFarSideLine,
    ObstacleCollision,
    VehicleCollision,
    Timeout,
    /// An immediate stop harder than the vehicle's brakes allow.
    ExceededStoppingCapability,
}

impl FailureKind {
    pub const ALL: [FailureKind; 8] = [
        FailureKind::LeaveRoad,
        FailureKind::CrossCentreLine,
        FailureKind::CrossNearSideLine,
        FailureKind::CrossFarSideLine,
        FailureKind::ObstacleCollision,
        FailureKind::VehicleCollision,
        FailureKind::Timeout,
        FailureKind::ExceededStoppingCapability,
    ];

    fn crossing(line: LineKind) -> Self {
        match line {
            LineKind::Centre => Self::CrossCentreLine,
            LineKind::NearSide => Self::CrossNearSideLine,
            LineKind::FarSide => Self::CrossFarSideLine,
        }
    }
}

/// One recorded failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    /// The offending vehicle.
    pub vehicle: EntityId,
    pub step: u64,
    pub location: Point2d,
    pub detail: String,
}

/// The number of failures recorded in each category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounts {
    pub leave_road: u64,
    pub cross_centre_line: u64,
    pub cross_near_side_line: u64,
    pub cross_far_side_line: u64,
    pub obstacle_collision: u64,
    pub vehicle_collision: u64,
    pub timeout: u64,
    pub exceeded_stopping_capability: u64,
    pub total: u64,
}

impl FailureCounts {
    /// Gets the count for one category.
    pub fn get(&self, kind: FailureKind) -> u64 {
        match kind {
            FailureKind::LeaveRoad => self.leave_road,
            FailureKind::CrossCentreLine => self.cross_centre_line,
            FailureKind::CrossNearSideLine => self.cross_near_side_line,
            FailureKind::CrossFarSideLine => self.cross_far_side_line,
            FailureKind::ObstacleCollision => self.obstacle_collision,
            FailureKind::VehicleCollision => self.vehicle_collision,
            FailureKind::Timeout => self.timeout,
            FailureKind::ExceededStoppingCapability => self.exceeded_stopping_capability,
        }
    }

    fn increment(&mut self, kind: FailureKind) {
        let count = match kind {
            FailureKind::LeaveRoad => &mut self.leave_road,
            FailureKind::CrossCentreLine => &mut self.cross_centre_line,
            FailureKind::CrossNearSideLine => &mut self.cross_near_side_line,
            FailureKind::CrossFarSideLine => &mut self.cross_far_side_line,
            FailureKind::ObstacleCollision => &mut self.obstacle_collision,
            FailureKind::VehicleCollision => &mut self.vehicle_collision,
            FailureKind::Timeout => &mut self.timeout,
            FailureKind::ExceededStoppingCapability => &mut self.exceeded_stopping_capability,
        };
        *count += 1;
        self.total += 1;
    }
}

/// Watches the tracked vehicles and keeps the failure log.
#[derive(Clone, Debug, Default)]
pub struct AccidentDetector {
    log: Vec<FailureRecord>,
    counts: FailureCounts,
    /// Tracked vehicles currently off the road.
    off_road: HashSet<EntityId>,
    /// Tracked vehicle and obstacle pairs currently in contact.
    obstacle_contacts: HashSet<(EntityId, EntityId)>,
    /// Tracked vehicle and other vehicle pairs currently in contact.
    vehicle_contacts: HashSet<(EntityId, EntityId)>,
    timed_out: bool,
}

impl AccidentDetector {
    /// Creates a detector with an empty log.
    pub fn new() -> Self {
        Default::default()
    }

    /// The failures recorded so far, in order.
    pub fn log(&self) -> &[FailureRecord] {
        &self.log
    }

    /// The per-category counts.
    pub fn counts(&self) -> &FailureCounts {
        &self.counts
    }

    /// Returns true once the step ceiling has been reached.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Clears the log, the counts and all contact tracking.
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// Records a failure.
    pub fn record(
        &mut self,
        kind: FailureKind,
        vehicle: EntityId,
        step: u64,
        location: Point2d,
        detail: impl Into<String>,
    ) {
        let detail = detail.into();
        log::warn!(
            "Step {}: {:?} by vehicle {:?} at ({:.2}, {:.2}): {}",
            step,
            kind,
            vehicle,
            location.x,
            location.y,
            detail
        );
        self.counts.increment(kind);
        self.log.push(FailureRecord {
            kind,
            vehicle,
            step,
            location,
            detail,
        });
    }

    /// Scans every active tracked vehicle for failures.
    pub(crate) fn check(
        &mut self,
        step: u64,
        network: &Network,
        entities: &EntitySet,
        vehicles: &VehicleSet,
    ) {
        for (id, vehicle) in vehicles.iter() {
            if !vehicle.is_ugv() || !vehicle.is_active() {
                continue;
            }
            self.check_road(step, network, id, vehicle);
            self.check_lines(step, network, id, vehicle);
            self.check_obstacles(step, entities, id, vehicle);
            self.check_vehicles(step, network, vehicles, id, vehicle);
        }
    }

    /// Records a timeout against every tracked vehicle still searching,
    /// once the step ceiling is reached. Returns true if the run must end.
    pub(crate) fn check_timeout(&mut self, step: u64, max_steps: u64, vehicles: &VehicleSet) -> bool {
        if step < max_steps {
            return false;
        }
        if !self.timed_out {
            self.timed_out = true;
            for (id, vehicle) in vehicles.iter() {
                if vehicle.is_ugv() && vehicle.is_active() && !vehicle.target_found() {
                    self.record(
                        FailureKind::Timeout,
                        id,
                        step,
                        vehicle.position(),
                        format!("target not found within {} steps", max_steps),
                    );
                }
            }
        }
        true
    }

    fn check_road(&mut self, step: u64, network: &Network, id: EntityId, vehicle: &Vehicle) {
        if network.point_on_road(vehicle.position()) {
            self.off_road.remove(&id);
        } else if self.off_road.insert(id) {
            self.record(
                FailureKind::LeaveRoad,
                id,
                step,
                vehicle.position(),
                "anchor left the road surface",
            );
        }
    }

    fn check_lines(&mut self, step: u64, network: &Network, id: EntityId, vehicle: &Vehicle) {
        let path = Segment::new(vehicle.prev_position(), vehicle.position());
        if path.length() <= 0.0 {
            return;
        }
        for marking in network.markings() {
            let Some(point) = marking.crossing(&path) else {
                continue;
            };
            if network.junction_at(point).is_some() {
                continue;
            }
            let line = marking.classify(vehicle.heading());
            if line == LineKind::Centre && (vehicle.is_overtaking() || vehicle.is_uturning()) {
                log::trace!("Vehicle {:?} crossed the centre line deliberately", id);
                continue;
            }
            self.record(
                FailureKind::crossing(line),
                id,
                step,
                point,
                format!(
                    "crossed {:?} line of road {:?} heading {:.0}",
                    line,
                    marking.road(),
                    vehicle.heading()
                ),
            );
        }
    }

    fn check_obstacles(&mut self, step: u64, entities: &EntitySet, id: EntityId, vehicle: &Vehicle) {
        let footprint = vehicle.footprint();
        for (obstacle, entity) in entities.iter() {
            let Some(quad) = entity.obstacle_footprint() else {
                continue;
            };
            let key = (id, obstacle);
            if !footprint.intersects(&quad) {
                self.obstacle_contacts.remove(&key);
            } else if self.obstacle_contacts.insert(key) {
                self.record(
                    FailureKind::ObstacleCollision,
                    id,
                    step,
                    entity.pos(),
                    format!("hit obstacle {:?}", obstacle),
                );
            }
        }
    }

    fn check_vehicles(
        &mut self,
        step: u64,
        network: &Network,
        vehicles: &VehicleSet,
        id: EntityId,
        vehicle: &Vehicle,
    ) {
        let footprint = vehicle.footprint();
        for (other_id, other) in vehicles.iter() {
            if other_id == id || !other.is_active() {
                continue;
            }
            let key = (id, other_id);
            if !footprint.intersects(&other.footprint()) {
                self.vehicle_contacts.remove(&key);
                continue;
            }
            if !self.vehicle_contacts.insert(key) {
                continue;
            }
            if let Some(reason) = exoneration(network, vehicle, other) {
                log::debug!(
                    "Vehicle {:?} touched {:?} but is not at fault: {}",
                    id,
                    other_id,
                    reason
                );
                continue;
            }
            self.record(
                FailureKind::VehicleCollision,
                id,
                step,
                vehicle.position(),
                format!("hit vehicle {:?}", other_id),
            );
        }
    }
}

/// Decides whether the tracked vehicle is blameless for a collision.
fn exoneration(network: &Network, ours: &Vehicle, theirs: &Vehicle) -> Option<&'static str> {
    if ours.speed() <= 0.0 {
        return Some("stationary");
    }
    let in_junction = network.junction_at(ours.position()).is_some()
        || network.junction_at(theirs.position()).is_some();
    if !in_junction && network.lane_side(ours.position(), ours.heading()) == Some(LaneSide::Own) {
        let wrong_lane =
            network.lane_side(theirs.position(), theirs.heading()) == Some(LaneSide::Oncoming);
        let opposing = Direction::from_heading(theirs.heading())
            == Direction::from_heading(ours.heading()).opposite();
        if wrong_lane || opposing {
            return Some("in its own lane");
        }
    }
    if theirs.speed() > ours.speed()
        && heading_difference(ours.heading(), theirs.heading()) <= SAME_BEARING
    {
        return Some("run into from behind");
    }
    if network
        .shape_intersects_line(&theirs.footprint(), Some(MarkingKind::Centre))
        .is_some()
    {
        return Some("other vehicle across the centre line");
    }
    None
}
