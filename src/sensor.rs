//! Ray-marching sensor emulation.
//!
//! Every query fans rays out across a cone centred on a heading, at a fixed
//! angular resolution, and walks each ray outward in fixed range increments.
//! A ray stops when it leaves the road surface. Sample points may be
//! restricted to a single lane, and are then tested against the thing being
//! searched for. The nearest (or farthest) hit over all rays is returned.

use crate::debug::debug_line;
use crate::math::{heading_vector, Point2d, Quad, Vector2d};
use crate::network::{Direction, LaneSide, MarkingKind, Network, Road, MARKING_INSET};
use crate::util::Interval;
use crate::{EntityId, EntitySet, VehicleSet};
use cgmath::prelude::*;
use smallvec::SmallVec;

/// The angle between adjacent rays, in degrees.
pub const ANGULAR_RESOLUTION: f64 = 0.5;

/// How far either side of a lane's boundaries a sample still counts as in the lane.
const LANE_MARGIN: f64 = 0.3;

/// Whether a query wants the closest or the most distant hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pick {
    Nearest,
    Farthest,
}

/// A side of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Something a ray hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection<T> {
    /// The sample point where the hit occurred.
    pub point: Point2d,
    /// The distance along the ray from the origin.
    pub distance: f64,
    /// What was hit.
    pub payload: T,
}

/// Another vehicle, as seen by a sensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeenVehicle {
    pub id: EntityId,
    pub speed: f64,
    pub heading: f64,
}

/// A fan of rays.
#[derive(Clone, Copy, Debug)]
pub struct RayScan {
    /// Where the rays start.
    pub origin: Point2d,
    /// The heading at the centre of the fan, in degrees.
    pub heading: f64,
    /// The total angle covered by the fan, in degrees.
    pub angle: f64,
    /// How far each ray reaches.
    pub range: f64,
    /// The distance between samples along a ray.
    pub step: f64,
    /// Which hit is kept.
    pub pick: Pick,
}

impl RayScan {
    /// Creates a scan which keeps the nearest hit.
    pub fn new(origin: Point2d, heading: f64, angle: f64, range: f64, step: f64) -> Self {
        Self {
            origin,
            heading,
            angle,
            range,
            step,
            pick: Pick::Nearest,
        }
    }

    /// Sets which hit is kept.
    pub fn pick(mut self, pick: Pick) -> Self {
        self.pick = pick;
        self
    }

    /// Casts the rays.
    ///
    /// # Parameters
    /// * `network` - Rays stop where they leave its road surface
    /// * `lane` - If given, samples outside this lane are skipped
    /// * `probe` - Tests a sample point, returning what it hit
    pub fn cast<T>(
        &self,
        network: &Network,
        lane: Option<&LaneFilter>,
        mut probe: impl FnMut(Point2d) -> Option<T>,
    ) -> Option<Detection<T>> {
        if !(self.step > 0.0 && self.range > 0.0 && self.angle >= 0.0) {
            return None;
        }
        let rays = (self.angle / ANGULAR_RESOLUTION).floor() as usize;
        let samples = (self.range / self.step).floor() as usize;
        let mut best: Option<Detection<T>> = None;

        for ray in 0..=rays {
            let offset = ray as f64 * ANGULAR_RESOLUTION - 0.5 * self.angle;
            let dir = heading_vector(self.heading + offset);
            let mut hit = None;
            for sample in 1..=samples {
                let distance = sample as f64 * self.step;
                let point = self.origin + dir * distance;
                if !network.point_on_road(point) {
                    break;
                }
                if !lane.map_or(true, |lane| lane.accepts(point)) {
                    continue;
                }
                if let Some(payload) = probe(point) {
                    hit = Some(Detection {
                        point,
                        distance,
                        payload,
                    });
                    if self.pick == Pick::Nearest {
                        break;
                    }
                }
            }
            let Some(hit) = hit else { continue };
            let better = match (&best, self.pick) {
                (None, _) => true,
                (Some(best), Pick::Nearest) => hit.distance < best.distance,
                (Some(best), Pick::Farthest) => hit.distance > best.distance,
            };
            if better {
                best = Some(hit);
            }
        }
        best
    }
}

/// Restricts sample points to one lane of a road.
#[derive(Clone, Copy, Debug)]
pub struct LaneFilter {
    /// A point on the near-side edge marking.
    origin: Point2d,
    /// Unit vector from the near-side marking towards the centre line.
    inward: Vector2d,
    /// Accepted distances from the near-side marking, along `inward`.
    band: Interval<f64>,
}

impl LaneFilter {
    /// The lane between a located near-side marking and the centre line,
    /// for traffic heading in `dir`.
    pub fn own_lane(marking: Point2d, dir: Direction, road_width: f64) -> Self {
        Self::new(marking, dir, road_width, LaneSide::Own)
    }

    /// The oncoming lane, found from a located near-side marking.
    pub fn oncoming_lane(marking: Point2d, dir: Direction, road_width: f64) -> Self {
        Self::new(marking, dir, road_width, LaneSide::Oncoming)
    }

    /// A lane of a road, taken from the road geometry rather than a sensed marking.
    pub fn for_road(road: &Road, at: Point2d, dir: Direction, side: LaneSide) -> Self {
        Self::new(road.near_edge(at, dir), dir, road.width(), side)
    }

    fn new(marking: Point2d, dir: Direction, road_width: f64, side: LaneSide) -> Self {
        let centre = 0.5 * road_width - MARKING_INSET;
        let band = match side {
            LaneSide::Own => Interval::new(-LANE_MARGIN, centre),
            LaneSide::Oncoming => Interval::new(centre, 2.0 * centre + LANE_MARGIN),
        };
        Self {
            origin: marking,
            inward: -dir.left(),
            band,
        }
    }

    /// Returns true if the point lies in the lane.
    pub fn accepts(&self, point: Point2d) -> bool {
        self.band.contains((point - self.origin).dot(self.inward))
    }
}

/// The sensor suite of one vehicle.
pub struct Sensors<'a> {
    network: &'a Network,
    entities: &'a EntitySet,
    vehicles: &'a VehicleSet,
    own: Option<EntityId>,
}

impl<'a> Sensors<'a> {
    /// Creates the sensors of vehicle `own`, which is never detected by them.
    pub(crate) fn new(
        network: &'a Network,
        entities: &'a EntitySet,
        vehicles: &'a VehicleSet,
        own: Option<EntityId>,
    ) -> Self {
        Self {
            network,
            entities,
            vehicles,
            own,
        }
    }

    /// Finds the nearest lane marking to one side of the vehicle.
    pub fn locate_lane_marking(
        &self,
        anchor: Point2d,
        heading: f64,
        search_angle: f64,
        range: f64,
        step: f64,
        side: Side,
    ) -> Option<Detection<MarkingKind>> {
        let centre = match side {
            Side::Left => heading + 90.0,
            Side::Right => heading - 90.0,
        };
        let markings = self.network.markings();
        let hit = RayScan::new(anchor, centre, search_angle, range, step).cast(
            self.network,
            None,
            |point| {
                markings
                    .iter()
                    .find(|marking| marking.contains(point))
                    .map(|marking| marking.kind())
            },
        )?;
        debug_line("marking", anchor, hit.point);
        Some(hit)
    }

    /// Finds the nearest or farthest point on a parked car.
    pub fn detect_obstacle(
        &self,
        anchor: Point2d,
        heading: f64,
        search_angle: f64,
        range: f64,
        step: f64,
        pick: Pick,
        lane: Option<&LaneFilter>,
    ) -> Option<Detection<EntityId>> {
        let obstacles: SmallVec<[(EntityId, Quad); 8]> = self
            .entities
            .iter()
            .filter_map(|(id, entity)| entity.obstacle_footprint().map(|quad| (id, quad)))
            .collect();
        if obstacles.is_empty() {
            return None;
        }
        let hit = RayScan::new(anchor, heading, search_angle, range, step)
            .pick(pick)
            .cast(self.network, lane, |point| {
                obstacles
                    .iter()
                    .find(|(_, quad)| quad.contains(point))
                    .map(|(id, _)| *id)
            })?;
        debug_line("obstacle", anchor, hit.point);
        Some(hit)
    }

    /// Finds the nearest point on another active vehicle.
    pub fn detect_moving_obstacle(
        &self,
        anchor: Point2d,
        heading: f64,
        search_angle: f64,
        range: f64,
        step: f64,
        lane: Option<&LaneFilter>,
    ) -> Option<Detection<SeenVehicle>> {
        let others = self.other_vehicles();
        if others.is_empty() {
            return None;
        }
        let hit = RayScan::new(anchor, heading, search_angle, range, step).cast(
            self.network,
            lane,
            |point| {
                others
                    .iter()
                    .find(|(_, quad)| quad.contains(point))
                    .map(|(seen, _)| *seen)
            },
        )?;
        debug_line("vehicle", anchor, hit.point);
        Some(hit)
    }

    /// Scans all around the centroid of a footprint for another active
    /// vehicle overlapping it.
    pub fn overlapping_vehicle(&self, footprint: &Quad, step: f64) -> Option<SeenVehicle> {
        let others: SmallVec<[(SeenVehicle, Quad); 8]> = self
            .other_vehicles()
            .into_iter()
            .filter(|(_, quad)| quad.intersects(footprint))
            .collect();
        if others.is_empty() {
            return None;
        }
        let centroid = footprint.centroid();
        let reach = footprint
            .corners()
            .iter()
            .map(|corner| corner.distance(centroid))
            .fold(0.0, f64::max);
        RayScan::new(centroid, 0.0, 360.0, reach, step)
            .cast(self.network, None, |point| {
                if !footprint.contains(point) {
                    return None;
                }
                others
                    .iter()
                    .find(|(_, quad)| quad.contains(point))
                    .map(|(seen, _)| *seen)
            })
            .map(|hit| hit.payload)
    }

    /// The footprints of the other active vehicles.
    fn other_vehicles(&self) -> SmallVec<[(SeenVehicle, Quad); 8]> {
        self.vehicles
            .iter()
            .filter(|(id, vehicle)| Some(*id) != self.own && vehicle.is_active())
            .map(|(id, vehicle)| {
                let seen = SeenVehicle {
                    id,
                    speed: vehicle.speed(),
                    heading: vehicle.heading(),
                };
                (seen, vehicle.footprint())
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entity::{Entity, EntityKind, ParkedCar};
    use crate::network::{RoadAttributes, RoadKind, ROAD_WIDTH};
    use crate::vehicle::{Vehicle, VehicleAttributes};
    use assert_approx_eq::assert_approx_eq;

    fn straight_road() -> Network {
        let mut builder = Network::builder();
        builder
            .add_road(&RoadAttributes {
                kind: RoadKind::Minor,
                start: Point2d::new(0.0, 0.0),
                end: Point2d::new(100.0, 0.0),
                width: ROAD_WIDTH,
            })
            .unwrap();
        builder.build()
    }

    #[test]
    fn rays_stop_at_road_edge() {
        let network = straight_road();
        let scan = RayScan::new(Point2d::new(10.0, 1.0), 90.0, 0.0, 10.0, 0.1);
        // Anything beyond the kerb is invisible.
        let hit = scan.cast(&network, None, |p| (p.y > 2.5).then_some(()));
        assert!(hit.is_none());
        let hit = scan.cast(&network, None, |p| (p.y > 1.5).then_some(())).unwrap();
        assert_approx_eq!(hit.distance, 0.6, 1e-6);
    }

    #[test]
    fn fan_is_centred_on_heading() {
        let network = straight_road();
        let origin = Point2d::new(10.0, 1.0);
        let wide = |p: Point2d| {
            let v = p - origin;
            (v.y.atan2(v.x).to_degrees() > 12.0).then_some(())
        };
        // 20 degrees sweeps 10 either side.
        assert!(RayScan::new(origin, 0.0, 20.0, 10.0, 0.1).cast(&network, None, wide).is_none());
        assert!(RayScan::new(origin, 0.0, 30.0, 10.0, 0.1).cast(&network, None, wide).is_some());
    }

    #[test]
    fn nearest_and_farthest() {
        let network = straight_road();
        let scan = RayScan::new(Point2d::new(10.0, 1.0), 0.0, 0.0, 20.0, 0.5);
        let probe = |p: Point2d| (p.x >= 15.0 && p.x <= 18.0).then_some(());
        let near = scan.cast(&network, None, probe).unwrap();
        let far = scan.pick(Pick::Farthest).cast(&network, None, probe).unwrap();
        assert_approx_eq!(near.distance, 5.0);
        assert_approx_eq!(far.distance, 8.0);
    }

    #[test]
    fn locates_near_side_marking() {
        let network = straight_road();
        let entities = EntitySet::default();
        let vehicles = VehicleSet::default();
        let sensors = Sensors::new(&network, &entities, &vehicles, None);
        // Centre of the eastbound lane.
        let hit = sensors
            .locate_lane_marking(Point2d::new(10.0, 1.0), 0.0, 10.0, 4.0, 0.05, Side::Left)
            .unwrap();
        assert_eq!(hit.payload, MarkingKind::Edge);
        assert!((hit.point.y - 1.8).abs() < 0.1);
        let hit = sensors
            .locate_lane_marking(Point2d::new(10.0, 1.0), 0.0, 10.0, 4.0, 0.05, Side::Right)
            .unwrap();
        assert_eq!(hit.payload, MarkingKind::Centre);
    }

    #[test]
    fn obstacles_outside_lane_are_ignored() {
        let network = straight_road();
        let mut entities = EntitySet::default();
        let vehicles = VehicleSet::default();
        // Parked in the westbound lane, facing west.
        let parked = entities.insert(Entity::new(
            Point2d::new(18.0, -1.0),
            EntityKind::ParkedCar(ParkedCar::new(180.0)),
        ));
        let sensors = Sensors::new(&network, &entities, &vehicles, None);
        let anchor = Point2d::new(10.0, 1.0);
        let own = LaneFilter::own_lane(Point2d::new(10.0, 1.8), Direction::East, ROAD_WIDTH);
        let oncoming =
            LaneFilter::oncoming_lane(Point2d::new(10.0, 1.8), Direction::East, ROAD_WIDTH);
        let seen = sensors.detect_obstacle(anchor, 0.0, 30.0, 15.0, 0.1, Pick::Nearest, None);
        assert_eq!(seen.map(|d| d.payload), Some(parked));
        let seen = sensors.detect_obstacle(anchor, 0.0, 30.0, 15.0, 0.1, Pick::Nearest, Some(&own));
        assert!(seen.is_none());
        let seen =
            sensors.detect_obstacle(anchor, 0.0, 30.0, 15.0, 0.1, Pick::Nearest, Some(&oncoming));
        assert_eq!(seen.map(|d| d.payload), Some(parked));
    }

    #[test]
    fn detects_vehicle_ahead_and_overlap() {
        let network = straight_road();
        let mut entities = EntitySet::default();
        let mut vehicles = VehicleSet::default();
        let attrs = VehicleAttributes::TRAFFIC;
        let me = entities.insert(Entity::new(Point2d::new(10.0, 1.0), EntityKind::Traffic));
        let other = entities.insert(Entity::new(Point2d::new(16.0, 1.0), EntityKind::Traffic));
        let close = entities.insert(Entity::new(Point2d::new(9.0, 1.5), EntityKind::Traffic));
        vehicles.insert(
            me,
            Vehicle::new_traffic(me, Point2d::new(10.0, 1.0), 0.0, attrs),
        );
        vehicles.insert(
            other,
            Vehicle::new_traffic(other, Point2d::new(16.0, 1.0), 0.0, attrs),
        );
        let sensors = Sensors::new(&network, &entities, &vehicles, Some(me));
        let hit = sensors
            .detect_moving_obstacle(Point2d::new(10.0, 1.0), 0.0, 10.0, 10.0, 0.1, None)
            .unwrap();
        assert_eq!(hit.payload.id, other);
        assert!((hit.distance - 4.0).abs() < 0.15);

        let footprint = Quad::footprint(Point2d::new(10.0, 1.0), 0.0, 2.0, 1.0);
        assert!(sensors.overlapping_vehicle(&footprint, 0.1).is_none());
        vehicles.insert(
            close,
            Vehicle::new_traffic(close, Point2d::new(9.0, 1.5), 0.0, attrs),
        );
        let sensors = Sensors::new(&network, &entities, &vehicles, Some(me));
        assert_eq!(
            sensors.overlapping_vehicle(&footprint, 0.1).map(|v| v.id),
            Some(close)
        );
    }
}
