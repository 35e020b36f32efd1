//! Passing parked cars by borrowing the oncoming lane.

use super::speed::{steps_to_cover, stopping_distance, SLOW_SPEED};
use super::ugv::{LaneCache, UgvState};
use super::{Car, StepContext};
use crate::entity::WaypointKind;
use crate::fault::{Fault, Faults};
use crate::math::{heading_difference, Point2d};
use crate::network::{Direction, LaneSide, Road};
use crate::sensor::{Detection, LaneFilter, Pick, SeenVehicle};
use crate::EntityId;
use cgmath::prelude::*;
use serde::{Deserialize, Serialize};

/// Width of the obstacle search cone.
const OBSTACLE_CONE: f64 = 10.0;

/// How far ahead obstacles are searched for.
const OBSTACLE_RANGE: f64 = 12.0;

/// The distance between samples when searching for obstacles.
const OBSTACLE_STEP: f64 = 0.1;

/// Width of the cone watched for oncoming traffic.
const ONCOMING_CONE: f64 = 10.0;

/// How far ahead oncoming traffic is watched for.
const ONCOMING_RANGE: f64 = 30.0;

/// Space left behind the obstacle when pulling out.
const START_SETBACK: f64 = 1.0;

/// Space left past the obstacle before pulling back in.
const CLEARANCE: f64 = 3.0;

/// A lane change is spread over this many turning radii.
const LANE_CHANGE_RADII: f64 = 4.0;

/// The shortest distance along the road a lane change takes.
const MIN_LANE_CHANGE: f64 = 4.0;

/// How far ahead along the new lane the vehicle aims.
const AIM_LOOKAHEAD: f64 = 3.0;

/// A waypoint that has been driven past only counts once the heading is
/// within this many degrees of the road.
const SETTLED: f64 = 10.0;

/// The longest stride taken along a platoon of obstacles.
const PLATOON_STRIDE: f64 = 4.0;

/// An obstacle must reach this much further to extend the overtake.
const PLATOON_EPSILON: f64 = 0.5;

/// Steps of slack demanded before oncoming traffic arrives.
const SAFETY_MARGIN_STEPS: u32 = 5;

/// Projections of the manoeuvre give up after this many steps.
const PROJECTION_LIMIT: u32 = 400;

/// Where the vehicle is in passing an obstacle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OvertakeStage {
    #[default]
    NotOvertaking,
    /// Pulling out into the oncoming lane.
    Start,
    /// Alongside the obstacle.
    PulledOut,
    /// Pulling back into the original lane.
    Finish,
    /// Holding back behind an obstacle until it is safe to pass.
    Wait,
}

/// An overtake in progress.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Overtake {
    pub stage: OvertakeStage,
    /// The farthest point seen on the obstacles being passed.
    pub obstacle_end: Option<Point2d>,
    /// The direction of travel when the overtake began.
    pub direction: Option<Direction>,
}

impl Overtake {
    /// Returns true while out of the original lane.
    pub fn is_active(&self) -> bool {
        matches!(
            self.stage,
            OvertakeStage::Start | OvertakeStage::PulledOut | OvertakeStage::Finish
        )
    }
}

/// Search parameters for parked cars, after faults.
fn obstacle_search(faults: &mut Faults) -> (f64, f64) {
    let mut step = OBSTACLE_STEP;
    if faults.trigger(Fault::ObstacleSearchCoarseStep, true) {
        step *= 2.0;
    }
    let mut range = OBSTACLE_RANGE;
    if faults.trigger(Fault::ObstacleSearchShortRange, true) {
        range *= 0.5;
    }
    (step, range)
}

/// Looks for parked cars in the lane ahead, and begins passing them when
/// the oncoming lane is clear for long enough.
pub(super) fn negotiate_obstacles(
    car: &mut Car,
    ugv: &mut UgvState,
    lanes: &mut LaneCache,
    ctx: &mut StepContext,
) {
    let network = ctx.network;
    if ugv.overtake.is_active() || ugv.uturning || network.approach_at(car.pos).is_some() {
        return;
    }
    let dir = car.direction();
    let Some(road) = network.road_along(car.pos, dir) else {
        return;
    };
    let Some(own) = lanes.own_lane(car, ctx) else {
        return;
    };
    let (step, range) = obstacle_search(ctx.faults);
    let ignore_oncoming = ctx.faults.trigger(Fault::IgnoreOncomingWhenOvertaking, true);
    let oncoming_lane = LaneFilter::for_road(road, car.pos, dir, LaneSide::Oncoming);

    let (near, far, oncoming) = {
        let sensors = ctx.sensors(car.id);
        let scan = |pick| {
            sensors.detect_obstacle(car.pos, car.heading, OBSTACLE_CONE, range, step, pick, Some(&own))
        };
        let Some(near) = scan(Pick::Nearest) else {
            if ugv.overtake.stage == OvertakeStage::Wait {
                log::debug!("Vehicle {:?} no longer blocked", car.id);
                ugv.overtake = Overtake::default();
            }
            return;
        };
        let far = scan(Pick::Farthest).unwrap_or(near);
        let oncoming = if ignore_oncoming {
            None
        } else {
            sensors.detect_moving_obstacle(
                car.pos,
                car.heading,
                ONCOMING_CONE,
                ONCOMING_RANGE,
                step,
                Some(&oncoming_lane),
            )
        };
        (near, far, oncoming)
    };

    let along = |p: Point2d| (p - car.pos).dot(dir.unit());
    let maneuver = along(far.point) + car.attributes.length + CLEARANCE;
    let end = car.pos + dir.unit() * maneuver;
    let room = network.point_on_road(end) && network.approach_at(end).is_none();

    if room && oncoming_clear(car, maneuver, oncoming) {
        if near.distance > lane_change_length(car) + START_SETBACK {
            car.votes.slow();
            return;
        }
        let pull_out = along(near.point) - START_SETBACK;
        let start = road.lane_centre(car.pos + dir.unit() * pull_out.max(1.0), dir.opposite());
        log::debug!(
            "Vehicle {:?} overtaking {:?}, {:.1} ahead",
            car.id,
            near.payload,
            near.distance
        );
        ugv.overtake = Overtake {
            stage: OvertakeStage::Start,
            obstacle_end: Some(far.point),
            direction: Some(dir),
        };
        car.create_waypoint(start, WaypointKind::Overtake, false, ctx);
        car.votes.slow();
    } else {
        if near.distance > stopping_distance(car.speed, car.attributes.max_decel) {
            car.votes.really_slow();
        } else {
            car.votes.force_stop();
        }
        if ugv.overtake.stage != OvertakeStage::Wait {
            log::debug!("Vehicle {:?} waiting to pass {:?}", car.id, near.payload);
            ugv.overtake.stage = OvertakeStage::Wait;
        }
    }
}

/// The distance along the road needed to move across by one lane.
fn lane_change_length(car: &Car) -> f64 {
    let radius = car.speed.max(SLOW_SPEED) / car.attributes.max_turn.to_radians();
    (LANE_CHANGE_RADII * radius).max(MIN_LANE_CHANGE)
}

/// Where to steer for an overtake waypoint: on the waypoint's lane line,
/// never closer than [AIM_LOOKAHEAD] ahead, so the vehicle arrives lined
/// up with the road.
pub(super) fn aim_point(car: &Car, waypoint: Point2d, dir: Direction) -> Point2d {
    let ahead = (waypoint - car.pos).dot(dir.unit());
    waypoint + dir.unit() * (AIM_LOOKAHEAD - ahead).max(0.0)
}

/// Returns true once an overtake waypoint is close by, or has been driven
/// past with the vehicle lined up along `dir`.
pub(super) fn waypoint_passed(car: &Car, waypoint: Point2d, dir: Direction) -> bool {
    let to = waypoint - car.pos;
    if to.magnitude() < super::WAYPOINT_RADIUS {
        return true;
    }
    to.dot(dir.unit()) < 0.0 && heading_difference(car.heading, dir.heading()) < SETTLED
}

/// Returns true if the manoeuvre is over, with time to spare, before
/// oncoming traffic reaches its end. The manoeuvre is driven at the slow speed.
fn oncoming_clear(car: &Car, maneuver: f64, oncoming: Option<Detection<SeenVehicle>>) -> bool {
    let mut attributes = car.attributes;
    attributes.max_speed = attributes.max_speed.min(SLOW_SPEED);
    let Some(ours) = steps_to_cover(maneuver, car.speed, &attributes, PROJECTION_LIMIT) else {
        return false;
    };
    let Some(hit) = oncoming else {
        return true;
    };
    let gap = hit.distance - maneuver;
    if gap <= 0.0 {
        return false;
    }
    if hit.payload.speed <= 0.0 {
        return true;
    }
    f64::from(ours + SAFETY_MARGIN_STEPS) <= gap / hit.payload.speed
}

/// Moves the overtake on once its current waypoint is reached.
pub(super) fn advance(car: &mut Car, ugv: &mut UgvState, ctx: &mut StepContext) {
    let network = ctx.network;
    let dir = ugv.overtake.direction.unwrap_or_else(|| car.direction());
    let road = network.road_along(car.pos, dir);
    let (stage, road) = match (ugv.overtake.stage, road) {
        (OvertakeStage::Start | OvertakeStage::PulledOut, Some(road)) => (ugv.overtake.stage, road),
        _ => {
            car.eat_waypoint(ctx.entities);
            if ugv.overtake.is_active() {
                log::debug!("Vehicle {:?} back in lane", car.id);
            }
            ugv.overtake = Overtake::default();
            return;
        }
    };

    let along = |p: Point2d| (p - car.pos).dot(dir.unit());
    let end = ugv.overtake.obstacle_end.unwrap_or(car.pos);
    match further_obstacle(car, road, dir, ctx).filter(|f| along(f.1) > along(end) + PLATOON_EPSILON) {
        Some((id, point)) => {
            log::debug!("Vehicle {:?} extending overtake past {:?}", car.id, id);
            ugv.overtake.obstacle_end = Some(point);
            ugv.overtake.stage = OvertakeStage::Start;
            let stride = along(point).min(PLATOON_STRIDE);
            let next = road.lane_centre(car.pos + dir.unit() * stride, dir.opposite());
            car.create_waypoint(next, WaypointKind::Overtake, true, ctx);
        }
        None if stage == OvertakeStage::Start && along(end) + car.attributes.length > 0.0 => {
            ugv.overtake.stage = OvertakeStage::PulledOut;
            let past = along(end) + car.attributes.length + CLEARANCE;
            let next = road.lane_centre(car.pos + dir.unit() * past, dir.opposite());
            car.create_waypoint(next, WaypointKind::Overtake, true, ctx);
        }
        None => {
            ugv.overtake.stage = OvertakeStage::Finish;
            let next = road.lane_centre(car.pos + dir.unit() * lane_change_length(car), dir);
            car.create_waypoint(next, WaypointKind::Overtake, true, ctx);
        }
    }
}

/// The farthest parked car visible in the original lane.
fn further_obstacle(
    car: &Car,
    road: &Road,
    dir: Direction,
    ctx: &mut StepContext,
) -> Option<(EntityId, Point2d)> {
    let (step, range) = obstacle_search(ctx.faults);
    let lane = LaneFilter::for_road(road, car.pos, dir, LaneSide::Own);
    ctx.sensors(car.id)
        .detect_obstacle(
            car.pos,
            dir.heading(),
            OBSTACLE_CONE,
            range,
            step,
            Pick::Farthest,
            Some(&lane),
        )
        .map(|hit| (hit.payload, hit.point))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vehicle::VehicleAttributes;
    use assert_approx_eq::assert_approx_eq;

    fn car(speed: f64) -> Car {
        let mut car = Car::new(
            EntityId::default(),
            Point2d::new(0.0, 1.0),
            0.0,
            VehicleAttributes::UGV,
            true,
        );
        car.speed = speed;
        car
    }

    fn oncoming(distance: f64, speed: f64) -> Option<Detection<SeenVehicle>> {
        Some(Detection {
            point: Point2d::new(distance, -1.0),
            distance,
            payload: SeenVehicle {
                id: EntityId::default(),
                speed,
                heading: 180.0,
            },
        })
    }

    #[test]
    fn clear_road_is_safe() {
        assert!(oncoming_clear(&car(0.5), 10.0, None));
    }

    #[test]
    fn near_oncoming_traffic_is_unsafe() {
        assert!(!oncoming_clear(&car(0.5), 10.0, oncoming(15.0, 0.6)));
        assert!(!oncoming_clear(&car(0.5), 10.0, oncoming(8.0, 0.0)));
    }

    #[test]
    fn distant_oncoming_traffic_is_safe() {
        // 10 units at 0.5 takes 20 steps; the oncoming car needs 100.
        assert!(oncoming_clear(&car(0.5), 10.0, oncoming(70.0, 0.6)));
        assert!(oncoming_clear(&car(0.5), 10.0, oncoming(25.0, 0.0)));
    }

    #[test]
    fn stationary_car_cannot_overtake_endlessly() {
        let mut slow = car(0.0);
        slow.attributes.max_accel = 0.0;
        assert!(!oncoming_clear(&slow, 10.0, None));
    }

    #[test]
    fn lane_change_spans_turning_circle() {
        // At 0.5 and 15 degrees a step the turning radius is about 1.9.
        assert_approx_eq!(lane_change_length(&car(0.5)), 7.64, 0.01);
        assert_approx_eq!(lane_change_length(&car(0.0)), 7.64, 0.01);
        assert!(lane_change_length(&car(1.0)) > 15.0);
    }

    #[test]
    fn aim_stays_ahead_on_lane_line() {
        let car = car(0.5);
        let far = aim_point(&car, Point2d::new(8.0, -1.0), Direction::East);
        assert_approx_eq!(far.x, 8.0);
        let near = aim_point(&car, Point2d::new(1.0, -1.0), Direction::East);
        assert_approx_eq!(near.x, 3.0);
        assert_approx_eq!(near.y, -1.0);
        let behind = aim_point(&car, Point2d::new(-2.0, -1.0), Direction::East);
        assert_approx_eq!(behind.x, 3.0);
    }

    #[test]
    fn passed_waypoint_waits_for_heading_to_settle() {
        let mut car = car(0.5);
        let waypoint = Point2d::new(-1.0, -1.0);
        car.heading = 330.0;
        assert!(!waypoint_passed(&car, waypoint, Direction::East));
        car.heading = 355.0;
        assert!(waypoint_passed(&car, waypoint, Direction::East));
        assert!(!waypoint_passed(&car, Point2d::new(4.0, 1.0), Direction::East));
        assert!(waypoint_passed(&car, Point2d::new(0.3, 1.0), Direction::East));
    }

    #[test]
    fn active_stages() {
        let mut overtake = Overtake::default();
        assert!(!overtake.is_active());
        overtake.stage = OvertakeStage::Wait;
        assert!(!overtake.is_active());
        overtake.stage = OvertakeStage::PulledOut;
        assert!(overtake.is_active());
    }
}
