//! The autonomous vehicle's control loop.

use super::overtake::{self, Overtake};
use super::speed::stopping_distance;
use super::{Car, StepContext, StepOutcome};
use crate::arbiter::{choose_ugv_exit, Entry, VisitHistory, UGV_ENTRY_TIMEOUT};
use crate::entity::{Waypoint, WaypointKind};
use crate::fault::Fault;
use crate::math::{heading_vector, Point2d};
use crate::network::{Junction, LaneSide, MarkingKind, ROAD_WIDTH};
use crate::sensor::{Detection, LaneFilter, Side};
use crate::EntityId;
use cgmath::prelude::*;

/// Width of the fan swept for the near-side marking, centred square to the heading.
const MARKING_SEARCH_ANGLE: f64 = 20.0;

/// The distance between samples when searching for markings.
const MARKING_SEARCH_STEP: f64 = 0.1;

/// How far ahead lane tracking aims.
const LANE_LOOKAHEAD: f64 = 3.0;

/// How far ahead the vehicle looks for the end of the road.
const BOUNDARY_LOOKAHEAD: f64 = 2.0;

/// How close to the edge of the map counts as near the wall.
const WALL_MARGIN: f64 = 1.0;

/// Width of the moving-obstacle cone on open road.
const MOVING_CONE: f64 = 10.0;

/// Width of the moving-obstacle cone near junctions.
const JUNCTION_CONE: f64 = 90.0;

/// How far past the stopping distance moving obstacles are searched for.
const MOVING_RANGE: f64 = 6.0;

/// The distance between samples when searching for vehicles.
const MOVING_SEARCH_STEP: f64 = 0.2;

/// The distance between samples of the all-round proximity scan.
const PROXIMITY_STEP: f64 = 0.1;

/// The target must be this close for the vehicle to have arrived.
const TARGET_RADIUS: f64 = 2.0;

/// The state of the autonomous vehicle.
#[derive(Clone, Debug)]
pub(crate) struct UgvState {
    /// The real target.
    pub destination: EntityId,
    pub overtake: Overtake,
    pub uturning: bool,
    /// How often each junction arm has been taken.
    pub visits: VisitHistory,
    pub target_found: bool,
}

impl UgvState {
    pub fn new(destination: EntityId) -> Self {
        Self {
            destination,
            overtake: Overtake::default(),
            uturning: false,
            visits: VisitHistory::default(),
            target_found: false,
        }
    }
}

/// Lane-marking lookups, made at most once per step.
#[derive(Default)]
pub(super) struct LaneCache {
    near_side: Option<Option<Detection<MarkingKind>>>,
}

impl LaneCache {
    /// The nearest marking on the vehicle's near side.
    pub fn near_side(&mut self, car: &Car, ctx: &mut StepContext) -> Option<Detection<MarkingKind>> {
        if let Some(found) = self.near_side {
            return found;
        }
        let mut step = MARKING_SEARCH_STEP;
        if ctx.faults.trigger(Fault::MarkingSearchCoarseStep, car.is_ugv) {
            step *= 2.0;
        }
        let mut range = road_width(car, ctx);
        if ctx.faults.trigger(Fault::MarkingSearchShortRange, car.is_ugv) {
            range *= 0.5;
        }
        let found = ctx.sensors(car.id).locate_lane_marking(
            car.pos,
            car.heading,
            MARKING_SEARCH_ANGLE,
            range,
            step,
            Side::Left,
        );
        self.near_side = Some(found);
        found
    }

    /// The vehicle's own lane, bounded by a sensed near-side edge.
    pub fn own_lane(&mut self, car: &Car, ctx: &mut StepContext) -> Option<LaneFilter> {
        let marking = self
            .near_side(car, ctx)
            .filter(|m| m.payload == MarkingKind::Edge)?;
        Some(LaneFilter::own_lane(marking.point, car.direction(), road_width(car, ctx)))
    }
}

/// The width of the road the vehicle is driving along.
pub(super) fn road_width(car: &Car, ctx: &StepContext) -> f64 {
    ctx.network
        .road_along(car.pos, car.direction())
        .map_or(ROAD_WIDTH, |road| road.width())
}

pub(super) fn step(car: &mut Car, ugv: &mut UgvState, ctx: &mut StepContext) -> StepOutcome {
    car.begin_step();
    car.release_junction_if_clear(ctx.network, ctx.arbiter);

    if car.speed <= car.attributes.max_decel {
        let overlap = ctx
            .sensors(car.id)
            .overlapping_vehicle(&car.footprint(), PROXIMITY_STEP);
        if let Some(other) = overlap {
            if !ctx.faults.trigger(Fault::SkipProximityStop, true) {
                log::debug!("Vehicle {:?} too close to {:?}, holding", car.id, other.id);
                car.speed = 0.0;
                car.prev_pos = car.pos;
                return StepOutcome::Continue;
            }
        }
    }

    let mut lanes = LaneCache::default();
    negotiate_junction(car, ugv, ctx);
    if ugv.uturning {
        car.votes.really_slow();
    }
    avoid_boundary(car, ugv, ctx);
    overtake::negotiate_obstacles(car, ugv, &mut lanes, ctx);
    if ugv.overtake.is_active() {
        car.votes.slow();
    }
    steer(car, ugv, &mut lanes, ctx);
    check_moving_obstacles(car, ugv, &mut lanes, ctx);
    if car.waiting && !ctx.faults.trigger(Fault::SkipWaitingStop, true) {
        car.votes.force_stop();
    }
    if let Some(outcome) = follow_target(car, ugv, ctx) {
        return outcome;
    }
    car.resolve_speed(ctx.faults);
    car.integrate();
    StepOutcome::Continue
}

/// Claims the junction the vehicle has driven into, and picks a way out.
fn negotiate_junction(car: &mut Car, ugv: &mut UgvState, ctx: &mut StepContext) {
    let network = ctx.network;
    let entering = network
        .junction_at(car.pos)
        .filter(|junction| car.held_junction != Some(junction.id()));
    if let Some(junction) = entering {
        enter_junction(car, ugv, junction, ctx);
    }
    car.junction_speed(network);
}

fn enter_junction(car: &mut Car, ugv: &mut UgvState, junction: &Junction, ctx: &mut StepContext) {
    match car.request_junction(junction.id(), UGV_ENTRY_TIMEOUT, ctx) {
        Entry::Granted => choose_exit(car, ugv, junction, ctx),
        Entry::Denied { .. } if ctx.faults.trigger(Fault::EnterOccupiedJunction, true) => {
            // Drives in regardless, without the arbiter knowing.
            car.held_junction = Some(junction.id());
            choose_exit(car, ugv, junction, ctx);
        }
        Entry::Denied { .. } => {
            car.immediate_stop(ctx);
            car.start_waiting();
        }
    }
}

fn choose_exit(car: &mut Car, ugv: &mut UgvState, junction: &Junction, ctx: &mut StepContext) {
    // Route waypoints steer the choice before the real target does.
    let toward = car
        .current_target(ctx.entities)
        .map_or(junction.centre(), |(_, pos, _)| pos);
    let scan_limit = if ctx.faults.trigger(Fault::ExitScanEarlyExit, true) {
        1
    } else {
        4
    };
    let arrived_from = car.direction().opposite();
    match choose_ugv_exit(junction, arrived_from, toward, &mut ugv.visits, scan_limit, ctx.rng) {
        Some(dir) => {
            log::debug!(
                "Vehicle {:?} leaving junction {:?} to the {:?}",
                car.id,
                junction.id(),
                dir
            );
            let replace = matches!(
                car.current_target(ctx.entities),
                Some((_, _, Some(waypoint))) if waypoint.kind == WaypointKind::Turn
            );
            car.create_waypoint(junction.exit_point(dir), WaypointKind::Turn, replace, ctx);
            car.turn_limit = Some(dir.heading());
        }
        None => {
            log::warn!(
                "Vehicle {:?} found no way out of junction {:?}",
                car.id,
                junction.id()
            );
            car.release_junction(ctx.arbiter);
            car.votes.force_stop();
        }
    }
}

/// Slows near the end of the road, and turns round before leaving it.
fn avoid_boundary(car: &mut Car, ugv: &mut UgvState, ctx: &mut StepContext) {
    let network = ctx.network;
    if ugv.uturning || ugv.overtake.is_active() || network.approach_at(car.pos).is_some() {
        return;
    }
    let ahead = |distance: f64| car.pos + heading_vector(car.heading) * distance;
    // Slowing starts early enough to reach the turning point at the slow speed.
    let warning = ahead(BOUNDARY_LOOKAHEAD + stopping_distance(car.speed, car.attributes.max_decel));
    if network.point_on_road(warning) && !network.near_wall(warning, WALL_MARGIN) {
        return;
    }
    if !ctx.faults.trigger(Fault::SkipBoundarySlow, true) {
        car.votes.slow();
    }
    let turn = ahead(BOUNDARY_LOOKAHEAD);
    if !network.point_on_road(turn) || !network.bounds().contains(turn) {
        let dir = car.direction();
        let across = car.pos - dir.left() * (0.5 * road_width(car, ctx));
        log::debug!("Vehicle {:?} turning round at {:?}", car.id, car.pos);
        car.create_waypoint(across, WaypointKind::Turn, false, ctx);
        car.turn_limit = Some(dir.opposite().heading());
        ugv.uturning = true;
    }
}

/// Steers towards the targeted turn or overtake waypoint, or else keeps to the lane.
fn steer(car: &mut Car, ugv: &UgvState, lanes: &mut LaneCache, ctx: &mut StepContext) {
    match car.current_target(ctx.entities) {
        Some((_, pos, Some(waypoint))) if waypoint.kind == WaypointKind::Overtake => {
            let dir = ugv.overtake.direction.unwrap_or_else(|| car.direction());
            let aim = overtake::aim_point(car, pos, dir);
            car.steer_towards(aim, None, ctx.faults);
        }
        Some((_, pos, Some(waypoint))) if waypoint.kind == WaypointKind::Turn => {
            car.steer_towards(pos, car.turn_limit, ctx.faults);
        }
        _ => track_lane(car, lanes, ctx),
    }
}

/// Steers to stay a fixed distance inside the near-side marking.
fn track_lane(car: &mut Car, lanes: &mut LaneCache, ctx: &mut StepContext) {
    if ctx.network.junction_at(car.pos).is_some() {
        return;
    }
    let Some(marking) = lanes.near_side(car, ctx) else {
        return;
    };
    let dir = car.direction();
    let width = road_width(car, ctx);
    let lateral = (marking.point - car.pos).dot(dir.left());
    let error = match marking.payload {
        MarkingKind::Edge => lateral - (0.25 * width - crate::network::MARKING_INSET),
        // Over the centre line, so the own lane is a further quarter-width left.
        MarkingKind::Centre => lateral + 0.25 * width,
    };
    let aim = car.pos + dir.unit() * LANE_LOOKAHEAD + dir.left() * error;
    car.steer_towards(aim, None, ctx.faults);
}

/// Stops for any vehicle within stopping distance ahead.
fn check_moving_obstacles(
    car: &mut Car,
    ugv: &UgvState,
    lanes: &mut LaneCache,
    ctx: &mut StepContext,
) {
    let near_junction = ctx.network.approach_at(car.pos).is_some();
    let mut stopping = stopping_distance(car.speed, car.attributes.max_decel);
    if ctx.faults.trigger(Fault::StoppingDistanceHalved, true) {
        stopping *= 0.5;
    }
    let mut cone = if near_junction { JUNCTION_CONE } else { MOVING_CONE };
    if ctx.faults.trigger(Fault::MovingSearchNarrowCone, true) {
        cone *= 0.5;
    }
    let mut range = stopping + MOVING_RANGE;
    if ctx.faults.trigger(Fault::MovingSearchShortRange, true) {
        range *= 0.5;
    }
    let lane = if near_junction || ugv.overtake.is_active() {
        None
    } else {
        lanes.own_lane(car, ctx)
    };
    let seen = ctx.sensors(car.id).detect_moving_obstacle(
        car.pos,
        car.heading,
        cone,
        range,
        MOVING_SEARCH_STEP,
        lane.as_ref(),
    );
    match seen {
        Some(hit) if hit.distance <= stopping => car.votes.force_stop(),
        _ => car.votes.speed_up(false),
    }
}

/// Consumes reached waypoints, and detects arrival at the real target.
fn follow_target(car: &mut Car, ugv: &mut UgvState, ctx: &mut StepContext) -> Option<StepOutcome> {
    let (id, pos, waypoint) = car.current_target(ctx.entities)?;
    let reached = |waypoint: &Waypoint| match waypoint.kind {
        WaypointKind::Overtake => {
            let dir = ugv.overtake.direction.unwrap_or_else(|| car.direction());
            overtake::waypoint_passed(car, pos, dir)
        }
        kind => car.waypoint_reached(pos, kind),
    };
    match waypoint {
        Some(waypoint) if reached(&waypoint) => match waypoint.kind {
            WaypointKind::Overtake => overtake::advance(car, ugv, ctx),
            WaypointKind::Turn => {
                car.eat_waypoint(ctx.entities);
                ugv.uturning = false;
            }
            WaypointKind::Path => {
                car.eat_waypoint(ctx.entities);
            }
        },
        None if id == ugv.destination && arrived(car, pos, ctx) => {
            log::info!("Vehicle {:?} found its target at step {}", car.id, ctx.step);
            ugv.target_found = true;
            car.active = false;
            car.speed = 0.0;
            car.release_junction(ctx.arbiter);
            return Some(StepOutcome::TargetFound);
        }
        _ => {}
    }
    None
}

/// The target counts as found when close by in the vehicle's own lane.
fn arrived(car: &Car, target: Point2d, ctx: &StepContext) -> bool {
    car.pos.distance(target) < TARGET_RADIUS
        && ctx.network.lane_side(target, car.heading) == Some(LaneSide::Own)
}
