//! Scripted traffic: keeps its lane, follows the car in front, and takes a
//! random way out of every junction.

use super::{Car, StepContext, StepOutcome};
use crate::arbiter::{choose_traffic_exit, Entry, ExitChoice, TRAFFIC_ENTRY_TIMEOUT};
use crate::entity::WaypointKind;
use crate::fault::Faults;
use crate::math::rot90;
use crate::network::{Direction, Network};
use crate::VehicleSet;
use cgmath::prelude::*;

/// How far ahead the car in front is looked for.
const FOLLOW_HORIZON: f64 = 6.0;

/// The car stops once the gap to the car in front is below this.
const FOLLOW_STOP_GAP: f64 = 1.5;

/// Clearance either side of the car's width that counts as in its path.
const LATERAL_CLEARANCE: f64 = 0.4;

/// How far ahead lane keeping aims.
const LANE_LOOKAHEAD: f64 = 3.0;

#[derive(Clone, Debug, Default)]
pub(crate) struct TrafficState {
    /// Set once the car has chosen to drive off the network.
    leaving: bool,
}

pub(super) fn step(car: &mut Car, state: &mut TrafficState, ctx: &mut StepContext) -> StepOutcome {
    let network = ctx.network;
    car.begin_step();
    if !network.point_on_road(car.pos) {
        if state.leaving {
            log::debug!("Vehicle {:?} left the network", car.id);
        } else {
            log::warn!("Vehicle {:?} drove off the road at {:?}", car.id, car.pos);
        }
        car.release_junction(ctx.arbiter);
        car.active = false;
        car.speed = 0.0;
        return StepOutcome::LeftNetwork;
    }
    car.release_junction_if_clear(network, ctx.arbiter);

    if let Some(junction) = network.junction_at(car.pos) {
        if car.held_junction != Some(junction.id()) {
            match car.request_junction(junction.id(), TRAFFIC_ENTRY_TIMEOUT, ctx) {
                Entry::Granted => {
                    let arrived_from = car.direction().opposite();
                    match choose_traffic_exit(junction, arrived_from, ctx.rng) {
                        Some(choice) => {
                            let dir = match choice {
                                ExitChoice::Arm(dir) => dir,
                                ExitChoice::LeaveNetwork(dir) => {
                                    state.leaving = true;
                                    dir
                                }
                            };
                            car.create_waypoint(junction.exit_point(dir), WaypointKind::Turn, false, ctx);
                            car.turn_limit = Some(dir.heading());
                        }
                        None => {
                            car.release_junction(ctx.arbiter);
                            car.votes.force_stop();
                        }
                    }
                }
                Entry::Denied { .. } => {
                    car.immediate_stop(ctx);
                    car.start_waiting();
                }
            }
        }
    }

    car.junction_speed(network);
    match gap_ahead(car, ctx.vehicles, network) {
        Some(gap) if gap < FOLLOW_STOP_GAP => car.votes.force_stop(),
        _ => car.votes.speed_up(false),
    }
    if car.waiting {
        car.votes.force_stop();
    }

    match car.current_target(ctx.entities) {
        Some((_, pos, Some(waypoint))) => {
            if car.waypoint_reached(pos, waypoint.kind) {
                car.eat_waypoint(ctx.entities);
            } else {
                car.steer_towards(pos, car.turn_limit, ctx.faults);
            }
        }
        _ => keep_lane(car, network, ctx.faults),
    }

    car.resolve_speed(ctx.faults);
    car.integrate();
    StepOutcome::Continue
}

/// The distance to the nearest corner of another vehicle in the car's path.
/// Crossing traffic only counts near junctions.
fn gap_ahead(car: &Car, vehicles: &VehicleSet, network: &Network) -> Option<f64> {
    let dir = car.direction();
    let fwd = car.forward();
    let left = rot90(fwd);
    let half_width = 0.5 * car.attributes.width + LATERAL_CLEARANCE;
    let near_junction = network.approach_at(car.pos).is_some();
    vehicles
        .values()
        .filter(|other| other.is_active() && other.id() != car.id)
        .filter(|other| {
            let theirs = Direction::from_heading(other.heading());
            near_junction || theirs == dir || theirs == dir.opposite()
        })
        .flat_map(|other| *other.footprint().corners())
        .filter_map(|corner| {
            let offset = corner - car.pos;
            let ahead = offset.dot(fwd);
            (ahead > 0.0 && ahead < FOLLOW_HORIZON && offset.dot(left).abs() < half_width)
                .then_some(ahead)
        })
        .min_by(f64::total_cmp)
}

/// Steers back towards the centre of the lane.
fn keep_lane(car: &mut Car, network: &Network, faults: &mut Faults) {
    if network.junction_at(car.pos).is_some() {
        return;
    }
    let dir = car.direction();
    let Some(road) = network.road_along(car.pos, dir) else {
        return;
    };
    let aim = road.lane_centre(car.pos, dir) + dir.unit() * LANE_LOOKAHEAD;
    car.steer_towards(aim, None, faults);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Point2d;
    use crate::vehicle::{Vehicle, VehicleAttributes};
    use crate::network::{RoadAttributes, RoadKind, ROAD_WIDTH};
    use crate::{Entity, EntityKind, EntitySet};

    fn road() -> Network {
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

    fn add(entities: &mut EntitySet, vehicles: &mut VehicleSet, pos: Point2d, heading: f64) -> Vehicle {
        let id = entities.insert(Entity::new(pos, EntityKind::Traffic));
        let vehicle = Vehicle::new_traffic(id, pos, heading, VehicleAttributes::TRAFFIC);
        vehicles.insert(id, vehicle.clone());
        vehicle
    }

    #[test]
    fn follows_car_in_lane() {
        let network = road();
        let mut entities = EntitySet::default();
        let mut vehicles = VehicleSet::default();
        let me = add(&mut entities, &mut vehicles, Point2d::new(10.0, 1.0), 0.0);
        add(&mut entities, &mut vehicles, Point2d::new(15.0, 1.0), 0.0);
        // The car in front's rear corners are 3 ahead.
        let gap = gap_ahead(&me.car, &vehicles, &network).unwrap();
        assert!((gap - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ignores_oncoming_lane() {
        let network = road();
        let mut entities = EntitySet::default();
        let mut vehicles = VehicleSet::default();
        let me = add(&mut entities, &mut vehicles, Point2d::new(10.0, 1.0), 0.0);
        add(&mut entities, &mut vehicles, Point2d::new(13.0, -1.0), 180.0);
        assert!(gap_ahead(&me.car, &vehicles, &network).is_none());
    }
}
