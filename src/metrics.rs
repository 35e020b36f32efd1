//! Read-only measurements of a network and the placements on it.

use crate::entity::EntityKind;
use crate::network::{Direction, Junction, Network};
use crate::{JunctionId, Simulation};
use cgmath::prelude::*;
use pathfinding::prelude::dijkstra;

/// Junction centres this close across the axis count as aligned.
const ALIGN_EPSILON: f64 = 1e-6;

/// The spacing of samples checking that a road joins two junctions.
const LINK_SAMPLE_STEP: f64 = 1.0;

/// Route costs are summed in tenths of a unit.
const COST_SCALE: f64 = 10.0;

/// The distance from each junction to its nearest neighbour.
pub fn junction_separations(network: &Network) -> Vec<f64> {
    let junctions: Vec<&Junction> = network.junctions().collect();
    junctions
        .iter()
        .filter_map(|a| {
            junctions
                .iter()
                .filter(|b| b.id() != a.id())
                .map(|b| a.centre().distance(b.centre()))
                .min_by(f64::total_cmp)
        })
        .collect()
}

/// Counts values into bins of width `bin_width`. The last bin also
/// holds everything beyond it.
pub fn histogram(values: &[f64], bin_width: f64, bins: usize) -> Vec<u32> {
    let mut counts = vec![0; bins];
    if bins == 0 || !(bin_width > 0.0) {
        return counts;
    }
    for value in values {
        let bin = ((value / bin_width).floor().max(0.0) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    counts
}

/// The distance from each target to each parked car, target by target.
pub fn target_obstacle_distances(sim: &Simulation) -> Vec<f64> {
    let targets = sim
        .iter_entities()
        .filter(|(_, e)| matches!(e.kind(), EntityKind::Target));
    targets
        .flat_map(move |(_, target)| {
            sim.iter_entities()
                .filter(|(_, e)| matches!(e.kind(), EntityKind::ParkedCar(_)))
                .map(move |(_, obstacle)| target.pos().distance(obstacle.pos()))
        })
        .collect()
}

/// The junctions a road leads to directly from `junction`, with their distances.
pub fn junction_neighbours(network: &Network, junction: &Junction) -> Vec<(JunctionId, f64)> {
    junction
        .arms()
        .into_iter()
        .filter_map(|dir| {
            network
                .junctions()
                .filter(|other| other.id() != junction.id())
                .filter(|other| other.arms().contains(&dir.opposite()))
                .filter_map(|other| {
                    let offset = other.centre() - junction.centre();
                    let along = offset.dot(dir.unit());
                    let across = offset.dot(dir.left()).abs();
                    (along > 0.0 && across < ALIGN_EPSILON).then_some((other, along))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .filter(|(other, distance)| road_joins(network, junction, other, dir, *distance))
                .map(|(other, distance)| (other.id(), distance))
        })
        .collect()
}

/// Returns true if road surface runs unbroken from one junction to the next.
fn road_joins(network: &Network, from: &Junction, to: &Junction, dir: Direction, distance: f64) -> bool {
    let samples = (distance / LINK_SAMPLE_STEP).ceil() as usize;
    (0..=samples).all(|i| {
        let t = (i as f64 * LINK_SAMPLE_STEP).min(distance);
        let point = from.centre() + dir.unit() * t;
        network.point_on_road(point) || to.contains(point)
    })
}

/// The length of the shortest route by road between two junctions,
/// measured between centres.
pub fn route_length(network: &Network, from: JunctionId, to: JunctionId) -> Option<f64> {
    network.junction(from)?;
    network.junction(to)?;
    let (_, cost) = dijkstra(
        &from,
        |id| {
            network
                .junction(*id)
                .map(|junction| junction_neighbours(network, junction))
                .unwrap_or_default()
                .into_iter()
                .map(|(next, distance)| (next, (distance * COST_SCALE).round() as u64))
        },
        |id| *id == to,
    )?;
    Some(cost as f64 / COST_SCALE)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Point2d;
    use crate::network::{JunctionAttributes, RoadAttributes, RoadKind, ROAD_WIDTH};

    /// Three junctions in an L, joined by roads, plus one stranded junction.
    fn network() -> Network {
        let mut builder = Network::builder();
        let road = |start: Point2d, end: Point2d| RoadAttributes {
            kind: RoadKind::Minor,
            start,
            end,
            width: ROAD_WIDTH,
        };
        builder.add_road(&road(Point2d::new(2.0, 0.0), Point2d::new(18.0, 0.0))).unwrap();
        builder.add_road(&road(Point2d::new(20.0, 2.0), Point2d::new(20.0, 28.0))).unwrap();
        let junction = |x: f64, y: f64, arms: [f64; 4]| JunctionAttributes {
            centre: Point2d::new(x, y),
            arms,
            width: ROAD_WIDTH,
        };
        // Arms in north, east, south, west order.
        builder.add_junction(&junction(0.0, 0.0, [0.0, 18.0, 0.0, 0.0])).unwrap();
        builder.add_junction(&junction(20.0, 0.0, [28.0, 0.0, 0.0, 18.0])).unwrap();
        builder.add_junction(&junction(20.0, 30.0, [0.0, 0.0, 28.0, 0.0])).unwrap();
        builder.add_junction(&junction(60.0, 0.0, [0.0, 0.0, 0.0, 5.0])).unwrap();
        builder.build()
    }

    fn find(network: &Network, x: f64, y: f64) -> JunctionId {
        network.junction_at(Point2d::new(x, y)).unwrap().id()
    }

    #[test]
    fn separations_and_histogram() {
        let network = network();
        let mut separations = junction_separations(&network);
        separations.sort_by(f64::total_cmp);
        assert_eq!(separations, vec![20.0, 20.0, 30.0, 40.0]);
        assert_eq!(histogram(&separations, 10.0, 4), vec![0, 0, 2, 2]);
    }

    #[test]
    fn shortest_route() {
        let network = network();
        let a = find(&network, 0.0, 0.0);
        let c = find(&network, 20.0, 30.0);
        let stranded = find(&network, 60.0, 0.0);
        assert_eq!(route_length(&network, a, c), Some(50.0));
        assert_eq!(route_length(&network, a, a), Some(0.0));
        assert_eq!(route_length(&network, a, stranded), None);
    }
}
