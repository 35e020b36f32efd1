//! The static road network: axis-aligned roads meeting at junctions.

pub use junction::{Direction, Junction, JunctionAttributes, APPROACH_LENGTH, EXIT_OFFSET};
pub use road::{
    LaneMarking, LineKind, MarkingKind, Road, RoadAttributes, RoadKind, MARKING_INSET, ROAD_WIDTH,
};

use crate::math::{Point2d, Quad, Rect};
use crate::{JunctionId, JunctionSet, RoadId, RoadSet};
use thiserror::Error;

mod junction;
mod road;

/// Margin added around the roads when no explicit map bounds are given.
const DEFAULT_BOUNDS_MARGIN: f64 = 5.0;

/// A malformed road or junction.
#[derive(Debug, Error, PartialEq)]
pub enum NetworkError {
    #[error("road from {start:?} to {end:?} is not axis-aligned")]
    NotAxisAligned { start: Point2d, end: Point2d },
    #[error("road at {at:?} has zero length")]
    ZeroLength { at: Point2d },
    #[error("road width must be positive, got {0}")]
    InvalidWidth(f64),
    #[error("junction at {centre:?} has invalid arms {arms:?}")]
    InvalidArms { centre: Point2d, arms: [f64; 4] },
}

/// Which half of a road a point lies in, relative to a direction of travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneSide {
    Own,
    Oncoming,
}

/// The static road network. Immutable once built.
#[derive(Clone, Debug)]
pub struct Network {
    roads: RoadSet,
    junctions: JunctionSet,
    markings: Vec<LaneMarking>,
    bounds: Rect,
}

/// Validates and assembles a [Network].
#[derive(Default)]
pub struct NetworkBuilder {
    roads: RoadSet,
    junctions: JunctionSet,
    bounds: Option<Rect>,
}

impl NetworkBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a road, failing if it is malformed.
    pub fn add_road(&mut self, attributes: &RoadAttributes) -> Result<RoadId, NetworkError> {
        self.roads
            .try_insert_with_key(|id| Road::new(id, attributes))
    }

    /// Adds a junction, failing if it is malformed.
    pub fn add_junction(
        &mut self,
        attributes: &JunctionAttributes,
    ) -> Result<JunctionId, NetworkError> {
        self.junctions
            .try_insert_with_key(|id| Junction::new(id, attributes))
    }

    /// Sets the map walls.
    pub fn bounds(&mut self, bounds: Rect) -> &mut Self {
        self.bounds = Some(bounds);
        self
    }

    /// Paints the lane markings and finalises the network.
    pub fn build(self) -> Network {
        let markings: Vec<LaneMarking> = self
            .roads
            .values()
            .flat_map(|road| road.paint_markings(self.junctions.values()))
            .collect();
        let bounds = self.bounds.unwrap_or_else(|| {
            self.roads
                .values()
                .map(|road| *road.surface())
                .chain(self.junctions.values().map(|j| j.interior()))
                .reduce(|a, b| Rect::from_corners(
                    Point2d::new(a.x.min.min(b.x.min), a.y.min.min(b.y.min)),
                    Point2d::new(a.x.max.max(b.x.max), a.y.max.max(b.y.max)),
                ))
                .unwrap_or(Rect::centred(Point2d::new(0.0, 0.0), 0.0, 0.0))
                .expand(DEFAULT_BOUNDS_MARGIN)
        });
        log::debug!(
            "Built network with {} roads, {} junctions, {} markings",
            self.roads.len(),
            self.junctions.len(),
            markings.len()
        );
        Network {
            roads: self.roads,
            junctions: self.junctions,
            markings,
            bounds,
        }
    }
}

impl Network {
    /// Creates a builder for a new network.
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    /// Gets a reference to the road with the given ID.
    pub fn road(&self, id: RoadId) -> Option<&Road> {
        self.roads.get(id)
    }

    /// Iterates over the roads.
    pub fn roads(&self) -> impl Iterator<Item = &Road> {
        self.roads.values()
    }

    /// Gets a reference to the junction with the given ID.
    pub fn junction(&self, id: JunctionId) -> Option<&Junction> {
        self.junctions.get(id)
    }

    /// Iterates over the junctions.
    pub fn junctions(&self) -> impl Iterator<Item = &Junction> {
        self.junctions.values()
    }

    /// Gets all the lane markings.
    pub fn markings(&self) -> &[LaneMarking] {
        &self.markings
    }

    /// Gets the map walls.
    pub fn bounds(&self) -> &Rect {
        &self.bounds
    }

    /// Returns true if the point lies on a road or in a junction interior.
    pub fn point_on_road(&self, point: Point2d) -> bool {
        self.roads.values().any(|road| road.surface().contains(point))
            || self.junctions.values().any(|j| j.contains(point))
    }

    /// Returns true if every corner of the shape lies on the road surface.
    pub fn shape_on_road(&self, shape: &Quad) -> bool {
        shape.corners().iter().all(|p| self.point_on_road(*p))
    }

    /// Finds a lane marking of the given kind (or any kind) overlapped by the shape.
    pub fn shape_intersects_line(
        &self,
        shape: &Quad,
        kind: Option<MarkingKind>,
    ) -> Option<&LaneMarking> {
        self.markings
            .iter()
            .filter(|marking| kind.map_or(true, |kind| marking.kind() == kind))
            .find(|marking| shape.intersects_rect(&marking.area()))
    }

    /// Finds the junction whose interior contains the point.
    pub fn junction_at(&self, point: Point2d) -> Option<&Junction> {
        self.junctions.values().find(|j| j.contains(point))
    }

    /// Finds the junction whose approach area contains the point.
    pub fn approach_at(&self, point: Point2d) -> Option<&Junction> {
        self.junctions.values().find(|j| j.in_approach(point))
    }

    /// Finds a road whose surface contains the point.
    pub fn road_at(&self, point: Point2d) -> Option<&Road> {
        self.roads.values().find(|road| road.surface().contains(point))
    }

    /// Finds a road containing the point which runs in the given direction.
    pub fn road_along(&self, point: Point2d, dir: Direction) -> Option<&Road> {
        self.roads
            .values()
            .find(|road| road.runs_along(dir) && road.surface().contains(point))
    }

    /// Classifies which lane a point is in for traffic with the given heading.
    /// Returns `None` inside junctions, off the road, or across the road's axis.
    pub fn lane_side(&self, point: Point2d, heading: f64) -> Option<LaneSide> {
        if self.junction_at(point).is_some() {
            return None;
        }
        let dir = Direction::from_heading(heading);
        let road = self.road_along(point, dir)?;
        if road.lateral_offset(point, dir) > 0.0 {
            Some(LaneSide::Own)
        } else {
            Some(LaneSide::Oncoming)
        }
    }

    /// Returns true if the point lies within `margin` of the map walls.
    pub fn near_wall(&self, point: Point2d, margin: f64) -> bool {
        !self.bounds.expand(-margin).contains(point)
    }

    /// Iterates over the dead ends, with the direction of their only arm.
    pub fn dead_ends(&self) -> impl Iterator<Item = (&Junction, Direction)> {
        self.junctions.values().filter_map(|junction| {
            let arms = junction.arms();
            (arms.len() == 1).then(|| (junction, arms[0]))
        })
    }
}
