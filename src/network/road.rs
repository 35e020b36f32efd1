use super::{Direction, Junction, NetworkError};
use crate::math::{Point2d, Rect, Segment, Vector2d};
use crate::util::Interval;
use crate::RoadId;
use cgmath::prelude::*;
use serde::{Deserialize, Serialize};

/// The default width of a two-lane road.
pub const ROAD_WIDTH: f64 = 4.0;

/// The distance between the edge of the road and its edge markings.
pub const MARKING_INSET: f64 = 0.2;

/// Half the painted width of a lane marking.
pub const MARKING_HALF_WIDTH: f64 = 0.075;

/// A straight, axis-aligned, two-lane road.
#[derive(Clone, Debug)]
pub struct Road {
    /// The road ID.
    id: RoadId,
    /// The type of road.
    kind: RoadKind,
    /// One end of the road's centre line.
    start: Point2d,
    /// The other end of the road's centre line.
    end: Point2d,
    /// The total width of both lanes.
    width: f64,
    /// The direction from `start` to `end`.
    axis: Direction,
    /// The paved area.
    surface: Rect,
}

/// The type of a road, as classified by the network generator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadKind {
    #[default]
    Minor,
    Major,
}

/// The attributes of a road.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RoadAttributes {
    /// The type of road.
    #[serde(default)]
    pub kind: RoadKind,
    /// One end of the centre line.
    pub start: Point2d,
    /// The other end of the centre line.
    pub end: Point2d,
    /// The total width of both lanes.
    #[serde(default = "default_width")]
    pub width: f64,
}

fn default_width() -> f64 {
    ROAD_WIDTH
}

/// The painted role of a lane marking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkingKind {
    /// The line dividing the two lanes.
    Centre,
    /// A line along the edge of the road.
    Edge,
}

/// A lane marking, classified relative to a vehicle's direction of travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    Centre,
    /// The edge line on the vehicle's own side of the road.
    NearSide,
    /// The edge line on the far side of the oncoming lane.
    FarSide,
}

/// A painted line along a road.
#[derive(Clone, Copy, Debug)]
pub struct LaneMarking {
    road: RoadId,
    kind: MarkingKind,
    segment: Segment,
    /// Unit vector perpendicular to the road.
    normal: Vector2d,
    /// Signed distance of the line from the road's centre line, along `normal`.
    offset: f64,
}

impl Road {
    /// Creates a new road, failing if it is not axis-aligned.
    pub(crate) fn new(id: RoadId, attributes: &RoadAttributes) -> Result<Self, NetworkError> {
        let RoadAttributes {
            kind,
            start,
            end,
            width,
        } = *attributes;
        if !(width > 0.0) {
            return Err(NetworkError::InvalidWidth(width));
        }
        let axis = match (start.x == end.x, start.y == end.y) {
            (true, true) => return Err(NetworkError::ZeroLength { at: start }),
            (false, true) if end.x > start.x => Direction::East,
            (false, true) => Direction::West,
            (true, false) if end.y > start.y => Direction::North,
            (true, false) => Direction::South,
            (false, false) => return Err(NetworkError::NotAxisAligned { start, end }),
        };
        let half = 0.5 * width;
        let normal = axis.left().map(f64::abs);
        let surface = Rect::from_corners(start - normal * half, end + normal * half);
        Ok(Self {
            id,
            kind,
            start,
            end,
            width,
            axis,
            surface,
        })
    }

    /// Gets the road ID.
    pub fn id(&self) -> RoadId {
        self.id
    }

    /// Gets the type of the road.
    pub fn kind(&self) -> RoadKind {
        self.kind
    }

    /// Gets the start of the centre line.
    pub fn start(&self) -> Point2d {
        self.start
    }

    /// Gets the end of the centre line.
    pub fn end(&self) -> Point2d {
        self.end
    }

    /// Gets the total width of the road.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Gets the length of the centre line.
    pub fn length(&self) -> f64 {
        (self.end - self.start).magnitude()
    }

    /// Gets the paved area of the road.
    pub fn surface(&self) -> &Rect {
        &self.surface
    }

    /// Returns true if traffic heading in `dir` travels along this road.
    pub fn runs_along(&self, dir: Direction) -> bool {
        dir == self.axis || dir == self.axis.opposite()
    }

    /// Projects a point onto the road's centre line.
    pub fn centre_point(&self, point: Point2d) -> Point2d {
        let dir = self.axis.unit();
        let len = self.length();
        let t = (point - self.start).dot(dir).clamp(0.0, len);
        self.start + dir * t
    }

    /// The lateral offset of a point from the centre line, positive towards
    /// the own-lane side for traffic heading in `dir`.
    pub fn lateral_offset(&self, point: Point2d, dir: Direction) -> f64 {
        (point - self.centre_point(point)).dot(dir.left())
    }

    /// The point on the centre of the lane used by traffic heading in `dir`,
    /// level with `point`.
    pub fn lane_centre(&self, point: Point2d, dir: Direction) -> Point2d {
        self.centre_point(point) + dir.left() * (0.25 * self.width)
    }

    /// The point on the near-side edge marking for traffic heading in `dir`,
    /// level with `point`.
    pub fn near_edge(&self, point: Point2d, dir: Direction) -> Point2d {
        self.centre_point(point) + dir.left() * (0.5 * self.width - MARKING_INSET)
    }

    /// Paints the lane markings, leaving gaps where the road passes
    /// through a junction interior.
    pub(crate) fn paint_markings<'a>(
        &self,
        junctions: impl Iterator<Item = &'a Junction>,
    ) -> Vec<LaneMarking> {
        let dir = self.axis.unit().map(f64::abs);
        let normal = self.axis.left().map(f64::abs);
        let along = |p: Point2d| p.to_vec().dot(dir);
        let base = self.start - dir * along(self.start);

        let mut pieces = vec![Interval::new(
            along(self.start).min(along(self.end)),
            along(self.start).max(along(self.end)),
        )];
        for junction in junctions {
            let interior = junction.interior();
            if !self.surface.to_quad().intersects_rect(&interior) {
                continue;
            }
            let gap = if dir.x > 0.5 { interior.x } else { interior.y };
            pieces = pieces
                .iter()
                .flat_map(|piece| piece.subtract(&gap))
                .collect();
        }

        let edge = 0.5 * self.width - MARKING_INSET;
        let lines = [
            (MarkingKind::Centre, 0.0),
            (MarkingKind::Edge, edge),
            (MarkingKind::Edge, -edge),
        ];
        pieces
            .iter()
            .filter(|piece| piece.length() > 0.0)
            .flat_map(|piece| {
                lines.iter().map(move |&(kind, offset)| LaneMarking {
                    road: self.id,
                    kind,
                    segment: Segment::new(
                        base + dir * piece.min + normal * offset,
                        base + dir * piece.max + normal * offset,
                    ),
                    normal,
                    offset,
                })
            })
            .collect()
    }
}

impl LaneMarking {
    /// The road the marking is painted on.
    pub fn road(&self) -> RoadId {
        self.road
    }

    /// The painted role of the marking.
    pub fn kind(&self) -> MarkingKind {
        self.kind
    }

    /// The centre line of the painted stripe.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Returns true if the point lies on the painted stripe.
    pub fn contains(&self, point: Point2d) -> bool {
        self.segment.distance_to(point) <= MARKING_HALF_WIDTH
    }

    /// The painted stripe as a thin rectangle.
    pub fn area(&self) -> Rect {
        Rect::from_corners(self.segment.a, self.segment.b).expand(MARKING_HALF_WIDTH)
    }

    /// The signed distance of a point from the stripe's centre line.
    pub fn signed_distance(&self, point: Point2d) -> f64 {
        (point - self.segment.a).dot(self.normal)
    }

    /// Classifies the marking relative to a vehicle heading.
    pub fn classify(&self, heading: f64) -> LineKind {
        match self.kind {
            MarkingKind::Centre => LineKind::Centre,
            MarkingKind::Edge => {
                let left = Direction::from_heading(heading).left();
                if self.offset * self.normal.dot(left) > 0.0 {
                    LineKind::NearSide
                } else {
                    LineKind::FarSide
                }
            }
        }
    }

    /// Finds where a trajectory crosses the centre line of the stripe.
    ///
    /// The raw intersection with the painted rectangle depends on the stripe
    /// width, so the crossing is projected onto the true centre line along
    /// the trajectory's direction of travel. Returns `None` unless the
    /// trajectory passes from one side of the line to the other.
    pub fn crossing(&self, trajectory: &Segment) -> Option<Point2d> {
        let before = self.signed_distance(trajectory.a);
        let after = self.signed_distance(trajectory.b);
        if before * after > 0.0 || before == after {
            return None;
        }
        let t = before / (before - after);
        let point = trajectory.a + trajectory.delta() * t;
        (self.segment.distance_to(point) <= MARKING_HALF_WIDTH).then_some(point)
    }
}
