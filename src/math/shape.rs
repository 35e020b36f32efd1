//! Polygons used for road surfaces, markings and vehicle footprints.

use super::{heading_vector, rot90, Point2d, Vector2d};
use crate::util::Interval;
use cgmath::prelude::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Tolerance used by the intersection tests.
const EPSILON: f64 = 1e-9;

/// A line segment between two points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub a: Point2d,
    pub b: Point2d,
}

impl Segment {
    /// Creates a new line segment.
    pub const fn new(a: Point2d, b: Point2d) -> Self {
        Self { a, b }
    }

    /// The vector from `a` to `b`.
    pub fn delta(&self) -> Vector2d {
        self.b - self.a
    }

    /// The length of the segment.
    pub fn length(&self) -> f64 {
        self.delta().magnitude()
    }

    /// Finds the point at which two segments cross, if they do.
    pub fn intersection(&self, other: &Segment) -> Option<Point2d> {
        let r = self.delta();
        let s = other.delta();
        let denom = r.perp_dot(s);
        if denom.abs() < EPSILON {
            return None;
        }
        let qp = other.a - self.a;
        let t = qp.perp_dot(s) / denom;
        let u = qp.perp_dot(r) / denom;
        let unit = Interval::new(-EPSILON, 1.0 + EPSILON);
        (unit.contains(t) && unit.contains(u)).then(|| self.a + r * t)
    }

    /// The shortest distance between the segment and a point.
    pub fn distance_to(&self, point: Point2d) -> f64 {
        let d = self.delta();
        let len2 = d.magnitude2();
        if len2 < EPSILON {
            return (point - self.a).magnitude();
        }
        let t = ((point - self.a).dot(d) / len2).clamp(0.0, 1.0);
        (point - (self.a + d * t)).magnitude()
    }
}

/// An axis-aligned rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: Interval<f64>,
    pub y: Interval<f64>,
}

impl Rect {
    /// Creates a rectangle from its extents along each axis.
    pub const fn new(x: Interval<f64>, y: Interval<f64>) -> Self {
        Self { x, y }
    }

    /// Creates the smallest rectangle containing both points.
    pub fn from_corners(a: Point2d, b: Point2d) -> Self {
        Self {
            x: Interval::new(a.x.min(b.x), a.x.max(b.x)),
            y: Interval::new(a.y.min(b.y), a.y.max(b.y)),
        }
    }

    /// Creates a rectangle with the given centre and half extents.
    pub fn centred(centre: Point2d, half_width: f64, half_height: f64) -> Self {
        Self {
            x: Interval::disc(centre.x, half_width),
            y: Interval::disc(centre.y, half_height),
        }
    }

    /// Returns true if the point lies within or on the edge of the rectangle.
    pub fn contains(&self, point: Point2d) -> bool {
        self.x.contains(point.x) && self.y.contains(point.y)
    }

    /// Grows (or shrinks, for negative values) the rectangle on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self {
            x: Interval::new(self.x.min - margin, self.x.max + margin),
            y: Interval::new(self.y.min - margin, self.y.max + margin),
        }
    }

    /// The corners of the rectangle in anticlockwise order.
    pub fn corners(&self) -> [Point2d; 4] {
        [
            Point2d::new(self.x.min, self.y.min),
            Point2d::new(self.x.max, self.y.min),
            Point2d::new(self.x.max, self.y.max),
            Point2d::new(self.x.min, self.y.max),
        ]
    }

    /// The centre of the rectangle.
    pub fn centre(&self) -> Point2d {
        Point2d::new(self.x.midpoint(), self.y.midpoint())
    }

    /// Converts the rectangle into a general quadrilateral.
    pub fn to_quad(&self) -> Quad {
        Quad {
            corners: self.corners(),
        }
    }
}

/// A convex quadrilateral, usually a rotated rectangle such as a vehicle footprint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    /// The corners, in anticlockwise order.
    corners: [Point2d; 4],
}

impl Quad {
    /// Creates the footprint of a rectangular body whose front-centre point is `anchor`.
    ///
    /// # Parameters
    /// * `anchor` - The front-centre point of the body
    /// * `heading` - The heading of the body in degrees
    /// * `length` - The length of the body, extending backwards from the anchor
    /// * `width` - The width of the body
    pub fn footprint(anchor: Point2d, heading: f64, length: f64, width: f64) -> Self {
        let fwd = heading_vector(heading);
        let left = rot90(fwd) * (0.5 * width);
        let rear = anchor - fwd * length;
        Self {
            corners: [anchor - left, anchor + left, rear + left, rear - left],
        }
    }

    /// The corners of the quadrilateral.
    pub fn corners(&self) -> &[Point2d; 4] {
        &self.corners
    }

    /// The mean of the corners.
    pub fn centroid(&self) -> Point2d {
        let sum = self
            .corners
            .iter()
            .fold(Vector2d::new(0.0, 0.0), |acc, p| acc + p.to_vec());
        Point2d::from_vec(sum / 4.0)
    }

    /// Iterates over the edges of the quadrilateral.
    pub fn edges(&self) -> impl Iterator<Item = Segment> + '_ {
        self.corners
            .iter()
            .copied()
            .circular_tuple_windows()
            .map(|(a, b)| Segment::new(a, b))
    }

    /// Returns true if the point lies within or on the edge of the quadrilateral.
    pub fn contains(&self, point: Point2d) -> bool {
        let mut sign = 0.0;
        for edge in self.edges() {
            let cross = edge.delta().perp_dot(point - edge.a);
            if cross.abs() < EPSILON {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Returns true if the two shapes overlap, using the separating axis theorem.
    /// Shapes which merely touch are not considered to overlap.
    pub fn intersects(&self, other: &Quad) -> bool {
        self.axes()
            .chain(other.axes())
            .all(|axis| self.project(axis).overlaps(&other.project(axis)))
    }

    /// Returns true if the quadrilateral overlaps the rectangle.
    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        self.intersects(&rect.to_quad())
    }

    /// Returns true if any part of the segment lies within the quadrilateral.
    pub fn intersects_segment(&self, segment: &Segment) -> bool {
        self.contains(segment.a)
            || self.contains(segment.b)
            || self.edges().any(|edge| edge.intersection(segment).is_some())
    }

    /// The edge normals, which are the candidate separating axes.
    fn axes(&self) -> impl Iterator<Item = Vector2d> + '_ {
        self.edges().map(|edge| rot90(edge.delta()))
    }

    /// Projects the corners onto an axis.
    fn project(&self, axis: Vector2d) -> Interval<f64> {
        let (min, max) = self
            .corners
            .iter()
            .map(|p| p.to_vec().dot(axis))
            .minmax()
            .into_option()
            .unwrap_or((0.0, 0.0));
        Interval::new(min, max)
    }
}
