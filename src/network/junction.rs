use super::NetworkError;
use crate::math::{normalize_heading, rot90, Point2d, Quad, Rect, Vector2d};
use crate::JunctionId;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

/// How far the approach area extends along each arm beyond the interior.
pub const APPROACH_LENGTH: f64 = 8.0;

/// How far outside the interior an exit waypoint is placed.
pub const EXIT_OFFSET: f64 = 1.25;

/// A compass direction. North is the positive y-axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All directions, in arm order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// The index of the direction in arm order.
    pub fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
        }
    }

    /// The heading in degrees.
    pub fn heading(self) -> f64 {
        match self {
            Direction::East => 0.0,
            Direction::North => 90.0,
            Direction::West => 180.0,
            Direction::South => 270.0,
        }
    }

    /// Buckets a heading into the nearest compass direction (±45°).
    pub fn from_heading(heading: f64) -> Self {
        match (normalize_heading(heading + 45.0) / 90.0) as usize {
            0 => Direction::East,
            1 => Direction::North,
            2 => Direction::West,
            _ => Direction::South,
        }
    }

    /// The unit vector pointing in this direction.
    pub fn unit(self) -> Vector2d {
        match self {
            Direction::North => Vector2d::new(0.0, 1.0),
            Direction::East => Vector2d::new(1.0, 0.0),
            Direction::South => Vector2d::new(0.0, -1.0),
            Direction::West => Vector2d::new(-1.0, 0.0),
        }
    }

    /// The unit vector pointing to the left of this direction.
    /// Traffic keeps left, so this points from the centre line into the own lane.
    pub fn left(self) -> Vector2d {
        rot90(self.unit())
    }

    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }
}

/// The attributes of a junction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct JunctionAttributes {
    /// The centre of the junction.
    pub centre: Point2d,
    /// The length of each arm in [Direction] order; zero means the side is closed.
    pub arms: [f64; 4],
    /// The width of the roads meeting at the junction.
    #[serde(default = "default_width")]
    pub width: f64,
}

fn default_width() -> f64 {
    super::ROAD_WIDTH
}

/// A junction where up to four roads meet at right angles.
#[derive(Clone, Debug)]
pub struct Junction {
    id: JunctionId,
    centre: Point2d,
    arms: [f64; 4],
    width: f64,
}

impl Junction {
    /// Creates a new junction.
    pub(crate) fn new(id: JunctionId, attributes: &JunctionAttributes) -> Result<Self, NetworkError> {
        let JunctionAttributes {
            centre,
            arms,
            width,
        } = *attributes;
        if !(width > 0.0) {
            return Err(NetworkError::InvalidWidth(width));
        }
        if arms.iter().any(|len| !(*len >= 0.0)) || arms.iter().all(|len| *len == 0.0) {
            return Err(NetworkError::InvalidArms { centre, arms });
        }
        Ok(Self {
            id,
            centre,
            arms,
            width,
        })
    }

    /// Gets the junction ID.
    pub fn id(&self) -> JunctionId {
        self.id
    }

    /// Gets the centre of the junction.
    pub fn centre(&self) -> Point2d {
        self.centre
    }

    /// Gets the width of the interior.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Gets the length of the arm in the given direction.
    pub fn arm_length(&self, dir: Direction) -> f64 {
        self.arms[dir.index()]
    }

    /// The directions of the open arms.
    pub fn arms(&self) -> ArrayVec<Direction, 4> {
        Direction::ALL
            .into_iter()
            .filter(|dir| self.arm_length(*dir) > 0.0)
            .collect()
    }

    /// Returns true if exactly one arm is open.
    pub fn is_dead_end(&self) -> bool {
        self.arms().len() == 1
    }

    /// The square where the roads cross.
    pub fn interior(&self) -> Rect {
        let half = 0.5 * self.width;
        Rect::centred(self.centre, half, half)
    }

    /// Returns true if the point lies in the interior.
    pub fn contains(&self, point: Point2d) -> bool {
        self.interior().contains(point)
    }

    /// Returns true if the shape overlaps the interior.
    pub fn intersects(&self, shape: &Quad) -> bool {
        shape.intersects_rect(&self.interior())
    }

    /// The interior together with the first stretch of each open arm.
    pub fn approach(&self) -> ArrayVec<Rect, 5> {
        let half = 0.5 * self.width;
        let mut rects = ArrayVec::new();
        rects.push(self.interior());
        for dir in self.arms() {
            let ext = self.arm_extent(dir);
            let near = self.centre + dir.unit() * half;
            let far = self.centre + dir.unit() * (half + ext);
            rects.push(Rect::from_corners(
                near + dir.left() * half,
                far - dir.left() * half,
            ));
        }
        rects
    }

    /// Returns true if the point lies in the approach area.
    pub fn in_approach(&self, point: Point2d) -> bool {
        self.approach().iter().any(|rect| rect.contains(point))
    }

    /// The egress lane of each open arm, out to the approach length.
    pub fn exits(&self) -> ArrayVec<Rect, 4> {
        let half = 0.5 * self.width;
        self.arms()
            .into_iter()
            .map(|dir| {
                let near = self.centre + dir.unit() * half;
                let far = self.centre + dir.unit() * (half + self.arm_extent(dir));
                Rect::from_corners(near, far + dir.left() * half)
            })
            .collect()
    }

    /// Returns true if the point lies in the egress lane of any arm.
    pub fn in_exit(&self, point: Point2d) -> bool {
        self.exits().iter().any(|rect| rect.contains(point))
    }

    /// The lane-centre point just outside the interior on the way out
    /// in direction `dir`.
    pub fn exit_point(&self, dir: Direction) -> Point2d {
        self.centre
            + dir.unit() * (0.5 * self.width + EXIT_OFFSET)
            + dir.left() * (0.25 * self.width)
    }

    /// A lane-centre point on the arm `dir`, heading away from the
    /// junction, with the anchor `setback` units clear of the interior.
    pub fn entry_point(&self, dir: Direction, setback: f64) -> Point2d {
        self.centre
            + dir.unit() * (0.5 * self.width + setback)
            + dir.left() * (0.25 * self.width)
    }

    /// How far the approach area extends along an arm.
    fn arm_extent(&self, dir: Direction) -> f64 {
        (self.arm_length(dir) - 0.5 * self.width).clamp(0.0, APPROACH_LENGTH)
    }
}
