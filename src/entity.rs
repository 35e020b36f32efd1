use crate::math::{Point2d, Quad};
use crate::{EntityId, FailureKind};
use serde::{Deserialize, Serialize};

/// The length of a parked car.
pub const PARKED_CAR_LENGTH: f64 = 2.0;

/// The width of a parked car.
pub const PARKED_CAR_WIDTH: f64 = 1.0;

/// Anything placed in the world.
#[derive(Clone, Debug)]
pub struct Entity {
    /// The position. For vehicles, this is the front-centre anchor.
    pub(crate) pos: Point2d,
    /// What the entity is.
    pub(crate) kind: EntityKind,
}

/// The kinds of entity, with any kind-specific data.
#[derive(Clone, Debug)]
pub enum EntityKind {
    /// A scripted traffic car, whose state lives in the vehicle set.
    Traffic,
    /// An autonomous vehicle, whose state lives in the vehicle set.
    Ugv,
    /// The destination of a UGV.
    Target,
    /// An intermediate steering target.
    Waypoint(Waypoint),
    /// A static obstacle.
    ParkedCar(ParkedCar),
    /// Marks where a failure was recorded.
    FailureMarker(FailureKind),
}

/// A consumable point on the way to a vehicle's real target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Waypoint {
    /// Where the vehicle heads once this waypoint is reached.
    pub next: Option<EntityId>,
    /// Why the waypoint was created.
    pub kind: WaypointKind,
}

/// The sub-types of waypoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointKind {
    /// A point on a planned route.
    Path,
    /// A point just beyond a junction exit, or across the road for a U-turn.
    Turn,
    /// A point beside an obstacle being overtaken.
    Overtake,
}

/// A stationary car blocking part of a lane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParkedCar {
    pub heading: f64,
    pub length: f64,
    pub width: f64,
}

impl Entity {
    /// Creates a new entity.
    pub fn new(pos: Point2d, kind: EntityKind) -> Self {
        Self { pos, kind }
    }

    /// Gets the position of the entity.
    pub fn pos(&self) -> Point2d {
        self.pos
    }

    /// Gets the kind of the entity.
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Gets the waypoint data, if the entity is a waypoint.
    pub fn as_waypoint(&self) -> Option<&Waypoint> {
        match &self.kind {
            EntityKind::Waypoint(waypoint) => Some(waypoint),
            _ => None,
        }
    }

    /// Gets the footprint of a parked car.
    pub fn obstacle_footprint(&self) -> Option<Quad> {
        match &self.kind {
            EntityKind::ParkedCar(car) => Some(car.footprint(self.pos)),
            _ => None,
        }
    }
}

impl ParkedCar {
    /// Creates a parked car of the standard size.
    pub fn new(heading: f64) -> Self {
        Self {
            heading,
            length: PARKED_CAR_LENGTH,
            width: PARKED_CAR_WIDTH,
        }
    }

    /// The footprint of the car, whose front-centre is at `anchor`.
    pub fn footprint(&self, anchor: Point2d) -> Quad {
        Quad::footprint(anchor, self.heading, self.length, self.width)
    }
}
