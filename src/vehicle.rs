use self::speed::SpeedVotes;
use self::steering::{turn_towards, turn_towards_limited};
use self::traffic::TrafficState;
use self::ugv::UgvState;
use crate::accident::{AccidentDetector, FailureKind};
use crate::arbiter::{Entry, JunctionArbiter};
use crate::entity::{Entity, EntityKind, Waypoint, WaypointKind};
use crate::fault::{Fault, Faults};
use crate::math::{
    bearing, heading_difference, heading_vector, normalize_heading, rot90, Point2d, Quad, Vector2d,
};
use crate::network::{Direction, Network};
use crate::sensor::Sensors;
use crate::{EntityId, EntitySet, JunctionId, VehicleSet};
use cgmath::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub use self::overtake::OvertakeStage;

mod overtake;
mod speed;
mod steering;
mod traffic;
mod ugv;

/// A waypoint closer than this is reached.
const WAYPOINT_RADIUS: f64 = 0.5;

/// A waypoint behind the vehicle and within this lateral distance has been overshot.
const OVERSHOOT_LATERAL: f64 = 1.0;

/// A turn is complete once the heading is within this many degrees of the exit heading.
const TURN_SETTLED: f64 = 10.0;

/// Inside a junction, turns with more than this many degrees left to go
/// are taken at a crawl.
const TIGHT_TURN: f64 = 45.0;

/// The attributes of a simulated vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleAttributes {
    /// The length of the vehicle, behind its anchor.
    pub length: f64,
    /// The width of the vehicle.
    pub width: f64,
    /// The maximum speed in units per step.
    pub max_speed: f64,
    /// The maximum increase in speed per step.
    pub max_accel: f64,
    /// The maximum decrease in speed per step.
    pub max_decel: f64,
    /// The maximum heading change per step, in degrees.
    pub max_turn: f64,
}

impl VehicleAttributes {
    /// The autonomous vehicle.
    pub const UGV: Self = Self {
        length: 2.0,
        width: 1.0,
        max_speed: 1.0,
        max_accel: 0.05,
        max_decel: 0.1,
        max_turn: 15.0,
    };

    /// A scripted traffic car.
    pub const TRAFFIC: Self = Self {
        length: 2.0,
        width: 1.0,
        max_speed: 0.6,
        max_accel: 0.05,
        max_decel: 0.1,
        max_turn: 15.0,
    };
}

/// A simulated vehicle: shared driving state plus kind-specific behaviour.
#[derive(Clone, Debug)]
pub struct Vehicle {
    pub(crate) car: Car,
    pub(crate) kind: VehicleKind,
}

/// The behaviour driving a vehicle.
#[derive(Clone, Debug)]
pub(crate) enum VehicleKind {
    Traffic(TrafficState),
    Ugv(Box<UgvState>),
}

/// The driving state shared by every kind of vehicle.
#[derive(Clone, Debug)]
pub(crate) struct Car {
    /// The vehicle's ID
    pub id: EntityId,
    pub attributes: VehicleAttributes,
    /// The front-centre anchor.
    pub pos: Point2d,
    /// The anchor at the start of the last step.
    pub prev_pos: Point2d,
    /// The heading in degrees, in `[0, 360)`.
    pub heading: f64,
    pub speed: f64,
    /// False once the vehicle has finished.
    pub active: bool,
    /// True while blocked at an occupied junction.
    pub waiting: bool,
    pub held_junction: Option<JunctionId>,
    pub votes: SpeedVotes,
    /// The entity being steered towards.
    pub target: Option<EntityId>,
    /// Steering towards a turn waypoint never passes this heading.
    pub turn_limit: Option<f64>,
    /// Whether fault sites apply to this vehicle.
    pub is_ugv: bool,
    /// How many waypoints this vehicle has created.
    pub waypoints_created: u64,
    /// The heading change applied during the last step.
    pub last_turn: f64,
}

/// Everything a vehicle may read or change while it steps.
pub(crate) struct StepContext<'a> {
    pub network: &'a Network,
    pub entities: &'a mut EntitySet,
    /// Every other vehicle. The stepping vehicle is not present.
    pub vehicles: &'a VehicleSet,
    pub arbiter: &'a mut JunctionArbiter,
    pub faults: &'a mut Faults,
    pub detector: &'a mut AccidentDetector,
    pub rng: &'a mut StdRng,
    pub step: u64,
}

impl StepContext<'_> {
    /// The sensors of vehicle `own`.
    pub fn sensors(&self, own: EntityId) -> Sensors<'_> {
        Sensors::new(self.network, self.entities, self.vehicles, Some(own))
    }
}

/// What the scheduler must do after a vehicle steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    Continue,
    /// The vehicle drove off the network and must be replaced.
    LeftNetwork,
    /// The vehicle reached its target.
    TargetFound,
}

impl Vehicle {
    /// Creates a scripted traffic car.
    pub(crate) fn new_traffic(
        id: EntityId,
        pos: Point2d,
        heading: f64,
        attributes: VehicleAttributes,
    ) -> Self {
        Self {
            car: Car::new(id, pos, heading, attributes, false),
            kind: VehicleKind::Traffic(TrafficState::default()),
        }
    }

    /// Creates an autonomous vehicle heading for `destination`.
    pub(crate) fn new_ugv(
        id: EntityId,
        pos: Point2d,
        heading: f64,
        attributes: VehicleAttributes,
        destination: EntityId,
    ) -> Self {
        let mut car = Car::new(id, pos, heading, attributes, true);
        car.target = Some(destination);
        Self {
            car,
            kind: VehicleKind::Ugv(Box::new(UgvState::new(destination))),
        }
    }

    /// Advances the vehicle by one step.
    pub(crate) fn step(&mut self, ctx: &mut StepContext) -> StepOutcome {
        let Vehicle { car, kind } = self;
        match kind {
            VehicleKind::Traffic(state) => traffic::step(car, state, ctx),
            VehicleKind::Ugv(state) => ugv::step(car, state, ctx),
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> EntityId {
        self.car.id
    }

    /// Returns true if this is the autonomous vehicle.
    pub fn is_ugv(&self) -> bool {
        self.car.is_ugv
    }

    /// Gets the vehicle's attributes.
    pub fn attributes(&self) -> &VehicleAttributes {
        &self.car.attributes
    }

    /// Gets the front-centre anchor.
    pub fn position(&self) -> Point2d {
        self.car.pos
    }

    /// Gets the anchor at the start of the last step.
    pub fn prev_position(&self) -> Point2d {
        self.car.prev_pos
    }

    /// Gets the heading in degrees.
    pub fn heading(&self) -> f64 {
        self.car.heading
    }

    /// Gets the heading change applied during the last step, in degrees.
    pub fn last_turn(&self) -> f64 {
        self.car.last_turn
    }

    /// Gets the speed in units per step.
    pub fn speed(&self) -> f64 {
        self.car.speed
    }

    /// Returns false once the vehicle has finished.
    pub fn is_active(&self) -> bool {
        self.car.active
    }

    /// Returns true while the vehicle is blocked at an occupied junction.
    pub fn is_waiting(&self) -> bool {
        self.car.waiting
    }

    /// Gets the junction the vehicle holds.
    pub fn held_junction(&self) -> Option<JunctionId> {
        self.car.held_junction
    }

    /// Gets the entity the vehicle is steering towards.
    pub fn target(&self) -> Option<EntityId> {
        self.car.target
    }

    /// Gets how many waypoints the vehicle has created.
    pub fn waypoints_created(&self) -> u64 {
        self.car.waypoints_created
    }

    /// The vehicle's footprint.
    pub fn footprint(&self) -> Quad {
        self.car.footprint()
    }

    /// The geometric centre of the vehicle.
    pub fn centroid(&self) -> Point2d {
        self.car.centroid()
    }

    /// Gets the overtake stage of an autonomous vehicle.
    pub fn overtake_stage(&self) -> Option<OvertakeStage> {
        match &self.kind {
            VehicleKind::Ugv(ugv) => Some(ugv.overtake.stage),
            VehicleKind::Traffic(_) => None,
        }
    }

    /// Returns true while the vehicle is out of its lane passing an obstacle.
    pub fn is_overtaking(&self) -> bool {
        match &self.kind {
            VehicleKind::Ugv(ugv) => ugv.overtake.is_active(),
            VehicleKind::Traffic(_) => false,
        }
    }

    /// Returns true while the vehicle is turning round.
    pub fn is_uturning(&self) -> bool {
        match &self.kind {
            VehicleKind::Ugv(ugv) => ugv.uturning,
            VehicleKind::Traffic(_) => false,
        }
    }

    /// Returns true if an autonomous vehicle has reached its target.
    pub fn target_found(&self) -> bool {
        match &self.kind {
            VehicleKind::Ugv(ugv) => ugv.target_found,
            VehicleKind::Traffic(_) => false,
        }
    }

    /// Gets the real target of an autonomous vehicle.
    pub fn destination(&self) -> Option<EntityId> {
        match &self.kind {
            VehicleKind::Ugv(ugv) => Some(ugv.destination),
            VehicleKind::Traffic(_) => None,
        }
    }
}

impl Car {
    fn new(
        id: EntityId,
        pos: Point2d,
        heading: f64,
        attributes: VehicleAttributes,
        is_ugv: bool,
    ) -> Self {
        Self {
            id,
            attributes,
            pos,
            prev_pos: pos,
            heading: normalize_heading(heading),
            speed: 0.0,
            active: true,
            waiting: false,
            held_junction: None,
            votes: SpeedVotes::default(),
            target: None,
            turn_limit: None,
            is_ugv,
            waypoints_created: 0,
            last_turn: 0.0,
        }
    }

    /// Clears the votes and turn of the previous step.
    pub fn begin_step(&mut self) {
        self.votes.reset();
        self.last_turn = 0.0;
    }

    /// The vehicle's footprint.
    pub fn footprint(&self) -> Quad {
        Quad::footprint(
            self.pos,
            self.heading,
            self.attributes.length,
            self.attributes.width,
        )
    }

    /// The geometric centre of the vehicle.
    pub fn centroid(&self) -> Point2d {
        self.pos - self.forward() * (0.5 * self.attributes.length)
    }

    /// A unit vector along the heading.
    pub fn forward(&self) -> Vector2d {
        heading_vector(self.heading)
    }

    /// The compass direction the vehicle is heading in.
    pub fn direction(&self) -> Direction {
        Direction::from_heading(self.heading)
    }

    /// Turns towards a point, by no more than the maximum turn rate.
    /// With a `limit`, the turn never passes that heading.
    pub fn steer_towards(&mut self, point: Point2d, limit: Option<f64>, faults: &mut Faults) {
        if (point - self.pos).magnitude2() < 1e-12 {
            return;
        }
        let target = bearing(self.pos, point);
        let mut max_turn = self.attributes.max_turn;
        if faults.trigger(Fault::TurnRateDoubled, self.is_ugv) {
            max_turn *= 2.0;
        }
        let turn = match limit {
            Some(limit) => turn_towards_limited(self.heading, target, max_turn, limit),
            None => turn_towards(self.heading, target, max_turn),
        };
        self.heading = normalize_heading(self.heading + turn);
        self.last_turn = turn;
    }

    /// Resolves this step's speed votes into a new speed.
    pub fn resolve_speed(&mut self, faults: &mut Faults) {
        use speed::SpeedCommand;
        let command = self.votes.resolve(self.speed, &self.attributes);
        let mut speed = command.apply(self.speed, &self.attributes);
        let repeat = match command {
            SpeedCommand::Accelerate { .. } => faults.trigger(Fault::RepeatAcceleration, self.is_ugv),
            SpeedCommand::Decelerate => faults.trigger(Fault::RepeatDeceleration, self.is_ugv),
            SpeedCommand::Hold => false,
        };
        if repeat {
            speed = command.apply(speed, &self.attributes);
        }
        self.speed = speed;
    }

    /// Moves the anchor along the heading by the current speed.
    pub fn integrate(&mut self) {
        self.prev_pos = self.pos;
        self.pos += self.forward() * self.speed;
    }

    /// Brakes for an immediate stop. The brakes can only shed `max_decel`
    /// this step, so a tracked vehicle that cannot stop in time has a
    /// failure recorded against it.
    pub fn immediate_stop(&mut self, ctx: &mut StepContext) {
        self.votes.force_stop();
        let excess = self.speed - self.attributes.max_decel;
        if excess > 0.0 && self.is_ugv {
            ctx.detector.record(
                FailureKind::ExceededStoppingCapability,
                self.id,
                ctx.step,
                self.pos,
                format!(
                    "needed to stop from {:.3} with a maximum deceleration of {:.3}",
                    self.speed, self.attributes.max_decel
                ),
            );
        }
    }

    /// Marks the vehicle as blocked at a junction.
    pub fn start_waiting(&mut self) {
        if !self.waiting {
            log::debug!("Vehicle {:?} waiting at a junction", self.id);
        }
        self.waiting = true;
    }

    /// Requests entry to a junction, first releasing any other junction held.
    pub fn request_junction(
        &mut self,
        junction: JunctionId,
        timeout: u64,
        ctx: &mut StepContext,
    ) -> Entry {
        if self.held_junction.is_some_and(|held| held != junction) {
            self.release_junction(ctx.arbiter);
        }
        let entry = ctx
            .arbiter
            .request_entry(junction, self.id, ctx.step, timeout);
        match entry {
            Entry::Granted => {
                log::debug!("Vehicle {:?} entered junction {:?}", self.id, junction);
                self.held_junction = Some(junction);
                self.waiting = false;
            }
            Entry::Denied { occupier } => {
                log::trace!(
                    "Vehicle {:?} denied junction {:?} held by {:?}",
                    self.id,
                    junction,
                    occupier
                );
            }
        }
        entry
    }

    /// Votes for a crawl on the way into a junction, so the vehicle can still
    /// stop at the interior if refused entry, and for the slow band once it
    /// holds the junction. Tight turns inside are taken at a crawl.
    pub fn junction_speed(&mut self, network: &Network) {
        let Some(junction) = network.approach_at(self.pos) else {
            return;
        };
        if self.held_junction == Some(junction.id()) {
            let tight = self
                .turn_limit
                .is_some_and(|limit| heading_difference(self.heading, limit) > TIGHT_TURN);
            if tight {
                self.votes.really_slow();
            } else {
                self.votes.slow();
            }
        } else if !junction.in_exit(self.pos) {
            self.votes.really_slow();
        }
    }

    /// Releases the held junction.
    pub fn release_junction(&mut self, arbiter: &mut JunctionArbiter) {
        if let Some(junction) = self.held_junction.take() {
            arbiter.release(junction, self.id);
        }
    }

    /// Releases the held junction once the anchor has left the interior
    /// and the footprint no longer overlaps it.
    pub fn release_junction_if_clear(&mut self, network: &Network, arbiter: &mut JunctionArbiter) {
        let Some(id) = self.held_junction else { return };
        let clear = match network.junction(id) {
            Some(junction) => !junction.contains(self.pos) && !junction.intersects(&self.footprint()),
            None => true,
        };
        if clear {
            log::debug!("Vehicle {:?} left junction {:?}", self.id, id);
            self.release_junction(arbiter);
        }
    }

    /// Creates a waypoint and makes it the vehicle's target.
    ///
    /// A replacement waypoint takes over the successor of the waypoint
    /// currently targeted, which is removed. Otherwise the new waypoint
    /// leads on to the current target.
    pub fn create_waypoint(
        &mut self,
        location: Point2d,
        kind: WaypointKind,
        replace: bool,
        ctx: &mut StepContext,
    ) -> EntityId {
        let mut location = location;
        if ctx.faults.trigger(Fault::WaypointOffsetPositive, self.is_ugv) {
            location += Vector2d::new(1.0, 1.0);
        }
        if ctx.faults.trigger(Fault::WaypointOffsetNegative, self.is_ugv) {
            location -= Vector2d::new(1.0, 1.0);
        }

        let replaced = if replace {
            self.target.and_then(|id| {
                let waypoint = *ctx.entities.get(id)?.as_waypoint()?;
                Some((id, waypoint))
            })
        } else {
            None
        };
        let next = match replaced {
            Some((old, _)) if ctx.faults.trigger(Fault::StaleWaypointLink, self.is_ugv) => Some(old),
            Some((_, waypoint)) => waypoint.next,
            None => self.target,
        };

        let id = ctx.entities.insert(Entity::new(
            location,
            EntityKind::Waypoint(Waypoint { next, kind }),
        ));
        if let Some((old, _)) = replaced {
            ctx.entities.remove(old);
        }
        self.target = Some(id);
        self.waypoints_created += 1;
        log::trace!(
            "Vehicle {:?} created {:?} waypoint {:?} at {:?}",
            self.id,
            kind,
            id,
            location
        );
        id
    }

    /// Consumes the targeted waypoint, advancing to its successor.
    pub fn eat_waypoint(&mut self, entities: &mut EntitySet) -> Option<Waypoint> {
        let id = self.target?;
        let waypoint = *entities.get(id)?.as_waypoint()?;
        entities.remove(id);
        self.target = waypoint.next;
        if waypoint.kind == WaypointKind::Turn {
            self.turn_limit = None;
        }
        Some(waypoint)
    }

    /// Looks up the targeted entity's position, and its waypoint data if it is one.
    pub fn current_target(&self, entities: &EntitySet) -> Option<(EntityId, Point2d, Option<Waypoint>)> {
        let id = self.target?;
        let entity = entities.get(id)?;
        Some((id, entity.pos, entity.as_waypoint().copied()))
    }

    /// Returns true if a waypoint is close enough, or has been driven past.
    pub fn waypoint_reached(&self, point: Point2d, kind: WaypointKind) -> bool {
        let to = point - self.pos;
        if to.magnitude() < WAYPOINT_RADIUS {
            return true;
        }
        let fwd = self.forward();
        if to.dot(fwd) >= 0.0 {
            return false;
        }
        match (kind, self.turn_limit) {
            (WaypointKind::Turn, Some(limit)) => heading_difference(self.heading, limit) < TURN_SETTLED,
            _ => to.dot(rot90(fwd)).abs() < OVERSHOOT_LATERAL,
        }
    }
}
