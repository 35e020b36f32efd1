use crate::accident::{AccidentDetector, FailureCounts, FailureKind, FailureRecord};
use crate::arbiter::JunctionArbiter;
use crate::config::{ConfigError, RunConfig, Validate};
#[cfg(feature = "debug")]
use crate::debug::{debug_quad, take_debug_frame};
use crate::entity::{Entity, EntityKind, ParkedCar, Waypoint, WaypointKind};
use crate::fault::{Faults, FAULT_COUNT};
use crate::math::{heading_vector, Point2d, Quad};
use crate::network::{Network, NetworkError};
use crate::scenario::Scenario;
use crate::vehicle::{StepContext, StepOutcome, Vehicle, VehicleAttributes};
use crate::{EntityId, EntitySet, VehicleSet};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Replacement traffic starts this far along a dead-end arm.
const SPAWN_SETBACK: f64 = 2.5;

/// Space kept clear around a replacement car's footprint.
const SPAWN_CLEARANCE: f64 = 1.0;

/// How many placements are tried before a replacement is skipped.
const MAX_SPAWN_ATTEMPTS: usize = 20;

/// Bounds on the factor applied to a traffic car's maximum speed.
const SPEED_FACTOR_MIN: f64 = 0.75;
const SPEED_FACTOR_MAX: f64 = 1.25;

/// A failure to set up a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("invalid scenario: {0}")]
    Scenario(#[from] serde_json::Error),
    #[error("could not write summary: {0}")]
    Summary(serde_json::Error),
    #[error("entity {0:?} is not a target")]
    NotATarget(EntityId),
    #[error("entity {0:?} is not an autonomous vehicle")]
    NotAUgv(EntityId),
}

/// Whether a run is still going, and if not, why it ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// No autonomous vehicle is still driving.
    Completed,
    /// The step ceiling was reached.
    TimedOut,
}

/// How one autonomous vehicle fared.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UgvResult {
    pub vehicle: EntityId,
    pub target_found: bool,
    pub waypoints_created: u64,
}

/// The results of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub steps: u64,
    /// Every failure, in the order recorded.
    pub failures: Vec<FailureRecord>,
    pub failure_counts: FailureCounts,
    /// How often each fault site fired, in fault index order.
    pub fault_calls: [u64; FAULT_COUNT],
    pub active_faults: [bool; FAULT_COUNT],
    pub ugvs: Vec<UgvResult>,
}

impl RunSummary {
    /// Renders the summary as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, SimError> {
        serde_json::to_string_pretty(self).map_err(SimError::Summary)
    }
}

/// A simulation of autonomous vehicles and traffic on a road network.
pub struct Simulation {
    config: RunConfig,
    network: Network,
    /// Everything in the world, vehicles included.
    entities: EntitySet,
    /// The driving state of each vehicle.
    vehicles: VehicleSet,
    /// The order vehicles are stepped in.
    schedule: Vec<EntityId>,
    arbiter: JunctionArbiter,
    faults: Faults,
    detector: AccidentDetector,
    rng: StdRng,
    /// Spread of traffic maximum speeds, if any.
    speed_spread: Option<Normal<f64>>,
    /// The number of steps run.
    step: u64,
    status: RunStatus,
    /// How many failures have been given a marker.
    markers_placed: usize,
    /// Debugging information from the previously simulated step.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl Simulation {
    /// Creates an empty simulation on a network. Fails if the configuration is invalid.
    pub fn new(network: Network, config: &RunConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.runtime_seed());
        let faults = Faults::from_mode(config.faults, &mut rng)?;
        let speed_spread = if config.traffic_speed_spread > 0.0 {
            let distr = Normal::new(1.0, config.traffic_speed_spread)
                .map_err(|_| ConfigError::SpeedSpread(config.traffic_speed_spread))?;
            Some(distr)
        } else {
            None
        };
        log::info!(
            "Starting run: external seed {}, internal seed {}, {} active faults",
            config.external_seed,
            config.internal_seed,
            faults.active_count()
        );
        Ok(Self {
            config: config.clone(),
            arbiter: JunctionArbiter::new(&network),
            network,
            entities: EntitySet::default(),
            vehicles: VehicleSet::default(),
            schedule: Vec::new(),
            faults,
            detector: AccidentDetector::new(),
            rng,
            speed_spread,
            step: 0,
            status: RunStatus::Running,
            markers_placed: 0,
            #[cfg(feature = "debug")]
            debug: serde_json::Value::Null,
        })
    }

    /// Builds the network described by a scenario and populates it.
    pub fn from_scenario(scenario: &Scenario, config: &RunConfig) -> Result<Self, SimError> {
        let network = scenario.build_network()?;
        let mut sim = Self::new(network, config)?;
        for obstacle in &scenario.obstacles {
            sim.add_obstacle(obstacle.position, obstacle.heading);
        }
        let target = sim.add_target(scenario.target);
        let ugv = sim.add_ugv(scenario.ugv.position, scenario.ugv.heading, target)?;
        sim.add_route(ugv, &scenario.ugv.route)?;
        for traffic in &scenario.traffic {
            sim.add_traffic(traffic.position, traffic.heading);
        }
        Ok(sim)
    }

    /// Places a target.
    pub fn add_target(&mut self, pos: Point2d) -> EntityId {
        self.entities.insert(Entity::new(pos, EntityKind::Target))
    }

    /// Places a parked car.
    pub fn add_obstacle(&mut self, pos: Point2d, heading: f64) -> EntityId {
        self.entities
            .insert(Entity::new(pos, EntityKind::ParkedCar(ParkedCar::new(heading))))
    }

    /// Adds an autonomous vehicle searching for `target`.
    pub fn add_ugv(&mut self, pos: Point2d, heading: f64, target: EntityId) -> Result<EntityId, SimError> {
        match self.entities.get(target).map(Entity::kind) {
            Some(EntityKind::Target) => {}
            _ => return Err(SimError::NotATarget(target)),
        }
        let id = self.entities.insert(Entity::new(pos, EntityKind::Ugv));
        self.vehicles.insert(
            id,
            Vehicle::new_ugv(id, pos, heading, VehicleAttributes::UGV, target),
        );
        self.schedule.push(id);
        Ok(id)
    }

    /// Gives an autonomous vehicle a route of points to pass through
    /// before heading for its target.
    pub fn add_route(&mut self, ugv: EntityId, route: &[Point2d]) -> Result<(), SimError> {
        let vehicle = self
            .vehicles
            .get_mut(ugv)
            .filter(|vehicle| vehicle.is_ugv())
            .ok_or(SimError::NotAUgv(ugv))?;
        let mut next = vehicle.car.target;
        for point in route.iter().rev() {
            let waypoint = Waypoint {
                next,
                kind: WaypointKind::Path,
            };
            next = Some(
                self.entities
                    .insert(Entity::new(*point, EntityKind::Waypoint(waypoint))),
            );
        }
        vehicle.car.target = next;
        Ok(())
    }

    /// Adds a traffic car.
    pub fn add_traffic(&mut self, pos: Point2d, heading: f64) -> EntityId {
        let mut attributes = VehicleAttributes::TRAFFIC;
        if let Some(distr) = &self.speed_spread {
            let factor = distr
                .sample(&mut self.rng)
                .clamp(SPEED_FACTOR_MIN, SPEED_FACTOR_MAX);
            attributes.max_speed *= factor;
        }
        let id = self.entities.insert(Entity::new(pos, EntityKind::Traffic));
        self.vehicles
            .insert(id, Vehicle::new_traffic(id, pos, heading, attributes));
        self.schedule.push(id);
        id
    }

    /// Adds a traffic car at a clear dead end, heading into the network.
    /// Returns `None` if no clear placement was found.
    pub fn spawn_replacement(&mut self) -> Option<EntityId> {
        let attrs = VehicleAttributes::TRAFFIC;
        let entries: Vec<(Point2d, f64)> = self
            .network
            .dead_ends()
            .map(|(junction, dir)| (junction.entry_point(dir, SPAWN_SETBACK), dir.heading()))
            .collect();
        for _ in 0..MAX_SPAWN_ATTEMPTS {
            let (pos, heading) = *entries.choose(&mut self.rng)?;
            let zone = Quad::footprint(
                pos + heading_vector(heading) * SPAWN_CLEARANCE,
                heading,
                attrs.length + 2.0 * SPAWN_CLEARANCE,
                attrs.width + 2.0 * SPAWN_CLEARANCE,
            );
            let clear = self
                .vehicles
                .values()
                .all(|vehicle| !vehicle.is_active() || !vehicle.footprint().intersects(&zone));
            if clear {
                let id = self.add_traffic(pos, heading);
                log::info!("Spawned replacement traffic {:?} at {:?}", id, pos);
                return Some(id);
            }
        }
        log::warn!("No clear dead end for replacement traffic");
        None
    }

    /// Advances the simulation by one step.
    pub fn step(&mut self) -> RunStatus {
        if self.status != RunStatus::Running {
            return self.status;
        }

        let mut departed = Vec::new();
        for index in 0..self.schedule.len() {
            let id = self.schedule[index];
            let Some(mut vehicle) = self.vehicles.remove(id) else {
                continue;
            };
            if !vehicle.is_active() {
                self.vehicles.insert(id, vehicle);
                continue;
            }
            let outcome = {
                let mut ctx = StepContext {
                    network: &self.network,
                    entities: &mut self.entities,
                    vehicles: &self.vehicles,
                    arbiter: &mut self.arbiter,
                    faults: &mut self.faults,
                    detector: &mut self.detector,
                    rng: &mut self.rng,
                    step: self.step,
                };
                vehicle.step(&mut ctx)
            };
            if let Some(entity) = self.entities.get_mut(id) {
                entity.pos = vehicle.position();
            }
            #[cfg(feature = "debug")]
            debug_quad("vehicle", &vehicle.footprint());
            if outcome == StepOutcome::LeftNetwork {
                self.entities.remove(id);
                departed.push(id);
            } else {
                self.vehicles.insert(id, vehicle);
            }
        }
        if !departed.is_empty() {
            self.schedule.retain(|id| !departed.contains(id));
            for _ in &departed {
                self.spawn_replacement();
            }
        }

        self.detector
            .check(self.step, &self.network, &self.entities, &self.vehicles);
        self.step += 1;
        if self
            .detector
            .check_timeout(self.step, self.config.max_steps, &self.vehicles)
        {
            log::info!("Run timed out after {} steps", self.step);
            self.status = RunStatus::TimedOut;
        } else if !self.vehicles.values().any(|v| v.is_ugv() && v.is_active()) {
            log::info!("Run completed after {} steps", self.step);
            self.status = RunStatus::Completed;
        }
        self.place_markers();

        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }
        self.status
    }

    /// Runs until the run ends, and summarises it.
    pub fn run(&mut self) -> RunSummary {
        while self.step() == RunStatus::Running {}
        self.summary()
    }

    /// Summarises the run so far.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.status,
            steps: self.step,
            failures: self.detector.log().to_vec(),
            failure_counts: *self.detector.counts(),
            fault_calls: self.faults.call_counts(),
            active_faults: self.faults.active_flags(),
            ugvs: self
                .vehicles
                .iter()
                .filter(|(_, vehicle)| vehicle.is_ugv())
                .map(|(id, vehicle)| UgvResult {
                    vehicle: id,
                    target_found: vehicle.target_found(),
                    waypoints_created: vehicle.waypoints_created(),
                })
                .collect(),
        }
    }

    /// Marks the location of every failure not yet marked.
    fn place_markers(&mut self) {
        for record in &self.detector.log()[self.markers_placed..] {
            self.entities.insert(Entity::new(
                record.location,
                EntityKind::FailureMarker(record.kind),
            ));
        }
        self.markers_placed = self.detector.log().len();
    }

    /// Gets the run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Gets the road network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Gets an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Iterates over every entity.
    pub fn iter_entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    /// Gets a vehicle.
    pub fn vehicle(&self, id: EntityId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Iterates over the vehicles, in stepping order.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.schedule.iter().filter_map(|id| self.vehicles.get(*id))
    }

    /// Gets the junction arbiter.
    pub fn arbiter(&self) -> &JunctionArbiter {
        &self.arbiter
    }

    /// Gets the fault array.
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Gets the failures recorded so far.
    pub fn failures(&self) -> &[FailureRecord] {
        self.detector.log()
    }

    /// Gets the number of failures of one kind recorded so far.
    pub fn failure_count(&self, kind: FailureKind) -> u64 {
        self.detector.counts().get(kind)
    }

    /// Gets the number of steps run.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    /// Gets the run status.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Gets the debugging information for the previously simulated step.
    #[cfg(feature = "debug")]
    pub fn debug(&mut self) -> serde_json::Value {
        self.debug.take()
    }
}
