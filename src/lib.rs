//! A discrete-step simulation of an autonomous ground vehicle (UGV) driving
//! through a road network shared with scripted traffic. Faults can be injected
//! into the UGV's control logic, and every safety-relevant failure it commits
//! is recorded by an accident detector.

pub use accident::{FailureCounts, FailureKind, FailureRecord};
pub use arbiter::{Entry, JunctionArbiter, Occupancy};
pub use cgmath;
pub use config::{ConfigError, RunConfig, Validate};
pub use entity::{Entity, EntityKind, ParkedCar, Waypoint, WaypointKind};
pub use fault::{Fault, FaultMode, Faults};
pub use network::{Direction, Junction, Network, NetworkBuilder, NetworkError, Road};
pub use scenario::{ObstacleSpec, Scenario, VehicleSpec};
pub use simulation::{RunStatus, RunSummary, SimError, Simulation, UgvResult};
use slotmap::{new_key_type, SecondaryMap, SlotMap};
pub use slotmap::{Key, KeyData};
pub use util::Interval;
pub use vehicle::{OvertakeStage, Vehicle, VehicleAttributes};

mod accident;
mod arbiter;
mod config;
mod debug;
mod entity;
pub mod fault;
pub mod math;
pub mod metrics;
pub mod network;
mod scenario;
pub mod sensor;
mod simulation;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of an [Entity].
    pub struct EntityId;
    /// Unique ID of a [Road].
    pub struct RoadId;
    /// Unique ID of a [Junction].
    pub struct JunctionId;
}

type EntitySet = SlotMap<EntityId, Entity>;
type VehicleSet = SecondaryMap<EntityId, Vehicle>;
type RoadSet = SlotMap<RoadId, Road>;
type JunctionSet = SlotMap<JunctionId, Junction>;
