//! Scenario descriptions: the road network and initial placements produced
//! by a map generator, in a form that can be read from JSON.

use crate::math::{Point2d, Rect};
use crate::network::{JunctionAttributes, Network, NetworkError, RoadAttributes};
use crate::simulation::SimError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A static obstacle placement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleSpec {
    /// The front-centre of the parked car.
    pub position: Point2d,
    #[serde(default)]
    pub heading: f64,
}

/// A vehicle placement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpec {
    /// The front-centre anchor.
    pub position: Point2d,
    /// The heading in degrees, anticlockwise from east.
    pub heading: f64,
    /// Points to visit on the way to the target. Only used for the UGV.
    #[serde(default)]
    pub route: Vec<Point2d>,
}

/// Everything needed to populate a simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    /// The map walls. Defaults to a margin around the road surface.
    #[serde(default)]
    pub bounds: Option<Rect>,
    #[serde(default)]
    pub roads: Vec<RoadAttributes>,
    #[serde(default)]
    pub junctions: Vec<JunctionAttributes>,
    #[serde(default)]
    pub obstacles: Vec<ObstacleSpec>,
    /// Where the UGV's target is.
    pub target: Point2d,
    pub ugv: VehicleSpec,
    #[serde(default)]
    pub traffic: Vec<VehicleSpec>,
}

impl Scenario {
    /// Parses a scenario from JSON.
    pub fn from_json(text: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a scenario from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(crate::ConfigError::from)?;
        Self::from_json(&text)
    }

    /// Validates and builds the road network.
    pub fn build_network(&self) -> Result<Network, NetworkError> {
        let mut builder = Network::builder();
        for road in &self.roads {
            builder.add_road(road)?;
        }
        for junction in &self.junctions {
            builder.add_junction(junction)?;
        }
        if let Some(bounds) = self.bounds {
            builder.bounds(bounds);
        }
        Ok(builder.build())
    }
}
