//! Tests that run whole scenarios: junction arbitration, fault injection,
//! timeouts and determinism.

use assert_approx_eq::assert_approx_eq;
use std::collections::HashMap;
use ugv_sim::{
    math::{heading_delta, Point2d},
    network::{JunctionAttributes, RoadAttributes, RoadKind, ROAD_WIDTH},
    EntityId, EntityKind, Fault, FailureKind, FaultMode, Network, NetworkBuilder, OvertakeStage,
    RunConfig, RunStatus, Scenario, Simulation,
};

fn road(builder: &mut NetworkBuilder, start: (f64, f64), end: (f64, f64)) {
    builder
        .add_road(&RoadAttributes {
            kind: RoadKind::Minor,
            start: Point2d::new(start.0, start.1),
            end: Point2d::new(end.0, end.1),
            width: ROAD_WIDTH,
        })
        .unwrap();
}

fn junction(builder: &mut NetworkBuilder, centre: (f64, f64), arms: [f64; 4]) {
    builder
        .add_junction(&JunctionAttributes {
            centre: Point2d::new(centre.0, centre.1),
            arms,
            width: ROAD_WIDTH,
        })
        .unwrap();
}

fn first_waypoint(sim: &Simulation) -> Option<Point2d> {
    sim.iter_entities()
        .find(|(_, entity)| matches!(entity.kind(), EntityKind::Waypoint(_)))
        .map(|(_, entity)| entity.pos())
}

/// A crossroads with a dead end on every arm, traffic on three of them,
/// and the target down the fourth.
const CROSSROADS: &str = r#"{
    "roads": [
        { "start": { "x": -40.0, "y": 0.0 }, "end": { "x": 40.0, "y": 0.0 } },
        { "start": { "x": 0.0, "y": -40.0 }, "end": { "x": 0.0, "y": 40.0 } }
    ],
    "junctions": [
        { "centre": { "x": 0.0, "y": 0.0 }, "arms": [40.0, 40.0, 40.0, 40.0] },
        { "centre": { "x": 0.0, "y": 40.0 }, "arms": [0.0, 0.0, 40.0, 0.0] },
        { "centre": { "x": 40.0, "y": 0.0 }, "arms": [0.0, 0.0, 0.0, 40.0] },
        { "centre": { "x": 0.0, "y": -40.0 }, "arms": [40.0, 0.0, 0.0, 0.0] },
        { "centre": { "x": -40.0, "y": 0.0 }, "arms": [0.0, 40.0, 0.0, 0.0] }
    ],
    "obstacles": [
        { "position": { "x": -20.0, "y": 1.0 } }
    ],
    "target": { "x": 1.0, "y": 30.0 },
    "ugv": { "position": { "x": -35.0, "y": 1.0 }, "heading": 0.0 },
    "traffic": [
        { "position": { "x": 30.0, "y": -1.0 }, "heading": 180.0 },
        { "position": { "x": -1.0, "y": -30.0 }, "heading": 90.0 },
        { "position": { "x": 1.0, "y": 20.0 }, "heading": 270.0 }
    ]
}"#;

/// Test that two cars meeting head-on at a junction take turns to cross it.
#[test]
fn head_on_cars_take_turns() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut builder = Network::builder();
    road(&mut builder, (-22.0, 0.0), (-2.0, 0.0));
    road(&mut builder, (2.0, 0.0), (22.0, 0.0));
    junction(&mut builder, (0.0, 0.0), [0.0, 20.0, 0.0, 20.0]);
    // Keeps the run going while the traffic crosses.
    road(&mut builder, (0.0, 50.0), (200.0, 50.0));
    let mut sim = Simulation::new(builder.build(), &RunConfig::default()).unwrap();
    let target = sim.add_target(Point2d::new(195.0, 51.0));
    sim.add_ugv(Point2d::new(5.0, 51.0), 0.0, target).unwrap();
    let a = sim.add_traffic(Point2d::new(-8.0, 1.0), 0.0);
    let b = sim.add_traffic(Point2d::new(8.0, -1.0), 180.0);
    let junction = sim.network().junctions().next().unwrap().id();

    let mut turns = None;
    for _ in 0..200 {
        sim.step();
        if let Some(holder) = sim.arbiter().occupier(junction) {
            let waiter = if holder == a { b } else { a };
            if sim.vehicle(waiter).unwrap().is_waiting() {
                turns = Some((holder, waiter));
                break;
            }
        }
    }
    let (holder, waiter) = turns.expect("one car should wait for the other");

    while sim
        .vehicle(holder)
        .map_or(false, |vehicle| vehicle.held_junction().is_some())
    {
        assert!(sim.vehicle(waiter).unwrap().is_waiting());
        assert_eq!(sim.arbiter().occupier(junction), Some(holder));
        sim.step();
    }
    if sim.arbiter().occupier(junction) != Some(waiter) {
        sim.step();
    }
    assert_eq!(sim.arbiter().occupier(junction), Some(waiter));
    assert!(!sim.vehicle(waiter).unwrap().is_waiting());
}

/// Test that the waypoint offset fault displaces every waypoint the UGV creates.
#[test]
fn waypoint_offset_fault() {
    let network = || {
        let mut builder = Network::builder();
        road(&mut builder, (0.0, 0.0), (60.0, 0.0));
        builder.build()
    };
    let setup = |faults: FaultMode| {
        let config = RunConfig {
            max_steps: 2000,
            faults,
            ..Default::default()
        };
        let mut sim = Simulation::new(network(), &config).unwrap();
        let target = sim.add_target(Point2d::new(10.0, -1.0));
        sim.add_ugv(Point2d::new(5.0, 1.0), 0.0, target).unwrap();
        sim
    };
    let mut clean = setup(FaultMode::None);
    let mut faulty = setup(FaultMode::Single(Fault::WaypointOffsetPositive.index()));

    let (expected, actual) = loop {
        assert_eq!(clean.step(), RunStatus::Running);
        faulty.step();
        if let Some(point) = first_waypoint(&clean) {
            break (point, first_waypoint(&faulty).unwrap());
        }
    };
    assert_approx_eq!(actual.x, expected.x + 1.0);
    assert_approx_eq!(actual.y, expected.y + 1.0);

    let summary = faulty.run();
    let created = summary.ugvs[0].waypoints_created;
    assert!(created > 0);
    assert_eq!(faulty.faults().calls(Fault::WaypointOffsetPositive), created);
    assert_eq!(summary.fault_calls[Fault::WaypointOffsetPositive.index()], created);
    assert!(summary.active_faults[Fault::WaypointOffsetPositive.index()]);
    assert_eq!(faulty.faults().calls(Fault::WaypointOffsetNegative), 0);
}

/// Test that a UGV whose target is cut off by a parked car times out exactly once.
#[test]
fn blocked_target_times_out() {
    let mut builder = Network::builder();
    road(&mut builder, (0.0, 0.0), (60.0, 0.0));
    let config = RunConfig {
        max_steps: 400,
        ..Default::default()
    };
    let mut sim = Simulation::new(builder.build(), &config).unwrap();
    // Too near the end of the road to pass.
    sim.add_obstacle(Point2d::new(56.0, 1.0), 0.0);
    let target = sim.add_target(Point2d::new(58.0, 1.0));
    let ugv = sim.add_ugv(Point2d::new(5.0, 1.0), 0.0, target).unwrap();

    let summary = sim.run();
    let vehicle = sim.vehicle(ugv).unwrap();
    assert_eq!(vehicle.overtake_stage(), Some(OvertakeStage::Wait));
    assert_eq!(vehicle.speed(), 0.0);
    assert_eq!(sim.failure_count(FailureKind::ObstacleCollision), 0);
    assert_eq!(summary.status, RunStatus::TimedOut);
    assert_eq!(summary.steps, 400);
    assert_eq!(summary.failure_counts.timeout, 1);
    let timeouts = summary
        .failures
        .iter()
        .filter(|record| record.kind == FailureKind::Timeout)
        .count();
    assert_eq!(timeouts, 1);
    assert!(!summary.ugvs[0].target_found);

    // Stepping a finished run changes nothing.
    assert_eq!(sim.step(), RunStatus::TimedOut);
    assert_eq!(sim.summary(), summary);
}

/// Test that a UGV turning back at a dead end stays inside the lines.
#[test]
fn dead_end_turn_keeps_to_lanes() {
    let mut builder = Network::builder();
    road(&mut builder, (0.0, 0.0), (38.0, 0.0));
    junction(&mut builder, (40.0, 0.0), [0.0, 0.0, 0.0, 38.0]);
    let config = RunConfig {
        max_steps: 1000,
        ..Default::default()
    };
    let mut sim = Simulation::new(builder.build(), &config).unwrap();
    let target = sim.add_target(Point2d::new(10.0, -1.0));
    let ugv = sim.add_ugv(Point2d::new(20.0, 1.0), 0.0, target).unwrap();

    let mut lowest = f64::INFINITY;
    while sim.step() == RunStatus::Running {
        let vehicle = sim.vehicle(ugv).unwrap();
        lowest = lowest.min(vehicle.position().y);
        // Crawls until nearly lined up with the way back.
        if vehicle.held_junction().is_some() && heading_delta(vehicle.heading(), 180.0).abs() > 45.0 {
            assert!(vehicle.speed() <= 2.0 * vehicle.attributes().max_decel + 1e-9);
        }
    }

    let summary = sim.summary();
    assert_eq!(summary.status, RunStatus::Completed);
    assert!(summary.ugvs[0].target_found);
    assert!(lowest > -0.5 * ROAD_WIDTH, "swung out to y = {}", lowest);
    assert_eq!(sim.failure_count(FailureKind::CrossNearSideLine), 0);
    assert_eq!(summary.failure_counts.total, 0);
}

/// Test that with no faults the UGV finds its target on the crossroads map
/// without leaving the road or hitting the parked car.
#[test]
fn crossroads_baseline() {
    let _ = env_logger::builder().is_test(true).try_init();
    let scenario = Scenario::from_json(CROSSROADS).unwrap();
    for seed in 0..4 {
        let config = RunConfig {
            external_seed: seed,
            internal_seed: seed,
            max_steps: 3000,
            ..Default::default()
        };
        let summary = Simulation::from_scenario(&scenario, &config).unwrap().run();
        assert!(summary.ugvs[0].target_found, "seed {}: {:?}", seed, summary.failures);
        assert_eq!(summary.failure_counts.leave_road, 0, "seed {}", seed);
        assert_eq!(summary.failure_counts.obstacle_collision, 0, "seed {}", seed);
    }
}

/// Test that a run is fully determined by its configuration.
#[test]
fn runs_replay_exactly() {
    let scenario = Scenario::from_json(CROSSROADS).unwrap();
    let config = RunConfig {
        external_seed: 3,
        internal_seed: 11,
        max_steps: 600,
        faults: FaultMode::Percentage(0.3),
        traffic_speed_spread: 0.1,
    };
    let first = Simulation::from_scenario(&scenario, &config).unwrap().run();
    let second = Simulation::from_scenario(&scenario, &config).unwrap().run();
    assert_eq!(first, second);
}

/// Test that every vehicle respects its speed, acceleration and turn rate limits.
#[test]
fn vehicles_respect_dynamic_limits() {
    let scenario = Scenario::from_json(CROSSROADS).unwrap();
    let config = RunConfig {
        max_steps: 600,
        traffic_speed_spread: 0.1,
        ..Default::default()
    };
    let mut sim = Simulation::from_scenario(&scenario, &config).unwrap();

    let mut previous: HashMap<EntityId, (f64, f64)> = HashMap::new();
    loop {
        let status = sim.step();
        let mut current = HashMap::new();
        for vehicle in sim.iter_vehicles().filter(|vehicle| vehicle.is_active()) {
            let attrs = vehicle.attributes();
            let speed = vehicle.speed();
            assert!(speed >= 0.0 && speed <= attrs.max_speed + 1e-9);
            assert!(vehicle.last_turn().abs() <= attrs.max_turn + 1e-9);
            if let Some(&(prev_speed, prev_heading)) = previous.get(&vehicle.id()) {
                let limit = attrs.max_accel.max(attrs.max_decel);
                assert!((speed - prev_speed).abs() <= limit + 1e-9);
                assert!(speed - prev_speed <= attrs.max_accel + 1e-9);
                assert!(prev_speed - speed <= attrs.max_decel + 1e-9);
                assert!(heading_delta(prev_heading, vehicle.heading()).abs() <= attrs.max_turn + 1e-9);
            }
            current.insert(vehicle.id(), (speed, vehicle.heading()));
        }
        previous = current;
        if status != RunStatus::Running {
            break;
        }
    }
}

/// Test that a failure marker is placed for every recorded failure.
#[test]
fn failures_are_marked() {
    let scenario = Scenario::from_json(CROSSROADS).unwrap();
    let config = RunConfig {
        max_steps: 300,
        faults: FaultMode::Percentage(1.0),
        ..Default::default()
    };
    let mut sim = Simulation::from_scenario(&scenario, &config).unwrap();
    let summary = sim.run();
    let markers = sim
        .iter_entities()
        .filter(|(_, entity)| matches!(entity.kind(), EntityKind::FailureMarker(_)))
        .count();
    assert_eq!(markers, summary.failures.len());
    assert_eq!(summary.failure_counts.total, summary.failures.len() as u64);
    assert!(summary.active_faults.iter().all(|active| *active));
}
