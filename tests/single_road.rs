//! Tests that involve the simulation of a single straight road.

use ugv_sim::{
    math::Point2d,
    network::{RoadAttributes, RoadKind, ROAD_WIDTH},
    FailureKind, Network, OvertakeStage, RunConfig, RunStatus, SimError, Simulation,
};

fn straight_road(length: f64) -> Network {
    let mut builder = Network::builder();
    builder
        .add_road(&RoadAttributes {
            kind: RoadKind::Minor,
            start: Point2d::new(0.0, 0.0),
            end: Point2d::new(length, 0.0),
            width: ROAD_WIDTH,
        })
        .unwrap();
    builder.build()
}

/// Test that the UGV drives forward along its lane and finds a target ahead of it.
#[test]
fn ugv_drives_forward_to_target() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut sim = Simulation::new(straight_road(100.0), &RunConfig::default()).unwrap();
    let target = sim.add_target(Point2d::new(90.0, 1.0));
    let ugv = sim.add_ugv(Point2d::new(5.0, 1.0), 0.0, target).unwrap();

    let mut x = sim.vehicle(ugv).unwrap().position().x;
    while sim.step() == RunStatus::Running {
        let next_x = sim.vehicle(ugv).unwrap().position().x;
        assert!(next_x >= x);
        x = next_x;
    }

    let summary = sim.summary();
    assert_eq!(summary.status, RunStatus::Completed);
    assert!(summary.ugvs[0].target_found);
    assert!(sim.vehicle(ugv).unwrap().target_found());
    assert_eq!(summary.failure_counts.total, 0);
    assert_eq!(sim.failure_count(FailureKind::Timeout), 0);
}

/// Test that the UGV keeps to its own side of the centre line.
#[test]
fn ugv_keeps_to_its_lane() {
    let mut sim = Simulation::new(straight_road(100.0), &RunConfig::default()).unwrap();
    let target = sim.add_target(Point2d::new(90.0, 1.0));
    let ugv = sim.add_ugv(Point2d::new(5.0, 1.0), 0.0, target).unwrap();

    while sim.step() == RunStatus::Running {
        let pos = sim.vehicle(ugv).unwrap().position();
        assert!(pos.y > 0.0 && pos.y < 0.5 * ROAD_WIDTH, "drifted to {:?}", pos);
    }
}

/// Test that a UGV driving away from its target turns round at the end of the road.
#[test]
fn ugv_turns_round_at_road_end() {
    let config = RunConfig {
        max_steps: 400,
        ..Default::default()
    };
    let mut sim = Simulation::new(straight_road(60.0), &config).unwrap();
    let target = sim.add_target(Point2d::new(10.0, -1.0));
    let ugv = sim.add_ugv(Point2d::new(40.0, 1.0), 0.0, target).unwrap();

    let mut turned = false;
    while sim.step() == RunStatus::Running {
        turned |= sim.vehicle(ugv).unwrap().is_uturning();
    }
    assert!(turned);
    assert!(sim.vehicle(ugv).unwrap().waypoints_created() > 0);
}

/// Test that the UGV passes a parked car by the oncoming lane and pulls back in.
#[test]
fn ugv_overtakes_parked_car() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut sim = Simulation::new(straight_road(100.0), &RunConfig::default()).unwrap();
    sim.add_obstacle(Point2d::new(30.0, 1.0), 0.0);
    let target = sim.add_target(Point2d::new(90.0, 1.0));
    let ugv = sim.add_ugv(Point2d::new(5.0, 1.0), 0.0, target).unwrap();

    let mut stages = vec![OvertakeStage::NotOvertaking];
    let mut lowest = f64::INFINITY;
    while sim.step() == RunStatus::Running {
        let vehicle = sim.vehicle(ugv).unwrap();
        let stage = vehicle.overtake_stage().unwrap();
        if stages.last() != Some(&stage) {
            stages.push(stage);
        }
        // Braking to the slow speed may still be under way while pulling out.
        if matches!(stage, OvertakeStage::PulledOut | OvertakeStage::Finish) {
            assert!(vehicle.speed() <= 0.5 + 1e-9, "overtaking at {}", vehicle.speed());
        }
        lowest = lowest.min(vehicle.position().y);
    }

    assert_eq!(
        stages,
        [
            OvertakeStage::NotOvertaking,
            OvertakeStage::Start,
            OvertakeStage::PulledOut,
            OvertakeStage::Finish,
            OvertakeStage::NotOvertaking,
        ]
    );
    assert!(lowest < 0.0 && lowest > -0.5 * ROAD_WIDTH);
    let summary = sim.summary();
    assert_eq!(summary.status, RunStatus::Completed);
    assert!(summary.ugvs[0].target_found);
    assert_eq!(sim.failure_count(FailureKind::LeaveRoad), 0);
    assert_eq!(sim.failure_count(FailureKind::ObstacleCollision), 0);
    assert_eq!(sim.failure_count(FailureKind::CrossCentreLine), 0);
    assert_eq!(summary.failure_counts.total, 0);
}

/// Test that the summary renders as JSON, and that a rendering error is not
/// reported as a bad scenario.
#[test]
fn summary_renders_as_json() {
    let mut sim = Simulation::new(straight_road(100.0), &RunConfig::default()).unwrap();
    let target = sim.add_target(Point2d::new(90.0, 1.0));
    sim.add_ugv(Point2d::new(5.0, 1.0), 0.0, target).unwrap();
    let json = sim.run().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["ugvs"][0]["target_found"], true);

    let err = serde_json::from_str::<u8>("not json").unwrap_err();
    let message = SimError::Summary(err).to_string();
    assert!(message.starts_with("could not write summary"), "{}", message);
}
