//! Fault injection into the UGV's control logic.
//!
//! Each [Fault] names one site in the behaviour engine where a small,
//! deterministic perturbation is applied when the fault is active. Only the
//! UGV is ever affected; scripted traffic consults the same sites but never
//! triggers them.

use crate::config::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// The number of fault sites.
pub const FAULT_COUNT: usize = 19;

/// A fault site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fault {
    /// A replacement waypoint links to the waypoint it replaced instead of that waypoint's successor.
    StaleWaypointLink,
    /// New waypoints are displaced by (+1, +1).
    WaypointOffsetPositive,
    /// New waypoints are displaced by (-1, -1).
    WaypointOffsetNegative,
    /// The lane-marking search steps twice as far along each ray.
    MarkingSearchCoarseStep,
    /// The lane-marking search only reaches half as far.
    MarkingSearchShortRange,
    /// The static obstacle search steps twice as far along each ray.
    ObstacleSearchCoarseStep,
    /// The static obstacle search only reaches half as far.
    ObstacleSearchShortRange,
    /// The moving obstacle search cone is half as wide.
    MovingSearchNarrowCone,
    /// The moving obstacle search only reaches half as far.
    MovingSearchShortRange,
    /// A waiting vehicle does not vote to stop.
    SkipWaitingStop,
    /// The emergency proximity stop is skipped.
    SkipProximityStop,
    /// Junction exit selection only considers the first open arm.
    ExitScanEarlyExit,
    /// Acceleration is applied twice.
    RepeatAcceleration,
    /// Deceleration is applied twice.
    RepeatDeceleration,
    /// The stopping distance used against moving obstacles is halved.
    StoppingDistanceHalved,
    /// Oncoming traffic is ignored when deciding whether an overtake is safe.
    IgnoreOncomingWhenOvertaking,
    /// No slow vote is cast when the road ends ahead.
    SkipBoundarySlow,
    /// The steering clamp allows twice the maximum turn rate.
    TurnRateDoubled,
    /// A denied junction entry is ignored and the vehicle drives on.
    EnterOccupiedJunction,
}

impl Fault {
    /// All the faults in index order.
    pub const ALL: [Fault; FAULT_COUNT] = [
        Fault::StaleWaypointLink,
        Fault::WaypointOffsetPositive,
        Fault::WaypointOffsetNegative,
        Fault::MarkingSearchCoarseStep,
        Fault::MarkingSearchShortRange,
        Fault::ObstacleSearchCoarseStep,
        Fault::ObstacleSearchShortRange,
        Fault::MovingSearchNarrowCone,
        Fault::MovingSearchShortRange,
        Fault::SkipWaitingStop,
        Fault::SkipProximityStop,
        Fault::ExitScanEarlyExit,
        Fault::RepeatAcceleration,
        Fault::RepeatDeceleration,
        Fault::StoppingDistanceHalved,
        Fault::IgnoreOncomingWhenOvertaking,
        Fault::SkipBoundarySlow,
        Fault::TurnRateDoubled,
        Fault::EnterOccupiedJunction,
    ];

    /// The index of the fault in the fault array.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Gets the fault with the given index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// How the fault array is populated at the start of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum FaultMode {
    /// No faults are active.
    #[default]
    None,
    /// Exactly the fault with this index is active.
    Single(usize),
    /// This fraction of all faults, chosen at random, are active.
    Percentage(f64),
}

impl FaultMode {
    /// Checks that the mode describes a valid fault array.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            FaultMode::None => Ok(()),
            FaultMode::Single(index) if index < FAULT_COUNT => Ok(()),
            FaultMode::Single(index) => Err(ConfigError::FaultIndex(index)),
            FaultMode::Percentage(p) if (0.0..=1.0).contains(&p) => Ok(()),
            FaultMode::Percentage(p) => Err(ConfigError::FaultPercentage(p)),
        }
    }
}

/// The fault array, along with how often each fault has been triggered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    active: [bool; FAULT_COUNT],
    calls: [u64; FAULT_COUNT],
}

impl Faults {
    /// Creates a fault array with no active faults.
    pub fn none() -> Self {
        Default::default()
    }

    /// Creates a fault array with exactly one active fault.
    pub fn single(fault: Fault) -> Self {
        let mut faults = Self::none();
        faults.active[fault.index()] = true;
        faults
    }

    /// Populates a fault array according to `mode`.
    pub fn from_mode(mode: FaultMode, rng: &mut impl Rng) -> Result<Self, ConfigError> {
        mode.validate()?;
        let mut faults = Self::none();
        match mode {
            FaultMode::None => {}
            FaultMode::Single(index) => faults.active[index] = true,
            FaultMode::Percentage(p) => {
                let target = (p * FAULT_COUNT as f64).round() as usize;
                let mut count = 0;
                while count < target {
                    let index = rng.gen_range(0..FAULT_COUNT);
                    if !faults.active[index] {
                        faults.active[index] = true;
                        count += 1;
                    }
                }
            }
        }
        log::info!("Active faults: {:?}", faults.active_faults().collect::<Vec<_>>());
        Ok(faults)
    }

    /// Returns true if the fault is active.
    pub fn is_active(&self, fault: Fault) -> bool {
        self.active[fault.index()]
    }

    /// Iterates over the active faults.
    pub fn active_faults(&self) -> impl Iterator<Item = Fault> + '_ {
        Fault::ALL.into_iter().filter(|f| self.is_active(*f))
    }

    /// Counts the active faults.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    /// Consults a fault site. Returns true, and counts the call, if the fault
    /// is active and the vehicle at the site is the UGV.
    pub fn trigger(&mut self, fault: Fault, is_ugv: bool) -> bool {
        let fire = is_ugv && self.active[fault.index()];
        if fire {
            self.calls[fault.index()] += 1;
        }
        fire
    }

    /// Gets how often a fault has been triggered.
    pub fn calls(&self, fault: Fault) -> u64 {
        self.calls[fault.index()]
    }

    /// Gets the trigger counts of every fault, in index order.
    pub fn call_counts(&self) -> [u64; FAULT_COUNT] {
        self.calls
    }

    /// Gets the active flags of every fault, in index order.
    pub fn active_flags(&self) -> [bool; FAULT_COUNT] {
        self.active
    }

    /// Resets the trigger counts.
    pub fn reset_calls(&mut self) {
        self.calls = [0; FAULT_COUNT];
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn indices_round_trip() {
        for (index, fault) in Fault::ALL.iter().enumerate() {
            assert_eq!(fault.index(), index);
            assert_eq!(Fault::from_index(index), Some(*fault));
        }
        assert_eq!(Fault::from_index(FAULT_COUNT), None);
    }

    #[test]
    fn single_mode_sets_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let faults = Faults::from_mode(FaultMode::Single(4), &mut rng).unwrap();
        assert_eq!(faults.active_count(), 1);
        assert!(faults.is_active(Fault::MarkingSearchShortRange));
    }

    #[test]
    fn percentage_mode_cardinality() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            for p in [0.0, 0.1, 0.25, 0.5, 0.77, 1.0] {
                let faults = Faults::from_mode(FaultMode::Percentage(p), &mut rng).unwrap();
                let expected = (p * FAULT_COUNT as f64).round() as usize;
                assert_eq!(faults.active_count(), expected);
            }
        }
    }

    #[test]
    fn invalid_modes_are_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            Faults::from_mode(FaultMode::Single(19), &mut rng),
            Err(ConfigError::FaultIndex(19))
        ));
        assert!(Faults::from_mode(FaultMode::Percentage(1.5), &mut rng).is_err());
        assert!(Faults::from_mode(FaultMode::Percentage(-0.1), &mut rng).is_err());
    }

    #[test]
    fn only_ugv_triggers() {
        let mut faults = Faults::single(Fault::TurnRateDoubled);
        assert!(!faults.trigger(Fault::TurnRateDoubled, false));
        assert!(faults.trigger(Fault::TurnRateDoubled, true));
        assert!(!faults.trigger(Fault::RepeatAcceleration, true));
        assert_eq!(faults.calls(Fault::TurnRateDoubled), 1);
        assert_eq!(faults.calls(Fault::RepeatAcceleration), 0);
        faults.reset_calls();
        assert_eq!(faults.calls(Fault::TurnRateDoubled), 0);
    }
}
