//! Junction arbitration: at most one vehicle may occupy a junction interior.

use crate::network::{Direction, Junction, Network};
use crate::{EntityId, JunctionId};
use arrayvec::ArrayVec;
use cgmath::MetricSpace;
use rand::seq::SliceRandom;
use rand::Rng;
use slotmap::SecondaryMap;

/// Steps an occupier may hold a junction before a waiting UGV clears it.
pub const UGV_ENTRY_TIMEOUT: u64 = 80;

/// Steps an occupier may hold a junction before waiting traffic clears it.
pub const TRAFFIC_ENTRY_TIMEOUT: u64 = 30;

/// The probability of choosing an already visited exit decays by this factor per visit.
const REVISIT_DECAY: f64 = 0.8;

/// Rounds of Bernoulli draws before exit selection gives up.
const MAX_EXIT_ATTEMPTS: usize = 50;

/// The occupancy of a junction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Occupancy {
    #[default]
    Free,
    Occupied {
        /// The vehicle holding the junction.
        occupier: EntityId,
        /// The step at which it was granted entry.
        since: u64,
    },
}

/// The result of a request to enter a junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entry {
    Granted,
    Denied { occupier: EntityId },
}

/// The way a vehicle leaves a junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitChoice {
    /// Leave by an open arm.
    Arm(Direction),
    /// Drive straight on through the closed end of a dead end, off the network.
    LeaveNetwork(Direction),
}

/// How often a vehicle has left each junction by each arm.
pub type VisitHistory = SecondaryMap<JunctionId, [u32; 4]>;

/// Owns the occupancy state of every junction.
#[derive(Clone, Debug, Default)]
pub struct JunctionArbiter {
    states: SecondaryMap<JunctionId, Occupancy>,
}

impl JunctionArbiter {
    /// Creates an arbiter with every junction in the network free.
    pub fn new(network: &Network) -> Self {
        let mut states = SecondaryMap::new();
        for junction in network.junctions() {
            states.insert(junction.id(), Occupancy::Free);
        }
        Self { states }
    }

    /// Gets the occupancy of a junction.
    pub fn occupancy(&self, junction: JunctionId) -> Occupancy {
        self.states.get(junction).copied().unwrap_or_default()
    }

    /// Gets the vehicle occupying a junction.
    pub fn occupier(&self, junction: JunctionId) -> Option<EntityId> {
        match self.occupancy(junction) {
            Occupancy::Free => None,
            Occupancy::Occupied { occupier, .. } => Some(occupier),
        }
    }

    /// Requests entry to a junction.
    ///
    /// Entry is granted if the junction is free or already held by the
    /// requester. An occupier that has held the junction for longer than
    /// `timeout` steps is evicted.
    pub fn request_entry(
        &mut self,
        junction: JunctionId,
        requester: EntityId,
        step: u64,
        timeout: u64,
    ) -> Entry {
        let Some(state) = self.states.get_mut(junction) else {
            return Entry::Granted;
        };
        match *state {
            Occupancy::Occupied { occupier, .. } if occupier == requester => Entry::Granted,
            Occupancy::Occupied { occupier, since } if step.saturating_sub(since) <= timeout => {
                Entry::Denied { occupier }
            }
            previous => {
                if let Occupancy::Occupied { occupier, since } = previous {
                    log::warn!(
                        "Junction {:?} held by {:?} since step {} timed out; cleared for {:?}",
                        junction,
                        occupier,
                        since,
                        requester
                    );
                }
                *state = Occupancy::Occupied {
                    occupier: requester,
                    since: step,
                };
                Entry::Granted
            }
        }
    }

    /// Releases a junction. Does nothing unless `holder` is the occupier.
    /// Returns true if the junction was released.
    pub fn release(&mut self, junction: JunctionId, holder: EntityId) -> bool {
        let Some(state) = self.states.get_mut(junction) else {
            return false;
        };
        match *state {
            Occupancy::Occupied { occupier, .. } if occupier == holder => {
                *state = Occupancy::Free;
                true
            }
            _ => false,
        }
    }

    /// Frees every junction.
    pub fn reset(&mut self) {
        for (_, state) in self.states.iter_mut() {
            *state = Occupancy::Free;
        }
    }
}

/// Chooses how a UGV leaves a junction, favouring arms it has rarely used.
///
/// Arms never used before are always eligible. Once every arm has been used,
/// each arm is independently eligible with probability `0.8^visits`.
/// Among eligible arms, the one whose exit is closest to `destination` wins.
/// The chosen arm's visit count is incremented.
///
/// # Parameters
/// * `arrived_from` - The arm the vehicle entered by; only a dead end allows turning back
/// * `scan_limit` - How many open arms are considered, in arm order
pub fn choose_ugv_exit(
    junction: &Junction,
    arrived_from: Direction,
    destination: crate::math::Point2d,
    visits: &mut VisitHistory,
    scan_limit: usize,
    rng: &mut impl Rng,
) -> Option<Direction> {
    let candidates: ArrayVec<Direction, 4> = exit_candidates(junction, arrived_from)
        .into_iter()
        .take(scan_limit)
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let counts = *visits.entry(junction.id())?.or_insert([0; 4]);
    let unvisited: ArrayVec<Direction, 4> = candidates
        .iter()
        .copied()
        .filter(|dir| counts[dir.index()] == 0)
        .collect();

    let nearest = |eligible: &[Direction]| {
        eligible.iter().copied().min_by(|a, b| {
            let da = junction.exit_point(*a).distance2(destination);
            let db = junction.exit_point(*b).distance2(destination);
            da.total_cmp(&db)
        })
    };

    let chosen = if !unvisited.is_empty() {
        nearest(&unvisited)
    } else {
        (0..MAX_EXIT_ATTEMPTS).find_map(|_| {
            let eligible: ArrayVec<Direction, 4> = candidates
                .iter()
                .copied()
                .filter(|dir| rng.gen_bool(REVISIT_DECAY.powi(counts[dir.index()] as i32)))
                .collect();
            nearest(&eligible)
        })
    }?;

    if let Some(counts) = visits.get_mut(junction.id()) {
        counts[chosen.index()] += 1;
    }
    Some(chosen)
}

/// Chooses uniformly at random how a traffic car leaves a junction.
/// At a dead end, the car may also carry straight on and leave the network.
pub fn choose_traffic_exit(
    junction: &Junction,
    arrived_from: Direction,
    rng: &mut impl Rng,
) -> Option<ExitChoice> {
    let mut choices: ArrayVec<ExitChoice, 4> = exit_candidates(junction, arrived_from)
        .into_iter()
        .map(ExitChoice::Arm)
        .collect();
    if junction.is_dead_end() {
        choices.clear();
        choices.push(ExitChoice::Arm(arrived_from));
        choices.push(ExitChoice::LeaveNetwork(arrived_from.opposite()));
    }
    choices.choose(rng).copied()
}

/// The open arms a vehicle may leave by. Turning back the way it came is
/// only allowed when there is no other way out.
fn exit_candidates(junction: &Junction, arrived_from: Direction) -> ArrayVec<Direction, 4> {
    let arms = junction.arms();
    let onward: ArrayVec<Direction, 4> = arms
        .iter()
        .copied()
        .filter(|dir| *dir != arrived_from)
        .collect();
    if onward.is_empty() {
        arms
    } else {
        onward
    }
}
