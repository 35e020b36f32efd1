use super::VehicleAttributes;

/// The speed a `slow` vote hunts around, in units per step.
pub const SLOW_SPEED: f64 = 0.5;

/// The smallest distance a vehicle ever considers sufficient to stop in.
pub const MIN_STOPPING_DISTANCE: f64 = 1.5;

/// The speed votes cast by a vehicle's behaviours during one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpeedVotes {
    slow: u32,
    really_slow: u32,
    force_stop: u32,
    speed_up: u32,
    forced_speed_up: u32,
}

/// The single speed change applied after the votes are resolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpeedCommand {
    /// Brake as hard as possible.
    Decelerate,
    /// Accelerate, but not beyond `cap`.
    Accelerate { cap: f64 },
    /// Keep the current speed.
    Hold,
}

impl SpeedVotes {
    /// Clears all votes. Use at the start of a step.
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// Votes to hunt around [SLOW_SPEED].
    pub fn slow(&mut self) {
        self.slow += 1;
    }

    /// Votes to crawl at a speed from which the vehicle can stop within a step or two.
    pub fn really_slow(&mut self) {
        self.really_slow += 1;
    }

    /// Votes to brake to a stop. Overrides every other vote.
    pub fn force_stop(&mut self) {
        self.force_stop += 1;
    }

    /// Votes to accelerate. Only a slow vote can hold a forced vote back
    /// at the slow speed, while an ordinary vote is held back by any slow vote.
    pub fn speed_up(&mut self, forced: bool) {
        if forced {
            self.forced_speed_up += 1;
        } else {
            self.speed_up += 1;
        }
    }

    /// Returns true if any behaviour voted to stop.
    pub fn stopping(&self) -> bool {
        self.force_stop > 0
    }

    /// Resolves the votes into a single command.
    pub fn resolve(&self, speed: f64, attributes: &VehicleAttributes) -> SpeedCommand {
        let wants_speed = self.speed_up + self.forced_speed_up > 0;
        if self.force_stop > 0 {
            SpeedCommand::Decelerate
        } else if self.really_slow > 0 {
            let crawl = attributes.max_decel;
            if speed < crawl {
                SpeedCommand::Accelerate { cap: 2.0 * crawl }
            } else if speed > 2.0 * crawl {
                SpeedCommand::Decelerate
            } else {
                SpeedCommand::Hold
            }
        } else if self.slow > 0 {
            if speed > SLOW_SPEED {
                SpeedCommand::Decelerate
            } else if speed < SLOW_SPEED && wants_speed {
                SpeedCommand::Accelerate { cap: SLOW_SPEED }
            } else {
                SpeedCommand::Hold
            }
        } else if wants_speed {
            SpeedCommand::Accelerate {
                cap: attributes.max_speed,
            }
        } else {
            SpeedCommand::Hold
        }
    }
}

impl SpeedCommand {
    /// Applies the command to a speed.
    pub fn apply(self, speed: f64, attributes: &VehicleAttributes) -> f64 {
        let speed = match self {
            SpeedCommand::Decelerate => speed - attributes.max_decel,
            SpeedCommand::Accelerate { cap } => {
                let cap = cap.min(attributes.max_speed).max(speed);
                (speed + attributes.max_accel).min(cap)
            }
            SpeedCommand::Hold => speed,
        };
        speed.clamp(0.0, attributes.max_speed)
    }
}

/// The distance covered while braking from `speed` to a standstill,
/// one step at a time, but never less than [MIN_STOPPING_DISTANCE].
pub fn stopping_distance(speed: f64, max_decel: f64) -> f64 {
    let mut distance = 0.0;
    if max_decel > 0.0 {
        let mut speed = speed;
        while speed > 0.0 {
            distance += speed;
            speed -= max_decel;
        }
    }
    distance.max(MIN_STOPPING_DISTANCE)
}

/// The number of steps needed to cover `distance`, accelerating at
/// `max_accel` towards `max_speed` from `speed`. Each step covers the mean of
/// its starting and ending speeds. Returns `None` if the distance can never
/// be covered within `limit` steps.
pub fn steps_to_cover(
    distance: f64,
    speed: f64,
    attributes: &VehicleAttributes,
    limit: u32,
) -> Option<u32> {
    let mut covered = 0.0;
    let mut speed = speed;
    for step in 1..=limit {
        let next = (speed + attributes.max_accel).min(attributes.max_speed);
        covered += 0.5 * (speed + next);
        speed = next;
        if covered >= distance {
            return Some(step);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const ATTRS: VehicleAttributes = VehicleAttributes {
        length: 2.0,
        width: 1.0,
        max_speed: 1.0,
        max_accel: 0.05,
        max_decel: 0.1,
        max_turn: 15.0,
    };

    #[test]
    fn force_stop_wins() {
        let mut votes = SpeedVotes::default();
        votes.speed_up(true);
        votes.slow();
        votes.really_slow();
        votes.force_stop();
        assert_eq!(votes.resolve(0.5, &ATTRS), SpeedCommand::Decelerate);
        assert_approx_eq!(SpeedCommand::Decelerate.apply(0.05, &ATTRS), 0.0);
    }

    #[test]
    fn really_slow_band() {
        let mut votes = SpeedVotes::default();
        votes.really_slow();
        votes.speed_up(false);
        assert!(matches!(votes.resolve(0.05, &ATTRS), SpeedCommand::Accelerate { .. }));
        assert_eq!(votes.resolve(0.15, &ATTRS), SpeedCommand::Hold);
        assert_eq!(votes.resolve(0.6, &ATTRS), SpeedCommand::Decelerate);
        let mut speed = 0.0;
        for _ in 0..20 {
            speed = votes.resolve(speed, &ATTRS).apply(speed, &ATTRS);
            assert!(speed <= 2.0 * ATTRS.max_decel + 1e-9);
        }
        assert!(speed >= ATTRS.max_decel);
    }

    #[test]
    fn slow_band() {
        let mut votes = SpeedVotes::default();
        votes.slow();
        assert_eq!(votes.resolve(0.8, &ATTRS), SpeedCommand::Decelerate);
        assert_eq!(votes.resolve(0.2, &ATTRS), SpeedCommand::Hold);
        votes.speed_up(false);
        let cmd = votes.resolve(0.48, &ATTRS);
        assert_approx_eq!(cmd.apply(0.48, &ATTRS), SLOW_SPEED);
    }

    #[test]
    fn speed_stays_in_bounds() {
        let mut votes = SpeedVotes::default();
        votes.speed_up(false);
        let mut speed = 0.0;
        for _ in 0..100 {
            let next = votes.resolve(speed, &ATTRS).apply(speed, &ATTRS);
            assert!(next - speed <= ATTRS.max_accel + 1e-9);
            speed = next;
        }
        assert_approx_eq!(speed, ATTRS.max_speed);
        votes.reset();
        assert_eq!(votes.resolve(speed, &ATTRS), SpeedCommand::Hold);
    }

    #[test]
    fn stopping_distances() {
        assert_approx_eq!(stopping_distance(1.0, 0.1), 5.5);
        assert_approx_eq!(stopping_distance(0.1, 0.1), MIN_STOPPING_DISTANCE);
        assert_approx_eq!(stopping_distance(0.0, 0.1), MIN_STOPPING_DISTANCE);
    }

    #[test]
    fn kinematic_projection() {
        // From standstill: 0.025, 0.075, 0.125, ...
        assert_eq!(steps_to_cover(0.09, 0.0, &ATTRS, 100), Some(2));
        assert_eq!(steps_to_cover(10.0, 1.0, &ATTRS, 100), Some(10));
        assert_eq!(steps_to_cover(1000.0, 0.0, &ATTRS, 100), None);
    }
}
