use crate::math::heading_delta;

/// The heading change which turns from `heading` towards `bearing` by the
/// shorter arc, clamped to `max_turn` degrees.
pub fn turn_towards(heading: f64, bearing: f64, max_turn: f64) -> f64 {
    heading_delta(heading, bearing).clamp(-max_turn, max_turn)
}

/// As [turn_towards], but never turning past `limit`.
/// If `limit` lies the other way round, the turn is unaffected.
pub fn turn_towards_limited(heading: f64, bearing: f64, max_turn: f64, limit: f64) -> f64 {
    let turn = turn_towards(heading, bearing, max_turn);
    let to_limit = heading_delta(heading, limit);
    if turn * to_limit >= 0.0 && turn.abs() > to_limit.abs() {
        to_limit
    } else {
        turn
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn clamps_to_turn_rate() {
        assert_approx_eq!(turn_towards(0.0, 90.0, 15.0), 15.0);
        assert_approx_eq!(turn_towards(0.0, 270.0, 15.0), -15.0);
        assert_approx_eq!(turn_towards(0.0, 5.0, 15.0), 5.0);
    }

    #[test]
    fn takes_shorter_arc_across_north() {
        assert_approx_eq!(turn_towards(350.0, 20.0, 45.0), 30.0);
        assert_approx_eq!(turn_towards(20.0, 350.0, 45.0), -30.0);
    }

    #[test]
    fn does_not_turn_past_limit() {
        // Turning left towards a bearing beyond the exit heading.
        assert_approx_eq!(turn_towards_limited(170.0, 200.0, 15.0, 180.0), 10.0);
        // Already at the limit: hold the heading.
        assert_approx_eq!(turn_towards_limited(180.0, 200.0, 15.0, 180.0), 0.0);
        // The limit lies the other way, so the turn is free.
        assert_approx_eq!(turn_towards_limited(90.0, 120.0, 15.0, 60.0), 15.0);
    }
}
