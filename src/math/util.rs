use super::{Point2d, Vector2d};

/// Rotates a vector 90 degrees anticlockwise.
pub fn rot90(vec: Vector2d) -> Vector2d {
    Vector2d::new(-vec.y, vec.x)
}

/// Wraps a heading in degrees into the range `[0, 360)`.
pub fn normalize_heading(deg: f64) -> f64 {
    let deg = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

/// The unit vector pointing along a heading in degrees,
/// where 0° is the positive x-axis and angles increase anticlockwise.
pub fn heading_vector(deg: f64) -> Vector2d {
    let rad = deg.to_radians();
    Vector2d::new(rad.cos(), rad.sin())
}

/// The bearing in degrees from one point to another.
pub fn bearing(from: Point2d, to: Point2d) -> f64 {
    let v = to - from;
    normalize_heading(v.y.atan2(v.x).to_degrees())
}

/// The signed shortest angular delta which turns `from` onto `to`,
/// in the range `(-180, 180]`. Positive values are anticlockwise.
pub fn heading_delta(from: f64, to: f64) -> f64 {
    let delta = normalize_heading(to - from);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// The absolute angle between two headings, in `[0, 180]`.
pub fn heading_difference(a: f64, b: f64) -> f64 {
    heading_delta(a, b).abs()
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn normalize_wraps() {
        assert_approx_eq!(normalize_heading(370.0), 10.0);
        assert_approx_eq!(normalize_heading(-90.0), 270.0);
        assert_approx_eq!(normalize_heading(360.0), 0.0);
    }

    #[test]
    fn delta_takes_shorter_arc() {
        assert_approx_eq!(heading_delta(350.0, 10.0), 20.0);
        assert_approx_eq!(heading_delta(10.0, 350.0), -20.0);
        assert_approx_eq!(heading_delta(0.0, 180.0), 180.0);
        assert_approx_eq!(heading_delta(90.0, 45.0), -45.0);
    }

    #[test]
    fn bearings() {
        let o = Point2d::new(0.0, 0.0);
        assert_approx_eq!(bearing(o, Point2d::new(1.0, 0.0)), 0.0);
        assert_approx_eq!(bearing(o, Point2d::new(0.0, 1.0)), 90.0);
        assert_approx_eq!(bearing(o, Point2d::new(-1.0, 0.0)), 180.0);
        assert_approx_eq!(bearing(o, Point2d::new(0.0, -1.0)), 270.0);
    }
}
