//! Sensor and footprint traces, collected per step when the `debug` feature is on.

use crate::math::{Point2d, Quad};
#[cfg(feature = "debug")]
use serde_json::json;

#[cfg(feature = "debug")]
thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

/// Traces a sensor ray from its origin to what it hit.
#[allow(unused)]
pub fn debug_line(name: &str, from: Point2d, to: Point2d) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "line",
            "name": name,
            "from": [from.x, from.y],
            "to": [to.x, to.y],
        }))
    })
}

/// Traces a footprint polygon.
#[allow(unused)]
pub fn debug_quad(name: &str, quad: &Quad) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        let corners: Vec<[f64; 2]> = quad.corners().iter().map(|p| [p.x, p.y]).collect();
        frame.borrow_mut().push(json!({
            "type": "quad",
            "name": name,
            "corners": corners,
        }))
    })
}

/// Takes everything traced since the last call.
#[cfg(feature = "debug")]
pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
