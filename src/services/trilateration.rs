//! Closed-form trilateration from exactly three anchors
//!
//! The first anchor is moved to the origin and the frame rotated so the second
//! anchor lies on the x-axis. In that frame the two distance constraints are
//! linear in `(rx, ry)`; the solution is mapped back through the frame's unit
//! vectors. Intermediates stay in full precision, only the output is rounded.

use crate::domain::error::PositioningError;
use crate::domain::types::{round_to, Point};

/// Relative threshold below which the third anchor counts as on the first-second baseline
const COLLINEAR_EPSILON: f64 = 1e-12;

/// An anchor position with its measured distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub position: Point,
    pub distance: f64,
}

impl Anchor {
    pub fn new(position: Point, distance: f64) -> Self {
        Self { position, distance }
    }
}

/// Trilateration solver with output rounding
#[derive(Debug, Clone, Copy)]
pub struct Trilaterator {
    decimals: u32,
}

impl Default for Trilaterator {
    fn default() -> Self {
        Self { decimals: 2 }
    }
}

impl Trilaterator {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    /// Solve for the point at the given distances from three non-collinear anchors
    pub fn solve(&self, anchors: [Anchor; 3]) -> Result<Point, PositioningError> {
        let raw = solve_unrounded(anchors)?;
        Ok(Point::new(round_to(raw.x, self.decimals), round_to(raw.y, self.decimals)))
    }
}

/// Full-precision solve; see [`Trilaterator::solve`]
pub fn solve_unrounded(anchors: [Anchor; 3]) -> Result<Point, PositioningError> {
    let [a, b, c] = anchors;

    let ab = b.position.sub(a.position);
    let ac = c.position.sub(a.position);

    let u = ab.norm();
    if u == 0.0 || !u.is_finite() {
        return Err(PositioningError::DegenerateGeometry(
            "first two anchors coincide".to_string(),
        ));
    }

    let ex = ab.scale(1.0 / u);
    let vx = ex.dot(ac);
    let dist_ac = ac.norm();

    // Pythagoras: the third anchor's height above the baseline
    let vy_sq = dist_ac * dist_ac - vx * vx;
    if vy_sq <= COLLINEAR_EPSILON * dist_ac.max(u).powi(2) {
        return Err(PositioningError::DegenerateGeometry(format!(
            "anchors are collinear (height term {:.3e})",
            vy_sq
        )));
    }
    let vy = vy_sq.sqrt();
    let v_sq = vx * vx + vy * vy;

    let (ra, rb, rc) = (a.distance, b.distance, c.distance);
    let rx = (ra * ra - rb * rb + u * u) / (2.0 * u);
    let ry = (ra * ra - rc * rc + v_sq - 2.0 * vx * rx) / (2.0 * vy);

    let ey_dir = ac.sub(ex.scale(vx));
    let ey = ey_dir.scale(1.0 / ey_dir.norm());

    let location = a.position.add(ex.scale(rx)).add(ey.scale(ry));
    if !location.x.is_finite() || !location.y.is_finite() {
        return Err(PositioningError::DegenerateGeometry(
            "solution is not finite".to_string(),
        ));
    }

    Ok(location)
}
