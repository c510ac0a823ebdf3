//! Planar geometry kernel
//!
//! Orientation test, segment intersection and ray-casting point-in-polygon.
//! Only sign comparisons are used, never numeric solving.

use crate::domain::types::Point;

/// Default x coordinate of the ray's far end. Must exceed every polygon's x-extent.
pub const DEFAULT_RAY_FAR_X: f64 = 10_000.0;

/// Turn direction of an ordered point triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Collinear,
    Clockwise,
    CounterClockwise,
}

/// Orientation of `(p1, p2, p3)` from the sign of the cross product `(p2-p1)×(p3-p2)`
#[inline]
pub fn orientation(p1: Point, p2: Point, p3: Point) -> Orientation {
    let cross = (p2.y - p1.y) * (p3.x - p2.x) - (p2.x - p1.x) * (p3.y - p2.y);

    if cross == 0.0 {
        Orientation::Collinear
    } else if cross > 0.0 {
        Orientation::Clockwise
    } else {
        Orientation::CounterClockwise
    }
}

/// Whether `point` lies inside the bounding box of `p1`–`p2`
///
/// Only a true on-segment test when the three points are collinear.
#[inline]
pub fn on_segment(p1: Point, point: Point, p2: Point) -> bool {
    point.x <= p1.x.max(p2.x)
        && point.x >= p1.x.min(p2.x)
        && point.y <= p1.y.max(p2.y)
        && point.y >= p1.y.min(p2.y)
}

/// Whether segment `p1`–`p2` crosses segment `p3`–`far`
pub fn segments_intersect(p1: Point, p2: Point, p3: Point, far: Point) -> bool {
    let o1 = orientation(p1, p2, p3);
    let o2 = orientation(p1, p2, far);
    let o3 = orientation(p3, far, p1);
    let o4 = orientation(p3, far, p2);

    // General case: each segment straddles the other
    if o1 != o2 && o3 != o4 {
        return true;
    }

    // Collinear special cases
    (o1 == Orientation::Collinear && on_segment(p1, p3, p2))
        || (o2 == Orientation::Collinear && on_segment(p1, far, p2))
        || (o3 == Orientation::Collinear && on_segment(p3, p1, far))
        || (o4 == Orientation::Collinear && on_segment(p3, p2, far))
}

/// Ray-casting containment test
///
/// Casts a horizontal ray from `point` to `(far_x, point.y)` and counts edge
/// crossings. Points on the boundary are inside. Polygons with fewer than
/// three vertices contain nothing.
pub fn point_in_polygon(polygon: &[Point], point: Point, far_x: f64) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let far = Point::new(far_x, point.y);
    let mut crossings = 0usize;

    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];

        if segments_intersect(a, b, point, far) {
            // Collinear with this edge: the answer is whether it sits on it
            if orientation(a, point, b) == Orientation::Collinear {
                return on_segment(a, point, b);
            }
            crossings += 1;
        }
    }

    crossings % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    fn inside(polygon: &[Point], x: f64, y: f64) -> bool {
        point_in_polygon(polygon, Point::new(x, y), DEFAULT_RAY_FAR_X)
    }

    #[test]
    fn test_orientation() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(4.0, 4.0);
        assert_eq!(orientation(a, b, Point::new(8.0, 8.0)), Orientation::Collinear);
        assert_eq!(orientation(a, b, Point::new(8.0, 0.0)), Orientation::Clockwise);
        assert_eq!(orientation(a, b, Point::new(0.0, 8.0)), Orientation::CounterClockwise);
    }

    #[test]
    fn test_on_segment_bounding_box() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert!(on_segment(a, Point::new(5.0, 0.0), b));
        assert!(on_segment(a, Point::new(10.0, 0.0), b));
        assert!(!on_segment(a, Point::new(11.0, 0.0), b));
    }

    #[test]
    fn test_segments_intersect() {
        let p = Point::new;
        // Crossing diagonals
        assert!(segments_intersect(p(0.0, 0.0), p(10.0, 10.0), p(0.0, 10.0), p(10.0, 0.0)));
        // Parallel, apart
        assert!(!segments_intersect(p(0.0, 0.0), p(10.0, 0.0), p(0.0, 5.0), p(10.0, 5.0)));
        // Touching at an endpoint
        assert!(segments_intersect(p(0.0, 0.0), p(10.0, 0.0), p(10.0, 0.0), p(20.0, 5.0)));
        // Collinear and overlapping
        assert!(segments_intersect(p(0.0, 0.0), p(10.0, 0.0), p(5.0, 0.0), p(20.0, 0.0)));
        // Collinear and disjoint
        assert!(!segments_intersect(p(0.0, 0.0), p(4.0, 0.0), p(5.0, 0.0), p(20.0, 0.0)));
    }

    #[test]
    fn test_point_in_square() {
        let sq = square();
        assert!(inside(&sq, 5.0, 5.0));
        assert!(!inside(&sq, 15.0, 5.0));
        assert!(!inside(&sq, -1.0, 5.0));
        assert!(!inside(&sq, 5.0, 11.0));
    }

    #[test]
    fn test_boundary_counts_as_inside() {
        let sq = square();
        assert!(inside(&sq, 0.0, 5.0));
        assert!(inside(&sq, 10.0, 5.0));
        assert!(inside(&sq, 5.0, 0.0));
    }

    #[test]
    fn test_degenerate_polygon_contains_nothing() {
        let line = vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)];
        assert!(!inside(&line, 5.0, 5.0));
        assert!(!inside(&line, 0.0, 0.0));
        assert!(!inside(&[], 0.0, 0.0));
    }

    #[test]
    fn test_invariant_to_vertex_rotation() {
        let sq = square();
        let probes = [(5.0, 5.0), (15.0, 5.0), (0.0, 5.0), (2.5, 7.5), (-3.0, 2.0), (9.9, 0.1)];

        for (x, y) in probes {
            let expected = inside(&sq, x, y);
            for shift in 1..sq.len() {
                let mut rotated = sq.clone();
                rotated.rotate_left(shift);
                assert_eq!(inside(&rotated, x, y), expected, "point ({x}, {y}) shift {shift}");
            }
        }
    }

    #[test]
    fn test_concave_polygon() {
        // U shape opening upwards
        let u = vec![
            Point::new(0.0, 0.0),
            Point::new(9.0, 0.0),
            Point::new(9.0, 9.0),
            Point::new(6.0, 9.0),
            Point::new(6.0, 3.0),
            Point::new(3.0, 3.0),
            Point::new(3.0, 9.0),
            Point::new(0.0, 9.0),
        ];
        assert!(inside(&u, 1.5, 6.5));
        assert!(inside(&u, 7.5, 6.5));
        assert!(!inside(&u, 4.5, 6.5));
        assert!(inside(&u, 4.5, 1.5));
    }
}
