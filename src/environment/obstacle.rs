//! Obstacle shapes

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::common::Point2D;

/// Which collection an obstacle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeKind {
    Circle,
    Rectangle,
    Boundary,
}

/// Static obstacle geometry.
///
/// Rectangles and boundaries are axis-aligned with `(x, y)` at the
/// bottom-left corner. Boundaries behave exactly like rectangles for
/// collision purposes; they only differ in that they cannot be edited.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Obstacle {
    Circle { x: f64, y: f64, r: f64 },
    Rectangle { x: f64, y: f64, w: f64, h: f64 },
    Boundary { x: f64, y: f64, w: f64, h: f64 },
}

impl Obstacle {
    pub fn circle(x: f64, y: f64, r: f64) -> Self {
        Obstacle::Circle { x, y, r }
    }

    pub fn rectangle(x: f64, y: f64, w: f64, h: f64) -> Self {
        Obstacle::Rectangle { x, y, w, h }
    }

    pub fn boundary(x: f64, y: f64, w: f64, h: f64) -> Self {
        Obstacle::Boundary { x, y, w, h }
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            Obstacle::Circle { .. } => ShapeKind::Circle,
            Obstacle::Rectangle { .. } => ShapeKind::Rectangle,
            Obstacle::Boundary { .. } => ShapeKind::Boundary,
        }
    }

    /// Whether `p` lies inside the obstacle grown by `delta` on every side.
    pub fn contains(&self, p: &Point2D, delta: f64) -> bool {
        match *self {
            Obstacle::Circle { x, y, r } => (p.x - x).hypot(p.y - y) <= r + delta,
            Obstacle::Rectangle { x, y, w, h } | Obstacle::Boundary { x, y, w, h } => {
                let u = p.x - (x - delta);
                let v = p.y - (y - delta);
                (0.0..=w + 2.0 * delta).contains(&u) && (0.0..=h + 2.0 * delta).contains(&v)
            }
        }
    }

    /// Corners grown outward by `delta`, ordered bottom-left, bottom-right,
    /// top-right, top-left. `None` for circles.
    pub fn inflated_vertices(&self, delta: f64) -> Option<[Point2D; 4]> {
        match *self {
            Obstacle::Circle { .. } => None,
            Obstacle::Rectangle { x, y, w, h } | Obstacle::Boundary { x, y, w, h } => Some([
                Point2D::new(x - delta, y - delta),
                Point2D::new(x + w + delta, y - delta),
                Point2D::new(x + w + delta, y + h + delta),
                Point2D::new(x - delta, y + h + delta),
            ]),
        }
    }

    /// Smallest circle enclosing the un-inflated shape.
    pub fn bounding_circle(&self) -> (Point2D, f64) {
        match *self {
            Obstacle::Circle { x, y, r } => (Point2D::new(x, y), r),
            Obstacle::Rectangle { x, y, w, h } | Obstacle::Boundary { x, y, w, h } => {
                (Point2D::new(x + w / 2.0, y + h / 2.0), w.hypot(h) / 2.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_circle_contains_with_inflation() {
        let c = Obstacle::circle(0.0, 0.0, 1.0);
        assert!(c.contains(&Point2D::new(1.4, 0.0), 0.5));
        assert!(!c.contains(&Point2D::new(1.6, 0.0), 0.5));
        assert!(!c.contains(&Point2D::new(1.4, 0.0), 0.0));
    }

    #[test]
    fn test_rectangle_contains_with_inflation() {
        let r = Obstacle::rectangle(2.0, 2.0, 4.0, 2.0);
        assert!(r.contains(&Point2D::new(1.6, 3.0), 0.5));
        assert!(!r.contains(&Point2D::new(1.4, 3.0), 0.5));
        assert!(r.contains(&Point2D::new(6.5, 4.5), 0.5));
    }

    #[test]
    fn test_inflated_vertices_order() {
        let v = Obstacle::rectangle(0.0, 0.0, 2.0, 1.0).inflated_vertices(0.5).unwrap();
        assert_eq!(v[0], Point2D::new(-0.5, -0.5));
        assert_eq!(v[1], Point2D::new(2.5, -0.5));
        assert_eq!(v[2], Point2D::new(2.5, 1.5));
        assert_eq!(v[3], Point2D::new(-0.5, 1.5));
        assert!(Obstacle::circle(0.0, 0.0, 1.0).inflated_vertices(0.5).is_none());
    }

    #[test]
    fn test_bounding_circle_of_rectangle() {
        let (c, r) = Obstacle::boundary(0.0, 0.0, 6.0, 8.0).bounding_circle();
        assert_eq!(c, Point2D::new(3.0, 4.0));
        assert_relative_eq!(r, 5.0);
    }
}
