//! Common types used throughout multibot_planning

use std::fmt;

use nalgebra::{Vector2, Vector4};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Distance and heading from `self` to `other`.
    pub fn distance_and_angle(&self, other: &Point2D) -> (f64, f64) {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx.hypot(dy), dy.atan2(dx))
    }

    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Point reached by travelling `dist` from `self` along heading `theta`.
    pub fn offset(&self, dist: f64, theta: f64) -> Point2D {
        Point2D::new(self.x + dist * theta.cos(), self.y + dist * theta.sin())
    }

    pub fn translate(&self, v: &Vector2<f64>) -> Point2D {
        Point2D::new(self.x + v[0], self.y + v[1])
    }
}

impl fmt::Display for Point2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(f64, f64)> for Point2D {
    fn from(tuple: (f64, f64)) -> Self {
        Self { x: tuple.0, y: tuple.1 }
    }
}

impl From<Vector2<f64>> for Point2D {
    fn from(v: Vector2<f64>) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

/// Point-mass robot state: position and velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RobotState {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

impl RobotState {
    pub fn new(x: f64, y: f64, vx: f64, vy: f64) -> Self {
        Self { x, y, vx, vy }
    }

    /// State at rest at `p`.
    pub fn at_rest(p: Point2D) -> Self {
        Self { x: p.x, y: p.y, vx: 0.0, vy: 0.0 }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.vx, self.vy)
    }

    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.x, self.y, self.vx, self.vy)
    }
}

impl From<Vector4<f64>> for RobotState {
    fn from(v: Vector4<f64>) -> Self {
        Self { x: v[0], y: v[1], vx: v[2], vy: v[3] }
    }
}

/// Identifier of a robot inside a [`crate::robot::Fleet`].
pub type RobotId = usize;

/// Read-only view of another robot, frozen at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotSnapshot {
    pub id: RobotId,
    pub state: RobotState,
    pub radius: f64,
}

impl RobotSnapshot {
    pub fn position(&self) -> Point2D {
        self.state.position()
    }
}

/// Radius around another robot or obstacle that a robot keeps clear of.
///
/// Shared by the velocity-obstacle cones and the tree's moving-obstacle
/// checks so both strategies agree on what "too close" means.
pub fn avoidance_radius(robot_radius: f64, fos: f64) -> f64 {
    (2.0 * robot_radius + fos) * robot_radius
}

/// Path represented as a sequence of 2D points
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path2D {
    pub points: Vec<Point2D>,
}

impl Path2D {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_points(points: Vec<Point2D>) -> Self {
        Self { points }
    }

    pub fn push(&mut self, point: Point2D) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn x_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    pub fn y_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }

    pub fn segments(&self) -> impl Iterator<Item = (Point2D, Point2D)> + '_ {
        self.points.windows(2).map(|w| (w[0], w[1]))
    }

    pub fn total_length(&self) -> f64 {
        self.segments().map(|(a, b)| a.distance(&b)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_point2d_distance() {
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(3.0, 4.0);
        assert_relative_eq!(p1.distance(&p2), 5.0);
    }

    #[test]
    fn test_distance_and_angle() {
        let (d, theta) = Point2D::new(1.0, 1.0).distance_and_angle(&Point2D::new(1.0, 3.0));
        assert_relative_eq!(d, 2.0);
        assert_relative_eq!(theta, std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn test_path2d_total_length() {
        let path = Path2D::from_points(vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(1.0, 1.0),
        ]);
        assert_relative_eq!(path.total_length(), 2.0);
    }

    #[test]
    fn test_avoidance_radius_matches_fos_margin() {
        assert_relative_eq!(avoidance_radius(0.5, 2.0), 1.5);
        assert_relative_eq!(avoidance_radius(0.5, 1.0), 1.0);
    }
}
