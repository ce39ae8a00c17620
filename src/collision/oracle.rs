//! Segment and point queries against the obstacle set
//!
//! Every query inflates obstacles by a fixed safety margin `delta`. The
//! checker keeps its own copy of the obstacle lists; call
//! [`CollisionChecker::sync`] (or `update_obs`) to follow environment edits.

use nalgebra::Vector2;

use crate::common::Point2D;
use crate::environment::{Environment, Obstacle};

/// Safety margin added around every obstacle
pub const DEFAULT_DELTA: f64 = 0.5;

/// Collision and visibility oracle
#[derive(Debug, Clone)]
pub struct CollisionChecker {
    pub delta: f64,
    obs_circle: Vec<Obstacle>,
    obs_rectangle: Vec<Obstacle>,
    obs_boundary: Vec<Obstacle>,
    revision: Option<u64>,
}

impl CollisionChecker {
    /// Checker with no obstacles.
    pub fn new(delta: f64) -> Self {
        Self {
            delta,
            obs_circle: Vec::new(),
            obs_rectangle: Vec::new(),
            obs_boundary: Vec::new(),
            revision: None,
        }
    }

    pub fn from_environment(env: &Environment) -> Self {
        let mut checker = Self::new(DEFAULT_DELTA);
        checker.sync(env);
        checker
    }

    /// Replaces the cached obstacle lists.
    pub fn update_obs(&mut self, obs_cir: &[Obstacle], obs_bound: &[Obstacle], obs_rec: &[Obstacle]) {
        self.obs_circle = obs_cir.to_vec();
        self.obs_boundary = obs_bound.to_vec();
        self.obs_rectangle = obs_rec.to_vec();
    }

    /// Re-reads the environment if it changed since the last sync.
    ///
    /// Returns `true` when the cached lists were refreshed.
    pub fn sync(&mut self, env: &Environment) -> bool {
        if self.revision == Some(env.revision()) {
            return false;
        }
        self.update_obs(env.circles(), env.boundaries(), env.rectangles());
        self.revision = Some(env.revision());
        true
    }

    /// Inflated corners of every rectangle and boundary, in
    /// bottom-left, bottom-right, top-right, top-left order.
    pub fn get_obs_vertex(&self) -> Vec<[Point2D; 4]> {
        self.obs_rectangle
            .iter()
            .chain(self.obs_boundary.iter())
            .filter_map(|o| o.inflated_vertices(self.delta))
            .collect()
    }

    /// Where the ray `o + t * d` crosses edge `a -> b`, if it does so
    /// ahead of `o` and no further than the segment `start -> end`.
    pub fn ray_edge_intersection(
        &self,
        start: &Point2D,
        end: &Point2D,
        o: &Point2D,
        d: &Vector2<f64>,
        a: &Point2D,
        b: &Point2D,
    ) -> Option<Point2D> {
        let v1 = Vector2::new(o.x - a.x, o.y - a.y);
        let v2 = Vector2::new(b.x - a.x, b.y - a.y);
        let v3 = Vector2::new(-d[1], d[0]);

        let div = v2.dot(&v3);
        if div == 0.0 {
            return None;
        }

        let t1 = v2.perp(&v1) / div;
        let t2 = v1.dot(&v3) / div;

        if t1 >= 0.0 && (0.0..=1.0).contains(&t2) {
            let shot = o.translate(&(d * t1));
            if start.distance(&shot) <= start.distance(end) {
                return Some(shot);
            }
        }
        None
    }

    pub fn is_intersect_rec(
        &self,
        start: &Point2D,
        end: &Point2D,
        o: &Point2D,
        d: &Vector2<f64>,
        a: &Point2D,
        b: &Point2D,
    ) -> bool {
        self.ray_edge_intersection(start, end, o, d, a, b).is_some()
    }

    /// Segment `ln1 -> ln2` against the circle at `a` with radius `r`.
    pub fn is_intersect_circle(&self, ln1: &Point2D, ln2: &Point2D, a: &Point2D, r: f64) -> bool {
        // fast preliminary check
        let unsafe_dist = r + ln1.distance(ln2) + self.delta;
        if a.distance(ln2) > unsafe_dist || a.distance(ln1) > unsafe_dist {
            return false;
        }

        point_segment_distance(a, ln1, ln2) <= r
    }

    pub fn is_collision(&self, start: &Point2D, end: &Point2D) -> bool {
        if self.is_inside_obs(start) || self.is_inside_obs(end) {
            return true;
        }

        let (o, d) = get_ray(start, end);
        for [v1, v2, v3, v4] in self.get_obs_vertex() {
            if self.crosses_polygon(start, end, &o, &d, &[v1, v2, v3, v4]) {
                return true;
            }
        }

        self.obs_circle.iter().any(|c| match *c {
            Obstacle::Circle { x, y, r } => self.is_intersect_circle(start, end, &Point2D::new(x, y), r),
            _ => false,
        })
    }

    pub fn is_inside_obs(&self, node: &Point2D) -> bool {
        self.obs_circle
            .iter()
            .chain(self.obs_rectangle.iter())
            .chain(self.obs_boundary.iter())
            .any(|o| o.contains(node, self.delta))
    }

    /// [`Self::is_collision`] with circles held to the `r + delta` margin that
    /// [`Self::is_inside_obs`] applies to points, so no point of a clear
    /// segment is itself inside an obstacle.
    pub fn is_collision_with_clearance(&self, start: &Point2D, end: &Point2D) -> bool {
        self.is_collision(start, end) || self.obs_circle.iter().any(|c| self.encroaches(c, start, end))
    }

    /// Same test as [`Self::is_collision`] restricted to a single obstacle.
    pub fn obstacle_blocks(&self, obs: &Obstacle, start: &Point2D, end: &Point2D) -> bool {
        if obs.contains(start, self.delta) || obs.contains(end, self.delta) {
            return true;
        }
        match *obs {
            Obstacle::Circle { x, y, r } => self.is_intersect_circle(start, end, &Point2D::new(x, y), r),
            _ => {
                let (o, d) = get_ray(start, end);
                obs.inflated_vertices(self.delta)
                    .map_or(false, |vertex| self.crosses_polygon(start, end, &o, &d, &vertex))
            }
        }
    }

    /// [`Self::obstacle_blocks`] with the circle margin of
    /// [`Self::is_collision_with_clearance`].
    pub fn obstacle_blocks_with_clearance(&self, obs: &Obstacle, start: &Point2D, end: &Point2D) -> bool {
        self.obstacle_blocks(obs, start, end) || self.encroaches(obs, start, end)
    }

    fn encroaches(&self, obs: &Obstacle, start: &Point2D, end: &Point2D) -> bool {
        match *obs {
            Obstacle::Circle { x, y, r } => point_segment_distance(&Point2D::new(x, y), start, end) <= r + self.delta,
            _ => false,
        }
    }

    fn crosses_polygon(
        &self,
        start: &Point2D,
        end: &Point2D,
        o: &Point2D,
        d: &Vector2<f64>,
        vertex: &[Point2D; 4],
    ) -> bool {
        (0..4).any(|i| self.is_intersect_rec(start, end, o, d, &vertex[i], &vertex[(i + 1) % 4]))
    }
}

/// Origin and direction of the segment `start -> end`.
pub fn get_ray(start: &Point2D, end: &Point2D) -> (Point2D, Vector2<f64>) {
    (*start, Vector2::new(end.x - start.x, end.y - start.y))
}

/// Euclidean distance from `p` to the closed segment `a -> b`.
pub fn point_segment_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    let ab = Vector2::new(b.x - a.x, b.y - a.y);
    let ap = Vector2::new(p.x - a.x, p.y - a.y);
    let len_sq = ab.norm_squared();
    if len_sq == 0.0 {
        return ap.norm();
    }
    let t = (ap.dot(&ab) / len_sq).clamp(0.0, 1.0);
    (ap - ab * t).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn checker_with(obstacles: Vec<Obstacle>) -> CollisionChecker {
        let env = Environment::with_obstacles((0.0, 50.0), (0.0, 30.0), obstacles);
        CollisionChecker::from_environment(&env)
    }

    #[test]
    fn test_open_space_segment_is_free() {
        let checker = checker_with(vec![Obstacle::circle(25.0, 15.0, 2.0)]);
        assert!(!checker.is_collision(&Point2D::new(5.0, 5.0), &Point2D::new(15.0, 5.0)));
    }

    #[test]
    fn test_segment_through_circle_center_collides() {
        let checker = checker_with(vec![Obstacle::circle(25.0, 15.0, 2.0)]);
        assert!(checker.is_collision(&Point2D::new(20.0, 15.0), &Point2D::new(30.0, 15.0)));
    }

    #[test]
    fn test_circle_prefilter_rejects_far_segments() {
        let checker = CollisionChecker::new(0.5);
        let far = checker.is_intersect_circle(
            &Point2D::new(0.0, 0.0),
            &Point2D::new(1.0, 0.0),
            &Point2D::new(10.0, 0.0),
            2.0,
        );
        assert!(!far);
    }

    #[test]
    fn test_segment_crossing_vertical_edge() {
        let checker = CollisionChecker::new(0.5);
        let start = Point2D::new(0.0, 0.0);
        let end = Point2D::new(10.0, 0.0);
        let (o, d) = get_ray(&start, &end);
        let a = Point2D::new(5.0, -5.0);
        let b = Point2D::new(5.0, 5.0);

        assert!(checker.is_intersect_rec(&start, &end, &o, &d, &a, &b));
        let shot = checker.ray_edge_intersection(&start, &end, &o, &d, &a, &b).unwrap();
        assert_abs_diff_eq!(shot.x, 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shot.y, 0.0, epsilon = 1e-9);

        // winding of the edge does not matter
        assert!(checker.is_intersect_rec(&start, &end, &o, &d, &b, &a));
    }

    #[test]
    fn test_edge_beyond_segment_end_is_ignored() {
        let checker = CollisionChecker::new(0.5);
        let start = Point2D::new(0.0, 0.0);
        let end = Point2D::new(4.0, 0.0);
        let (o, d) = get_ray(&start, &end);
        let a = Point2D::new(5.0, -5.0);
        let b = Point2D::new(5.0, 5.0);
        assert!(!checker.is_intersect_rec(&start, &end, &o, &d, &a, &b));
    }

    #[test]
    fn test_parallel_edge_never_blocks() {
        let checker = CollisionChecker::new(0.5);
        let start = Point2D::new(0.0, 0.0);
        let end = Point2D::new(10.0, 0.0);
        let (o, d) = get_ray(&start, &end);
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 0.0);
        assert!(!checker.is_intersect_rec(&start, &end, &o, &d, &a, &b));
    }

    #[test]
    fn test_clearance_covers_circle_margin() {
        let checker = checker_with(vec![Obstacle::circle(10.0, 6.0, 3.0)]);
        // passes 3.4 from the center: outside r, inside r + delta
        let start = Point2D::new(7.6, 9.4);
        let end = Point2D::new(12.4, 9.4);
        assert!(!checker.is_collision(&start, &end));
        assert!(checker.is_collision_with_clearance(&start, &end));
        assert!(checker.is_inside_obs(&Point2D::new(10.0, 9.4)));

        let high = (Point2D::new(7.6, 9.6), Point2D::new(12.4, 9.6));
        assert!(!checker.is_collision_with_clearance(&high.0, &high.1));

        let circle = Obstacle::circle(10.0, 6.0, 3.0);
        assert!(!checker.obstacle_blocks(&circle, &start, &end));
        assert!(checker.obstacle_blocks_with_clearance(&circle, &start, &end));
    }

    #[test]
    fn test_segment_through_rectangle_collides() {
        let checker = checker_with(vec![Obstacle::rectangle(20.0, 10.0, 2.0, 10.0)]);
        assert!(checker.is_collision(&Point2D::new(15.0, 15.0), &Point2D::new(25.0, 15.0)));
        assert!(!checker.is_collision(&Point2D::new(15.0, 25.0), &Point2D::new(25.0, 25.0)));
    }

    #[test]
    fn test_inside_obs_uses_inflation() {
        let checker = checker_with(vec![
            Obstacle::circle(10.0, 10.0, 1.0),
            Obstacle::rectangle(20.0, 20.0, 2.0, 2.0),
            Obstacle::boundary(0.0, 0.0, 1.0, 30.0),
        ]);
        assert!(checker.is_inside_obs(&Point2D::new(11.4, 10.0)));
        assert!(checker.is_inside_obs(&Point2D::new(22.4, 22.4)));
        assert!(checker.is_inside_obs(&Point2D::new(1.4, 12.0)));
        assert!(!checker.is_inside_obs(&Point2D::new(1.6, 12.0)));
    }

    #[test]
    fn test_get_obs_vertex_inflates_rectangles() {
        let checker = checker_with(vec![Obstacle::rectangle(2.0, 3.0, 4.0, 1.0)]);
        let vertices = checker.get_obs_vertex();
        assert_eq!(vertices.len(), 1);
        assert_eq!(vertices[0][0], Point2D::new(1.5, 2.5));
        assert_eq!(vertices[0][2], Point2D::new(6.5, 4.5));
    }

    #[test]
    fn test_obstacle_blocks_single_obstacle() {
        let checker = CollisionChecker::new(0.5);
        let rect = Obstacle::rectangle(4.0, -1.0, 2.0, 2.0);
        assert!(checker.obstacle_blocks(&rect, &Point2D::new(0.0, 0.0), &Point2D::new(10.0, 0.0)));
        assert!(!checker.obstacle_blocks(&rect, &Point2D::new(0.0, 5.0), &Point2D::new(10.0, 5.0)));
    }

    #[test]
    fn test_sync_follows_revision() {
        let mut env = Environment::empty((0.0, 20.0), (0.0, 20.0));
        let mut checker = CollisionChecker::from_environment(&env);
        assert!(!checker.sync(&env));

        env.add_new_obstacle(Obstacle::circle(10.0, 10.0, 1.0)).unwrap();
        assert!(checker.sync(&env));
        assert!(checker.is_inside_obs(&Point2D::new(10.0, 10.0)));
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(4.0, 0.0);
        assert_abs_diff_eq!(point_segment_distance(&Point2D::new(2.0, 3.0), &a, &b), 3.0);
        assert_abs_diff_eq!(point_segment_distance(&Point2D::new(7.0, 4.0), &a, &b), 5.0);
        assert_abs_diff_eq!(point_segment_distance(&Point2D::new(1.0, 1.0), &a, &a), 2f64.sqrt());
    }
}
