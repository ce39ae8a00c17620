//! Velocity Obstacle local controller
//!
//! Each tick the controller builds one forbidden velocity cone per nearby
//! robot or circle obstacle, samples a fixed polar grid of candidate
//! velocities, drops every candidate that falls inside a cone or whose
//! motion this tick would hit the obstacle set, and commands the survivor
//! closest to the straight-to-goal velocity. With no survivor it stops.

use std::f64::consts::PI;

use itertools::iproduct;
use nalgebra::{Matrix3, Vector2, Vector3};
use ordered_float::OrderedFloat;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::collision::CollisionChecker;
use crate::common::{
    avoidance_radius, Motion, Planner, PlanningError, PlanningResult, Point2D, RobotSnapshot, StepContext,
};
use crate::environment::{Environment, Obstacle};

/// Inside `robot_radius / ARRIVAL_ZONE_DIVISOR` of the goal the desired
/// velocity drops to zero and the controller docks instead of steering.
pub const ARRIVAL_ZONE_DIVISOR: f64 = 5.0;

/// Configuration for the velocity obstacle controller
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VelocityObstacleConfig {
    pub robot_radius: f64,
    /// Time step: displacement per tick is `velocity * move_dist`
    pub move_dist: f64,
    pub vmax: f64,
    /// Factor of safety around static circle obstacles
    pub obstacle_fos: f64,
    /// Factor of safety around other robots
    pub robot_fos: f64,
    /// How far away the robot perceives obstacles
    pub obstacle_radius: f64,
    pub angle_samples: usize,
    pub speed_samples: usize,
}

impl Default for VelocityObstacleConfig {
    fn default() -> Self {
        Self {
            robot_radius: 0.5,
            move_dist: 0.01,
            vmax: 1.0,
            obstacle_fos: 1.0,
            robot_fos: 2.0,
            obstacle_radius: 20.0,
            angle_samples: 20,
            speed_samples: 5,
        }
    }
}

impl VelocityObstacleConfig {
    pub fn with_robot_radius(mut self, robot_radius: f64) -> Self {
        self.robot_radius = robot_radius;
        self
    }

    pub fn with_move_dist(mut self, move_dist: f64) -> Self {
        self.move_dist = move_dist;
        self
    }

    pub fn with_vmax(mut self, vmax: f64) -> Self {
        self.vmax = vmax;
        self
    }

    pub fn with_fos(mut self, obstacle_fos: f64, robot_fos: f64) -> Self {
        self.obstacle_fos = obstacle_fos;
        self.robot_fos = robot_fos;
        self
    }

    pub fn with_obstacle_radius(mut self, obstacle_radius: f64) -> Self {
        self.obstacle_radius = obstacle_radius;
        self
    }

    pub fn with_samples(mut self, angle_samples: usize, speed_samples: usize) -> Self {
        self.angle_samples = angle_samples;
        self.speed_samples = speed_samples;
        self
    }

    pub fn validate(&self) -> PlanningResult<()> {
        let positive = [
            ("robot_radius", self.robot_radius),
            ("move_dist", self.move_dist),
            ("vmax", self.vmax),
            ("obstacle_radius", self.obstacle_radius),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(PlanningError::InvalidParameter(format!("{} must be positive", name)));
        }
        if self.obstacle_fos < 0.0 || self.robot_fos < 0.0 {
            return Err(PlanningError::InvalidParameter("factors of safety must be non-negative".to_string()));
        }
        if self.angle_samples < 2 || self.speed_samples < 2 {
            return Err(PlanningError::InvalidParameter(
                "velocity grid needs at least 2 angles and 2 speeds".to_string(),
            ));
        }
        Ok(())
    }
}

/// Open half-plane `a . v < b` in velocity space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfPlane {
    pub a: Vector2<f64>,
    pub b: f64,
}

impl HalfPlane {
    pub fn contains(&self, v: &Vector2<f64>) -> bool {
        self.a.dot(v) < self.b
    }
}

/// Forbidden velocity cone: the intersection of its two half-planes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityCone {
    pub left: HalfPlane,
    pub right: HalfPlane,
}

impl VelocityCone {
    pub fn contains(&self, v: &Vector2<f64>) -> bool {
        self.left.contains(v) && self.right.contains(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// What the controller settled on this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VelocityChoice {
    /// Best surviving grid velocity
    Steer(Vector2<f64>),
    /// Final approach inside the arrival zone
    Dock(Vector2<f64>),
    /// Every candidate was forbidden
    Infeasible,
}

impl VelocityChoice {
    pub fn velocity(&self) -> Vector2<f64> {
        match *self {
            VelocityChoice::Steer(v) | VelocityChoice::Dock(v) => v,
            VelocityChoice::Infeasible => Vector2::zeros(),
        }
    }
}

/// Velocity obstacle controller for one robot
#[derive(Debug, Clone)]
pub struct VelocityObstacle {
    config: VelocityObstacleConfig,
    /// Polar grid of candidate velocities; tick-invariant
    v_sample: Vec<Vector2<f64>>,
    desired_vel: Vector2<f64>,
    cmd_vel: Vector2<f64>,
}

impl VelocityObstacle {
    pub fn new(config: VelocityObstacleConfig) -> PlanningResult<Self> {
        config.validate()?;
        let v_sample = Self::sample_velocities(&config);
        Ok(Self {
            config,
            v_sample,
            desired_vel: Vector2::zeros(),
            cmd_vel: Vector2::zeros(),
        })
    }

    pub fn config(&self) -> &VelocityObstacleConfig {
        &self.config
    }

    pub fn desired_velocity(&self) -> Vector2<f64> {
        self.desired_vel
    }

    pub fn command_velocity(&self) -> Vector2<f64> {
        self.cmd_vel
    }

    /// `angle_samples` headings evenly spaced over [0, 2pi] crossed with
    /// `speed_samples` speeds evenly spaced over [0, vmax].
    fn sample_velocities(config: &VelocityObstacleConfig) -> Vec<Vector2<f64>> {
        let th = linspace(0.0, 2.0 * PI, config.angle_samples);
        let vel = linspace(0.0, config.vmax, config.speed_samples);
        iproduct!(th, vel)
            .map(|(theta, speed)| Vector2::new(speed * theta.cos(), speed * theta.sin()))
            .collect()
    }

    /// Straight-line velocity toward the goal at `vmax`; zero inside the arrival zone.
    pub fn compute_desired_velocity(&self, position: &Point2D, goal: &Point2D) -> Vector2<f64> {
        let disp_vec = goal.to_vector() - position.to_vector();
        let norm = disp_vec.norm();
        if norm < self.config.robot_radius / ARRIVAL_ZONE_DIVISOR {
            return Vector2::zeros();
        }
        disp_vec / norm * self.config.vmax
    }

    /// Other robots and circle obstacles whose centers lie within `obstacle_radius`.
    pub fn nearby_obstacles<'a>(
        &self,
        position: &Point2D,
        others: &'a [RobotSnapshot],
        env: &'a Environment,
    ) -> (Vec<&'a RobotSnapshot>, Vec<&'a Obstacle>) {
        let range = self.config.obstacle_radius;
        let robots = others
            .iter()
            .filter(|r| r.position().distance(position) < range)
            .collect();
        let circles = env
            .circles()
            .iter()
            .filter(|o| o.bounding_circle().0.distance(position) < range)
            .collect();
        (robots, circles)
    }

    /// Cone of velocities that close in on an obstacle at `p_b` moving with `v_b`.
    ///
    /// `dist_ba` is the distance used for the cone half-width; it is clamped
    /// to at least the safe distance so the arcsine stays defined.
    pub fn velocity_cone(&self, p_a: &Point2D, p_b: &Point2D, v_b: &Vector2<f64>, dist_ba: f64, fos: f64) -> VelocityCone {
        let safe_distance = avoidance_radius(self.config.robot_radius, fos);
        let disp_ba = p_a.to_vector() - p_b.to_vector();
        let theta_ba = disp_ba[1].atan2(disp_ba[0]);
        let dist_ba = dist_ba.max(safe_distance);
        let phi_obst = (safe_distance / dist_ba).asin();

        VelocityCone {
            left: create_constraints(v_b, theta_ba + phi_obst, Side::Left),
            right: create_constraints(v_b, theta_ba - phi_obst, Side::Right),
        }
    }

    /// One cone per perceived robot and circle obstacle.
    pub fn build_cones(&self, position: &Point2D, others: &[RobotSnapshot], env: &Environment) -> Vec<VelocityCone> {
        let (robots, circles) = self.nearby_obstacles(position, others, env);
        let mut cones = Vec::with_capacity(robots.len() + circles.len());

        for robot in robots {
            let p_b = robot.position();
            let dist_ba = position.distance(&p_b);
            cones.push(self.velocity_cone(position, &p_b, &robot.state.velocity(), dist_ba, self.config.robot_fos));
        }
        for circle in circles {
            let (p_b, r) = circle.bounding_circle();
            let dist_ba = position.distance(&p_b) - r;
            cones.push(self.velocity_cone(position, &p_b, &Vector2::zeros(), dist_ba, self.config.obstacle_fos));
        }
        cones
    }

    /// Candidates lying outside every cone.
    pub fn check_constraints(&self, v_sample: &[Vector2<f64>], cones: &[VelocityCone]) -> Vec<Vector2<f64>> {
        v_sample
            .iter()
            .filter(|v| !cones.iter().any(|cone| cone.contains(v)))
            .copied()
            .collect()
    }

    fn motion_is_clear(&self, oracle: &CollisionChecker, position: &Point2D, v: &Vector2<f64>) -> bool {
        if *v == Vector2::zeros() {
            return true;
        }
        let next = position.translate(&(v * self.config.move_dist));
        !oracle.is_collision(position, &next)
    }

    pub fn compute_velocity(&mut self, ctx: &StepContext<'_>) -> VelocityChoice {
        let position = ctx.position();
        let cones = self.build_cones(&position, ctx.others, ctx.environment);

        if self.desired_vel == Vector2::zeros() {
            let remaining = ctx.goal.to_vector() - position.to_vector();
            let mut dock = remaining / self.config.move_dist;
            if dock.norm() > self.config.vmax {
                dock = dock.normalize() * self.config.vmax;
            }
            let allowed = !cones.iter().any(|cone| cone.contains(&dock))
                && self.motion_is_clear(ctx.oracle, &position, &dock);
            return if allowed {
                VelocityChoice::Dock(dock)
            } else {
                VelocityChoice::Infeasible
            };
        }

        let desired = self.desired_vel;
        // ties keep the earliest grid entry
        let best = self
            .check_constraints(&self.v_sample, &cones)
            .into_iter()
            .filter(|v| self.motion_is_clear(ctx.oracle, &position, v))
            .min_by_key(|v| OrderedFloat((v - desired).norm()));

        match best {
            Some(v) => VelocityChoice::Steer(v),
            None => {
                debug!(cones = cones.len(), "no feasible velocity, stopping");
                VelocityChoice::Infeasible
            }
        }
    }
}

impl Planner for VelocityObstacle {
    fn name(&self) -> &'static str {
        "velocity_obstacle"
    }

    fn plan(&mut self, ctx: &StepContext<'_>) -> Motion {
        let position = ctx.position();
        self.desired_vel = self.compute_desired_velocity(&position, &ctx.goal);
        let choice = self.compute_velocity(ctx);
        self.cmd_vel = choice.velocity();
        trace!(?choice, "velocity obstacle choice");

        match choice {
            VelocityChoice::Infeasible => Motion::Hold,
            _ => Motion::Move {
                position: position.translate(&(self.cmd_vel * self.config.move_dist)),
                velocity: self.cmd_vel,
            },
        }
    }
}

/// Half-plane bounded by the ray at `angle` through the origin, shifted by
/// `translation`. "Inside" is the side facing into the cone.
pub fn create_constraints(translation: &Vector2<f64>, angle: f64, side: Side) -> HalfPlane {
    let origin = Vector3::new(0.0, 0.0, 1.0);
    let point = Vector3::new(angle.cos(), angle.sin(), 0.0);
    let mut line = translate_line(&origin.cross(&point), translation);
    if side == Side::Left {
        line *= -1.0;
    }

    HalfPlane {
        a: Vector2::new(line[0], line[1]),
        b: -line[2],
    }
}

/// Moves a homogeneous line by `translation`.
pub fn translate_line(line: &Vector3<f64>, translation: &Vector2<f64>) -> Vector3<f64> {
    let mut matrix = Matrix3::identity();
    matrix[(2, 0)] = -translation[0];
    matrix[(2, 1)] = -translation[1];
    matrix * line
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    let step = (stop - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RobotState;
    use approx::assert_relative_eq;

    fn controller() -> VelocityObstacle {
        VelocityObstacle::new(VelocityObstacleConfig::default()).unwrap()
    }

    fn context<'a>(
        state: &'a RobotState,
        goal: Point2D,
        env: &'a Environment,
        oracle: &'a CollisionChecker,
        others: &'a [RobotSnapshot],
    ) -> StepContext<'a> {
        StepContext {
            state,
            goal,
            radius: 0.5,
            environment: env,
            oracle,
            others,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(VelocityObstacleConfig::default().validate().is_ok());
        assert!(VelocityObstacleConfig::default().with_vmax(0.0).validate().is_err());
        assert!(VelocityObstacleConfig::default().with_samples(1, 5).validate().is_err());
        assert!(VelocityObstacle::new(VelocityObstacleConfig::default().with_move_dist(-1.0)).is_err());
    }

    #[test]
    fn test_candidate_grid_shape() {
        let vo = controller();
        assert_eq!(vo.v_sample.len(), 100);
        assert!(vo.v_sample.contains(&Vector2::zeros()));
        assert!(vo.v_sample.iter().all(|v| v.norm() <= 1.0 + 1e-12));
    }

    #[test]
    fn test_desired_velocity() {
        let vo = controller();
        let v = vo.compute_desired_velocity(&Point2D::new(0.0, 0.0), &Point2D::new(3.0, 4.0));
        assert_relative_eq!(v[0], 0.6);
        assert_relative_eq!(v[1], 0.8);

        let near = vo.compute_desired_velocity(&Point2D::new(0.0, 0.0), &Point2D::new(0.05, 0.0));
        assert_eq!(near, Vector2::zeros());
    }

    #[test]
    fn test_static_cone_points_at_obstacle() {
        let vo = controller();
        let cone = vo.velocity_cone(&Point2D::new(0.0, 0.0), &Point2D::new(5.0, 0.0), &Vector2::zeros(), 4.0, 1.0);
        assert!(cone.contains(&Vector2::new(1.0, 0.0)));
        assert!(cone.contains(&Vector2::new(1.0, 0.1)));
        assert!(!cone.contains(&Vector2::new(0.0, 1.0)));
        assert!(!cone.contains(&Vector2::new(-1.0, 0.0)));
        assert!(!cone.contains(&Vector2::zeros()));
    }

    #[test]
    fn test_cone_apex_follows_obstacle_velocity() {
        let vo = controller();
        let v_b = Vector2::new(0.0, 0.5);
        let cone = vo.velocity_cone(&Point2D::new(0.0, 0.0), &Point2D::new(5.0, 0.0), &v_b, 5.0, 2.0);
        assert!(cone.contains(&Vector2::new(1.0, 0.5)));
        assert!(!cone.contains(&Vector2::new(1.0, 0.0)));
    }

    #[test]
    fn test_steers_around_static_obstacle_ahead() {
        let env = Environment::with_obstacles((0.0, 50.0), (0.0, 30.0), [Obstacle::circle(15.0, 10.0, 1.0)]);
        let oracle = CollisionChecker::from_environment(&env);
        let state = RobotState::at_rest(Point2D::new(10.0, 10.0));
        let goal = Point2D::new(30.0, 10.0);
        let ctx = context(&state, goal, &env, &oracle, &[]);

        let mut vo = controller();
        vo.desired_vel = vo.compute_desired_velocity(&state.position(), &goal);
        let cones = vo.build_cones(&state.position(), &[], &env);
        assert_eq!(cones.len(), 1);

        let survivors = vo.check_constraints(&vo.v_sample, &cones);
        // half-width of the cone: asin(1.0 / (5 - 1))
        let phi = (0.25f64).asin();
        for v in survivors.iter().filter(|v| v.norm() > 1e-9) {
            assert!(v[1].atan2(v[0]).abs() > phi - 1e-9);
        }

        let cmd = vo.compute_velocity(&ctx).velocity();
        assert!(cmd.norm() > 0.0);
        assert!(cmd[1].abs() > 1e-3);
        assert!(cmd[0] > 0.0);
    }

    #[test]
    fn test_infeasible_commands_zero() {
        let env = Environment::with_obstacles((0.0, 50.0), (0.0, 30.0), Vec::new());
        let oracle = CollisionChecker::from_environment(&env);
        let state = RobotState::at_rest(Point2D::new(10.0, 10.0));
        let intruder = RobotSnapshot {
            id: 1,
            state: RobotState::new(10.5, 10.0, -3.0, 0.0),
            radius: 0.5,
        };
        let others = [intruder];
        let ctx = context(&state, Point2D::new(20.0, 10.0), &env, &oracle, &others);

        let mut vo = controller();
        assert_eq!(vo.plan(&ctx), Motion::Hold);
        assert_eq!(vo.command_velocity(), Vector2::zeros());
    }

    #[test]
    fn test_docks_inside_arrival_zone() {
        let env = Environment::with_obstacles((0.0, 50.0), (0.0, 30.0), Vec::new());
        let oracle = CollisionChecker::from_environment(&env);
        let state = RobotState::at_rest(Point2D::new(10.0, 10.0));
        let goal = Point2D::new(10.005, 10.0);
        let ctx = context(&state, goal, &env, &oracle, &[]);

        let mut vo = controller();
        match vo.plan(&ctx) {
            Motion::Move { position, .. } => {
                assert_relative_eq!(position.x, goal.x, epsilon = 1e-12);
                assert_relative_eq!(position.y, goal.y, epsilon = 1e-12);
            }
            Motion::Hold => panic!("expected a docking move"),
        }
    }

    #[test]
    fn test_translate_line_moves_through_translation() {
        let line = Vector3::new(0.0, 1.0, 0.0); // y = 0
        let moved = translate_line(&line, &Vector2::new(3.0, 2.0));
        // y - 2 = 0
        assert_relative_eq!(moved[0], 0.0);
        assert_relative_eq!(moved[1], 1.0);
        assert_relative_eq!(moved[2], -2.0);
    }
}
