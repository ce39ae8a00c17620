//! Per-tick robot state machine shared by every planning strategy

use std::rc::Rc;

use tracing::{debug, info};

use crate::collision::CollisionChecker;
use crate::common::{
    Motion, Path2D, Planner, PlanningError, PlanningResult, Point2D, RobotId, RobotSnapshot, RobotState, StepContext,
};
use crate::environment::SharedEnvironment;
use crate::path_planning::{Rrtx, RrtxConfig, VelocityObstacle, VelocityObstacleConfig};

/// Step-level arrival check, applied per axis before planning and on the
/// Euclidean distance after each move.
pub const GOAL_TOLERANCE: f64 = 0.01;

/// A point-mass robot driven by a planning strategy `P`.
pub struct Robot<P: Planner> {
    id: RobotId,
    state: RobotState,
    start: Point2D,
    goal: Point2D,
    radius: f64,
    distance_travelled: f64,
    started: bool,
    reached_goal: bool,
    peers: Vec<RobotId>,
    others: Vec<RobotSnapshot>,
    oracle: CollisionChecker,
    env: SharedEnvironment,
    planner: P,
}

impl<P: Planner> Robot<P> {
    pub fn new(
        id: RobotId,
        start: Point2D,
        goal: Point2D,
        radius: f64,
        env: SharedEnvironment,
        planner: P,
    ) -> PlanningResult<Self> {
        if !(radius > 0.0) {
            return Err(PlanningError::InvalidParameter("robot radius must be positive".to_string()));
        }
        let oracle = {
            let env = env.borrow();
            for p in [start, goal] {
                if !env.in_bounds(&p) {
                    return Err(PlanningError::OutOfBounds(p));
                }
            }
            CollisionChecker::from_environment(&env)
        };
        if oracle.is_inside_obs(&start) {
            return Err(PlanningError::StartBlocked(start));
        }
        if oracle.is_inside_obs(&goal) {
            return Err(PlanningError::GoalBlocked(goal));
        }

        Ok(Self {
            id,
            state: RobotState::at_rest(start),
            start,
            goal,
            radius,
            distance_travelled: 0.0,
            started: false,
            reached_goal: false,
            peers: Vec::new(),
            others: Vec::new(),
            oracle,
            env,
            planner,
        })
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    pub fn state(&self) -> &RobotState {
        &self.state
    }

    pub fn position(&self) -> Point2D {
        self.state.position()
    }

    pub fn start(&self) -> Point2D {
        self.start
    }

    pub fn goal(&self) -> Point2D {
        self.goal
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn distance_travelled(&self) -> f64 {
        self.distance_travelled
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn reached_goal(&self) -> bool {
        self.reached_goal
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut P {
        &mut self.planner
    }

    pub fn current_path(&self) -> Option<Path2D> {
        self.planner.current_path()
    }

    pub fn tree_edges(&self) -> Vec<(Point2D, Point2D)> {
        self.planner.tree_edges()
    }

    /// Other robots as seen at the start of the current tick.
    pub fn others(&self) -> &[RobotSnapshot] {
        &self.others
    }

    pub fn snapshot(&self) -> RobotSnapshot {
        RobotSnapshot {
            id: self.id,
            state: self.state,
            radius: self.radius,
        }
    }

    /// Registers the robots this one watches. Its own id is ignored.
    pub fn set_other_robots(&mut self, peers: &[RobotId]) {
        self.peers = peers.iter().copied().filter(|&p| p != self.id).collect();
    }

    /// Copies this tick's snapshot of every registered peer out of `frame`.
    pub fn update_other_robots(&mut self, frame: &[RobotSnapshot]) {
        self.others = frame.iter().filter(|s| self.peers.contains(&s.id)).copied().collect();
    }

    fn at_goal(&self) -> bool {
        (self.state.x - self.goal.x).abs() < GOAL_TOLERANCE && (self.state.y - self.goal.y).abs() < GOAL_TOLERANCE
    }

    /// Advances the robot by one tick. A no-op once the goal is reached.
    pub fn step(&mut self) {
        self.started = true;
        if self.reached_goal {
            return;
        }
        if self.at_goal() {
            self.finish();
            return;
        }

        let env_handle = Rc::clone(&self.env);
        let env = env_handle.borrow();
        self.oracle.sync(&env);

        let ctx = StepContext {
            state: &self.state,
            goal: self.goal,
            radius: self.radius,
            environment: &*env,
            oracle: &self.oracle,
            others: &self.others,
        };
        let motion = self.planner.plan(&ctx);
        let motion = self.admit(motion);

        match motion {
            Motion::Move { position, velocity } => {
                self.distance_travelled += self.state.position().distance(&position);
                self.state = RobotState::new(position.x, position.y, velocity[0], velocity[1]);
            }
            Motion::Hold => {
                self.state.vx = 0.0;
                self.state.vy = 0.0;
            }
        }

        if self.position().distance(&self.goal) < GOAL_TOLERANCE {
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.reached_goal = true;
        info!(
            id = self.id,
            planner = self.planner.name(),
            distance = self.distance_travelled,
            "goal reached"
        );
    }

    /// Last check before committing: the move must stay clear of the
    /// obstacles and must not push into another robot.
    fn admit(&self, motion: Motion) -> Motion {
        let Motion::Move { position: next, .. } = motion else {
            return motion;
        };
        let pos = self.position();
        if self.oracle.is_collision(&pos, &next) {
            debug!(id = self.id, ?next, "move refused: obstacle");
            return Motion::Hold;
        }

        let pushes_into_robot = self.others.iter().any(|other| {
            let contact = self.radius + other.radius;
            let after = next.distance(&other.position());
            after < contact && after < pos.distance(&other.position())
        });
        if pushes_into_robot {
            debug!(id = self.id, ?next, "move refused: robot contact");
            return Motion::Hold;
        }
        motion
    }
}

impl Robot<Rrtx> {
    /// Robot following an RRT-X tree grown from its goal.
    pub fn with_rrtx(
        id: RobotId,
        start: Point2D,
        goal: Point2D,
        env: SharedEnvironment,
        config: RrtxConfig,
    ) -> PlanningResult<Self> {
        let radius = config.robot_radius;
        let planner = Rrtx::new(start, goal, &env.borrow(), config)?;
        Self::new(id, start, goal, radius, env, planner)
    }
}

impl Robot<VelocityObstacle> {
    /// Robot steered by the velocity obstacle controller.
    pub fn with_velocity_obstacle(
        id: RobotId,
        start: Point2D,
        goal: Point2D,
        env: SharedEnvironment,
        config: VelocityObstacleConfig,
    ) -> PlanningResult<Self> {
        let radius = config.robot_radius;
        let planner = VelocityObstacle::new(config)?;
        Self::new(id, start, goal, radius, env, planner)
    }
}
