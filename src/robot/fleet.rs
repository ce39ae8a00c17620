//! Several robots sharing one environment, stepped in lockstep

use tracing::debug;

use crate::common::{Planner, PlanningResult, Point2D, RobotId, RobotSnapshot};
use crate::environment::SharedEnvironment;

use super::Robot;

/// A fleet may mix strategies freely.
pub type DynRobot = Robot<Box<dyn Planner>>;

/// Steps every robot once per tick against the same frozen snapshot of
/// the whole fleet, so stepping order never changes what a robot sees.
pub struct Fleet {
    env: SharedEnvironment,
    robots: Vec<DynRobot>,
    tick: u64,
}

impl Fleet {
    pub fn new(env: SharedEnvironment) -> Self {
        Self {
            env,
            robots: Vec::new(),
            tick: 0,
        }
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.env
    }

    /// Adds a robot and registers it with every other robot. Returns its id.
    pub fn add_robot(
        &mut self,
        start: Point2D,
        goal: Point2D,
        radius: f64,
        planner: Box<dyn Planner>,
    ) -> PlanningResult<RobotId> {
        let id = self.robots.len();
        let robot = Robot::new(id, start, goal, radius, self.env.clone(), planner)?;
        self.robots.push(robot);

        let ids: Vec<RobotId> = (0..self.robots.len()).collect();
        for robot in &mut self.robots {
            robot.set_other_robots(&ids);
        }
        Ok(id)
    }

    pub fn robots(&self) -> &[DynRobot] {
        &self.robots
    }

    pub fn robot(&self, id: RobotId) -> Option<&DynRobot> {
        self.robots.get(id)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn all_reached(&self) -> bool {
        self.robots.iter().all(|r| r.reached_goal())
    }

    pub fn snapshot(&self) -> Vec<RobotSnapshot> {
        self.robots.iter().map(|r| r.snapshot()).collect()
    }

    pub fn step(&mut self) {
        let frame = self.snapshot();
        for robot in &mut self.robots {
            robot.update_other_robots(&frame);
            robot.step();
        }
        self.tick += 1;
    }

    /// Steps until every robot arrives or `max_ticks` total ticks have run.
    /// Returns whether everyone arrived.
    pub fn run(&mut self, max_ticks: u64) -> bool {
        while !self.all_reached() && self.tick < max_ticks {
            self.step();
        }
        debug!(tick = self.tick, arrived = self.all_reached(), "fleet run finished");
        self.all_reached()
    }
}
