//! Common traits defining interfaces for the planning strategies

use nalgebra::Vector2;

use crate::collision::CollisionChecker;
use crate::common::types::*;
use crate::environment::Environment;

/// Everything a strategy may read during one tick.
///
/// Built by the step driver; `others` is the snapshot frozen at the start
/// of the tick, never live robot state.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub state: &'a RobotState,
    pub goal: Point2D,
    pub radius: f64,
    pub environment: &'a Environment,
    pub oracle: &'a CollisionChecker,
    pub others: &'a [RobotSnapshot],
}

impl StepContext<'_> {
    pub fn position(&self) -> Point2D {
        self.state.position()
    }
}

/// Proposed outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Motion {
    /// Move to `position`, reporting `velocity` as the new commanded velocity
    Move { position: Point2D, velocity: Vector2<f64> },
    /// Stay where we are with zero velocity
    Hold,
}

/// A per-robot planning strategy driven once per tick by [`crate::robot::Robot`].
pub trait Planner {
    /// Short strategy name for logs and plots
    fn name(&self) -> &'static str;

    /// Decide this tick's motion.
    fn plan(&mut self, ctx: &StepContext<'_>) -> Motion;

    /// Best path from the robot to its goal, if the strategy keeps one
    fn current_path(&self) -> Option<Path2D> {
        None
    }

    /// Edges of the search structure, for drawing
    fn tree_edges(&self) -> Vec<(Point2D, Point2D)> {
        Vec::new()
    }
}

impl<P: Planner + ?Sized> Planner for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn plan(&mut self, ctx: &StepContext<'_>) -> Motion {
        (**self).plan(ctx)
    }

    fn current_path(&self) -> Option<Path2D> {
        (**self).current_path()
    }

    fn tree_edges(&self) -> Vec<(Point2D, Point2D)> {
        (**self).tree_edges()
    }
}

/// Trait for things that can draw themselves
pub trait Visualizable {
    /// Draw current state to visualizer
    fn visualize(&self, vis: &mut crate::utils::Visualizer);
}
