//! multibot_planning - multi-robot motion planning in a changing 2D world
//!
//! Robots share an editable [`Environment`] of circle and rectangle
//! obstacles. Each robot is driven once per tick by a planning strategy:
//! an RRT-X tree that repairs itself as obstacles come and go, or a
//! velocity obstacle controller that reacts to nearby robots. Both
//! strategies query the same [`CollisionChecker`].

// Core modules
pub mod common;
pub mod environment;
pub mod collision;
pub mod utils;

// Planning and driving
pub mod path_planning;
pub mod robot;

// Re-export common types for convenience
pub use common::{Point2D, Path2D, RobotState, RobotSnapshot, RobotId};
pub use common::{Planner, Motion, StepContext, Visualizable};
pub use common::{PlanningError, PlanningResult};
pub use collision::CollisionChecker;
pub use environment::{Environment, Obstacle, ShapeKind, SharedEnvironment};
pub use path_planning::{Rrtx, RrtxConfig, VelocityObstacle, VelocityObstacleConfig};
pub use robot::{Fleet, Robot};
