//! Error types for multibot_planning
//!
//! Only construction and environment edits can fail. Per-tick planning
//! problems (rejected edges, orphaned nodes, infeasible velocities) are
//! absorbed by the planners and never surface here.

use crate::common::types::Point2D;
use crate::environment::ShapeKind;

/// Main error type for planner setup and environment editing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum PlanningError {
    /// A configuration value is out of its valid range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The start position lies inside an (inflated) obstacle
    #[error("start position {0} is blocked")]
    StartBlocked(Point2D),

    /// The goal position lies inside an (inflated) obstacle
    #[error("goal position {0} is blocked")]
    GoalBlocked(Point2D),

    /// A position lies outside the workspace bounds
    #[error("position {0} is outside the workspace")]
    OutOfBounds(Point2D),

    /// No obstacle of the given kind matched a removal request
    #[error("no {kind:?} obstacle matches the removal request")]
    ObstacleNotFound {
        /// Shape kind that was searched
        kind: ShapeKind,
    },
}

/// Result type alias for planning operations
pub type PlanningResult<T> = Result<T, PlanningError>;
