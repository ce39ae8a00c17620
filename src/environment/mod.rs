//! Workspace bounds and the editable obstacle store
//!
//! The environment is owned outside the planners and handed to them as a
//! [`SharedEnvironment`]. Edits happen between ticks; planners notice them
//! through [`Environment::revision`].

pub mod obstacle;

pub use obstacle::*;

use std::cell::RefCell;
use std::rc::Rc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{PlanningError, PlanningResult, Point2D};

/// Environment handle shared by every robot in a simulation
pub type SharedEnvironment = Rc<RefCell<Environment>>;

/// Workspace bounds plus circle, rectangle and boundary obstacles
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Environment {
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    obs_circle: Vec<Obstacle>,
    obs_rectangle: Vec<Obstacle>,
    obs_boundary: Vec<Obstacle>,
    revision: u64,
}

impl Environment {
    /// Bounds with one-unit walls around them and nothing else.
    pub fn empty(x_range: (f64, f64), y_range: (f64, f64)) -> Self {
        let (x0, x1) = x_range;
        let (y0, y1) = y_range;
        let obs_boundary = vec![
            Obstacle::boundary(x0, y0, 1.0, y1 - y0),
            Obstacle::boundary(x0, y1, x1 - x0, 1.0),
            Obstacle::boundary(x0 + 1.0, y0, x1 - x0, 1.0),
            Obstacle::boundary(x1, y0 + 1.0, 1.0, y1 - y0),
        ];
        Self {
            x_range,
            y_range,
            obs_circle: Vec::new(),
            obs_rectangle: Vec::new(),
            obs_boundary,
            revision: 0,
        }
    }

    /// Builds an environment from explicit obstacle lists.
    ///
    /// Obstacles are routed to the collection matching their kind.
    pub fn with_obstacles(
        x_range: (f64, f64),
        y_range: (f64, f64),
        obstacles: impl IntoIterator<Item = Obstacle>,
    ) -> Self {
        let mut env = Self {
            x_range,
            y_range,
            obs_circle: Vec::new(),
            obs_rectangle: Vec::new(),
            obs_boundary: Vec::new(),
            revision: 0,
        };
        for obs in obstacles {
            env.collection_mut(obs.kind()).push(obs);
        }
        env
    }

    pub fn into_shared(self) -> SharedEnvironment {
        Rc::new(RefCell::new(self))
    }

    pub fn circles(&self) -> &[Obstacle] {
        &self.obs_circle
    }

    pub fn rectangles(&self) -> &[Obstacle] {
        &self.obs_rectangle
    }

    pub fn boundaries(&self) -> &[Obstacle] {
        &self.obs_boundary
    }

    /// All obstacles: circles, then rectangles, then boundaries.
    pub fn obstacles(&self) -> impl Iterator<Item = &Obstacle> + '_ {
        self.obs_circle
            .iter()
            .chain(self.obs_rectangle.iter())
            .chain(self.obs_boundary.iter())
    }

    /// Bumped on every edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn in_bounds(&self, p: &Point2D) -> bool {
        (self.x_range.0..=self.x_range.1).contains(&p.x)
            && (self.y_range.0..=self.y_range.1).contains(&p.y)
    }

    pub fn area(&self) -> f64 {
        (self.x_range.1 - self.x_range.0) * (self.y_range.1 - self.y_range.0)
    }

    pub fn add_new_obstacle(&mut self, obs: Obstacle) -> PlanningResult<()> {
        if obs.kind() == ShapeKind::Boundary {
            return Err(PlanningError::InvalidParameter(
                "boundaries can only be set at construction".to_string(),
            ));
        }
        debug!(?obs, "adding obstacle");
        self.collection_mut(obs.kind()).push(obs);
        self.revision += 1;
        Ok(())
    }

    /// Removes the first obstacle of `kind` equal to `obs`.
    pub fn remove_obstacle(&mut self, obs: &Obstacle, kind: ShapeKind) -> PlanningResult<Obstacle> {
        if kind == ShapeKind::Boundary {
            return Err(PlanningError::InvalidParameter(
                "boundaries cannot be removed".to_string(),
            ));
        }
        let list = self.collection_mut(kind);
        let idx = list
            .iter()
            .position(|o| o == obs)
            .ok_or(PlanningError::ObstacleNotFound { kind })?;
        let removed = list.remove(idx);
        debug!(obs = ?removed, "removed obstacle");
        self.revision += 1;
        Ok(removed)
    }

    /// Obstacle under `(x, y)`, circles taking priority over rectangles.
    pub fn find_obstacle(&self, x: f64, y: f64) -> Option<(Obstacle, ShapeKind)> {
        let p = Point2D::new(x, y);
        self.obs_circle
            .iter()
            .chain(self.obs_rectangle.iter())
            .find(|o| o.contains(&p, 0.0))
            .map(|o| (*o, o.kind()))
    }

    fn collection_mut(&mut self, kind: ShapeKind) -> &mut Vec<Obstacle> {
        match kind {
            ShapeKind::Circle => &mut self.obs_circle,
            ShapeKind::Rectangle => &mut self.obs_rectangle,
            ShapeKind::Boundary => &mut self.obs_boundary,
        }
    }
}

impl Default for Environment {
    /// The 50 x 30 workspace used by the demo drivers.
    fn default() -> Self {
        let mut obstacles = vec![
            Obstacle::boundary(0.0, 0.0, 1.0, 30.0),
            Obstacle::boundary(0.0, 30.0, 50.0, 1.0),
            Obstacle::boundary(1.0, 0.0, 50.0, 1.0),
            Obstacle::boundary(50.0, 1.0, 1.0, 30.0),
        ];
        obstacles.extend([
            Obstacle::rectangle(14.0, 12.0, 8.0, 2.0),
            Obstacle::rectangle(18.0, 22.0, 8.0, 3.0),
            Obstacle::rectangle(26.0, 7.0, 2.0, 12.0),
            Obstacle::rectangle(32.0, 14.0, 10.0, 2.0),
        ]);
        obstacles.extend([
            Obstacle::circle(7.0, 12.0, 3.0),
            Obstacle::circle(46.0, 20.0, 2.0),
            Obstacle::circle(15.0, 5.0, 2.0),
            Obstacle::circle(37.0, 7.0, 3.0),
            Obstacle::circle(37.0, 23.0, 3.0),
        ]);
        Self::with_obstacles((0.0, 50.0), (0.0, 30.0), obstacles)
    }
}
