//! RRT-X incremental replanning tree
//!
//! The tree is rooted at the goal and grows toward the robot. Every node
//! carries two cost-to-goal estimates: `g`, the committed cost, and `lmc`,
//! the one-step lookahead through the current parent. Nodes whose two
//! values disagree by more than `epsilon` sit in a priority queue and are
//! settled by [`Rrtx::reduce_inconsistency`], which rewires their
//! neighbours in cost order.
//!
//! Obstacle changes are found by diffing the obstacle set seen last tick
//! against the current one. New obstacles block edges and orphan every
//! subtree hanging from a blocked edge; removed obstacles unblock edges and
//! let their endpoints find cheaper parents. Other robots in sensing range
//! are treated as circle obstacles that move every tick.
//!
//! Reference: M. Otte, E. Frazzoli, "RRTX: Asymptotically optimal
//! single-query sampling-based motion planning with quick replanning".

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::f64::consts::{PI, SQRT_2};
use std::f64::INFINITY;

use nalgebra::Vector2;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::collision::{point_segment_distance, CollisionChecker};
use crate::common::{
    avoidance_radius, Motion, Path2D, Planner, PlanningError, PlanningResult, Point2D, RobotSnapshot, StepContext,
};
use crate::environment::{Environment, Obstacle};

/// Distance at which the robot hands over from a node to its parent
pub const WAYPOINT_TOLERANCE: f64 = 0.05;

/// Samples closer than this to an existing node are dropped
const DUPLICATE_TOLERANCE: f64 = 1e-9;

pub type NodeId = usize;

/// RRT-X parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RrtxConfig {
    pub robot_radius: f64,
    /// Longest edge created from a single sample
    pub step_len: f64,
    /// Distance travelled per tick
    pub move_dist: f64,
    /// Scale on the shrinking-ball connection radius
    pub gamma_fos: f64,
    /// Inconsistency tolerance between `g` and `lmc`
    pub epsilon: f64,
    /// Probability of sampling the robot's own position
    pub bot_sample_rate: f64,
    /// Probability of sampling around a nearby robot (multi-robot mode)
    pub other_robot_sample_rate: f64,
    /// Nodes grown before the robot takes its first step
    pub starting_nodes: usize,
    /// Sampling stops at this size unless the robot is orphaned
    pub node_limit: usize,
    /// Ticks an orphaned robot may grow the tree past `node_limit` before
    /// unreachable nodes are pruned and growth stops
    pub orphan_retry_budget: usize,
    pub multi_robot: bool,
    /// Factor of safety around other robots
    pub robot_fos: f64,
    /// Other robots closer than this are treated as obstacles
    pub sensing_radius: f64,
    pub seed: Option<u64>,
}

impl Default for RrtxConfig {
    fn default() -> Self {
        Self {
            robot_radius: 0.5,
            step_len: 5.0,
            move_dist: 0.02,
            gamma_fos: 5.0,
            epsilon: 0.05,
            bot_sample_rate: 0.10,
            other_robot_sample_rate: 0.10,
            starting_nodes: 500,
            node_limit: 5000,
            orphan_retry_budget: 1000,
            multi_robot: true,
            robot_fos: 2.0,
            sensing_radius: 10.0,
            seed: None,
        }
    }
}

impl RrtxConfig {
    pub fn with_step_len(mut self, step_len: f64) -> Self {
        self.step_len = step_len;
        self
    }

    pub fn with_move_dist(mut self, move_dist: f64) -> Self {
        self.move_dist = move_dist;
        self
    }

    pub fn with_node_budget(mut self, starting_nodes: usize, node_limit: usize) -> Self {
        self.starting_nodes = starting_nodes;
        self.node_limit = node_limit;
        self
    }

    pub fn with_orphan_retry_budget(mut self, orphan_retry_budget: usize) -> Self {
        self.orphan_retry_budget = orphan_retry_budget;
        self
    }

    pub fn with_sample_rates(mut self, bot_sample_rate: f64, other_robot_sample_rate: f64) -> Self {
        self.bot_sample_rate = bot_sample_rate;
        self.other_robot_sample_rate = other_robot_sample_rate;
        self
    }

    pub fn with_multi_robot(mut self, multi_robot: bool) -> Self {
        self.multi_robot = multi_robot;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> PlanningResult<()> {
        let positive = [
            ("robot_radius", self.robot_radius),
            ("step_len", self.step_len),
            ("move_dist", self.move_dist),
            ("gamma_fos", self.gamma_fos),
            ("sensing_radius", self.sensing_radius),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(PlanningError::InvalidParameter(format!("{} must be positive", name)));
        }
        if self.move_dist >= WAYPOINT_TOLERANCE {
            return Err(PlanningError::InvalidParameter(format!(
                "move_dist must be below the waypoint tolerance {}",
                WAYPOINT_TOLERANCE
            )));
        }
        if self.epsilon < 0.0 || self.robot_fos < 0.0 {
            return Err(PlanningError::InvalidParameter(
                "epsilon and robot_fos must be non-negative".to_string(),
            ));
        }
        for (name, rate) in [
            ("bot_sample_rate", self.bot_sample_rate),
            ("other_robot_sample_rate", self.other_robot_sample_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(PlanningError::InvalidParameter(format!("{} must lie in [0, 1]", name)));
            }
        }
        if self.node_limit == 0 {
            return Err(PlanningError::InvalidParameter("node_limit must be at least 1".to_string()));
        }
        if self.starting_nodes > self.node_limit {
            return Err(PlanningError::InvalidParameter(format!(
                "starting_nodes {} exceeds node_limit {}",
                self.starting_nodes, self.node_limit
            )));
        }
        Ok(())
    }
}

/// Result of trying to add one sample to the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    Inserted(NodeId),
    /// No collision-free edge to a connected node
    EdgeRejected,
    /// Steered sample lies inside an obstacle or outside the workspace
    InsideObstacle,
    /// A node already sits at the steered sample
    Duplicate,
}

#[derive(Debug, Clone)]
struct TreeNode {
    position: Point2D,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    neighbors: Vec<NodeId>,
    g: f64,
    lmc: f64,
}

impl TreeNode {
    fn new(position: Point2D) -> Self {
        Self {
            position,
            parent: None,
            children: Vec::new(),
            neighbors: Vec::new(),
            g: INFINITY,
            lmc: INFINITY,
        }
    }
}

/// Queue priority: `(min(g, lmc), g)`, compared lexicographically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    k1: OrderedFloat<f64>,
    k2: OrderedFloat<f64>,
}

/// Something the tree must route around.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Hazard {
    Static(Obstacle),
    Robot { center: Point2D, radius: f64 },
}

impl Hazard {
    fn blocks(&self, checker: &CollisionChecker, a: &Point2D, b: &Point2D) -> bool {
        match self {
            Hazard::Static(obs) => checker.obstacle_blocks_with_clearance(obs, a, b),
            Hazard::Robot { center, radius } => point_segment_distance(center, a, b) <= *radius,
        }
    }

    /// Circle enclosing every point this hazard can block.
    fn reach(&self, delta: f64) -> (Point2D, f64) {
        match self {
            Hazard::Static(obs) => {
                let (c, r) = obs.bounding_circle();
                (c, r + delta * SQRT_2)
            }
            Hazard::Robot { center, radius } => (*center, *radius),
        }
    }
}

/// RRT-X planner for one robot
#[derive(Debug, Clone)]
pub struct Rrtx {
    config: RrtxConfig,
    goal: Point2D,
    x_range: (f64, f64),
    y_range: (f64, f64),
    area: f64,
    nodes: Vec<TreeNode>,
    queue: BinaryHeap<Reverse<(Key, NodeId)>>,
    /// Key each node was last queued with; `None` when not queued
    queued: Vec<Option<Key>>,
    orphan: Vec<bool>,
    blocked: HashSet<(NodeId, NodeId)>,
    checker: CollisionChecker,
    hazards: Vec<Hazard>,
    robot_hazards: Vec<Hazard>,
    others: Vec<RobotSnapshot>,
    robot_position: Point2D,
    robot_node: Option<NodeId>,
    initialized: bool,
    /// Ticks spent growing past the cap while orphaned
    retries: usize,
    /// Retry budget spent; no growth until the world changes
    exhausted: bool,
    rng: StdRng,
}

const ROOT: NodeId = 0;

impl Rrtx {
    /// Tree rooted at `goal` for a robot starting at `start`.
    pub fn new(start: Point2D, goal: Point2D, env: &Environment, config: RrtxConfig) -> PlanningResult<Self> {
        config.validate()?;
        for p in [start, goal] {
            if !env.in_bounds(&p) {
                return Err(PlanningError::OutOfBounds(p));
            }
        }
        let checker = CollisionChecker::from_environment(env);
        let margin = 2.0 * checker.delta;
        if !(env.x_range.1 - env.x_range.0 > margin && env.y_range.1 - env.y_range.0 > margin) {
            return Err(PlanningError::InvalidParameter(format!(
                "workspace must be wider than twice the safety margin {}",
                checker.delta
            )));
        }
        if checker.is_inside_obs(&start) {
            return Err(PlanningError::StartBlocked(start));
        }
        if checker.is_inside_obs(&goal) {
            return Err(PlanningError::GoalBlocked(goal));
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut root = TreeNode::new(goal);
        root.g = 0.0;
        root.lmc = 0.0;

        Ok(Self {
            config,
            goal,
            x_range: env.x_range,
            y_range: env.y_range,
            area: env.area(),
            nodes: vec![root],
            queue: BinaryHeap::new(),
            queued: vec![None],
            orphan: vec![false],
            blocked: HashSet::new(),
            checker,
            hazards: env.obstacles().copied().map(Hazard::Static).collect(),
            robot_hazards: Vec::new(),
            others: Vec::new(),
            robot_position: start,
            robot_node: None,
            initialized: false,
            retries: 0,
            exhausted: false,
            rng,
        })
    }

    pub fn config(&self) -> &RrtxConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn robot_position(&self) -> Point2D {
        self.robot_position
    }

    /// True when the robot has no usable route to the goal.
    pub fn is_orphaned(&self) -> bool {
        match self.robot_node {
            None => true,
            Some(v) => self.nodes[v].g == INFINITY || self.nodes[v].lmc == INFINITY,
        }
    }

    /// Length of the robot's current route: straight to its node, then down the tree.
    pub fn best_path_cost(&self) -> f64 {
        match self.robot_node {
            Some(v) => self.robot_position.distance(&self.nodes[v].position) + self.nodes[v].lmc,
            None => INFINITY,
        }
    }

    /// Robot position, its current node, then parents up to the goal.
    pub fn path(&self) -> Option<Path2D> {
        let mut v = self.robot_node?;
        if self.is_orphaned() {
            return None;
        }
        let mut path = Path2D::new();
        path.push(self.robot_position);
        // parent links form a tree, but cap the walk in case of a broken link
        for _ in 0..self.nodes.len() {
            path.push(self.nodes[v].position);
            match self.nodes[v].parent {
                Some(p) => v = p,
                None => break,
            }
        }
        (v == ROOT).then_some(path)
    }

    /// Every parent edge in the tree, child first.
    pub fn edges(&self) -> Vec<(Point2D, Point2D)> {
        self.nodes
            .iter()
            .filter_map(|n| n.parent.map(|p| (n.position, self.nodes[p].position)))
            .collect()
    }

    /// Other robots the tree currently routes around, as `(center, radius)`.
    pub fn robot_obstacles(&self) -> Vec<(Point2D, f64)> {
        self.robot_hazards
            .iter()
            .filter_map(|h| match h {
                Hazard::Robot { center, radius } => Some((*center, *radius)),
                Hazard::Static(_) => None,
            })
            .collect()
    }

    /// Replaces the snapshot of the other robots.
    pub fn set_other_robots(&mut self, others: &[RobotSnapshot]) {
        self.others = others.to_vec();
    }

    /// Connection radius for the current tree size.
    pub fn shrinking_ball_radius(&self) -> f64 {
        let n = self.nodes.len() as f64;
        if n < 2.0 {
            return self.config.step_len;
        }
        let gamma = self.config.gamma_fos * 2.0 * (1.5f64).sqrt() * (self.area / PI).sqrt();
        (gamma * (n.ln() / n).sqrt()).min(self.config.step_len)
    }

    /// Grows the initial tree. Called automatically on the first tick.
    pub fn grow(&mut self, samples: usize) {
        for _ in 0..samples {
            let sample = self.sample();
            self.add_sample(sample);
        }
        info!(nodes = self.nodes.len(), "initial tree grown");
    }

    fn add_sample(&mut self, sample: Point2D) -> ExtendOutcome {
        let outcome = self.extend(sample);
        match outcome {
            ExtendOutcome::Inserted(v) => {
                self.rewire_neighbors(v);
                self.nodes[v].g = self.nodes[v].lmc;
                self.reduce_inconsistency();
            }
            ExtendOutcome::EdgeRejected => debug!(?sample, "sample rejected: no free edge"),
            _ => trace!(?outcome, ?sample, "sample skipped"),
        }
        outcome
    }

    fn sample(&mut self) -> Point2D {
        let delta = self.checker.delta;
        if self.config.multi_robot && self.rng.gen::<f64>() < self.config.other_robot_sample_rate {
            if let Some(p) = self.sample_near_other_robot() {
                return p;
            }
        }
        if self.rng.gen::<f64>() < self.config.bot_sample_rate {
            return self.robot_position;
        }
        Point2D::new(
            self.rng.gen_range(self.x_range.0 + delta..self.x_range.1 - delta),
            self.rng.gen_range(self.y_range.0 + delta..self.y_range.1 - delta),
        )
    }

    fn sample_near_other_robot(&mut self) -> Option<Point2D> {
        let sensing = self.config.sensing_radius;
        let nearby: Vec<Point2D> = self
            .others
            .iter()
            .map(|r| r.position())
            .filter(|p| p.distance(&self.robot_position) < sensing)
            .collect();
        let center = *nearby.choose(&mut self.rng)?;
        let sigma = avoidance_radius(self.config.robot_radius, self.config.robot_fos);
        let normal = Normal::new(0.0, sigma).ok()?;
        Some(Point2D::new(
            center.x + normal.sample(&mut self.rng),
            center.y + normal.sample(&mut self.rng),
        ))
    }

    fn nearest(&self, p: &Point2D) -> NodeId {
        self.nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| OrderedFloat(n.position.distance(p)))
            .map_or(ROOT, |(i, _)| i)
    }

    fn near(&self, p: &Point2D, radius: f64) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.position.distance(p) <= radius)
            .map(|(i, _)| i)
            .collect()
    }

    fn steer(&self, from: &Point2D, to: &Point2D) -> Point2D {
        let (dist, theta) = from.distance_and_angle(to);
        if dist <= self.config.step_len {
            *to
        } else {
            from.offset(self.config.step_len, theta)
        }
    }

    fn edge_free(&self, a: &Point2D, b: &Point2D) -> bool {
        !self.checker.is_collision_with_clearance(a, b)
            && !self.robot_hazards.iter().any(|h| h.blocks(&self.checker, a, b))
    }

    /// Like [`Self::edge_free`] but lets the robot leave another robot's
    /// zone as long as the segment never closes in on it.
    fn robot_segment_clear(&self, from: &Point2D, to: &Point2D) -> bool {
        if self.checker.is_collision_with_clearance(from, to) {
            return false;
        }
        self.robot_hazards.iter().all(|h| match h {
            Hazard::Robot { center, radius } => {
                let closest = point_segment_distance(center, from, to);
                closest > *radius || closest >= center.distance(from)
            }
            Hazard::Static(_) => true,
        })
    }

    fn edge_key(u: NodeId, v: NodeId) -> (NodeId, NodeId) {
        (u.min(v), u.max(v))
    }

    fn edge_cost(&self, u: NodeId, v: NodeId) -> f64 {
        if self.blocked.contains(&Self::edge_key(u, v)) {
            INFINITY
        } else {
            self.nodes[u].position.distance(&self.nodes[v].position)
        }
    }

    fn key(&self, v: NodeId) -> Key {
        let n = &self.nodes[v];
        Key {
            k1: OrderedFloat(n.g.min(n.lmc)),
            k2: OrderedFloat(n.g),
        }
    }

    /// Inserts or re-keys `v` in the queue.
    fn verify_queue(&mut self, v: NodeId) {
        let key = self.key(v);
        self.queued[v] = Some(key);
        self.queue.push(Reverse((key, v)));
    }

    /// Smallest live key; stale heap entries are discarded on the way.
    fn queue_top(&mut self) -> Option<(Key, NodeId)> {
        while let Some(Reverse((key, v))) = self.queue.peek().copied() {
            if self.queued[v] == Some(key) {
                return Some((key, v));
            }
            self.queue.pop();
        }
        None
    }

    fn make_parent_of(&mut self, parent: NodeId, child: NodeId) {
        if let Some(old) = self.nodes[child].parent.take() {
            self.nodes[old].children.retain(|&c| c != child);
        }
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(old) = self.nodes[child].parent.take() {
            self.nodes[old].children.retain(|&c| c != child);
        }
    }

    pub fn extend(&mut self, sample: Point2D) -> ExtendOutcome {
        let nearest = self.nearest(&sample);
        let nearest_pos = self.nodes[nearest].position;
        let v_pos = self.steer(&nearest_pos, &sample);

        let in_bounds = (self.x_range.0..=self.x_range.1).contains(&v_pos.x)
            && (self.y_range.0..=self.y_range.1).contains(&v_pos.y);
        if !in_bounds || self.checker.is_inside_obs(&v_pos) {
            return ExtendOutcome::InsideObstacle;
        }
        if nearest_pos.distance(&v_pos) < DUPLICATE_TOLERANCE {
            return ExtendOutcome::Duplicate;
        }

        let radius = self.shrinking_ball_radius().max(nearest_pos.distance(&v_pos));
        let near: Vec<(NodeId, bool)> = self
            .near(&v_pos, radius)
            .into_iter()
            .map(|u| (u, self.edge_free(&v_pos, &self.nodes[u].position)))
            .collect();

        let parent = near
            .iter()
            .filter(|(u, free)| *free && !self.orphan[*u])
            .map(|&(u, _)| (u, v_pos.distance(&self.nodes[u].position) + self.nodes[u].lmc))
            .filter(|(_, cost)| cost.is_finite())
            .min_by_key(|&(_, cost)| OrderedFloat(cost));
        let Some((parent, lmc)) = parent else {
            return ExtendOutcome::EdgeRejected;
        };

        let v = self.nodes.len();
        let mut node = TreeNode::new(v_pos);
        node.lmc = lmc;
        self.nodes.push(node);
        self.queued.push(None);
        self.orphan.push(false);
        self.make_parent_of(parent, v);

        for (u, free) in near {
            self.nodes[v].neighbors.push(u);
            self.nodes[u].neighbors.push(v);
            if !free {
                self.blocked.insert(Self::edge_key(u, v));
            }
        }
        ExtendOutcome::Inserted(v)
    }

    /// Offers `v` as a cheaper parent to each of its neighbours.
    pub fn rewire_neighbors(&mut self, v: NodeId) {
        let (g, lmc) = (self.nodes[v].g, self.nodes[v].lmc);
        if !(g - lmc > self.config.epsilon) {
            return;
        }
        let parent = self.nodes[v].parent;
        let neighbors = self.nodes[v].neighbors.clone();
        for u in neighbors {
            if Some(u) == parent || self.orphan[u] {
                continue;
            }
            let through_v = self.edge_cost(u, v) + lmc;
            if self.nodes[u].lmc > through_v {
                self.nodes[u].lmc = through_v;
                self.make_parent_of(v, u);
                if self.nodes[u].g - self.nodes[u].lmc > self.config.epsilon {
                    self.verify_queue(u);
                }
            }
        }
    }

    /// Recomputes `lmc(v)` from scratch over its neighbours.
    pub fn update_lmc(&mut self, v: NodeId) {
        if v == ROOT || self.orphan[v] {
            return;
        }
        let best = self.nodes[v]
            .neighbors
            .iter()
            .filter(|&&u| !self.orphan[u] && self.nodes[u].parent != Some(v))
            .map(|&u| (u, self.edge_cost(v, u) + self.nodes[u].lmc))
            .min_by_key(|&(_, cost)| OrderedFloat(cost));

        match best {
            Some((u, cost)) if cost.is_finite() => {
                self.nodes[v].lmc = cost;
                if self.nodes[v].parent != Some(u) {
                    self.make_parent_of(u, v);
                }
            }
            _ => {
                self.nodes[v].lmc = INFINITY;
                self.detach(v);
            }
        }
    }

    /// Settles queued nodes until the robot's node is consistent and
    /// nothing cheaper is pending.
    pub fn reduce_inconsistency(&mut self) {
        while let Some((top, v)) = self.queue_top() {
            if let Some(b) = self.robot_node {
                let bot = &self.nodes[b];
                let pending = top < self.key(b)
                    || bot.lmc != bot.g
                    || bot.g == INFINITY
                    || self.queued[b].is_some();
                if !pending {
                    break;
                }
            }
            self.queue.pop();
            self.queued[v] = None;

            if self.nodes[v].g - self.nodes[v].lmc > self.config.epsilon {
                self.update_lmc(v);
                self.rewire_neighbors(v);
            }
            self.nodes[v].g = self.nodes[v].lmc;
        }
    }

    fn verify_orphan(&mut self, v: NodeId) {
        self.queued[v] = None;
        self.orphan[v] = true;
    }

    /// Spreads orphan status down the tree, raises the cost of every
    /// neighbour of an orphan, then resets the orphans.
    fn propagate_descendants(&mut self) {
        let mut orphans: Vec<NodeId> = (0..self.nodes.len()).filter(|&v| self.orphan[v]).collect();
        if orphans.is_empty() {
            return;
        }
        let mut i = 0;
        while i < orphans.len() {
            let children = self.nodes[orphans[i]].children.clone();
            for c in children {
                if !self.orphan[c] {
                    self.verify_orphan(c);
                    orphans.push(c);
                }
            }
            i += 1;
        }

        for &v in &orphans {
            let mut touched = self.nodes[v].neighbors.clone();
            touched.extend(self.nodes[v].parent);
            for u in touched {
                if !self.orphan[u] {
                    self.nodes[u].g = INFINITY;
                    self.verify_queue(u);
                }
            }
        }

        for &v in &orphans {
            self.orphan[v] = false;
            self.nodes[v].g = INFINITY;
            self.nodes[v].lmc = INFINITY;
            self.detach(v);
        }
        debug!(count = orphans.len(), "orphaned subtree reset");
    }

    fn add_hazards(&mut self, added: &[Hazard]) {
        let reach_slack = self.config.step_len;
        for hazard in added {
            let (center, r) = hazard.reach(self.checker.delta);
            let candidates = self.near(&center, r + reach_slack);
            for v in candidates {
                let neighbors = self.nodes[v].neighbors.clone();
                for u in neighbors {
                    let edge = Self::edge_key(u, v);
                    if self.blocked.contains(&edge) {
                        continue;
                    }
                    let (a, b) = (self.nodes[v].position, self.nodes[u].position);
                    if hazard.blocks(&self.checker, &a, &b) {
                        self.blocked.insert(edge);
                        if self.nodes[v].parent == Some(u) {
                            self.verify_orphan(v);
                        }
                        if self.nodes[u].parent == Some(v) {
                            self.verify_orphan(u);
                        }
                    }
                }
            }
        }
        self.propagate_descendants();
    }

    fn remove_hazards(&mut self, removed: &[Hazard]) {
        let reach_slack = self.config.step_len;
        let reaches: Vec<(Point2D, f64)> = removed
            .iter()
            .map(|h| h.reach(self.checker.delta))
            .map(|(c, r)| (c, r + reach_slack))
            .collect();
        let within_reach = |p: &Point2D| reaches.iter().any(|(c, r)| c.distance(p) <= *r);

        let candidates: Vec<(NodeId, NodeId)> = self
            .blocked
            .iter()
            .copied()
            .filter(|&(u, v)| within_reach(&self.nodes[u].position) || within_reach(&self.nodes[v].position))
            .collect();

        for (u, v) in candidates {
            let (a, b) = (self.nodes[u].position, self.nodes[v].position);
            if !self.edge_free(&a, &b) {
                continue;
            }
            self.blocked.remove(&(u, v));
            for w in [u, v] {
                self.update_lmc(w);
                if self.nodes[w].lmc != self.nodes[w].g {
                    self.verify_queue(w);
                }
            }
        }
    }

    /// Pulls in environment edits and other robots' motion since the last
    /// tick. Returns whether anything changed.
    pub fn update_obstacles(&mut self, env: &Environment) -> bool {
        let static_changed = self.checker.sync(env);
        let robot_hazards = self.sense_other_robots();
        if !static_changed && robot_hazards == self.robot_hazards {
            return false;
        }

        let mut current: Vec<Hazard> = env.obstacles().copied().map(Hazard::Static).collect();
        current.extend(robot_hazards.iter().copied());
        let removed: Vec<Hazard> = self.hazards.iter().filter(|h| !current.contains(h)).copied().collect();
        let added: Vec<Hazard> = current.iter().filter(|h| !self.hazards.contains(h)).copied().collect();

        self.hazards = current;
        self.robot_hazards = robot_hazards;
        if !removed.is_empty() {
            debug!(count = removed.len(), "obstacles removed");
            self.remove_hazards(&removed);
        }
        if !added.is_empty() {
            debug!(count = added.len(), "obstacles added");
            self.add_hazards(&added);
        }
        !removed.is_empty() || !added.is_empty()
    }

    fn sense_other_robots(&self) -> Vec<Hazard> {
        if !self.config.multi_robot {
            return Vec::new();
        }
        self.others
            .iter()
            .filter(|r| r.position().distance(&self.robot_position) < self.config.sensing_radius)
            .map(|r| Hazard::Robot {
                center: r.position(),
                radius: avoidance_radius(self.config.robot_radius, self.config.robot_fos),
            })
            .collect()
    }

    fn needs_reconnect(&self) -> bool {
        match self.robot_node {
            None => true,
            Some(v) => self.is_orphaned() || !self.robot_segment_clear(&self.robot_position, &self.nodes[v].position),
        }
    }

    /// Cheapest reachable node within the connection radius, if it beats the current one.
    fn connect_robot(&mut self) {
        let radius = self.shrinking_ball_radius();
        let pos = self.robot_position;
        let current = if self.needs_reconnect() { INFINITY } else { self.best_path_cost() };

        let best = self
            .near(&pos, radius)
            .into_iter()
            .filter(|&v| self.nodes[v].g.is_finite() && self.nodes[v].lmc.is_finite())
            .map(|v| (v, pos.distance(&self.nodes[v].position) + self.nodes[v].lmc))
            .filter(|&(_, cost)| cost < current)
            .filter(|&(v, _)| self.robot_segment_clear(&pos, &self.nodes[v].position))
            .min_by_key(|&(_, cost)| OrderedFloat(cost));

        if let Some((v, cost)) = best {
            if self.robot_node != Some(v) {
                trace!(node = v, cost, "robot attached to node");
            }
            self.robot_node = Some(v);
        }
    }

    /// Advances the robot `move_dist` along the tree.
    fn move_robot(&mut self) -> Motion {
        let Some(mut v) = self.robot_node else {
            return Motion::Hold;
        };
        let pos = self.robot_position;
        if pos.distance(&self.nodes[v].position) < WAYPOINT_TOLERANCE {
            if let Some(p) = self.nodes[v].parent {
                if self.robot_segment_clear(&pos, &self.nodes[p].position) {
                    v = p;
                    self.robot_node = Some(p);
                }
            }
        }

        let target = self.nodes[v].position;
        let dist = pos.distance(&target);
        let next = if dist <= self.config.move_dist {
            target
        } else {
            let dir: Vector2<f64> = (target.to_vector() - pos.to_vector()) / dist;
            pos.translate(&(dir * self.config.move_dist))
        };

        if !self.robot_segment_clear(&pos, &next) {
            warn!(?pos, "next move blocked, holding");
            return Motion::Hold;
        }
        self.robot_position = next;
        Motion::Move {
            position: next,
            velocity: (next.to_vector() - pos.to_vector()) / self.config.move_dist,
        }
    }

    /// Below the cap the tree always grows. An orphaned robot may push it
    /// past the cap for `orphan_retry_budget` ticks.
    fn may_grow(&mut self, orphaned: bool) -> bool {
        if self.exhausted {
            return false;
        }
        if self.nodes.len() < self.config.node_limit {
            return true;
        }
        if orphaned && self.retries < self.config.orphan_retry_budget {
            self.retries += 1;
            return true;
        }
        false
    }

    /// Drops every node outside the root's subtree and compacts the arena.
    /// Returns how many nodes were removed.
    fn prune_unreachable(&mut self) -> usize {
        let mut keep = vec![false; self.nodes.len()];
        keep[ROOT] = true;
        let mut stack = vec![ROOT];
        while let Some(v) = stack.pop() {
            for &c in &self.nodes[v].children {
                if !keep[c] {
                    keep[c] = true;
                    stack.push(c);
                }
            }
        }
        let removed = keep.iter().filter(|&&k| !k).count();
        if removed == 0 {
            return 0;
        }

        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        for (new_id, old_id) in (0..keep.len()).filter(|&v| keep[v]).enumerate() {
            remap[old_id] = Some(new_id);
        }

        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(mut n, _)| {
                n.parent = n.parent.and_then(|p| remap[p]);
                n.children = n.children.iter().filter_map(|&c| remap[c]).collect();
                n.neighbors = n.neighbors.iter().filter_map(|&u| remap[u]).collect();
                n
            })
            .collect();
        let queued = std::mem::take(&mut self.queued);
        self.queued = queued.into_iter().zip(&keep).filter(|(_, k)| **k).map(|(q, _)| q).collect();
        self.queue = self
            .queued
            .iter()
            .enumerate()
            .filter_map(|(v, q)| q.map(|key| Reverse((key, v))))
            .collect();
        self.orphan = vec![false; self.nodes.len()];
        self.blocked = self
            .blocked
            .iter()
            .filter_map(|&(u, v)| Some(Self::edge_key(remap[u]?, remap[v]?)))
            .collect();
        self.robot_node = self.robot_node.and_then(|v| remap[v]);
        removed
    }

    /// One tick: sync obstacles, repair, grow the tree, then move.
    pub fn tick(&mut self, env: &Environment) -> Motion {
        if !self.initialized {
            self.checker.sync(env);
            self.grow(self.config.starting_nodes);
            self.initialized = true;
        }

        let obstacles_changed = self.update_obstacles(env);
        if obstacles_changed {
            self.reduce_inconsistency();
        }
        if obstacles_changed || self.needs_reconnect() {
            self.connect_robot();
            self.reduce_inconsistency();
        }

        let orphaned = self.is_orphaned();
        if !orphaned || obstacles_changed {
            self.retries = 0;
            self.exhausted = false;
        }
        if self.may_grow(orphaned) {
            let sample = self.sample();
            if let ExtendOutcome::Inserted(_) = self.add_sample(sample) {
                self.connect_robot();
                self.reduce_inconsistency();
            }
        }

        if self.is_orphaned()
            && !self.exhausted
            && self.nodes.len() >= self.config.node_limit
            && self.retries >= self.config.orphan_retry_budget
        {
            self.exhausted = true;
            let removed = self.prune_unreachable();
            warn!(removed, nodes = self.nodes.len(), "repair budget spent, pruned unreachable nodes");
        }

        if self.needs_reconnect() {
            debug!(pos = ?self.robot_position, "no valid route to goal, holding");
            return Motion::Hold;
        }
        self.move_robot()
    }
}

impl Planner for Rrtx {
    fn name(&self) -> &'static str {
        "rrtx"
    }

    fn plan(&mut self, ctx: &StepContext<'_>) -> Motion {
        self.robot_position = ctx.position();
        self.set_other_robots(ctx.others);
        self.tick(ctx.environment)
    }

    fn current_path(&self) -> Option<Path2D> {
        self.path()
    }

    fn tree_edges(&self) -> Vec<(Point2D, Point2D)> {
        self.edges()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RobotState;

    fn small_config() -> RrtxConfig {
        RrtxConfig::default()
            .with_node_budget(150, 400)
            .with_move_dist(0.04)
            .with_seed(7)
    }

    fn open_env() -> Environment {
        Environment::empty((0.0, 20.0), (0.0, 12.0))
    }

    /// Parent, child and neighbour links must mirror each other.
    fn assert_tree_consistent(tree: &Rrtx) {
        for (v, n) in tree.nodes.iter().enumerate() {
            if let Some(p) = n.parent {
                assert!(tree.nodes[p].children.contains(&v));
            }
            for &c in &n.children {
                assert_eq!(tree.nodes[c].parent, Some(v));
            }
            for &u in &n.neighbors {
                assert!(tree.nodes[u].neighbors.contains(&v));
            }
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(RrtxConfig::default().validate().is_ok());
        assert!(RrtxConfig::default().with_move_dist(0.05).validate().is_err());
        assert!(RrtxConfig::default().with_sample_rates(1.5, 0.1).validate().is_err());
        assert!(RrtxConfig::default().with_step_len(0.0).validate().is_err());
        assert!(RrtxConfig::default().with_node_budget(600, 500).validate().is_err());
        assert!(RrtxConfig::default().with_node_budget(500, 500).validate().is_ok());
    }

    #[test]
    fn test_rejects_workspace_narrower_than_margin() {
        let env = Environment::with_obstacles((0.0, 0.8), (0.0, 10.0), Vec::new());
        let result = Rrtx::new(Point2D::new(0.4, 2.0), Point2D::new(0.4, 8.0), &env, RrtxConfig::default());
        assert!(matches!(result, Err(PlanningError::InvalidParameter(_))));
    }

    #[test]
    fn test_rejects_blocked_endpoints() {
        let env = Environment::default();
        let inside_circle = Point2D::new(7.0, 12.0);
        let free = Point2D::new(5.0, 5.0);
        assert_eq!(
            Rrtx::new(inside_circle, free, &env, RrtxConfig::default()).unwrap_err(),
            PlanningError::StartBlocked(inside_circle)
        );
        assert_eq!(
            Rrtx::new(free, inside_circle, &env, RrtxConfig::default()).unwrap_err(),
            PlanningError::GoalBlocked(inside_circle)
        );
        assert!(matches!(
            Rrtx::new(Point2D::new(60.0, 5.0), free, &env, RrtxConfig::default()),
            Err(PlanningError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_extend_connects_free_sample() {
        let env = open_env();
        let mut tree = Rrtx::new(Point2D::new(3.0, 3.0), Point2D::new(17.0, 9.0), &env, small_config()).unwrap();
        let outcome = tree.extend(Point2D::new(15.0, 9.0));
        assert_eq!(outcome, ExtendOutcome::Inserted(1));
        assert_eq!(tree.nodes[1].parent, Some(ROOT));
        assert!((tree.nodes[1].lmc - 2.0).abs() < 1e-12);
        assert_eq!(tree.extend(Point2D::new(15.0, 9.0)), ExtendOutcome::Duplicate);
        assert_eq!(tree.extend(Point2D::new(19.8, 9.0)), ExtendOutcome::InsideObstacle);
    }

    #[test]
    fn test_extend_rejects_edge_through_obstacle() {
        let env = Environment::with_obstacles((0.0, 20.0), (0.0, 12.0), [Obstacle::rectangle(9.0, 0.0, 1.0, 12.0)]);
        let mut tree = Rrtx::new(Point2D::new(3.0, 6.0), Point2D::new(12.0, 6.0), &env, small_config()).unwrap();
        assert_eq!(tree.extend(Point2D::new(7.5, 6.0)), ExtendOutcome::EdgeRejected);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_initial_growth_is_consistent() {
        let env = Environment::default();
        let mut tree = Rrtx::new(Point2D::new(5.0, 5.0), Point2D::new(47.0, 27.0), &env, small_config()).unwrap();
        tree.grow(150);
        assert!(tree.node_count() > 50);
        assert_tree_consistent(&tree);
        for (a, b) in tree.edges() {
            assert!(!tree.checker.is_collision(&a, &b));
        }
    }

    #[test]
    fn test_best_path_cost_never_increases_in_static_world() {
        let env = open_env();
        let mut tree = Rrtx::new(Point2D::new(3.0, 3.0), Point2D::new(17.0, 9.0), &env, small_config()).unwrap();
        let mut last = INFINITY;
        for _ in 0..200 {
            tree.tick(&env);
            let cost = tree.best_path_cost();
            assert!(cost <= last + 1e-9, "cost rose from {} to {}", last, cost);
            last = cost;
        }
        assert!(last.is_finite());
    }

    #[test]
    fn test_reaches_goal_in_open_space() {
        let env = open_env();
        let goal = Point2D::new(17.0, 9.0);
        let mut tree = Rrtx::new(Point2D::new(3.0, 3.0), goal, &env, small_config()).unwrap();
        let mut reached = false;
        for _ in 0..2000 {
            tree.tick(&env);
            if tree.robot_position().distance(&goal) < 0.01 {
                reached = true;
                break;
            }
        }
        assert!(reached);
    }

    #[test]
    fn test_new_obstacle_on_path_is_routed_around() {
        let mut env = open_env();
        let mut tree = Rrtx::new(Point2D::new(3.0, 6.0), Point2D::new(17.0, 6.0), &env, small_config()).unwrap();
        for _ in 0..5 {
            tree.tick(&env);
        }
        env.add_new_obstacle(Obstacle::circle(10.0, 6.0, 1.5)).unwrap();
        for _ in 0..50 {
            tree.tick(&env);
        }
        let checker = CollisionChecker::from_environment(&env);
        for (a, b) in tree.edges() {
            assert!(!checker.is_collision(&a, &b), "edge {} -> {} crosses the new obstacle", a, b);
        }
        if let Some(path) = tree.path() {
            for (a, b) in path.segments() {
                assert!(!checker.is_collision(&a, &b));
            }
        }
        assert_tree_consistent(&tree);
    }

    #[test]
    fn test_edges_keep_circle_margin() {
        let circle = Obstacle::circle(10.0, 6.0, 3.0);
        let env = Environment::with_obstacles((0.0, 20.0), (0.0, 14.0), [circle]);
        let mut tree = Rrtx::new(Point2D::new(7.6, 9.4), Point2D::new(12.4, 9.4), &env, small_config()).unwrap();
        assert_eq!(tree.extend(Point2D::new(7.6, 9.4)), ExtendOutcome::EdgeRejected);

        for _ in 0..50 {
            tree.tick(&env);
        }
        let center = Point2D::new(10.0, 6.0);
        for (a, b) in tree.edges() {
            assert!(point_segment_distance(&center, &a, &b) > 3.5);
        }
    }

    #[test]
    fn test_node_limit_caps_growth_in_static_world() {
        let env = open_env();
        let config = small_config().with_node_budget(60, 120);
        let mut tree = Rrtx::new(Point2D::new(3.0, 3.0), Point2D::new(17.0, 9.0), &env, config).unwrap();
        for _ in 0..1500 {
            tree.tick(&env);
            assert!(tree.node_count() <= 120);
        }
        assert_eq!(tree.node_count(), 120);
        assert!(!tree.is_orphaned());
    }

    /// Walls sealing the goal at (17, 6) off from the rest of `open_env`
    fn goal_enclosure() -> [Obstacle; 3] {
        [
            Obstacle::rectangle(14.0, 2.0, 7.0, 1.0),
            Obstacle::rectangle(14.0, 2.0, 1.0, 8.0),
            Obstacle::rectangle(14.0, 9.0, 7.0, 1.0),
        ]
    }

    #[test]
    fn test_orphaned_robot_holds_within_retry_budget() {
        let mut env = open_env();
        let config = RrtxConfig::default()
            .with_node_budget(100, 150)
            .with_orphan_retry_budget(200)
            .with_seed(11);
        let mut tree = Rrtx::new(Point2D::new(3.0, 6.0), Point2D::new(17.0, 6.0), &env, config).unwrap();

        let mut ticks = 0;
        while tree.node_count() < 150 && ticks < 300 {
            tree.tick(&env);
            ticks += 1;
        }
        assert_eq!(tree.node_count(), 150);
        for _ in 0..20 {
            tree.tick(&env);
            assert_eq!(tree.node_count(), 150);
        }
        assert!(tree.robot_position().x < 13.0);

        for wall in goal_enclosure() {
            env.add_new_obstacle(wall).unwrap();
        }
        let parked = tree.robot_position();
        let mut peak = 0;
        for _ in 0..200 {
            assert_eq!(tree.tick(&env), Motion::Hold);
            assert!(tree.is_orphaned());
            assert_eq!(tree.robot_position(), parked);
            peak = peak.max(tree.node_count());
        }
        // growth past the cap while orphaned, then unreachable nodes pruned
        assert!(peak > 150);
        let pruned = tree.node_count();
        assert!(pruned < 150);

        for _ in 0..300 {
            assert_eq!(tree.tick(&env), Motion::Hold);
            assert_eq!(tree.node_count(), pruned);
        }
        assert!(tree.path().is_none());
        assert_tree_consistent(&tree);
        for (a, b) in tree.edges() {
            assert!(!tree.checker.is_collision(&a, &b));
        }
    }

    #[test]
    fn test_removed_obstacle_unblocks_edges() {
        let wall = Obstacle::rectangle(9.0, 3.0, 1.0, 6.0);
        let mut env = Environment::with_obstacles((0.0, 20.0), (0.0, 12.0), [wall]);
        let mut tree = Rrtx::new(Point2D::new(3.0, 6.0), Point2D::new(17.0, 6.0), &env, small_config()).unwrap();
        tree.tick(&env);
        let blocked_before = tree.blocked.len();
        assert!(blocked_before > 0);

        env.remove_obstacle(&wall, wall.kind()).unwrap();
        assert!(tree.update_obstacles(&env));
        assert!(tree.blocked.is_empty());
    }

    #[test]
    fn test_other_robot_becomes_obstacle() {
        let env = open_env();
        let mut tree = Rrtx::new(Point2D::new(3.0, 6.0), Point2D::new(17.0, 6.0), &env, small_config()).unwrap();
        let other = RobotSnapshot {
            id: 1,
            state: RobotState::new(6.0, 6.0, 0.0, 0.0),
            radius: 0.5,
        };
        tree.set_other_robots(&[other]);
        tree.tick(&env);
        assert_eq!(tree.robot_obstacles(), vec![(Point2D::new(6.0, 6.0), 1.5)]);
        for (a, b) in tree.edges() {
            assert!(point_segment_distance(&Point2D::new(6.0, 6.0), &a, &b) > 1.5);
        }
    }
}
