//! Utility modules for multibot_planning

pub mod visualization;

pub use visualization::{colors, PathStyle, PointStyle, Visualizer};
