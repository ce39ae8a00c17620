//! Geometry and collision oracle shared by every planner

pub mod oracle;

pub use oracle::*;
