//! Common types, traits, and error definitions for multibot_planning
//!
//! This module provides the foundational building blocks shared by the
//! collision oracle, both planning strategies and the step driver.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
