//! Robot step driver and multi-robot fleet

pub mod driver;
pub mod fleet;

pub use driver::*;
pub use fleet::*;
