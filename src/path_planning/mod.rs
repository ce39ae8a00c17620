// Planning strategies driven by the robot step loop

pub mod rrtx;
pub mod velocity_obstacle;

pub use rrtx::*;
pub use velocity_obstacle::*;
