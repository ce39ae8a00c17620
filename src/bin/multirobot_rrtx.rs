// Four robots crossing the workspace, each replanning with its own RRT-X tree

use std::error::Error;

use tracing::info;
use tracing_subscriber::EnvFilter;

use multibot_planning::utils::Visualizer;
use multibot_planning::{Environment, Fleet, Point2D, Rrtx, RrtxConfig, Visualizable};

const MAX_TICKS: u64 = 20_000;

/// Corner-to-corner start and goal pairs
fn scenario() -> [(Point2D, Point2D); 4] {
    [
        (Point2D::new(5.0, 5.0), Point2D::new(47.0, 27.0)),
        (Point2D::new(49.0, 5.0), Point2D::new(3.0, 27.0)),
        (Point2D::new(5.0, 29.0), Point2D::new(47.0, 3.0)),
        (Point2D::new(49.0, 29.0), Point2D::new(3.0, 3.0)),
    ]
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let env = Environment::default().into_shared();
    let mut fleet = Fleet::new(env.clone());
    for (start, goal) in scenario() {
        let config = RrtxConfig::default();
        let radius = config.robot_radius;
        let planner = Rrtx::new(start, goal, &env.borrow(), config)?;
        fleet.add_robot(start, goal, radius, Box::new(planner))?;
    }

    let arrived = fleet.run(MAX_TICKS);
    for robot in fleet.robots() {
        info!(
            id = robot.id(),
            reached = robot.reached_goal(),
            distance = robot.distance_travelled(),
            "robot summary"
        );
    }
    info!(tick = fleet.tick(), arrived, "simulation finished");

    let mut vis = Visualizer::new();
    vis.set_title("Multi-robot RRT-X");
    fleet.visualize(&mut vis);
    std::fs::create_dir_all("./img")?;
    vis.save_svg("./img/multirobot_rrtx.svg")?;
    Ok(())
}
