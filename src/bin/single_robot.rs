// Single robot RRT-X replanning demo
//
// One robot crosses the default workspace. Part way through, a new
// obstacle is dropped onto its route and the tree repairs itself.

use std::error::Error;

use tracing::info;
use tracing_subscriber::EnvFilter;

use multibot_planning::utils::Visualizer;
use multibot_planning::{Environment, Obstacle, Point2D, Robot, RrtxConfig, Visualizable};

const MAX_TICKS: u64 = 20_000;
const EDIT_TICK: u64 = 400;
/// Keep the dropped obstacle this far from the robot and its goal
const CLEARANCE: f64 = 4.0;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let env = Environment::default().into_shared();
    let start = Point2D::new(5.0, 5.0);
    let goal = Point2D::new(47.0, 27.0);
    let config = RrtxConfig::default().with_multi_robot(false);
    let mut robot = Robot::with_rrtx(0, start, goal, env.clone(), config)?;

    let mut tick = 0;
    while !robot.reached_goal() && tick < MAX_TICKS {
        if tick == EDIT_TICK {
            let pos = robot.position();
            let blocker = robot
                .current_path()
                .and_then(|path| {
                    path.points
                        .into_iter()
                        .find(|p| p.distance(&pos) > CLEARANCE && p.distance(&goal) > CLEARANCE)
                })
                .unwrap_or(Point2D::new(30.0, 20.0));
            let obstacle = Obstacle::circle(blocker.x, blocker.y, 1.5);
            match env.borrow_mut().add_new_obstacle(obstacle) {
                Ok(()) => info!(?obstacle, "dropped obstacle on the route"),
                Err(e) => info!(%e, "could not add obstacle"),
            }
        }
        robot.step();
        tick += 1;
    }
    info!(
        tick,
        reached = robot.reached_goal(),
        distance = robot.distance_travelled(),
        nodes = robot.planner().node_count(),
        "simulation finished"
    );

    let mut vis = Visualizer::new();
    vis.set_title("RRT-X single robot");
    env.borrow().visualize(&mut vis);
    robot.visualize(&mut vis);
    std::fs::create_dir_all("./img")?;
    vis.save_svg("./img/single_robot.svg")?;
    Ok(())
}
