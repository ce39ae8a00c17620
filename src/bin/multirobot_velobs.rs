// Four robots crossing the workspace under velocity obstacle control

use std::error::Error;

use tracing::info;
use tracing_subscriber::EnvFilter;

use multibot_planning::utils::{colors, PathStyle, Visualizer};
use multibot_planning::{Environment, Fleet, Path2D, Point2D, VelocityObstacle, VelocityObstacleConfig, Visualizable};

const MAX_TICKS: u64 = 30_000;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let env = Environment::default().into_shared();
    let mut fleet = Fleet::new(env);
    let routes = [
        (Point2D::new(5.0, 5.0), Point2D::new(47.0, 27.0)),
        (Point2D::new(49.0, 5.0), Point2D::new(3.0, 27.0)),
        (Point2D::new(5.0, 29.0), Point2D::new(47.0, 3.0)),
        (Point2D::new(49.0, 29.0), Point2D::new(3.0, 3.0)),
    ];
    for (start, goal) in routes {
        let config = VelocityObstacleConfig::default();
        let radius = config.robot_radius;
        fleet.add_robot(start, goal, radius, Box::new(VelocityObstacle::new(config)?))?;
    }

    let mut trails = vec![Vec::new(); fleet.robots().len()];
    while !fleet.all_reached() && fleet.tick() < MAX_TICKS {
        fleet.step();
        if fleet.tick() % 50 == 0 {
            for (trail, robot) in trails.iter_mut().zip(fleet.robots()) {
                trail.push(robot.position());
            }
        }
    }
    info!(tick = fleet.tick(), arrived = fleet.all_reached(), "simulation finished");

    let mut vis = Visualizer::new();
    vis.set_title("Multi-robot velocity obstacle");
    fleet.visualize(&mut vis);
    for (id, trail) in trails.into_iter().enumerate() {
        vis.plot_path(&Path2D::from_points(trail), &PathStyle::new(colors::robot(id)));
    }
    std::fs::create_dir_all("./img")?;
    vis.save_svg("./img/multirobot_velobs.svg")?;
    Ok(())
}
