//! Scene plotting with gnuplot
//!
//! Drawing calls only record layers; the figure is assembled into a
//! single set of axes when it is shown or saved.

use std::f64::consts::PI;

use gnuplot::{AutoOption, AxesCommon, Caption, Color, Figure, LineWidth, PlotOption, PointSize, PointSymbol};

use crate::common::{Path2D, Planner, Point2D, Visualizable};
use crate::environment::{Environment, Obstacle};
use crate::robot::{Fleet, Robot};

/// Vertices used to approximate a circle outline
const CIRCLE_SEGMENTS: usize = 48;

/// Color palette for consistent styling
pub mod colors {
    pub const BLACK: &str = "#000000";
    pub const RED: &str = "#FF0000";
    pub const GREEN: &str = "#00AA00";
    pub const BLUE: &str = "#0000FF";
    pub const GRAY: &str = "#808080";
    pub const LIGHT_GRAY: &str = "#C8C8C8";

    pub const OBSTACLE: &str = BLACK;
    pub const BOUNDARY: &str = GRAY;
    pub const TREE: &str = LIGHT_GRAY;
    pub const START: &str = GREEN;
    pub const GOAL: &str = BLUE;
    pub const PATH: &str = RED;

    /// Per-robot colors, cycled by robot id
    pub const ROBOTS: [&str; 6] = ["#1F77B4", "#FF7F0E", "#2CA02C", "#D62728", "#9467BD", "#8C564B"];

    pub fn robot(id: usize) -> &'static str {
        ROBOTS[id % ROBOTS.len()]
    }
}

/// Style for path rendering
#[derive(Debug, Clone)]
pub struct PathStyle {
    pub color: String,
    pub line_width: f64,
    pub caption: Option<String>,
}

impl PathStyle {
    pub fn new(color: &str) -> Self {
        Self {
            color: color.to_string(),
            line_width: 1.5,
            caption: None,
        }
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = width;
        self
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = Some(caption.to_string());
        self
    }
}

impl Default for PathStyle {
    fn default() -> Self {
        Self::new(colors::PATH).with_line_width(2.0)
    }
}

/// Style for point rendering
#[derive(Debug, Clone)]
pub struct PointStyle {
    pub color: String,
    pub size: f64,
    pub symbol: char,
    pub caption: Option<String>,
}

impl PointStyle {
    pub fn new(color: &str) -> Self {
        Self {
            color: color.to_string(),
            size: 1.0,
            symbol: 'O',
            caption: None,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_symbol(mut self, symbol: char) -> Self {
        self.symbol = symbol;
        self
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = Some(caption.to_string());
        self
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Lines { x: Vec<f64>, y: Vec<f64>, style: PathStyle },
    Points { x: Vec<f64>, y: Vec<f64>, style: PointStyle },
}

/// Scene plotter
pub struct Visualizer {
    layers: Vec<Layer>,
    title: String,
    x_range: Option<(f64, f64)>,
    y_range: Option<(f64, f64)>,
    aspect_ratio: Option<f64>,
}

impl Visualizer {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            title: String::new(),
            x_range: None,
            y_range: None,
            aspect_ratio: Some(1.0),
        }
    }

    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    pub fn set_x_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.x_range = Some((min, max));
        self
    }

    pub fn set_y_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.y_range = Some((min, max));
        self
    }

    /// Set aspect ratio (None for auto)
    pub fn set_aspect_ratio(&mut self, ratio: Option<f64>) -> &mut Self {
        self.aspect_ratio = ratio;
        self
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn plot_path(&mut self, path: &Path2D, style: &PathStyle) -> &mut Self {
        self.plot_polyline(path.x_coords(), path.y_coords(), style)
    }

    fn plot_polyline(&mut self, x: Vec<f64>, y: Vec<f64>, style: &PathStyle) -> &mut Self {
        self.layers.push(Layer::Lines {
            x,
            y,
            style: style.clone(),
        });
        self
    }

    /// Many disjoint segments as one layer, separated by NaN breaks.
    pub fn plot_segments(&mut self, segments: &[(Point2D, Point2D)], style: &PathStyle) -> &mut Self {
        if segments.is_empty() {
            return self;
        }
        let mut x = Vec::with_capacity(segments.len() * 3);
        let mut y = Vec::with_capacity(segments.len() * 3);
        for (a, b) in segments {
            x.extend([a.x, b.x, f64::NAN]);
            y.extend([a.y, b.y, f64::NAN]);
        }
        self.plot_polyline(x, y, style)
    }

    pub fn plot_circle(&mut self, center: Point2D, r: f64, style: &PathStyle) -> &mut Self {
        let (x, y) = circle_outline(center, r);
        self.plot_polyline(x, y, style)
    }

    pub fn plot_obstacle(&mut self, obstacle: &Obstacle) -> &mut Self {
        match *obstacle {
            Obstacle::Circle { x, y, r } => self.plot_circle(Point2D::new(x, y), r, &PathStyle::new(colors::OBSTACLE)),
            Obstacle::Rectangle { x, y, w, h } => {
                self.plot_polyline(rect_x(x, w), rect_y(y, h), &PathStyle::new(colors::OBSTACLE))
            }
            Obstacle::Boundary { x, y, w, h } => {
                self.plot_polyline(rect_x(x, w), rect_y(y, h), &PathStyle::new(colors::BOUNDARY))
            }
        }
    }

    pub fn plot_point(&mut self, point: Point2D, style: &PointStyle) -> &mut Self {
        self.layers.push(Layer::Points {
            x: vec![point.x],
            y: vec![point.y],
            style: style.clone(),
        });
        self
    }

    pub fn plot_start(&mut self, point: Point2D) -> &mut Self {
        self.plot_point(point, &PointStyle::new(colors::START).with_symbol('S').with_size(1.5))
    }

    pub fn plot_goal(&mut self, point: Point2D) -> &mut Self {
        self.plot_point(point, &PointStyle::new(colors::GOAL).with_symbol('S').with_size(1.5))
    }

    /// Robot body as a disc outline plus its center.
    pub fn plot_robot(&mut self, position: Point2D, radius: f64, color: &str) -> &mut Self {
        self.plot_circle(position, radius, &PathStyle::new(color).with_line_width(2.0));
        self.plot_point(position, &PointStyle::new(color).with_symbol('O').with_size(0.5))
    }

    pub fn show(&mut self) -> Result<(), String> {
        let mut figure = self.render();
        figure.show().map_err(|e| e.to_string()).map(|_| ())
    }

    pub fn save_png(&mut self, path: &str, width: u32, height: u32) -> Result<(), String> {
        self.render().save_to_png(path, width, height).map_err(|e| e.to_string())
    }

    pub fn save_svg(&mut self, path: &str) -> Result<(), String> {
        self.render().save_to_svg(path, 1000, 600).map_err(|e| e.to_string())
    }

    fn render(&self) -> Figure {
        let mut figure = Figure::new();
        let axes = figure.axes2d();

        for layer in &self.layers {
            match layer {
                Layer::Lines { x, y, style } => {
                    let mut options = vec![Color(style.color.as_str()), LineWidth(style.line_width)];
                    push_caption(&mut options, &style.caption);
                    axes.lines(x, y, &options);
                }
                Layer::Points { x, y, style } => {
                    let mut options = vec![
                        Color(style.color.as_str()),
                        PointSymbol(style.symbol),
                        PointSize(style.size),
                    ];
                    push_caption(&mut options, &style.caption);
                    axes.points(x, y, &options);
                }
            }
        }

        if !self.title.is_empty() {
            axes.set_title(&self.title, &[]);
        }
        axes.set_x_label("X [m]", &[]);
        axes.set_y_label("Y [m]", &[]);
        if let Some((min, max)) = self.x_range {
            axes.set_x_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some((min, max)) = self.y_range {
            axes.set_y_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some(ratio) = self.aspect_ratio {
            axes.set_aspect_ratio(AutoOption::Fix(ratio));
        }
        figure
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

fn push_caption<'a>(options: &mut Vec<PlotOption<&'a str>>, caption: &'a Option<String>) {
    if let Some(caption) = caption {
        options.push(Caption(caption.as_str()));
    }
}

fn circle_outline(center: Point2D, r: f64) -> (Vec<f64>, Vec<f64>) {
    (0..=CIRCLE_SEGMENTS)
        .map(|i| center.offset(r, 2.0 * PI * i as f64 / CIRCLE_SEGMENTS as f64))
        .map(|p| (p.x, p.y))
        .unzip()
}

fn rect_x(x: f64, w: f64) -> Vec<f64> {
    vec![x, x + w, x + w, x, x]
}

fn rect_y(y: f64, h: f64) -> Vec<f64> {
    vec![y, y, y + h, y + h, y]
}

impl Visualizable for Environment {
    fn visualize(&self, vis: &mut Visualizer) {
        vis.set_x_range(self.x_range.0 - 1.0, self.x_range.1 + 2.0);
        vis.set_y_range(self.y_range.0 - 1.0, self.y_range.1 + 2.0);
        for obstacle in self.obstacles() {
            vis.plot_obstacle(obstacle);
        }
    }
}

impl<P: Planner> Visualizable for Robot<P> {
    fn visualize(&self, vis: &mut Visualizer) {
        let color = colors::robot(self.id());
        vis.plot_segments(&self.tree_edges(), &PathStyle::new(colors::TREE).with_line_width(0.5));
        if let Some(path) = self.current_path() {
            vis.plot_path(&path, &PathStyle::new(color).with_line_width(2.0));
        }
        vis.plot_start(self.start());
        vis.plot_goal(self.goal());
        vis.plot_robot(self.position(), self.radius(), color);
    }
}

impl Visualizable for Fleet {
    fn visualize(&self, vis: &mut Visualizer) {
        self.environment().borrow().visualize(vis);
        for robot in self.robots() {
            robot.visualize(vis);
        }
    }
}
