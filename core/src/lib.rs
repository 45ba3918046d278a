//! Landmark particle filter localization toolbox
//!
//! This crate estimates the pose (position and heading) of an agent moving in a plane by fusing a noisy
//! motion model with noisy observations of landmarks whose map positions are known. The estimator is a
//! particle filter (sequential Monte Carlo): a population of pose hypotheses is propagated through the
//! motion model, weighted by how well each hypothesis explains the current observations, and resampled in
//! proportion to those weights.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rigid-body transforms between the vehicle and map frames.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provide the random number generation used for initialization, process noise and resampling.
//! - [`csv`](https://crates.io/crates/csv) and [`serde`](https://crates.io/crates/serde): Provide dataset, result and configuration I/O.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [map]: Contains the static landmark map and its range queries.
//! - [measurements]: Contains the landmark observation type, frame transforms, nearest-neighbor data association and the measurement likelihood.
//! - [particle]: Contains the particle filter itself (initialization, prediction, weight update, resampling and diagnostics).
//! - [sim]: Contains dataset I/O, configuration files, scenario generation and the simulation loop used to run the filter over recorded data.
//!
//! ## Coordinate and state definitions
//!
//! The state of a single hypothesis is the planar pose
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are map-frame positions (meters) and $\theta$ is the heading (radians, counter-clockwise
//! from the map x-axis). Observations are reported in the vehicle frame: $x$ forward and $y$ to the left of the
//! agent.
//!
//! ### Motion model
//!
//! Given a velocity $v$, a yaw rate $\omega$ and a time step $t$, the pose is propagated with a constant
//! velocity and constant turn rate model:
//!
//! $$
//! p_x(+) = p_x(-) + \frac{v}{\omega} \left( \sin(\theta + \omega t) - \sin\theta \right)
//! $$
//!
//! $$
//! p_y(+) = p_y(-) + \frac{v}{\omega} \left( \cos\theta - \cos(\theta + \omega t) \right)
//! $$
//!
//! $$
//! \theta(+) = \theta(-) + \omega t
//! $$
//!
//! When $|\omega|$ is below [YAW_RATE_EPSILON] the straight-line limit $p_x(+) = p_x(-) + v t \cos\theta$,
//! $p_y(+) = p_y(-) + v t \sin\theta$ is used instead.
//!
//! ### Measurement model
//!
//! Each observation is transformed into the map frame using the hypothesis pose and compared against the map
//! landmarks within sensor range. The likelihood of a landmark/observation pair is the uncorrelated bivariate
//! Gaussian density
//!
//! $$
//! p(\Delta x, \Delta y) = \frac{1}{2 \pi \sigma_x \sigma_y} \exp\left( -\left( \frac{\Delta x^2}{2 \sigma_x^2} + \frac{\Delta y^2}{2 \sigma_y^2} \right) \right)
//! $$
//!
//! and the importance weight of a particle is the product of these densities over its in-range landmarks.
pub mod map;
pub mod measurements;
pub mod particle;
pub mod sim;

use nalgebra::{Isometry2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use std::f64::consts::PI;
use std::fmt::{self, Display};

pub use map::{Landmark, Map};
pub use measurements::{LandmarkObs, data_association};
pub use particle::{
    Coordinate, EmptyEvidencePolicy, FilterError, Particle, ParticleAveragingStrategy,
    ParticleFilter,
};

/// Yaw rates with a magnitude at or below this threshold are treated as straight-line motion.
pub const YAW_RATE_EPSILON: f64 = 1e-4;

/// Planar pose of the agent (or of one particle) in map coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the map x-axis in meters
    pub x: f64,
    /// Position along the map y-axis in meters
    pub y: f64,
    /// Heading in radians
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4}, y: {:.4}, theta: {:.4} }}",
            self.x, self.y, self.theta
        )
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Position component as a map-frame point.
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
    /// Rigid transform taking vehicle-frame coordinates into the map frame.
    ///
    /// Rotation by the heading followed by translation by the position.
    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }
}

/// Standard deviations of a pose quantity, labelled per axis.
///
/// Used for the initial (GPS) uncertainty and for the motion process noise.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseStd {
    /// Standard deviation along x in meters
    pub x: f64,
    /// Standard deviation along y in meters
    pub y: f64,
    /// Standard deviation of the heading in radians
    pub theta: f64,
}
impl Default for PoseStd {
    fn default() -> Self {
        PoseStd {
            x: 0.3,
            y: 0.3,
            theta: 0.01,
        }
    }
}
impl PoseStd {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        PoseStd { x, y, theta }
    }
    /// All-zero noise, useful for deterministic propagation.
    pub fn zero() -> Self {
        PoseStd::new(0.0, 0.0, 0.0)
    }
}

/// Standard deviations of a landmark observation along the map x and y axes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandmarkStd {
    /// Standard deviation along x in meters
    pub x: f64,
    /// Standard deviation along y in meters
    pub y: f64,
}
impl Default for LandmarkStd {
    fn default() -> Self {
        LandmarkStd { x: 0.3, y: 0.3 }
    }
}
impl LandmarkStd {
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkStd { x, y }
    }
}

/// Absolute per-axis difference between an estimated and a reference pose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseError {
    pub x: f64,
    pub y: f64,
    /// Heading difference wrapped into [0, pi]
    pub theta: f64,
}
impl PoseError {
    /// Euclidean position error in meters
    pub fn translation(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Propagate a pose through the constant velocity / constant turn rate motion model.
///
/// # Arguments
/// - `pose` - the pose before the step
/// - `velocity` - forward speed in m/s
/// - `yaw_rate` - turn rate in rad/s
/// - `dt` - the time step in seconds
///
/// # Returns
/// The noise-free pose after the step.
pub fn forward(pose: &Pose, velocity: f64, yaw_rate: f64, dt: f64) -> Pose {
    if yaw_rate.abs() > YAW_RATE_EPSILON {
        let theta = pose.theta + yaw_rate * dt;
        let radius = velocity / yaw_rate;
        Pose {
            x: pose.x + radius * (theta.sin() - pose.theta.sin()),
            y: pose.y + radius * (pose.theta.cos() - theta.cos()),
            theta,
        }
    } else {
        Pose {
            x: pose.x + velocity * pose.theta.cos() * dt,
            y: pose.y + velocity * pose.theta.sin() * dt,
            theta: pose.theta,
        }
    }
}

/// Absolute difference between two headings, wrapped into [0, pi].
pub fn angle_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % (2.0 * PI);
    if diff > PI { 2.0 * PI - diff } else { diff }
}

/// Per-axis error of `estimate` with respect to `truth`.
pub fn pose_error(estimate: &Pose, truth: &Pose) -> PoseError {
    PoseError {
        x: (estimate.x - truth.x).abs(),
        y: (estimate.y - truth.y).abs(),
        theta: angle_difference(estimate.theta, truth.theta),
    }
}
