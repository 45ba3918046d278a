//! Landmark observations and the measurement model.
//!
//! Observations arrive in the vehicle frame without an identifier. Before they can be scored they are
//! transformed into the map frame using a particle's pose ([transform_to_map]) and paired with map landmarks
//! by nearest neighbor ([data_association], [nearest_index]). The likelihood of a pair is given by
//! [bivariate_gaussian].

use crate::{LandmarkStd, Pose};

use nalgebra::{Point2, distance_squared};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Display};

/// A single landmark observation.
///
/// The coordinates are in whatever frame the observation currently lives in: vehicle-local as reported
/// by the sensor, map-frame after [transform_to_map]. The identifier is `None` until the observation has
/// been associated with a landmark. Only the coordinates are (de)serialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObs {
    #[serde(skip)]
    pub id: Option<i32>,
    pub x: f64,
    pub y: f64,
}
impl Display for LandmarkObs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "LandmarkObs {{ id: {}, x: {:.4}, y: {:.4} }}", id, self.x, self.y),
            None => write!(f, "LandmarkObs {{ id: -, x: {:.4}, y: {:.4} }}", self.x, self.y),
        }
    }
}
impl LandmarkObs {
    /// Unassociated observation.
    pub fn new(x: f64, y: f64) -> Self {
        LandmarkObs { id: None, x, y }
    }
    pub fn with_id(id: i32, x: f64, y: f64) -> Self {
        LandmarkObs { id: Some(id), x, y }
    }
    pub fn point(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// Transform vehicle-frame observations into the map frame as seen from `pose`.
///
/// Each observation is rotated by the pose heading and translated by the pose position:
///
/// $$
/// x_m = p_x + \cos\theta \, x_v - \sin\theta \, y_v, \quad y_m = p_y + \sin\theta \, x_v + \cos\theta \, y_v
/// $$
///
/// Identifiers are carried over unchanged.
pub fn transform_to_map(pose: &Pose, observations: &[LandmarkObs]) -> Vec<LandmarkObs> {
    let isometry = pose.to_isometry();
    observations
        .iter()
        .map(|observation| {
            let mapped = isometry * observation.point();
            LandmarkObs {
                id: observation.id,
                x: mapped.x,
                y: mapped.y,
            }
        })
        .collect()
}

/// Index of the candidate nearest to `(x, y)` by Euclidean distance.
///
/// Ties resolve to the first candidate in iteration order. Returns `None` for an empty candidate list.
pub fn nearest_index(x: f64, y: f64, candidates: &[LandmarkObs]) -> Option<usize> {
    let target = Point2::new(x, y);
    let mut nearest = None;
    let mut min_distance = f64::INFINITY;
    for (i, candidate) in candidates.iter().enumerate() {
        let d = distance_squared(&target, &candidate.point());
        if d < min_distance {
            min_distance = d;
            nearest = Some(i);
        }
    }
    nearest
}

/// Nearest-neighbor data association.
///
/// Assigns to every observation the identifier of the `predicted` landmark closest to it (both lists in
/// the map frame). On exact distance ties the first candidate wins. If `predicted` is empty every
/// observation identifier is reset to `None`.
///
/// Complexity is O(|observations| x |predicted|).
pub fn data_association(predicted: &[LandmarkObs], observations: &mut [LandmarkObs]) {
    for observation in observations.iter_mut() {
        observation.id = nearest_index(observation.x, observation.y, predicted)
            .and_then(|i| predicted[i].id);
    }
}

/// Uncorrelated bivariate Gaussian density evaluated at the offset `(dx, dy)`.
pub fn bivariate_gaussian(dx: f64, dy: f64, std: &LandmarkStd) -> f64 {
    let exponent = dx * dx / (2.0 * std.x * std.x) + dy * dy / (2.0 * std.y * std.y);
    (-exponent).exp() / (2.0 * PI * std.x * std.y)
}
