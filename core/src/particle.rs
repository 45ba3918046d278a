//! Particle filter localization against a landmark map.
//!
//! [ParticleFilter] owns a population of [Particle] pose hypotheses, a parallel collection of their
//! importance weights and the random number generator used for every draw the filter makes. A time step
//! runs [ParticleFilter::predict], [ParticleFilter::update_weights] and [ParticleFilter::resample] in
//! that order. Every operation other than [ParticleFilter::init] returns
//! [FilterError::NotInitialized] until the filter has been initialized.
use crate::map::Map;
use crate::measurements::{
    LandmarkObs, bivariate_gaussian, data_association, nearest_index, transform_to_map,
};
use crate::{LandmarkStd, Pose, PoseStd, forward};

use log::{debug, warn};
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

/// Population size used by the harness when none is configured.
pub const DEFAULT_NUM_PARTICLES: usize = 200;

/// Errors reported by [ParticleFilter] operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilterError {
    /// An operation was called before [ParticleFilter::init].
    NotInitialized,
    /// [ParticleFilter::init] was called on an initialized filter.
    AlreadyInitialized,
    /// The filter was constructed with zero particles.
    InvalidParticleCount,
    /// A noise standard deviation was negative, non-finite, or zero where a density is evaluated.
    InvalidNoise { name: &'static str, value: f64 },
    ParticleIndexOutOfRange { index: usize, len: usize },
    /// A weight slice does not match the particle count.
    MismatchedWeights { expected: usize, actual: usize },
    /// Diagnostic lists passed to [Particle::set_associations] differ in length.
    MismatchedAssociations {
        associations: usize,
        sense_x: usize,
        sense_y: usize,
    },
}
impl Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::NotInitialized => write!(f, "particle filter has not been initialized"),
            FilterError::AlreadyInitialized => {
                write!(f, "particle filter has already been initialized")
            }
            FilterError::InvalidParticleCount => {
                write!(f, "particle filter requires at least one particle")
            }
            FilterError::InvalidNoise { name, value } => {
                write!(f, "invalid standard deviation for {}: {}", name, value)
            }
            FilterError::ParticleIndexOutOfRange { index, len } => {
                write!(f, "particle index {} out of range for {} particles", index, len)
            }
            FilterError::MismatchedWeights { expected, actual } => {
                write!(f, "expected {} weights, got {}", expected, actual)
            }
            FilterError::MismatchedAssociations {
                associations,
                sense_x,
                sense_y,
            } => write!(
                f,
                "association lists differ in length (ids: {}, sense_x: {}, sense_y: {})",
                associations, sense_x, sense_y
            ),
        }
    }
}
impl std::error::Error for FilterError {}

/// One pose hypothesis and its importance weight.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Index assigned at initialization. Copies made by resampling keep the id of their source.
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Unnormalized likelihood
    pub weight: f64,
    /// Landmark ids associated with the observations during the last update
    pub associations: Vec<i32>,
    /// Map-frame x coordinates of the associated observations
    pub sense_x: Vec<f64>,
    /// Map-frame y coordinates of the associated observations
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            ..Particle::default()
        }
    }
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    /// Attach diagnostic associations: landmark ids and the map-frame coordinates they were sensed at.
    pub fn set_associations(
        &mut self,
        associations: Vec<i32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) -> Result<(), FilterError> {
        if associations.len() != sense_x.len() || associations.len() != sense_y.len() {
            return Err(FilterError::MismatchedAssociations {
                associations: associations.len(),
                sense_x: sense_x.len(),
                sense_y: sense_y.len(),
            });
        }
        self.associations = associations;
        self.sense_x = sense_x;
        self.sense_y = sense_y;
        Ok(())
    }
    /// Associated landmark ids as space separated text.
    pub fn get_associations(&self) -> String {
        join_values(&self.associations)
    }
    /// Sensed map-frame coordinates along one axis as space separated text.
    pub fn get_sense_coord(&self, coordinate: Coordinate) -> String {
        match coordinate {
            Coordinate::X => join_values(&self.sense_x),
            Coordinate::Y => join_values(&self.sense_y),
        }
    }
}

fn join_values<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Axis selector for [Particle::get_sense_coord].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coordinate {
    X,
    Y,
}

/// Weight given to a particle for which no landmark/observation pair could be scored (no landmark in
/// sensor range, or no observations at all).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum EmptyEvidencePolicy {
    /// Empty product: the particle keeps weight 1.0.
    #[default]
    Uninformative,
    /// The particle gets weight 0.0 and will not survive resampling unless every particle is rejected.
    Reject,
}
impl EmptyEvidencePolicy {
    pub fn weight(&self) -> f64 {
        match self {
            EmptyEvidencePolicy::Uninformative => 1.0,
            EmptyEvidencePolicy::Reject => 0.0,
        }
    }
}

/// How a single pose estimate is extracted from the particle population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ParticleAveragingStrategy {
    /// Weight-averaged pose; heading is a weighted circular mean.
    WeightedAverage,
    UnweightedAverage,
    /// Pose of the highest-weight particle.
    #[default]
    HighestWeight,
}

/// Particle filter over planar poses.
///
/// The filter is generic over its random number generator so that runs can be reproduced from a seed
/// ([ParticleFilter::with_seed]) or driven by any other [Rng] ([ParticleFilter::with_rng]).
#[derive(Clone)]
pub struct ParticleFilter<R: Rng = StdRng> {
    num_particles: usize,
    particles: Vec<Particle>,
    weights: Vec<f64>,
    is_initialized: bool,
    empty_evidence: EmptyEvidencePolicy,
    rng: R,
}
impl<R: Rng> Debug for ParticleFilter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self.weights.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_weight = self.weights.iter().cloned().fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.num_particles)
            .field("is_initialized", &self.is_initialized)
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field("empty_evidence", &self.empty_evidence)
            .finish()
    }
}
impl ParticleFilter<StdRng> {
    /// Filter with a deterministic generator seeded from `seed`.
    pub fn with_seed(num_particles: usize, seed: u64) -> Result<Self, FilterError> {
        Self::with_rng(num_particles, StdRng::seed_from_u64(seed))
    }
    /// Filter with a generator seeded from the operating system.
    pub fn new(num_particles: usize) -> Result<Self, FilterError> {
        Self::with_rng(num_particles, StdRng::from_os_rng())
    }
}
impl<R: Rng> ParticleFilter<R> {
    pub fn with_rng(num_particles: usize, rng: R) -> Result<Self, FilterError> {
        if num_particles == 0 {
            return Err(FilterError::InvalidParticleCount);
        }
        Ok(ParticleFilter {
            num_particles,
            particles: Vec::new(),
            weights: Vec::new(),
            is_initialized: false,
            empty_evidence: EmptyEvidencePolicy::default(),
            rng,
        })
    }
    pub fn with_empty_evidence_policy(mut self, policy: EmptyEvidencePolicy) -> Self {
        self.empty_evidence = policy;
        self
    }
    pub fn empty_evidence_policy(&self) -> EmptyEvidencePolicy {
        self.empty_evidence
    }
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    pub fn particle_mut(&mut self, index: usize) -> Result<&mut Particle, FilterError> {
        let len = self.particles.len();
        self.particles
            .get_mut(index)
            .ok_or(FilterError::ParticleIndexOutOfRange { index, len })
    }
    /// Overwrite the particle weights and keep the weight collection in step.
    ///
    /// Intended for seeding a population before [ParticleFilter::resample] without a measurement update.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<(), FilterError> {
        self.ensure_initialized()?;
        if weights.len() != self.particles.len() {
            return Err(FilterError::MismatchedWeights {
                expected: self.particles.len(),
                actual: weights.len(),
            });
        }
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
        self.weights = weights.to_vec();
        Ok(())
    }
    fn ensure_initialized(&self) -> Result<(), FilterError> {
        if self.is_initialized {
            Ok(())
        } else {
            Err(FilterError::NotInitialized)
        }
    }

    /// Initialize the population around a GPS-derived pose.
    ///
    /// Every particle's `x`, `y` and `theta` are sampled independently from normal distributions
    /// centered on the given pose with the standard deviations in `std`. All weights start at 1.0.
    ///
    /// # Errors
    /// - [FilterError::AlreadyInitialized] on a second call
    /// - [FilterError::InvalidNoise] for negative or non-finite standard deviations
    pub fn init(&mut self, x: f64, y: f64, theta: f64, std: &PoseStd) -> Result<(), FilterError> {
        if self.is_initialized {
            return Err(FilterError::AlreadyInitialized);
        }
        let dist_x = normal(x, std.x, "x")?;
        let dist_y = normal(y, std.y, "y")?;
        let dist_theta = normal(theta, std.theta, "theta")?;

        self.particles = Vec::with_capacity(self.num_particles);
        self.weights = Vec::with_capacity(self.num_particles);
        for id in 0..self.num_particles {
            let pose = Pose::new(
                dist_x.sample(&mut self.rng),
                dist_y.sample(&mut self.rng),
                dist_theta.sample(&mut self.rng),
            );
            self.particles.push(Particle::new(id, pose, 1.0));
            self.weights.push(1.0);
        }
        self.is_initialized = true;
        debug!(
            "Initialized {} particles around ({:.3}, {:.3}, {:.3})",
            self.num_particles, x, y, theta
        );
        Ok(())
    }

    /// Motion update.
    ///
    /// Propagates every particle through [forward] and adds independent zero-mean Gaussian noise with the
    /// standard deviations in `std_pos` to each coordinate.
    pub fn predict(
        &mut self,
        delta_t: f64,
        std_pos: &PoseStd,
        velocity: f64,
        yaw_rate: f64,
    ) -> Result<(), FilterError> {
        self.ensure_initialized()?;
        let noise_x = normal(0.0, std_pos.x, "x")?;
        let noise_y = normal(0.0, std_pos.y, "y")?;
        let noise_theta = normal(0.0, std_pos.theta, "theta")?;

        for particle in &mut self.particles {
            let predicted = forward(&particle.pose(), velocity, yaw_rate, delta_t);
            particle.x = predicted.x + noise_x.sample(&mut self.rng);
            particle.y = predicted.y + noise_y.sample(&mut self.rng);
            particle.theta = predicted.theta + noise_theta.sample(&mut self.rng);
        }
        Ok(())
    }

    /// Measurement update.
    ///
    /// For each particle the observations are moved into the map frame using the particle pose, the map
    /// is cut down to the landmarks strictly within `sensor_range` of the particle, and the weight is
    /// recomputed from scratch as the product of [bivariate_gaussian] densities over the in-range
    /// landmarks, each paired with its nearest transformed observation. Landmarks without any observation
    /// contribute no factor; a particle with no scored pair gets the [EmptyEvidencePolicy] weight.
    ///
    /// The observation to landmark association ([data_association]) is stored on each particle as its
    /// diagnostic associations. The weight collection is rebuilt to match the particles.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: &LandmarkStd,
        observations: &[LandmarkObs],
        map: &Map,
    ) -> Result<(), FilterError> {
        self.ensure_initialized()?;
        positive(std_landmark.x, "landmark x")?;
        positive(std_landmark.y, "landmark y")?;
        let empty_weight = self.empty_evidence.weight();

        self.weights.clear();
        for particle in &mut self.particles {
            let pose = particle.pose();
            let mut transformed = transform_to_map(&pose, observations);
            let in_range = map.landmarks_within(pose.x, pose.y, sensor_range);

            data_association(&in_range, &mut transformed);
            record_associations(particle, &transformed);

            particle.weight =
                landmark_likelihood(&in_range, &transformed, std_landmark).unwrap_or(empty_weight);
            self.weights.push(particle.weight);
        }
        Ok(())
    }

    /// Replace the population with `num_particles` draws, with replacement, proportional to weight.
    ///
    /// Uses the resampling wheel (see [resampling_wheel]). If every weight is zero, or any weight is
    /// negative or non-finite, the draw falls back to uniform selection. The weight collection is rebuilt
    /// from the selected particles.
    pub fn resample(&mut self) -> Result<(), FilterError> {
        self.ensure_initialized()?;
        let n = self.particles.len();
        let degenerate = self.weights.len() != n
            || self.weights.iter().any(|w| !w.is_finite() || *w < 0.0)
            || self.weights.iter().all(|w| *w == 0.0);

        let uniform;
        let weights: &[f64] = if degenerate {
            warn!("Degenerate particle weights, resampling uniformly");
            uniform = vec![1.0; n];
            &uniform
        } else {
            &self.weights
        };
        let picks = resampling_wheel(weights, n, &mut self.rng);

        self.particles = picks.iter().map(|&i| self.particles[i].clone()).collect();
        self.weights = self.particles.iter().map(|p| p.weight).collect();
        Ok(())
    }

    /// Highest-weight particle; the first one wins ties.
    pub fn best_particle(&self) -> Result<&Particle, FilterError> {
        self.ensure_initialized()?;
        let mut best = &self.particles[0];
        for particle in &self.particles[1..] {
            if particle.weight > best.weight {
                best = particle;
            }
        }
        Ok(best)
    }

    /// Single pose estimate from the population.
    ///
    /// A weighted average over a population whose weights sum to zero falls back to the unweighted
    /// average.
    pub fn estimate(&self, strategy: ParticleAveragingStrategy) -> Result<Pose, FilterError> {
        self.ensure_initialized()?;
        match strategy {
            ParticleAveragingStrategy::HighestWeight => Ok(self.best_particle()?.pose()),
            ParticleAveragingStrategy::UnweightedAverage => {
                Ok(average_pose(self.particles.iter().map(|p| (p.pose(), 1.0))))
            }
            ParticleAveragingStrategy::WeightedAverage => {
                let total: f64 = self.particles.iter().map(|p| p.weight).sum();
                if total > 0.0 && total.is_finite() {
                    Ok(average_pose(self.particles.iter().map(|p| (p.pose(), p.weight))))
                } else {
                    Ok(average_pose(self.particles.iter().map(|p| (p.pose(), 1.0))))
                }
            }
        }
    }

    /// Effective sample size `(sum w)^2 / sum w^2` of the current weights; 0 when all weights are 0.
    pub fn effective_sample_size(&self) -> f64 {
        let sum: f64 = self.weights.iter().sum();
        let sum_of_squares: f64 = self.weights.iter().map(|w| w * w).sum();
        if sum_of_squares > 0.0 {
            sum * sum / sum_of_squares
        } else {
            0.0
        }
    }
}

/// Draw `count` indices with probability proportional to `weights` using the resampling wheel.
///
/// Starting at a uniformly random index, each draw adds a uniform increment in `[0, 2 max w)` to a
/// running offset and walks the index forward (wrapping), subtracting each visited weight, until the
/// offset falls below the current weight. Weights are scaled by their maximum first so that the
/// increment bound is always 2. Zero-weight entries are never selected.
///
/// `weights` must be non-empty, finite, non-negative and contain at least one positive entry.
pub fn resampling_wheel<R: Rng>(weights: &[f64], count: usize, rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    let max_weight = weights.iter().cloned().fold(0.0, f64::max);
    let scaled: Vec<f64> = weights.iter().map(|w| w / max_weight).collect();

    let mut index = rng.random_range(0..n);
    let mut beta = 0.0;
    let mut picks = Vec::with_capacity(count);
    for _ in 0..count {
        beta += rng.random_range(0.0..2.0);
        while beta >= scaled[index] {
            beta -= scaled[index];
            index = (index + 1) % n;
        }
        picks.push(index);
    }
    picks
}

/// Product of densities over landmarks paired with their nearest observation, `None` if nothing paired.
fn landmark_likelihood(
    landmarks: &[LandmarkObs],
    observations: &[LandmarkObs],
    std: &LandmarkStd,
) -> Option<f64> {
    landmarks
        .iter()
        .filter_map(|landmark| {
            nearest_index(landmark.x, landmark.y, observations).map(|k| {
                let observation = &observations[k];
                bivariate_gaussian(landmark.x - observation.x, landmark.y - observation.y, std)
            })
        })
        .fold(None, |acc, density| Some(acc.unwrap_or(1.0) * density))
}

fn record_associations(particle: &mut Particle, observations: &[LandmarkObs]) {
    particle.associations.clear();
    particle.sense_x.clear();
    particle.sense_y.clear();
    for observation in observations {
        if let Some(id) = observation.id {
            particle.associations.push(id);
            particle.sense_x.push(observation.x);
            particle.sense_y.push(observation.y);
        }
    }
}

fn average_pose(poses: impl Iterator<Item = (Pose, f64)>) -> Pose {
    let (mut x, mut y, mut sin, mut cos, mut total) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (pose, w) in poses {
        x += w * pose.x;
        y += w * pose.y;
        sin += w * pose.theta.sin();
        cos += w * pose.theta.cos();
        total += w;
    }
    Pose::new(x / total, y / total, sin.atan2(cos))
}

fn normal(mean: f64, std_dev: f64, name: &'static str) -> Result<Normal<f64>, FilterError> {
    if !std_dev.is_finite() || std_dev < 0.0 {
        return Err(FilterError::InvalidNoise {
            name,
            value: std_dev,
        });
    }
    Normal::new(mean, std_dev).map_err(|_| FilterError::InvalidNoise {
        name,
        value: std_dev,
    })
}

fn positive(std_dev: f64, name: &'static str) -> Result<(), FilterError> {
    if std_dev.is_finite() && std_dev > 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidNoise {
            name,
            value: std_dev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Landmark;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    fn initialized(num_particles: usize, pose: Pose, std: PoseStd) -> ParticleFilter {
        let mut pf = ParticleFilter::with_seed(num_particles, 7).unwrap();
        pf.init(pose.x, pose.y, pose.theta, &std).unwrap();
        pf
    }

    #[test]
    fn init_sets_count_and_unit_weights() {
        let pf = initialized(200, Pose::new(4.0, 5.0, 0.5), PoseStd::default());
        assert!(pf.is_initialized());
        assert_eq!(pf.particles().len(), 200);
        assert_eq!(pf.weights().len(), 200);
        assert!(pf.weights().iter().all(|&w| w == 1.0));
        assert!(pf.particles().iter().all(|p| p.weight == 1.0));
        let ids: Vec<usize> = pf.particles().iter().map(|p| p.id).collect();
        assert_eq!(ids, (0..200).collect::<Vec<_>>());
    }
    #[test]
    fn init_mean_converges_to_estimate() {
        let pf = initialized(5000, Pose::new(102.0, 65.0, 1.2), PoseStd::new(2.0, 2.0, 0.05));
        let mean = pf.estimate(ParticleAveragingStrategy::UnweightedAverage).unwrap();
        assert_approx_eq!(mean.x, 102.0, 0.15);
        assert_approx_eq!(mean.y, 65.0, 0.15);
        assert_approx_eq!(mean.theta, 1.2, 0.01);

        let pf = initialized(100, Pose::new(102.0, 65.0, 1.2), PoseStd::zero());
        assert!(
            pf.particles()
                .iter()
                .all(|p| p.x == 102.0 && p.y == 65.0 && p.theta == 1.2)
        );
    }
    #[test]
    fn init_twice_is_rejected() {
        let mut pf = initialized(10, Pose::default(), PoseStd::default());
        assert_eq!(
            pf.init(0.0, 0.0, 0.0, &PoseStd::default()),
            Err(FilterError::AlreadyInitialized)
        );
    }
    #[test]
    fn init_rejects_bad_noise() {
        let mut pf = ParticleFilter::with_seed(10, 1).unwrap();
        let result = pf.init(0.0, 0.0, 0.0, &PoseStd::new(0.3, -1.0, 0.01));
        assert_eq!(
            result,
            Err(FilterError::InvalidNoise {
                name: "y",
                value: -1.0
            })
        );
        assert!(!pf.is_initialized());
        assert!(pf.init(0.0, 0.0, 0.0, &PoseStd::new(f64::NAN, 0.3, 0.01)).is_err());
    }
    #[test]
    fn zero_particles_is_rejected() {
        assert!(matches!(
            ParticleFilter::with_seed(0, 1),
            Err(FilterError::InvalidParticleCount)
        ));
    }
    #[test]
    fn operations_before_init_fail() {
        let mut pf = ParticleFilter::with_seed(10, 1).unwrap();
        assert_eq!(
            pf.predict(0.1, &PoseStd::default(), 1.0, 0.0),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(
            pf.update_weights(50.0, &LandmarkStd::default(), &[], &Map::default()),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(pf.resample(), Err(FilterError::NotInitialized));
        assert_eq!(pf.best_particle().err(), Some(FilterError::NotInitialized));
        assert_eq!(
            pf.estimate(ParticleAveragingStrategy::WeightedAverage),
            Err(FilterError::NotInitialized)
        );
        assert!(pf.particles().is_empty());
    }
    #[test]
    fn predict_straight_without_noise() {
        let mut pf = initialized(5, Pose::default(), PoseStd::zero());
        pf.predict(1.0, &PoseStd::zero(), 10.0, 0.0).unwrap();
        for p in pf.particles() {
            assert_eq!(p.pose(), Pose::new(10.0, 0.0, 0.0));
        }
    }
    #[test]
    fn predict_arc_without_noise() {
        let mut pf = initialized(5, Pose::default(), PoseStd::zero());
        let yaw_rate = PI / 8.0;
        pf.predict(1.0, &PoseStd::zero(), 10.0, yaw_rate).unwrap();
        let expected_x = 10.0 / yaw_rate * yaw_rate.sin();
        let expected_y = 10.0 / yaw_rate * (1.0 - yaw_rate.cos());
        for p in pf.particles() {
            assert_approx_eq!(p.x, expected_x, 1e-12);
            assert_approx_eq!(p.y, expected_y, 1e-12);
            assert_approx_eq!(p.theta, yaw_rate, 1e-12);
        }
    }
    #[test]
    fn predict_draws_independent_noise() {
        let mut pf = initialized(50, Pose::default(), PoseStd::zero());
        pf.predict(0.1, &PoseStd::new(0.3, 0.3, 0.01), 10.0, 0.0).unwrap();
        let first = pf.particles()[0].pose();
        assert!(pf.particles()[1..].iter().any(|p| p.pose() != first));
        let mean_x: f64 = pf.particles().iter().map(|p| p.x).sum::<f64>() / 50.0;
        assert_approx_eq!(mean_x, 1.0, 0.2);
    }
    #[test]
    fn update_perfect_observations_reach_peak_density() {
        let map = Map::new(vec![Landmark::new(1, 5.0, 3.0), Landmark::new(2, 2.0, 1.0)]);
        let std = LandmarkStd::new(0.3, 0.3);
        let pose = Pose::new(1.0, 1.0, 0.0);
        let observations = vec![LandmarkObs::new(4.0, 2.0), LandmarkObs::new(1.0, 0.0)];

        let mut pf = initialized(3, pose, PoseStd::zero());
        pf.update_weights(50.0, &std, &observations, &map).unwrap();

        let peak = bivariate_gaussian(0.0, 0.0, &std);
        for (p, w) in pf.particles().iter().zip(pf.weights()) {
            assert_approx_eq!(p.weight, peak * peak, 1e-9);
            assert_eq!(p.weight, *w);
            assert_eq!(p.associations, vec![1, 2]);
            assert_eq!(p.get_sense_coord(Coordinate::X), "5 2");
            assert_eq!(p.get_sense_coord(Coordinate::Y), "3 1");
        }
    }
    #[test]
    fn update_offset_particle_scores_lower() {
        let map = Map::new(vec![Landmark::new(1, 5.0, 3.0), Landmark::new(2, 2.0, 1.0)]);
        let std = LandmarkStd::new(0.3, 0.3);
        let observations = vec![LandmarkObs::new(4.0, 2.0), LandmarkObs::new(1.0, 0.0)];

        let mut good = initialized(1, Pose::new(1.0, 1.0, 0.0), PoseStd::zero());
        let mut bad = initialized(1, Pose::new(1.4, 0.8, 0.05), PoseStd::zero());
        good.update_weights(50.0, &std, &observations, &map).unwrap();
        bad.update_weights(50.0, &std, &observations, &map).unwrap();
        assert!(bad.weights()[0] < good.weights()[0]);
        assert!(bad.weights()[0] > 0.0);
    }
    #[test]
    fn update_scores_landmark_to_nearest_observation() {
        // two landmarks, one observation: both landmarks pair with the same observation
        let map = Map::new(vec![Landmark::new(1, 0.0, 0.0), Landmark::new(2, 1.0, 0.0)]);
        let std = LandmarkStd::new(1.0, 1.0);
        let observations = vec![LandmarkObs::new(0.0, 0.0)];
        let mut pf = initialized(1, Pose::default(), PoseStd::zero());
        pf.update_weights(50.0, &std, &observations, &map).unwrap();
        let expected = bivariate_gaussian(0.0, 0.0, &std) * bivariate_gaussian(1.0, 0.0, &std);
        assert_approx_eq!(pf.weights()[0], expected, 1e-12);
        assert_eq!(pf.particles()[0].associations, vec![1]);
    }
    #[test]
    fn update_without_landmarks_in_range_uses_policy() {
        let map = Map::new(vec![Landmark::new(1, 100.0, 100.0)]);
        let observations = vec![LandmarkObs::new(1.0, 1.0)];

        let mut pf = initialized(4, Pose::default(), PoseStd::zero());
        pf.update_weights(50.0, &LandmarkStd::default(), &observations, &map)
            .unwrap();
        assert!(pf.weights().iter().all(|&w| w == 1.0));
        assert!(pf.particles()[0].associations.is_empty());

        let mut pf = ParticleFilter::with_seed(4, 7)
            .unwrap()
            .with_empty_evidence_policy(EmptyEvidencePolicy::Reject);
        pf.init(0.0, 0.0, 0.0, &PoseStd::zero()).unwrap();
        pf.update_weights(50.0, &LandmarkStd::default(), &observations, &map)
            .unwrap();
        assert!(pf.weights().iter().all(|&w| w == 0.0));
    }
    #[test]
    fn update_without_observations_uses_policy() {
        let map = Map::new(vec![Landmark::new(1, 1.0, 1.0)]);
        let mut pf = initialized(2, Pose::default(), PoseStd::zero());
        pf.update_weights(50.0, &LandmarkStd::default(), &[], &map)
            .unwrap();
        assert_eq!(pf.weights(), &[1.0, 1.0]);
    }
    #[test]
    fn update_rebuilds_weights() {
        let map = Map::new(vec![Landmark::new(1, 1.0, 0.0)]);
        let observations = vec![LandmarkObs::new(1.0, 0.0)];
        let mut pf = initialized(8, Pose::default(), PoseStd::default());
        for _ in 0..3 {
            pf.update_weights(50.0, &LandmarkStd::default(), &observations, &map)
                .unwrap();
            assert_eq!(pf.weights().len(), 8);
        }
    }
    #[test]
    fn update_rejects_zero_landmark_noise() {
        let mut pf = initialized(2, Pose::default(), PoseStd::zero());
        let result = pf.update_weights(50.0, &LandmarkStd::new(0.0, 0.3), &[], &Map::default());
        assert!(matches!(result, Err(FilterError::InvalidNoise { .. })));
    }
    #[test]
    fn resample_selects_only_weighted_particle() {
        let mut pf = initialized(4, Pose::default(), PoseStd::new(1.0, 1.0, 0.1));
        pf.set_weights(&[0.0, 1.0, 0.0, 0.0]).unwrap();
        let chosen = pf.particles()[1].clone();
        for _ in 0..50 {
            pf.resample().unwrap();
            assert_eq!(pf.particles().len(), 4);
            assert!(pf.particles().iter().all(|p| *p == chosen));
            assert_eq!(pf.weights(), &[1.0, 1.0, 1.0, 1.0]);
        }
    }
    #[test]
    fn resample_all_zero_weights_terminates() {
        let mut pf = initialized(16, Pose::default(), PoseStd::new(1.0, 1.0, 0.1));
        pf.set_weights(&[0.0; 16]).unwrap();
        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 16);
        assert_eq!(pf.weights().len(), 16);
    }
    #[test]
    fn resample_keeps_weights_in_step() {
        let mut pf = initialized(6, Pose::default(), PoseStd::new(1.0, 1.0, 0.1));
        pf.set_weights(&[0.5, 0.1, 0.0, 2.0, 0.3, 0.7]).unwrap();
        pf.resample().unwrap();
        for (p, w) in pf.particles().iter().zip(pf.weights()) {
            assert_eq!(p.weight, *w);
            assert!(p.weight > 0.0);
        }
    }
    #[test]
    fn wheel_frequency_matches_weights() {
        let weights: Vec<f64> = (0..1000).map(|i| ((i % 4) + 1) as f64).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0usize; 4];
        let passes = 200;
        for _ in 0..passes {
            for i in resampling_wheel(&weights, weights.len(), &mut rng) {
                counts[i % 4] += 1;
            }
        }
        let total = (passes * weights.len()) as f64;
        for (class, &count) in counts.iter().enumerate() {
            let expected = (class + 1) as f64 / 10.0;
            assert_approx_eq!(count as f64 / total, expected, 0.02);
        }
    }
    #[test]
    fn best_particle_and_estimates() {
        let mut pf = initialized(3, Pose::default(), PoseStd::zero());
        pf.particle_mut(0).unwrap().x = 0.0;
        pf.particle_mut(1).unwrap().x = 3.0;
        pf.particle_mut(2).unwrap().x = 6.0;
        pf.set_weights(&[1.0, 4.0, 1.0]).unwrap();

        assert_eq!(pf.best_particle().unwrap().id, 1);
        let weighted = pf.estimate(ParticleAveragingStrategy::WeightedAverage).unwrap();
        assert_approx_eq!(weighted.x, 3.0, 1e-12);
        let unweighted = pf.estimate(ParticleAveragingStrategy::UnweightedAverage).unwrap();
        assert_approx_eq!(unweighted.x, 3.0, 1e-12);
        let best = pf.estimate(ParticleAveragingStrategy::HighestWeight).unwrap();
        assert_eq!(best.x, 3.0);
        assert!(matches!(
            pf.particle_mut(3),
            Err(FilterError::ParticleIndexOutOfRange { index: 3, len: 3 })
        ));
    }
    #[test]
    fn circular_mean_heading() {
        let mut pf = initialized(2, Pose::default(), PoseStd::zero());
        pf.particle_mut(0).unwrap().theta = PI - 0.1;
        pf.particle_mut(1).unwrap().theta = -PI + 0.1;
        let mean = pf.estimate(ParticleAveragingStrategy::UnweightedAverage).unwrap();
        assert_approx_eq!(mean.theta.abs(), PI, 1e-9);
    }
    #[test]
    fn effective_sample_size_bounds() {
        let mut pf = initialized(4, Pose::default(), PoseStd::zero());
        assert_approx_eq!(pf.effective_sample_size(), 4.0);
        pf.set_weights(&[0.0, 2.0, 0.0, 0.0]).unwrap();
        assert_approx_eq!(pf.effective_sample_size(), 1.0);
        pf.set_weights(&[0.0; 4]).unwrap();
        assert_eq!(pf.effective_sample_size(), 0.0);
        assert_eq!(
            pf.set_weights(&[1.0; 3]),
            Err(FilterError::MismatchedWeights {
                expected: 4,
                actual: 3
            })
        );
    }
    #[test]
    fn association_text_has_no_trailing_separator() {
        let mut particle = Particle::default();
        particle
            .set_associations(vec![3, 14, 15], vec![1.5, 2.0, -3.25], vec![0.0, 1.0, 2.0])
            .unwrap();
        assert_eq!(particle.get_associations(), "3 14 15");
        assert_eq!(particle.get_sense_coord(Coordinate::X), "1.5 2 -3.25");
        assert_eq!(particle.get_sense_coord(Coordinate::Y), "0 1 2");
        assert_eq!(Particle::default().get_associations(), "");

        let result = particle.set_associations(vec![1], vec![], vec![0.0]);
        assert!(matches!(
            result,
            Err(FilterError::MismatchedAssociations { .. })
        ));
        assert_eq!(particle.associations, vec![3, 14, 15]);
    }
    #[test]
    fn seeded_filters_are_reproducible() {
        let map = Map::new(vec![Landmark::new(1, 10.0, 2.0), Landmark::new(2, 4.0, -6.0)]);
        let observations = vec![LandmarkObs::new(9.0, 1.5), LandmarkObs::new(3.2, -6.1)];
        let run = || {
            let mut pf = ParticleFilter::with_seed(50, 99).unwrap();
            pf.init(1.0, 0.5, 0.0, &PoseStd::default()).unwrap();
            pf.predict(0.1, &PoseStd::default(), 5.0, 0.2).unwrap();
            pf.update_weights(50.0, &LandmarkStd::default(), &observations, &map)
                .unwrap();
            pf.resample().unwrap();
            pf.particles().to_vec()
        };
        assert_eq!(run(), run());
    }
}
