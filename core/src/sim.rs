//! Dataset I/O, configuration and the simulation loop.
//!
//! This module provides:
//! - Record structs for the control, ground truth and observation CSV files of a dataset, and [Dataset]
//!   to load and save a whole dataset directory
//! - [SimulationConfig] for reading and writing run configurations as TOML, JSON or YAML
//! - [run_filter] for driving a [ParticleFilter] over a dataset and collecting a [NavigationResult]
//! - [generate_scenario] for producing synthetic datasets with known ground truth
//!
//! A dataset directory has the following layout:
//!
//! ```text
//! map.csv                     id,x,y
//! control.csv                 velocity,yaw_rate        (one row per step)
//! ground_truth.csv            x,y,theta                (optional, one row per step)
//! observations/
//!     observations_000001.csv x,y                      (vehicle frame, one file per step)
//!     observations_000002.csv
//!     ...
//! ```

use crate::map::{Landmark, Map};
use crate::measurements::LandmarkObs;
use crate::particle::{
    DEFAULT_NUM_PARTICLES, EmptyEvidencePolicy, ParticleAveragingStrategy, ParticleFilter,
};
use crate::{LandmarkStd, Pose, PoseError, PoseStd, forward, pose_error};

use log::{debug, info, warn};
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;

pub const MAP_FILE: &str = "map.csv";
pub const CONTROL_FILE: &str = "control.csv";
pub const GROUND_TRUTH_FILE: &str = "ground_truth.csv";
pub const OBSERVATION_DIR: &str = "observations";

/// Control input applied over one time step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    /// Forward speed in m/s
    pub velocity: f64,
    /// Turn rate in rad/s
    pub yaw_rate: f64,
}
impl ControlRecord {
    pub fn new(velocity: f64, yaw_rate: f64) -> Self {
        ControlRecord { velocity, yaw_rate }
    }
}

/// Reads a headered CSV file into a vector of records.
fn read_records<T, P>(path: P) -> Result<Vec<T>, Box<dyn Error>>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        records.push(record);
    }
    Ok(records)
}

/// Writes records to a headered CSV file.
fn write_records<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Name of the observation file for a zero-based step index.
pub fn observation_file_name(step: usize) -> String {
    format!("observations_{:06}.csv", step + 1)
}

/// Reads one step's vehicle-frame observations. An empty file yields no observations.
pub fn read_observations<P: AsRef<Path>>(path: P) -> Result<Vec<LandmarkObs>, Box<dyn Error>> {
    if fs::metadata(&path)?.len() == 0 {
        return Ok(Vec::new());
    }
    read_records(path)
}

/// Writes one step's observations (coordinates only).
pub fn write_observations<P: AsRef<Path>>(
    observations: &[LandmarkObs],
    path: P,
) -> io::Result<()> {
    if observations.is_empty() {
        fs::write(path, "x,y\n")
    } else {
        write_records(observations, path)
    }
}

/// A complete dataset: map, controls, optional ground truth and per-step observations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    pub map: Map,
    /// Control applied after each step; the filter predicts step `i` with `controls[i - 1]`
    pub controls: Vec<ControlRecord>,
    /// Either empty or one pose per step
    pub ground_truth: Vec<Pose>,
    /// One list of vehicle-frame observations per step
    pub observations: Vec<Vec<LandmarkObs>>,
}
impl Dataset {
    /// Number of filter steps.
    pub fn len(&self) -> usize {
        self.controls.len()
    }
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
    /// Checks that the per-step collections agree in length.
    pub fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.observations.len() != self.controls.len() {
            return Err(format!(
                "dataset has {} control steps but {} observation steps",
                self.controls.len(),
                self.observations.len()
            )
            .into());
        }
        if !self.ground_truth.is_empty() && self.ground_truth.len() != self.controls.len() {
            return Err(format!(
                "dataset has {} control steps but {} ground truth poses",
                self.controls.len(),
                self.ground_truth.len()
            )
            .into());
        }
        Ok(())
    }
    /// Loads a dataset directory.
    ///
    /// Missing observation files are treated as steps without detections; a missing ground truth file
    /// leaves [Dataset::ground_truth] empty.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, Box<dyn Error>> {
        let dir = dir.as_ref();
        let map = Map::from_csv(dir.join(MAP_FILE))?;
        let controls: Vec<ControlRecord> = read_records(dir.join(CONTROL_FILE))?;
        let truth_path = dir.join(GROUND_TRUTH_FILE);
        let ground_truth: Vec<Pose> = if truth_path.is_file() {
            read_records(truth_path)?
        } else {
            warn!("No ground truth found in {}", dir.display());
            Vec::new()
        };

        let mut observations = Vec::with_capacity(controls.len());
        for step in 0..controls.len() {
            let path = dir.join(OBSERVATION_DIR).join(observation_file_name(step));
            if path.is_file() {
                observations.push(read_observations(&path)?);
            } else {
                debug!("No observation file for step {}", step);
                observations.push(Vec::new());
            }
        }
        let dataset = Dataset {
            map,
            controls,
            ground_truth,
            observations,
        };
        dataset.validate()?;
        info!(
            "Loaded dataset from {}: {} landmarks, {} steps",
            dir.display(),
            dataset.map.len(),
            dataset.len()
        );
        Ok(dataset)
    }
    /// Writes the dataset into `dir`, creating it if needed.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), Box<dyn Error>> {
        self.validate()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir.join(OBSERVATION_DIR))?;
        self.map.to_csv(dir.join(MAP_FILE))?;
        write_records(&self.controls, dir.join(CONTROL_FILE))?;
        if !self.ground_truth.is_empty() {
            write_records(&self.ground_truth, dir.join(GROUND_TRUTH_FILE))?;
        }
        for (step, observations) in self.observations.iter().enumerate() {
            write_observations(
                observations,
                dir.join(OBSERVATION_DIR).join(observation_file_name(step)),
            )?;
        }
        Ok(())
    }
}

/// Log verbosity, mirrored on the `log` crate level filter names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}
impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Log file path; logs go to stderr when unset
    pub file: Option<String>,
}

/// Pass/fail limits applied to a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorThresholds {
    /// Largest acceptable mean error along x or y in meters
    pub max_translation_error: f64,
    /// Largest acceptable mean heading error in radians
    pub max_yaw_error: f64,
    /// Largest acceptable wall-clock time for the whole run in seconds
    pub max_runtime_s: f64,
}
impl Default for ErrorThresholds {
    fn default() -> Self {
        ErrorThresholds {
            max_translation_error: 1.0,
            max_yaw_error: 0.05,
            max_runtime_s: 100.0,
        }
    }
}

/// Complete configuration of a simulation run.
///
/// Every field has a default, so configuration files only need to list what they change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Dataset directory
    pub input: String,
    /// Output directory for result files
    pub output: String,
    pub num_particles: usize,
    pub seed: u64,
    /// Number of independent runs; run `k` uses seed `seed + k`
    pub runs: usize,
    /// Execute independent runs in parallel
    pub parallel: bool,
    /// Time between steps in seconds
    pub delta_t: f64,
    /// Landmarks at or beyond this distance from a particle are ignored
    pub sensor_range: f64,
    pub empty_evidence: EmptyEvidencePolicy,
    pub estimate: ParticleAveragingStrategy,
    /// Uncertainty of the GPS fix used for initialization
    pub gps_std: PoseStd,
    /// Motion process noise
    pub motion_std: PoseStd,
    /// Observation noise
    pub landmark_std: LandmarkStd,
    /// Initialization pose; the first ground truth pose is used when unset
    pub initial_pose: Option<Pose>,
    pub thresholds: ErrorThresholds,
    pub logging: LoggingConfig,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            input: "data".to_string(),
            output: "output".to_string(),
            num_particles: DEFAULT_NUM_PARTICLES,
            seed: 42,
            runs: 1,
            parallel: false,
            delta_t: 0.1,
            sensor_range: 50.0,
            empty_evidence: EmptyEvidencePolicy::default(),
            estimate: ParticleAveragingStrategy::default(),
            gps_std: PoseStd::default(),
            motion_std: PoseStd::default(),
            landmark_std: LandmarkStd::default(),
            initial_pose: None,
            thresholds: ErrorThresholds::default(),
            logging: LoggingConfig::default(),
        }
    }
}
impl SimulationConfig {
    /// Reads a configuration file; the format follows the extension (`toml`, `json`, `yaml`/`yml`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = match extension(path)?.as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            other => return Err(format!("unsupported config format '{}'", other).into()),
        };
        Ok(config)
    }
    /// Writes the configuration; the format follows the extension (`toml`, `json`, `yaml`/`yml`).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let path = path.as_ref();
        let contents = match extension(path)?.as_str() {
            "toml" => toml::to_string_pretty(self)?,
            "json" => serde_json::to_string_pretty(self)?,
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            other => return Err(format!("unsupported config format '{}'", other).into()),
        };
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)?,
            _ => {}
        }
        fs::write(path, contents)?;
        Ok(())
    }
}

fn extension(path: &Path) -> Result<String, Box<dyn Error>> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .ok_or_else(|| format!("config file '{}' has no extension", path.display()).into())
}

/// Filter output for a single step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: usize,
    /// Estimated pose
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub best_weight: f64,
    pub mean_weight: f64,
    pub effective_sample_size: f64,
    /// Error against ground truth, when available
    pub error_x: Option<f64>,
    pub error_y: Option<f64>,
    pub error_theta: Option<f64>,
}
impl StepResult {
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    pub fn error(&self) -> Option<PoseError> {
        match (self.error_x, self.error_y, self.error_theta) {
            (Some(x), Some(y), Some(theta)) => Some(PoseError { x, y, theta }),
            _ => None,
        }
    }
}

/// Result of running the filter over a dataset.
#[derive(Clone, Debug, Default)]
pub struct NavigationResult {
    /// Name or identifier of this run
    pub name: String,
    pub steps: Vec<StepResult>,
    /// Wall-clock time spent in the filter, in seconds
    pub runtime_s: f64,
}
impl NavigationResult {
    pub fn new(name: &str) -> Self {
        NavigationResult {
            name: name.to_string(),
            ..NavigationResult::default()
        }
    }
    /// Mean per-axis error over every step that has ground truth.
    pub fn mean_error(&self) -> Option<PoseError> {
        let errors: Vec<PoseError> = self.steps.iter().filter_map(StepResult::error).collect();
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;
        Some(PoseError {
            x: errors.iter().map(|e| e.x).sum::<f64>() / n,
            y: errors.iter().map(|e| e.y).sum::<f64>() / n,
            theta: errors.iter().map(|e| e.theta).sum::<f64>() / n,
        })
    }
    /// Judges the run against `thresholds`.
    pub fn evaluate(&self, thresholds: &ErrorThresholds) -> RunVerdict {
        let mean_error = self.mean_error();
        let accurate = mean_error.is_some_and(|e| {
            e.x < thresholds.max_translation_error
                && e.y < thresholds.max_translation_error
                && e.theta < thresholds.max_yaw_error
        });
        let in_time = self.runtime_s < thresholds.max_runtime_s;
        RunVerdict {
            mean_error,
            runtime_s: self.runtime_s,
            passed: accurate && in_time,
        }
    }
    /// Writes one row per step to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_records(&self.steps, path)
    }
    /// Reads a result previously written by [NavigationResult::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, Box<dyn Error>> {
        let mut result = NavigationResult::new(name);
        result.steps = read_records(path)?;
        Ok(result)
    }
}

/// Outcome of [NavigationResult::evaluate].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunVerdict {
    /// `None` when the dataset had no ground truth
    pub mean_error: Option<PoseError>,
    pub runtime_s: f64,
    pub passed: bool,
}

/// Run the particle filter over a dataset.
///
/// The first step initializes the filter from the configured initial pose (or the first ground truth
/// pose) perturbed by `gps_std` noise; every later step predicts with the previous step's control. Each
/// step then updates the weights with that step's observations, resamples, and records the estimate.
///
/// All randomness derives from `config.seed`, so identical inputs give identical results.
pub fn run_filter(
    dataset: &Dataset,
    config: &SimulationConfig,
) -> Result<NavigationResult, Box<dyn Error>> {
    dataset.validate()?;
    let start = config
        .initial_pose
        .or_else(|| dataset.ground_truth.first().copied())
        .ok_or("no initial pose configured and no ground truth available")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut pf = ParticleFilter::with_rng(config.num_particles, StdRng::from_rng(&mut rng))?
        .with_empty_evidence_policy(config.empty_evidence);

    let mut result = NavigationResult::new(&format!("seed_{}", config.seed));
    result.steps.reserve(dataset.len());
    let timer = Instant::now();

    for step in 0..dataset.len() {
        if step == 0 {
            let gps = perturb(&start, &config.gps_std, &mut rng)?;
            pf.init(gps.x, gps.y, gps.theta, &config.gps_std)?;
        } else {
            let control = &dataset.controls[step - 1];
            pf.predict(
                config.delta_t,
                &config.motion_std,
                control.velocity,
                control.yaw_rate,
            )?;
        }
        pf.update_weights(
            config.sensor_range,
            &config.landmark_std,
            &dataset.observations[step],
            &dataset.map,
        )?;
        pf.resample()?;

        let estimate = pf.estimate(config.estimate)?;
        let weights = pf.weights();
        let best_weight = weights.iter().cloned().fold(0.0, f64::max);
        let mean_weight = weights.iter().sum::<f64>() / weights.len() as f64;
        let error = dataset
            .ground_truth
            .get(step)
            .map(|truth| pose_error(&estimate, truth));

        result.steps.push(StepResult {
            step,
            x: estimate.x,
            y: estimate.y,
            theta: estimate.theta,
            best_weight,
            mean_weight,
            effective_sample_size: pf.effective_sample_size(),
            error_x: error.map(|e| e.x),
            error_y: error.map(|e| e.y),
            error_theta: error.map(|e| e.theta),
        });
        if step % 100 == 0 {
            debug!("Step {}: estimate {} ({:?})", step, estimate, error);
        }
    }
    result.runtime_s = timer.elapsed().as_secs_f64();
    info!(
        "Finished {} steps with {} particles in {:.3} s",
        dataset.len(),
        config.num_particles,
        result.runtime_s
    );
    Ok(result)
}

fn perturb<R: Rng>(pose: &Pose, std: &PoseStd, rng: &mut R) -> Result<Pose, Box<dyn Error>> {
    Ok(Pose::new(
        Normal::new(pose.x, std.x)?.sample(rng),
        Normal::new(pose.y, std.y)?.sample(rng),
        Normal::new(pose.theta, std.theta)?.sample(rng),
    ))
}

/// Generate a synthetic dataset with known ground truth.
///
/// Ground truth starts at `start` and follows the noise-free motion model under `controls`. At every step
/// each landmark strictly within `sensor_range` is observed in the vehicle frame with independent Gaussian
/// noise of `landmark_std` added to each coordinate.
pub fn generate_scenario(
    map: &Map,
    controls: &[ControlRecord],
    start: Pose,
    delta_t: f64,
    sensor_range: f64,
    landmark_std: &LandmarkStd,
    seed: u64,
) -> Result<Dataset, Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise_x = Normal::new(0.0, landmark_std.x)?;
    let noise_y = Normal::new(0.0, landmark_std.y)?;

    let mut ground_truth = Vec::with_capacity(controls.len());
    let mut observations = Vec::with_capacity(controls.len());
    let mut pose = start;
    for step in 0..controls.len() {
        if step > 0 {
            let control = &controls[step - 1];
            pose = forward(&pose, control.velocity, control.yaw_rate, delta_t);
        }
        let to_vehicle = pose.to_isometry().inverse();
        let visible: Vec<LandmarkObs> = map
            .landmarks_within(pose.x, pose.y, sensor_range)
            .iter()
            .map(|landmark| {
                let local = to_vehicle * landmark.point();
                LandmarkObs::new(
                    local.x + noise_x.sample(&mut rng),
                    local.y + noise_y.sample(&mut rng),
                )
            })
            .collect();
        ground_truth.push(pose);
        observations.push(visible);
    }
    Ok(Dataset {
        map: map.clone(),
        controls: controls.to_vec(),
        ground_truth,
        observations,
    })
}

/// Landmarks scattered uniformly over the square `[-half_extent, half_extent]^2`, ids starting at 1.
pub fn random_map<R: Rng>(count: usize, half_extent: f64, rng: &mut R) -> Map {
    let landmarks = (0..count)
        .map(|i| {
            Landmark::new(
                i as i32 + 1,
                rng.random_range(-half_extent..half_extent),
                rng.random_range(-half_extent..half_extent),
            )
        })
        .collect();
    Map::new(landmarks)
}

/// Constant speed with a slowly alternating turn rate, giving a meandering path.
pub fn meandering_controls(steps: usize, velocity: f64, max_yaw_rate: f64) -> Vec<ControlRecord> {
    (0..steps)
        .map(|i| {
            let phase = i as f64 / 200.0 * std::f64::consts::TAU;
            ControlRecord::new(velocity, max_yaw_rate * phase.sin())
        })
        .collect()
}
