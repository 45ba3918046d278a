//! PF SIM: runs the landmark particle filter over recorded or synthetic datasets.
//!
//! The program has three subcommands:
//!
//! - `run`: localize a vehicle over a dataset directory one or more times and write a result CSV per run
//! - `generate`: write a synthetic dataset with a random landmark field and known ground truth
//! - `config`: write a default configuration file
//!
//! A run can also be described entirely by a configuration file (TOML/JSON/YAML) passed with `--config`.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, run_output_file, validate_dataset_dir, validate_output_path};
use landmark_pf::sim::{
    Dataset, RunVerdict, SimulationConfig, generate_scenario, meandering_controls, random_map,
    run_filter,
};
use landmark_pf::{EmptyEvidencePolicy, LandmarkStd, ParticleAveragingStrategy, Pose};
use log::{error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "PF SIM: runs a 2-D landmark particle filter over recorded or synthetic datasets.

A dataset directory contains map.csv (id,x,y), control.csv (velocity,yaw_rate), an optional
ground_truth.csv (x,y,theta) and one observations/observations_NNNNNN.csv file (x,y, vehicle frame)
per step.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Specifying parameters via command-line flags";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Landmark particle filter simulation tool.", long_about = LONG_ABOUT)]
struct Cli {
    /// Run simulation from a configuration file (TOML/JSON/YAML)
    /// This option overrides any subcommand arguments
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (ignored if --config is provided)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Execute independent runs in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run the particle filter over a dataset",
        long_about = "Run the particle filter over a dataset directory. Each run initializes from the first ground truth pose perturbed by GPS noise, then predicts, updates and resamples at every step. Runs use consecutive seeds and each writes run_<seed>.csv to the output directory."
    )]
    Run(RunArgs),
    #[command(
        name = "generate",
        about = "Generate a synthetic dataset",
        long_about = "Generate a synthetic dataset: a random landmark field, a meandering control profile, noise-free ground truth and noisy vehicle-frame observations of every landmark in sensor range."
    )]
    Generate(GenerateArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Arguments for the run command
#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Dataset directory
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output directory for run_<seed>.csv files
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Number of particles
    #[arg(short = 'n', long, default_value_t = 200)]
    num_particles: usize,

    /// Seed of the first run
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of runs, using seeds seed..seed+runs
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Sensor range in meters
    #[arg(long, default_value_t = 50.0)]
    sensor_range: f64,

    /// Time between steps in seconds
    #[arg(long, default_value_t = 0.1)]
    delta_t: f64,

    /// Pose estimate reported at each step
    #[arg(long, value_enum, default_value_t = ParticleAveragingStrategy::HighestWeight)]
    estimate: ParticleAveragingStrategy,

    /// Weight given to a particle with no paired landmark
    #[arg(long, value_enum, default_value_t = EmptyEvidencePolicy::Uninformative)]
    empty_evidence: EmptyEvidencePolicy,
}
impl RunArgs {
    fn to_config(&self, parallel: bool) -> SimulationConfig {
        SimulationConfig {
            input: self.input.display().to_string(),
            output: self.output.display().to_string(),
            num_particles: self.num_particles,
            seed: self.seed,
            runs: self.runs,
            parallel,
            sensor_range: self.sensor_range,
            delta_t: self.delta_t,
            estimate: self.estimate,
            empty_evidence: self.empty_evidence,
            ..SimulationConfig::default()
        }
    }
}

/// Arguments for the generate command
#[derive(Args, Clone, Debug)]
struct GenerateArgs {
    /// Output dataset directory
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Number of steps
    #[arg(long, default_value_t = 1000)]
    steps: usize,

    /// Number of landmarks
    #[arg(long, default_value_t = 50)]
    landmarks: usize,

    /// Landmarks are placed within [-extent, extent] on both axes
    #[arg(long, default_value_t = 150.0)]
    extent: f64,

    /// Vehicle speed in m/s
    #[arg(long, default_value_t = 5.0)]
    velocity: f64,

    /// Largest turn rate in rad/s
    #[arg(long, default_value_t = 0.1)]
    max_yaw_rate: f64,

    /// Sensor range in meters
    #[arg(long, default_value_t = 50.0)]
    sensor_range: f64,

    /// Time between steps in seconds
    #[arg(long, default_value_t = 0.1)]
    delta_t: f64,

    /// Observation noise standard deviation on both axes
    #[arg(long, default_value_t = 0.3)]
    landmark_std: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Arguments for create-config command
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json, .yaml/.yml, or .toml (recommended)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Run the filter `config.runs` times over `dataset`, writing one result file per run.
///
/// Run `k` uses seed `config.seed + k`. Failed runs are logged and reported together once every run has
/// finished.
fn execute_runs(
    dataset: &Dataset,
    config: &SimulationConfig,
    output: &Path,
) -> Result<Vec<RunVerdict>, Box<dyn Error>> {
    let seeds: Vec<u64> = (0..config.runs as u64).map(|k| config.seed + k).collect();
    let single = |seed: u64| -> Result<RunVerdict, String> {
        let run_config = SimulationConfig {
            seed,
            ..config.clone()
        };
        let result = run_filter(dataset, &run_config).map_err(|e| e.to_string())?;
        result
            .to_csv(run_output_file(output, seed))
            .map_err(|e| e.to_string())?;
        let verdict = result.evaluate(&config.thresholds);
        report(seed, &verdict);
        Ok(verdict)
    };

    let outcomes: Vec<(u64, Result<RunVerdict, String>)> = if config.parallel && seeds.len() > 1 {
        info!("Running {} runs in parallel", seeds.len());
        seeds.par_iter().map(|&seed| (seed, single(seed))).collect()
    } else {
        seeds.iter().map(|&seed| (seed, single(seed))).collect()
    };

    let mut verdicts = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (seed, outcome) in outcomes {
        match outcome {
            Ok(verdict) => verdicts.push(verdict),
            Err(e) => {
                error!("Run with seed {} failed: {}", seed, e);
                failures.push(seed);
            }
        }
    }
    if !failures.is_empty() {
        return Err(format!("{} run(s) failed to complete", failures.len()).into());
    }
    let passed = verdicts.iter().filter(|v| v.passed).count();
    info!("{} of {} run(s) within error thresholds", passed, verdicts.len());
    Ok(verdicts)
}

fn report(seed: u64, verdict: &RunVerdict) {
    match verdict.mean_error {
        Some(error) => {
            let message = format!(
                "Seed {}: mean error x {:.3} m, y {:.3} m, yaw {:.4} rad, runtime {:.2} s",
                seed, error.x, error.y, error.theta, verdict.runtime_s
            );
            if verdict.passed {
                info!("{} - PASS", message);
            } else {
                warn!("{} - FAIL", message);
            }
        }
        None => info!(
            "Seed {}: no ground truth, runtime {:.2} s",
            seed, verdict.runtime_s
        ),
    }
}

/// Load the dataset named by `config.input` and execute the configured runs.
fn run_simulation(config: &SimulationConfig) -> Result<Vec<RunVerdict>, Box<dyn Error>> {
    let input = Path::new(&config.input);
    let output = Path::new(&config.output);
    validate_dataset_dir(input)?;
    validate_output_path(output)?;

    info!("Input: {}", config.input);
    info!("Output: {}", config.output);
    info!(
        "Particles: {}, seed: {}, runs: {}",
        config.num_particles, config.seed, config.runs
    );
    let dataset = Dataset::load(input)?;
    execute_runs(&dataset, config, output)
}

/// Execute simulation from a configuration file
fn run_from_config(config_path: &Path, cli_parallel: bool) -> Result<(), Box<dyn Error>> {
    info!("Loading configuration from {}", config_path.display());
    let mut config = SimulationConfig::from_file(config_path)?;

    // Override parallel setting if CLI flag is set
    if cli_parallel {
        config.parallel = true;
    }
    run_simulation(&config)?;
    Ok(())
}

fn generate_dataset(args: &GenerateArgs) -> Result<(), Box<dyn Error>> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let map = random_map(args.landmarks, args.extent, &mut rng);
    let controls = meandering_controls(args.steps, args.velocity, args.max_yaw_rate);
    let dataset = generate_scenario(
        &map,
        &controls,
        Pose::default(),
        args.delta_t,
        args.sensor_range,
        &LandmarkStd::new(args.landmark_std, args.landmark_std),
        args.seed,
    )?;
    dataset.save(&args.output)?;
    let empty = dataset.observations.iter().filter(|o| o.is_empty()).count();
    info!(
        "Wrote {} steps and {} landmarks to {} ({} steps without detections)",
        dataset.len(),
        dataset.map.len(),
        args.output.display(),
        empty
    );
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    SimulationConfig::default().to_file(&args.output)?;
    println!("Configuration written to {}", args.output.display());
    println!("\nYou can now run the simulation with:");
    println!("  pf-sim --config {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // If --config is provided, load config and take logging preferences from it
    if let Some(ref config_path) = cli.config {
        let config = SimulationConfig::from_file(config_path)?;
        let log_level = config.logging.level.as_str();
        let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
        let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
        init_logger(log_level, log_file)?;

        return run_from_config(config_path, cli.parallel);
    }

    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match cli.command {
        Some(Command::Run(args)) => {
            info!("Running particle filter on {}", args.input.display());
            run_simulation(&args.to_config(cli.parallel)).map(|_| ())
        }
        Some(Command::Generate(args)) => generate_dataset(&args),
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landmark_pf::sim::NavigationResult;
    use tempfile::tempdir;

    fn generate_args(output: PathBuf) -> GenerateArgs {
        GenerateArgs {
            output,
            steps: 60,
            landmarks: 30,
            extent: 60.0,
            velocity: 5.0,
            max_yaw_rate: 0.1,
            sensor_range: 50.0,
            delta_t: 0.1,
            landmark_std: 0.3,
            seed: 7,
        }
    }

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "pf-sim",
            "run",
            "-i",
            "data",
            "-o",
            "out",
            "-n",
            "500",
            "--runs",
            "4",
            "--estimate",
            "weighted-average",
            "--parallel",
        ])
        .unwrap();
        assert!(cli.parallel);
        match cli.command {
            Some(Command::Run(args)) => {
                let config = args.to_config(cli.parallel);
                assert_eq!(config.input, "data");
                assert_eq!(config.num_particles, 500);
                assert_eq!(config.runs, 4);
                assert_eq!(config.seed, 42);
                assert!(config.parallel);
                assert_eq!(config.estimate, ParticleAveragingStrategy::WeightedAverage);
                assert_eq!(config.empty_evidence, EmptyEvidencePolicy::Uninformative);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_config_command() {
        let cli = Cli::try_parse_from(["pf-sim", "config", "-o", "pf.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::CreateConfig(_))));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_create_config_file() {
        let dir = tempdir().unwrap();
        let args = CreateConfigArgs {
            output: dir.path().join("pf.yaml"),
        };
        create_config_file(&args).unwrap();
        let config = SimulationConfig::from_file(&args.output).unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_generate_then_run() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        let output = dir.path().join("results");
        generate_dataset(&generate_args(data.clone())).unwrap();

        let config = SimulationConfig {
            input: data.display().to_string(),
            output: output.display().to_string(),
            num_particles: 50,
            seed: 3,
            runs: 3,
            parallel: true,
            ..SimulationConfig::default()
        };
        let verdicts = run_simulation(&config).unwrap();
        assert_eq!(verdicts.len(), 3);
        for seed in 3..6 {
            let path = run_output_file(&output, seed);
            let result = NavigationResult::from_csv(&path, "run").unwrap();
            assert_eq!(result.steps.len(), 60);
        }
        assert!(verdicts.iter().all(|v| v.mean_error.is_some()));
    }

    #[test]
    fn test_run_from_config_file() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        generate_dataset(&generate_args(data.clone())).unwrap();

        let config_path = dir.path().join("pf.toml");
        SimulationConfig {
            input: data.display().to_string(),
            output: dir.path().join("out").display().to_string(),
            num_particles: 30,
            ..SimulationConfig::default()
        }
        .to_file(&config_path)
        .unwrap();
        run_from_config(&config_path, false).unwrap();
        assert!(run_output_file(&dir.path().join("out"), 42).is_file());
    }

    #[test]
    fn test_run_missing_dataset() {
        let dir = tempdir().unwrap();
        let config = SimulationConfig {
            input: dir.path().join("missing").display().to_string(),
            output: dir.path().join("out").display().to_string(),
            ..SimulationConfig::default()
        };
        assert!(run_simulation(&config).is_err());
    }
}
