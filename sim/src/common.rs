//! Common utility functions for the simulation binary.
//!
//! This module contains:
//! - Logger initialization
//! - Dataset and output path validation

use landmark_pf::sim::{CONTROL_FILE, MAP_FILE};
use std::error::Error;
use std::path::{Path, PathBuf};

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Validate that `input` is a dataset directory.
///
/// A dataset directory must contain at least the landmark map and the control file; ground truth and
/// observation files are optional.
///
/// # Errors
/// Returns an error if the path does not exist, is not a directory, or lacks a required file.
pub fn validate_dataset_dir(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input path '{}' does not exist.", input.display()).into());
    }
    if !input.is_dir() {
        return Err(format!("Input path '{}' is not a directory.", input.display()).into());
    }
    for required in [MAP_FILE, CONTROL_FILE] {
        if !input.join(required).is_file() {
            return Err(format!(
                "Dataset '{}' is missing '{}'.",
                input.display(),
                required
            )
            .into());
        }
    }
    Ok(())
}

/// Validate output path and create it as a directory if needed.
///
/// # Errors
/// Returns an error if directory creation fails or the path is an existing file.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.is_file() {
        return Err(format!("Output path '{}' is a file.", output.display()).into());
    }
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}

/// Result file for the run using `seed`.
pub fn run_output_file(output: &Path, seed: u64) -> PathBuf {
    output.join(format!("run_{}.csv", seed))
}
