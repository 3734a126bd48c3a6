//! Per-run log file bootstrap.

use crate::error::{Result, TrainError};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Number of `.txt` files already in `log_dir`: the index of the next run.
pub fn next_log_index<P: AsRef<Path>>(log_dir: P) -> Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(log_dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            count += 1;
        }
    }
    Ok(count)
}

/// `log_dir/log{N}.txt` for the next run.
pub fn next_log_path<P: AsRef<Path>>(log_dir: P) -> Result<PathBuf> {
    let index = next_log_index(log_dir.as_ref())?;
    Ok(log_dir.as_ref().join(format!("log{}.txt", index)))
}

/// Install a global subscriber appending to a fresh `log{N}.txt`.
///
/// Every line carries timestamp, source file, line number and level.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_file_logging<P: AsRef<Path>>(log_dir: P) -> Result<PathBuf> {
    let path = next_log_path(log_dir)?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .try_init()
        .map_err(|e| TrainError::configuration(format!("failed to install logger: {}", e)))?;

    Ok(path)
}
