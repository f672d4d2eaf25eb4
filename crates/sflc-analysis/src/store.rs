//! Trial files on disk.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use sflc_error::Result;
use tracing::debug;

use crate::record::{Trial, TrialRecord};

/// A parsed trial together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedTrial {
    /// 1-based trial number.
    pub number: usize,
    pub path: PathBuf,
    /// SHA-256 hex digest of the file bytes.
    pub sha256: String,
    pub trial: Trial,
}

/// `<dir>/<prefix><k>.txt`
pub fn trial_path(dir: &Path, prefix: &str, k: usize) -> PathBuf {
    dir.join(format!("{prefix}{k}.txt"))
}

/// Read and parse trial `k`.
///
/// # Errors
///
/// `Io` if the file is unreadable, `MalformedRecord` if its content is not a
/// trial record.
pub fn load_trial(dir: &Path, prefix: &str, k: usize) -> Result<LoadedTrial> {
    let path = trial_path(dir, prefix, k);
    let bytes = std::fs::read(&path)?;
    let sha256 = sha256_hex(&bytes);
    let text = String::from_utf8_lossy(&bytes);
    let trial = TrialRecord::parse(&text)?;
    debug!(
        path = %path.display(),
        rounds = trial.n_rounds(),
        sha256 = %sha256,
        "loaded trial record"
    );
    Ok(LoadedTrial {
        number: k,
        path,
        sha256,
        trial,
    })
}

/// Write a trial in the driver's format; returns the path written.
///
/// # Errors
///
/// `Io` if the directory or file cannot be written.
pub fn write_trial(dir: &Path, prefix: &str, k: usize, trial: &Trial) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = trial_path(dir, prefix, k);
    std::fs::write(&path, TrialRecord::render(trial))?;
    Ok(path)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
