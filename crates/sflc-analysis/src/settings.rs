//! Experiment settings shared by every stage of an analysis run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};

use crate::mapping::{DEFAULT_MARKER, VolumePair};

/// How per-round series are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesMode {
    /// Independent per-round means.
    PerRound,
    /// Running totals of the per-round means.
    Cumulative,
}

/// What to do when a round snapshot lists a slice under both volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Record a warning on the trial and keep going.
    Warn,
    /// Fail the trial with `InconsistentSnapshot`.
    Reject,
}

/// Parameters of one analysis run.
///
/// Defaults match the 300 KB decoy-file campaign: 30 trials on a device of
/// 890 slices, reported as cumulative curves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    /// Slices available on the device after header overhead.
    pub total_slices: u32,
    /// Rounds per trial; `None` takes the count of the first valid trial.
    pub n_rounds: Option<usize>,
    /// Trials are numbered `1..=n_trials`.
    pub n_trials: usize,
    /// Directory holding the per-trial files.
    pub results_dir: PathBuf,
    /// Trial `k` is read from `<results_dir>/<results_prefix><k>.txt`.
    pub results_prefix: String,
    /// Optional fsck side channel, `<results_dir>/<fsck_prefix><k>.txt`.
    pub fsck_prefix: String,
    /// Optional filesystem error summary, `<results_dir>/<fserr_prefix><k>.txt`.
    pub fserr_prefix: String,
    pub series_mode: SeriesMode,
    pub round_overlap: OverlapPolicy,
    pub log_marker: String,
    pub decoy_volume: String,
    pub hidden_volume: String,
    /// Worker threads used to evaluate trials.
    pub workers: usize,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            total_slices: 890,
            n_rounds: None,
            n_trials: 30,
            results_dir: PathBuf::from("."),
            results_prefix: "results".to_owned(),
            fsck_prefix: "fsck".to_owned(),
            fserr_prefix: "fserr".to_owned(),
            series_mode: SeriesMode::Cumulative,
            round_overlap: OverlapPolicy::Warn,
            log_marker: DEFAULT_MARKER.to_owned(),
            decoy_volume: "test1".to_owned(),
            hidden_volume: "test2".to_owned(),
            workers: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        }
    }
}

impl ExperimentSettings {
    /// Load settings from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `Serialization` if it is not valid
    /// JSON for this type.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|err| {
            SliceError::Serialization(format!("settings {}: {err}", path.display()))
        })
    }

    /// Apply `SFLC_TOTAL_SLICES`, `SFLC_ROUNDS` and `SFLC_TRIALS` overrides.
    ///
    /// # Errors
    ///
    /// `InvalidSettings` if a variable is set but not a number.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::apply_env_overrides`] with an injectable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("SFLC_TOTAL_SLICES") {
            self.total_slices = parse_override("SFLC_TOTAL_SLICES", &raw)?;
        }
        if let Some(raw) = lookup("SFLC_ROUNDS") {
            self.n_rounds = Some(parse_override("SFLC_ROUNDS", &raw)?);
        }
        if let Some(raw) = lookup("SFLC_TRIALS") {
            self.n_trials = parse_override("SFLC_TRIALS", &raw)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidSettings` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.total_slices == 0 {
            return Err(SliceError::invalid_settings("total_slices must be > 0"));
        }
        if self.n_trials == 0 {
            return Err(SliceError::invalid_settings("n_trials must be > 0"));
        }
        if self.n_rounds == Some(0) {
            return Err(SliceError::invalid_settings("n_rounds must be > 0 when set"));
        }
        if self.workers == 0 {
            return Err(SliceError::invalid_settings("workers must be > 0"));
        }
        if self.decoy_volume == self.hidden_volume {
            return Err(SliceError::invalid_settings(format!(
                "decoy and hidden volume share the name '{}'",
                self.decoy_volume
            )));
        }
        if self.results_prefix.is_empty() {
            return Err(SliceError::invalid_settings("results_prefix must be non-empty"));
        }
        Ok(())
    }

    /// Volume names and marker for log recovery.
    pub fn volume_pair(&self) -> VolumePair<'_> {
        VolumePair {
            marker: &self.log_marker,
            decoy: &self.decoy_volume,
            hidden: &self.hidden_volume,
        }
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| SliceError::Serialization(err.to_string()))
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| SliceError::invalid_settings(format!("{key}={raw:?}: {err}")))
}
