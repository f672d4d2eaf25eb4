//! Slice-level corruption analysis for hidden-volume experiments.
//!
//! A trial records which physical slices a decoy and a hidden volume own
//! before the hidden payload, after it, and after each round of decoy
//! writes. This crate provides:
//! - **Mapping recovery**: the newest slice map of each volume from a kernel log
//! - **Trial records**: parsing, rendering and loading per-trial files
//! - **Corruption model**: expected versus observed hidden-slice loss per round
//! - **Aggregation**: per-round and cumulative means across trials
//! - **Side channels**: fsck results, repair counts and occupancy maps

pub mod aggregate;
pub mod batch;
pub mod integrity;
pub mod logging;
pub mod mapping;
pub mod mitigation;
pub mod model;
pub mod occupancy;
pub mod record;
pub mod report;
pub mod settings;
pub mod simulate;
pub mod store;

pub use aggregate::{AggregateSeries, aggregate};
pub use batch::{BatchOutcome, TrialFailure, run_batch};
pub use mapping::{RecoveredMapping, VolumePair, recover_snapshot};
pub use model::{DeviationExtremes, RoundStat, TrialOutcome, TrialState, evaluate_trial};
pub use record::{Trial, TrialRecord};
pub use report::CorruptionReport;
pub use settings::{ExperimentSettings, OverlapPolicy, SeriesMode};

/// Default seed for synthetic trials ("SLICES" as ASCII bytes).
///
/// Given the same seed, experiment shape and `rand` 0.8 `StdRng`, generated
/// trials are identical across runs.
pub const ANALYSIS_SEED: u64 = 0x534C_4943_4553;

/// Seed for trial `k` of a synthetic batch.
///
/// `trial_seed = base_seed ^ (k * 0x9E3779B97F4A7C15)`
#[inline]
#[must_use]
pub const fn derive_trial_seed(base_seed: u64, k: usize) -> u64 {
    base_seed ^ ((k as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}
