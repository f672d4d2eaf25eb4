//! Corruption-rate model.
//!
//! Within one trial, a [`TrialState`] tracks which slices the decoy volume
//! owns and which hidden slices are still intact. Each round's decoy
//! snapshot reveals newly decoy-owned slices; every one of them is weighed
//! against the chance that a uniformly random slice, drawn from those not yet
//! decoy-owned, would have been a hidden one. Newly decoy-owned slices that
//! were hidden are counted as actual corruptions and never return.

use serde::{Deserialize, Serialize};
use sflc_error::Result;
use sflc_types::{Snapshot, VolumeSliceSet};
use tracing::{debug, info_span, warn};

use crate::record::{BaselineDrift, Phase, Trial};
use crate::settings::{ExperimentSettings, OverlapPolicy};

/// Observed and expected corruption for one round of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundStat {
    /// Sum over newly decoy-owned slices of the probability that the slice
    /// would have been hidden under uniform random allocation.
    pub expected: f64,
    /// Hidden slices reassigned to the decoy volume this round.
    pub actual: u32,
    /// Slices that became decoy-owned this round.
    pub new_decoy: u32,
    /// Hidden slices still intact after the round.
    pub hidden_remaining: u32,
    /// Decoy-owned slices after the round.
    pub decoy_owned: u32,
}

impl RoundStat {
    /// `expected − actual`.
    pub fn deviation(&self) -> f64 {
        self.expected - f64::from(self.actual)
    }
}

/// Running extremes of `expected − actual`.
///
/// Both start at zero: `largest_positive` only grows and `largest_negative`
/// only shrinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviationExtremes {
    pub largest_positive: f64,
    pub largest_negative: f64,
}

impl DeviationExtremes {
    pub fn observe(&mut self, deviation: f64) {
        if deviation > self.largest_positive {
            self.largest_positive = deviation;
        }
        if deviation < self.largest_negative {
            self.largest_negative = deviation;
        }
    }

    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            largest_positive: self.largest_positive.max(other.largest_positive),
            largest_negative: self.largest_negative.min(other.largest_negative),
        }
    }

    pub fn from_stats<'a>(stats: impl IntoIterator<Item = &'a RoundStat>) -> Self {
        stats.into_iter().fold(Self::default(), |mut acc, s| {
            acc.observe(s.deviation());
            acc
        })
    }
}

/// Trial-scoped working sets. Built from a trial's first two snapshots and
/// never written back to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialState {
    decoy_slices: VolumeSliceSet,
    hidden_slices: VolumeSliceSet,
    total_slices: u32,
}

impl TrialState {
    /// `decoy = baseline.decoy`, `hidden = baseline.hidden ∪ hidden_files`.
    pub fn new(trial: &Trial, total_slices: u32) -> Self {
        Self {
            decoy_slices: trial.baseline.decoy.clone(),
            hidden_slices: trial.baseline.hidden.union(&trial.hidden_files()),
            total_slices,
        }
    }

    pub fn decoy_slices(&self) -> &VolumeSliceSet {
        &self.decoy_slices
    }

    pub fn hidden_slices(&self) -> &VolumeSliceSet {
        &self.hidden_slices
    }

    /// Chance that a uniformly random slice not yet decoy-owned is hidden.
    pub fn hit_probability(&self) -> f64 {
        let free_for_decoy = self
            .total_slices
            .saturating_sub(count(&self.decoy_slices));
        if free_for_decoy == 0 {
            return 0.0;
        }
        f64::from(count(&self.hidden_slices)) / f64::from(free_for_decoy)
    }

    /// Apply one round's decoy snapshot.
    pub fn step(&mut self, round_decoy: &VolumeSliceSet) -> RoundStat {
        let new_decoy_slices = round_decoy.difference(&self.decoy_slices);
        let mut expected = 0.0;
        let mut actual = 0;

        for slice in new_decoy_slices.iter() {
            if !self.decoy_slices.contains(slice) {
                expected += self.hit_probability();
            }
            if self.hidden_slices.remove(slice) {
                self.decoy_slices.insert(slice);
                actual += 1;
            } else {
                self.decoy_slices.insert(slice);
            }
        }

        RoundStat {
            expected,
            actual,
            new_decoy: count(&new_decoy_slices),
            hidden_remaining: count(&self.hidden_slices),
            decoy_owned: count(&self.decoy_slices),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn count(set: &VolumeSliceSet) -> u32 {
    set.len() as u32
}

/// A data-quality finding that does not stop a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrialWarning {
    /// The decoy allocation changed while the hidden payload was written.
    BaselineDrift(BaselineDrift),
    /// A round snapshot lists slices under both volumes.
    RoundOverlap { round: usize, overlap: Vec<u32> },
}

/// Everything the model derives from one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial: String,
    pub rounds: Vec<RoundStat>,
    pub extremes: DeviationExtremes,
    pub warnings: Vec<TrialWarning>,
}

impl TrialOutcome {
    /// Build an outcome from precomputed round statistics.
    pub fn from_round_stats(trial: impl Into<String>, rounds: Vec<RoundStat>) -> Self {
        let extremes = DeviationExtremes::from_stats(&rounds);
        Self {
            trial: trial.into(),
            rounds,
            extremes,
            warnings: Vec::new(),
        }
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Mean expected count per round.
    pub fn mean_expected(&self) -> f64 {
        mean(self.rounds.iter().map(|r| r.expected))
    }

    /// Mean actual count per round.
    pub fn mean_actual(&self) -> f64 {
        mean(self.rounds.iter().map(|r| f64::from(r.actual)))
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// Validate a trial and run every round through the model.
///
/// # Errors
///
/// Fails for slices outside the device, overlapping baseline or post-hidden
/// snapshots, and overlapping round snapshots under
/// [`OverlapPolicy::Reject`].
pub fn evaluate_trial(
    id: &str,
    trial: &Trial,
    settings: &ExperimentSettings,
) -> Result<TrialOutcome> {
    let span = info_span!("trial", trial = id);
    let _enter = span.enter();

    trial.check_range(settings.total_slices)?;
    trial
        .baseline
        .ensure_disjoint(&Phase::Baseline.to_string())?;
    trial
        .post_hidden
        .ensure_disjoint(&Phase::PostHidden.to_string())?;

    let mut warnings = Vec::new();
    if let Some(drift) = trial.baseline_drift() {
        warn!(
            appeared = drift.appeared.len(),
            vanished = drift.vanished.len(),
            "decoy baseline changed while hidden files were written"
        );
        warnings.push(TrialWarning::BaselineDrift(drift));
    }

    let mut state = TrialState::new(trial, settings.total_slices);
    let mut rounds = Vec::with_capacity(trial.n_rounds());
    for (idx, snapshot) in trial.rounds.iter().enumerate() {
        let round = idx + 1;
        check_round_overlap(round, snapshot, settings.round_overlap, &mut warnings)?;

        let stat = state.step(&snapshot.decoy);
        debug!(
            round,
            expected = stat.expected,
            actual = stat.actual,
            hidden_remaining = stat.hidden_remaining,
            "round evaluated"
        );
        rounds.push(stat);
    }

    let extremes = DeviationExtremes::from_stats(&rounds);
    Ok(TrialOutcome {
        trial: id.to_owned(),
        rounds,
        extremes,
        warnings,
    })
}

fn check_round_overlap(
    round: usize,
    snapshot: &Snapshot,
    policy: OverlapPolicy,
    warnings: &mut Vec<TrialWarning>,
) -> Result<()> {
    match policy {
        OverlapPolicy::Reject => snapshot.ensure_disjoint(&Phase::Round(round).to_string()),
        OverlapPolicy::Warn => {
            let overlap = snapshot.overlap();
            if !overlap.is_empty() {
                debug!(round, overlap = overlap.len(), "round snapshot overlap");
                warnings.push(TrialWarning::RoundOverlap {
                    round,
                    overlap: overlap.to_vec(),
                });
            }
            Ok(())
        }
    }
}
