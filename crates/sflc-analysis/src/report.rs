//! Machine- and human-readable output of a batch run.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};

use crate::aggregate::AggregateSeries;
use crate::batch::{BatchOutcome, EvaluatedTrial, TrialFailure};
use crate::settings::{ExperimentSettings, SeriesMode};

/// Schema version for `report.json` consumers.
pub const REPORT_SCHEMA_V1: &str = "sflc-analysis.corruption_report.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorruptionReport {
    pub schema_version: String,
    /// Milliseconds since Unix epoch when the report was built.
    pub generated_unix_ms: u64,
    pub settings: ExperimentSettings,
    pub aggregate: AggregateSeries,
    pub trials: Vec<TrialSummary>,
    pub failures: Vec<TrialFailure>,
    pub fs_failures_per_round: Vec<u32>,
    /// Filesystem events per category label, one count per round.
    pub fs_events: BTreeMap<String, Vec<u32>>,
}

/// Per-trial line of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trial: String,
    /// SHA-256 of the trial file.
    pub sha256: String,
    pub rounds: usize,
    pub warnings: usize,
    pub mean_expected: f64,
    pub mean_actual: f64,
    /// Hidden slices lost over the whole trial.
    pub corrupted: u32,
}

impl TrialSummary {
    fn from_evaluated(t: &EvaluatedTrial) -> Self {
        Self {
            trial: t.outcome.trial.clone(),
            sha256: t.sha256.clone(),
            rounds: t.outcome.n_rounds(),
            warnings: t.outcome.warnings.len(),
            mean_expected: t.outcome.mean_expected(),
            mean_actual: t.outcome.mean_actual(),
            corrupted: t.outcome.rounds.iter().map(|r| r.actual).sum(),
        }
    }
}

impl CorruptionReport {
    pub fn from_batch(settings: &ExperimentSettings, batch: &BatchOutcome) -> Self {
        let generated_unix_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

        Self {
            schema_version: REPORT_SCHEMA_V1.to_owned(),
            generated_unix_ms,
            settings: settings.clone(),
            aggregate: batch.aggregate.clone(),
            trials: batch.trials.iter().map(TrialSummary::from_evaluated).collect(),
            failures: batch.failures.clone(),
            fs_failures_per_round: batch.fs_failures_per_round.clone(),
            fs_events: batch
                .fs_events
                .iter()
                .map(|(event, counts)| (event.to_string(), counts.clone()))
                .collect(),
        }
    }

    /// # Errors
    ///
    /// `Serialization` if serde fails.
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| SliceError::Serialization(err.to_string()))
    }

    /// Compact single-line JSON.
    ///
    /// # Errors
    ///
    /// `Serialization` if serde fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| SliceError::Serialization(err.to_string()))
    }

    /// # Errors
    ///
    /// `Serialization` if `text` is not a report.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| SliceError::Serialization(err.to_string()))
    }

    pub fn render_markdown(&self) -> String {
        let agg = &self.aggregate;
        let mut md = String::new();

        md.push_str("# Hidden Volume Slice Corruption Report\n\n");
        let _ = write!(
            md,
            "Device: {} slices. Trials aggregated: {} of {}. Rounds: {}.\n\n",
            self.settings.total_slices,
            agg.trials,
            self.settings.n_trials,
            agg.n_rounds(),
        );

        md.push_str("## Totals\n\n");
        md.push_str("| Metric | Value |\n");
        md.push_str("|--------|-------|\n");
        let _ = write!(md, "| Mean expected per round | {:.3} |\n", agg.total_expected);
        let _ = write!(md, "| Mean actual per round | {:.3} |\n", agg.total_actual);
        let _ = write!(
            md,
            "| Largest positive deviation | {:.3} |\n",
            agg.largest_positive_deviation
        );
        let _ = write!(
            md,
            "| Largest negative deviation | {:.3} |\n",
            agg.largest_negative_deviation
        );

        let heading = match agg.mode {
            SeriesMode::PerRound => "Per-round means",
            SeriesMode::Cumulative => "Cumulative means",
        };
        let _ = write!(md, "\n## {heading}\n\n");
        md.push_str("| Round | Expected | Actual | Expected - Actual | fsck failures |\n");
        md.push_str("|-------|----------|--------|-------------------|---------------|\n");
        for (i, (e, a)) in agg.expected.iter().zip(&agg.actual).enumerate() {
            let fsck = self.fs_failures_per_round.get(i).copied().unwrap_or(0);
            let _ = write!(
                md,
                "| {} | {e:.3} | {a:.3} | {:+.3} | {fsck} |\n",
                i + 1,
                e - a,
            );
        }

        if !self.fs_events.is_empty() {
            md.push_str("\n## Filesystem events\n\n");
            md.push_str("| Category | Rounds affected | Peak trials in one round |\n");
            md.push_str("|----------|-----------------|--------------------------|\n");
            for (label, counts) in &self.fs_events {
                let affected = counts.iter().filter(|&&c| c > 0).count();
                let peak = counts.iter().copied().max().unwrap_or(0);
                let _ = write!(md, "| {label} | {affected} | {peak} |\n");
            }
        }

        if !self.trials.is_empty() {
            md.push_str("\n## Trials\n\n");
            md.push_str("| Trial | Rounds | Corrupted | Mean expected | Mean actual | Warnings | SHA-256 |\n");
            md.push_str("|-------|--------|-----------|---------------|-------------|----------|---------|\n");
            for t in &self.trials {
                let _ = write!(
                    md,
                    "| {} | {} | {} | {:.3} | {:.3} | {} | `{}` |\n",
                    t.trial,
                    t.rounds,
                    t.corrupted,
                    t.mean_expected,
                    t.mean_actual,
                    t.warnings,
                    short_digest(&t.sha256),
                );
            }
        }

        if !self.failures.is_empty() || !agg.excluded.is_empty() {
            md.push_str("\n## Left out\n\n");
            for f in &self.failures {
                let _ = writeln!(md, "- trial {}: {}", f.trial, f.error);
            }
            for e in &agg.excluded {
                let _ = writeln!(md, "- trial {} (excluded): {}", e.trial, e.reason);
            }
        }

        let _ = write!(
            md,
            "\n---\n*{} aggregated, {} failed, {} excluded*\n",
            agg.trials,
            self.failures.len(),
            agg.excluded.len(),
        );
        md
    }
}

fn short_digest(hex: &str) -> &str {
    hex.get(..12).unwrap_or(hex)
}
