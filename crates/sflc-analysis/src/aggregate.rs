//! Cross-trial aggregation of per-round statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};
use tracing::{info, warn};

use crate::model::{DeviationExtremes, TrialOutcome};
use crate::settings::SeriesMode;

/// Mean (or cumulative mean) curves across trials plus scalar summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSeries {
    pub mode: SeriesMode,
    /// Trials that contributed.
    pub trials: usize,
    pub expected: Vec<f64>,
    pub actual: Vec<f64>,
    /// Mean over trials of each trial's mean expected count per round.
    pub total_expected: f64,
    /// Mean over trials of each trial's mean actual count per round.
    pub total_actual: f64,
    pub largest_positive_deviation: f64,
    pub largest_negative_deviation: f64,
    /// Trials left out because their round count differed.
    pub excluded: Vec<ExcludedTrial>,
}

impl AggregateSeries {
    pub fn n_rounds(&self) -> usize {
        self.expected.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedTrial {
    pub trial: String,
    pub reason: String,
}

/// Combine per-trial outcomes.
///
/// The round count is `rounds` if given, otherwise the most common count
/// among the outcomes (the larger one on a tie); outcomes with a different
/// count are excluded, not averaged in.
///
/// # Errors
///
/// [`SliceError::NoValidTrials`] if nothing is left to average.
pub fn aggregate(
    outcomes: &[TrialOutcome],
    mode: SeriesMode,
    rounds: Option<usize>,
) -> Result<AggregateSeries> {
    let Some(n_rounds) = rounds.or_else(|| modal_round_count(outcomes)) else {
        return Err(SliceError::NoValidTrials);
    };

    let mut expected = vec![0.0; n_rounds];
    let mut actual = vec![0.0; n_rounds];
    let mut total_expected = 0.0;
    let mut total_actual = 0.0;
    let mut extremes = DeviationExtremes::default();
    let mut excluded = Vec::new();
    let mut used = 0_usize;

    for outcome in outcomes {
        if outcome.n_rounds() != n_rounds {
            let err = SliceError::RoundCountMismatch {
                expected: n_rounds,
                actual: outcome.n_rounds(),
            };
            warn!(trial = %outcome.trial, error = %err, "trial excluded from aggregate");
            excluded.push(ExcludedTrial {
                trial: outcome.trial.clone(),
                reason: err.to_string(),
            });
            continue;
        }

        for (i, stat) in outcome.rounds.iter().enumerate() {
            expected[i] += stat.expected;
            actual[i] += f64::from(stat.actual);
        }
        total_expected += outcome.mean_expected();
        total_actual += outcome.mean_actual();
        extremes = extremes.merge(outcome.extremes);
        used += 1;
    }

    if used == 0 {
        return Err(SliceError::NoValidTrials);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = used as f64;
    for v in expected.iter_mut().chain(actual.iter_mut()) {
        *v /= n;
    }
    if mode == SeriesMode::Cumulative {
        cumulative(&mut expected);
        cumulative(&mut actual);
    }

    info!(
        trials = used,
        excluded = excluded.len(),
        rounds = n_rounds,
        "aggregated trial outcomes"
    );

    Ok(AggregateSeries {
        mode,
        trials: used,
        expected,
        actual,
        total_expected: total_expected / n,
        total_actual: total_actual / n,
        largest_positive_deviation: extremes.largest_positive,
        largest_negative_deviation: extremes.largest_negative,
        excluded,
    })
}

/// Most common round count, preferring the larger count on a tie.
pub fn modal_round_count(outcomes: &[TrialOutcome]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for outcome in outcomes {
        *counts.entry(outcome.n_rounds()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(rounds, seen)| (seen, rounds))
        .map(|(rounds, _)| rounds)
}

/// Replace each value with the running sum up to and including it.
pub fn cumulative(series: &mut [f64]) {
    let mut running = 0.0;
    for v in series.iter_mut() {
        *v += running;
        running = *v;
    }
}

/// Column-wise mean of equal-length series.
///
/// # Errors
///
/// [`SliceError::NoValidTrials`] for no input,
/// [`SliceError::RoundCountMismatch`] for ragged input.
pub fn mean_series(series: &[Vec<f64>]) -> Result<Vec<f64>> {
    let Some(first) = series.first() else {
        return Err(SliceError::NoValidTrials);
    };
    let len = first.len();
    let mut sums = vec![0.0; len];
    for s in series {
        if s.len() != len {
            return Err(SliceError::RoundCountMismatch {
                expected: len,
                actual: s.len(),
            });
        }
        for (acc, v) in sums.iter_mut().zip(s) {
            *acc += v;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let n = series.len() as f64;
    Ok(sums.into_iter().map(|v| v / n).collect())
}
