//! Evaluate every trial of an experiment and aggregate the survivors.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};
use tracing::{info, info_span, warn};

use crate::aggregate::{AggregateSeries, aggregate};
use crate::integrity::{FsErrorLog, FsErrorTally, FsEvent, failures_per_round, parse_fsck_log};
use crate::logging::log_timed_stage;
use crate::model::{TrialOutcome, evaluate_trial};
use crate::settings::ExperimentSettings;
use crate::store::{load_trial, trial_path};

/// A trial that loaded and evaluated cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedTrial {
    pub number: usize,
    pub sha256: String,
    pub outcome: TrialOutcome,
    /// Rounds flagged by fsck, if the trial has an fsck log.
    pub fsck_rounds: Option<BTreeSet<usize>>,
    pub fs_errors: Option<FsErrorLog>,
}

/// A trial left out of the batch, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub trial: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Sorted by trial number.
    pub trials: Vec<EvaluatedTrial>,
    pub failures: Vec<TrialFailure>,
    pub aggregate: AggregateSeries,
    /// Per round, how many aggregated trials failed fsck.
    pub fs_failures_per_round: Vec<u32>,
    /// Per category and round, filesystem events over aggregated trials.
    pub fs_events: BTreeMap<FsEvent, Vec<u32>>,
}

/// Load, evaluate and aggregate trials `1..=settings.n_trials`.
///
/// Trial-local failures are collected, never propagated: one bad file does
/// not stop its siblings.
///
/// # Errors
///
/// `InvalidSettings` before any work, `NoValidTrials` if every trial failed
/// or was excluded.
pub fn run_batch(settings: &ExperimentSettings) -> Result<BatchOutcome> {
    settings.validate()?;
    let span = info_span!("batch", trials = settings.n_trials, workers = settings.workers);
    let _enter = span.enter();

    let results = evaluate_all(settings);

    let mut trials = Vec::new();
    let mut failures = Vec::new();
    for (number, result) in results {
        match result {
            Ok(evaluated) => trials.push(evaluated),
            Err(err) => {
                warn!(trial = number, error = %err, "trial failed");
                failures.push(TrialFailure {
                    trial: number.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }

    let outcomes: Vec<TrialOutcome> = trials.iter().map(|t| t.outcome.clone()).collect();
    let aggregate = log_timed_stage("aggregate", || {
        aggregate(&outcomes, settings.series_mode, settings.n_rounds)
    })?;

    let excluded: BTreeSet<&str> = aggregate.excluded.iter().map(|e| e.trial.as_str()).collect();
    let contributing = || {
        trials
            .iter()
            .filter(|t| !excluded.contains(t.outcome.trial.as_str()))
    };

    let fsck: Vec<BTreeSet<usize>> = contributing()
        .filter_map(|t| t.fsck_rounds.clone())
        .collect();
    let fs_failures_per_round = failures_per_round(&fsck, aggregate.n_rounds());

    let mut tally = FsErrorTally::default();
    for log in contributing().filter_map(|t| t.fs_errors.as_ref()) {
        tally.add(log);
    }
    let fs_events = tally.per_round(aggregate.n_rounds());

    info!(
        evaluated = trials.len(),
        failed = failures.len(),
        aggregated = aggregate.trials,
        "batch complete"
    );

    Ok(BatchOutcome {
        trials,
        failures,
        aggregate,
        fs_failures_per_round,
        fs_events,
    })
}

/// Results in trial order. Trials are dealt round-robin to the workers.
fn evaluate_all(settings: &ExperimentSettings) -> Vec<(usize, Result<EvaluatedTrial>)> {
    let workers = settings.workers.min(settings.n_trials).max(1);
    let mut per_worker: Vec<Vec<usize>> = vec![Vec::new(); workers];
    for k in 1..=settings.n_trials {
        per_worker[(k - 1) % workers].push(k);
    }

    let mut results: Vec<(usize, Result<EvaluatedTrial>)> = std::thread::scope(|s| {
        let joins: Vec<_> = per_worker
            .iter()
            .map(|numbers| {
                let handle = s.spawn(move || {
                    numbers
                        .iter()
                        .map(|&k| (k, evaluate_one(settings, k)))
                        .collect::<Vec<_>>()
                });
                (numbers, handle)
            })
            .collect();

        joins
            .into_iter()
            .flat_map(|(numbers, handle)| {
                handle.join().unwrap_or_else(|_| {
                    numbers
                        .iter()
                        .map(|&k| (k, Err(SliceError::internal("worker thread panicked"))))
                        .collect()
                })
            })
            .collect()
    });

    results.sort_by_key(|(k, _)| *k);
    results
}

fn evaluate_one(settings: &ExperimentSettings, k: usize) -> Result<EvaluatedTrial> {
    let dir = settings.results_dir.as_path();
    let mut loaded = load_trial(dir, &settings.results_prefix, k)?;
    if let Some(n) = settings.n_rounds {
        loaded.trial.truncate_rounds(n)?;
    }
    let outcome = evaluate_trial(&k.to_string(), &loaded.trial, settings)?;

    let fsck_rounds =
        read_optional(dir, &settings.fsck_prefix, k).map(|text| parse_fsck_log(&text));
    let fs_errors = match read_optional(dir, &settings.fserr_prefix, k) {
        Some(text) => match FsErrorLog::parse(&text) {
            Ok(log) => Some(log),
            Err(err) => {
                warn!(trial = k, error = %err, "ignoring unreadable filesystem error summary");
                None
            }
        },
        None => None,
    };

    Ok(EvaluatedTrial {
        number: k,
        sha256: loaded.sha256,
        outcome,
        fsck_rounds,
        fs_errors,
    })
}

/// `<dir>/<prefix><k>.txt` if it exists and is readable. Side channel files
/// never fail a trial, so read errors are logged and treated as absent.
fn read_optional(dir: &Path, prefix: &str, k: usize) -> Option<String> {
    let path = trial_path(dir, prefix, k);
    match std::fs::read(&path) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(
                trial = k,
                path = %path.display(),
                error = %err,
                "ignoring unreadable side channel file"
            );
            None
        }
    }
}
