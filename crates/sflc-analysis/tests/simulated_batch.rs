//! Batch runs over generated trial directories.

use sflc_analysis::logging::init_test_logging;
use sflc_analysis::report::{CorruptionReport, REPORT_SCHEMA_V1};
use sflc_analysis::settings::{ExperimentSettings, SeriesMode};
use sflc_analysis::simulate::SyntheticExperiment;
use sflc_analysis::{ANALYSIS_SEED, run_batch};
use sflc_error::SliceError;

const EXPERIMENT: SyntheticExperiment = SyntheticExperiment {
    total_slices: 400,
    decoy_baseline: 40,
    hidden_baseline: 20,
    hidden_payload: 80,
    decoy_per_round: 20,
    rounds: 10,
};

fn settings(dir: &std::path::Path, n_trials: usize) -> ExperimentSettings {
    ExperimentSettings {
        total_slices: EXPERIMENT.total_slices,
        n_trials,
        results_dir: dir.to_path_buf(),
        workers: 4,
        ..ExperimentSettings::default()
    }
}

#[test]
fn uniform_allocation_matches_the_model() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    EXPERIMENT
        .write_batch(dir.path(), "results", 40, ANALYSIS_SEED)
        .unwrap();

    let batch = run_batch(&settings(dir.path(), 40)).unwrap();
    assert!(batch.failures.is_empty());
    assert_eq!(batch.aggregate.trials, 40);
    assert_eq!(batch.aggregate.mode, SeriesMode::Cumulative);

    // About 100 of 360 candidate slices are hidden and 200 are drawn, so
    // roughly 55 hidden slices are lost per trial.
    let expected = *batch.aggregate.expected.last().unwrap();
    let actual = *batch.aggregate.actual.last().unwrap();
    assert!(expected > 40.0 && expected < 70.0, "expected {expected}");
    assert!(
        (expected - actual).abs() < 5.0,
        "expected {expected} vs actual {actual}"
    );

    for series in [&batch.aggregate.expected, &batch.aggregate.actual] {
        assert!(series.windows(2).all(|w| w[1] >= w[0]));
    }
}

#[test]
fn broken_and_short_trials_are_left_out() {
    let dir = tempfile::tempdir().unwrap();
    EXPERIMENT
        .write_batch(dir.path(), "results", 5, ANALYSIS_SEED)
        .unwrap();
    std::fs::write(dir.path().join("results2.txt"), "[0, 1\n[2]\n").unwrap();
    let short = SyntheticExperiment {
        rounds: 4,
        ..EXPERIMENT
    };
    sflc_analysis::store::write_trial(dir.path(), "results", 4, &short.generate(4).unwrap())
        .unwrap();

    let batch = run_batch(&ExperimentSettings {
        series_mode: SeriesMode::PerRound,
        ..settings(dir.path(), 5)
    })
    .unwrap();

    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].trial, "2");
    assert_eq!(batch.aggregate.excluded.len(), 1);
    assert_eq!(batch.aggregate.excluded[0].trial, "4");
    assert_eq!(batch.aggregate.trials, 3);
    assert_eq!(batch.aggregate.n_rounds(), 10);

    let report = CorruptionReport::from_batch(&settings(dir.path(), 5), &batch);
    assert_eq!(report.schema_version, REPORT_SCHEMA_V1);
    assert_eq!(report.trials.len(), 4);
    let md = report.render_markdown();
    assert!(md.contains("- trial 2:"));
    assert!(md.contains("- trial 4 (excluded):"));
    assert!(md.contains("*3 aggregated, 1 failed, 1 excluded*"));
}

#[test]
fn short_first_trial_is_the_one_left_out() {
    let dir = tempfile::tempdir().unwrap();
    EXPERIMENT
        .write_batch(dir.path(), "results", 5, ANALYSIS_SEED)
        .unwrap();
    let short = SyntheticExperiment {
        rounds: 4,
        ..EXPERIMENT
    };
    sflc_analysis::store::write_trial(dir.path(), "results", 1, &short.generate(1).unwrap())
        .unwrap();

    let batch = run_batch(&settings(dir.path(), 5)).unwrap();
    assert!(batch.failures.is_empty());
    assert_eq!(batch.aggregate.n_rounds(), 10);
    assert_eq!(batch.aggregate.trials, 4);
    let excluded: Vec<&str> = batch
        .aggregate
        .excluded
        .iter()
        .map(|e| e.trial.as_str())
        .collect();
    assert_eq!(excluded, vec!["1"]);
}

#[test]
fn workers_do_not_change_the_result() {
    let dir = tempfile::tempdir().unwrap();
    EXPERIMENT
        .write_batch(dir.path(), "results", 9, ANALYSIS_SEED ^ 1)
        .unwrap();

    let serial = run_batch(&ExperimentSettings {
        workers: 1,
        ..settings(dir.path(), 9)
    })
    .unwrap();
    let parallel = run_batch(&ExperimentSettings {
        workers: 8,
        ..settings(dir.path(), 9)
    })
    .unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn rejecting_round_overlap_fails_overwritten_trials() {
    let dir = tempfile::tempdir().unwrap();
    EXPERIMENT
        .write_batch(dir.path(), "results", 3, ANALYSIS_SEED)
        .unwrap();

    // Generated hidden maps keep listing overwritten slices.
    let strict = ExperimentSettings {
        round_overlap: sflc_analysis::OverlapPolicy::Reject,
        ..settings(dir.path(), 3)
    };
    assert!(matches!(run_batch(&strict), Err(SliceError::NoValidTrials)));
}
