//! Structured logging for analysis runs.
//!
//! Two outputs: a compact ANSI stream on the terminal and JSON lines in
//! `<run_dir>/analysis.log.jsonl`. Events carry `trial`, `round` and
//! `stage` fields so a run can be sliced with `jq` afterwards.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sflc_error::{Result, SliceError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// File name of the JSON-lines log inside a run directory.
pub const LOG_FILE_NAME: &str = "analysis.log.jsonl";

/// Returned by [`init_logging`]. Keep it alive for the whole run.
#[derive(Debug)]
pub struct LogGuard {
    pub log_path: PathBuf,
}

/// `MakeWriter` over a shared file; one lock per event.
#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl SharedFileWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        // A panic mid-write leaves at worst a torn line; keep logging.
        SharedFileGuard {
            guard: self.file.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct SharedFileGuard<'a> {
    guard: MutexGuard<'a, std::fs::File>,
}

impl std::io::Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(&mut *self.guard, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(&mut *self.guard)
    }
}

/// Install the global subscriber.
///
/// `verbose` lowers the default filter from `info` to `trace`; `RUST_LOG`
/// overrides either.
///
/// # Errors
///
/// `Io` if the run directory or log file cannot be created, `Internal` if a
/// global subscriber is already installed.
pub fn init_logging(run_dir: &Path, verbose: bool) -> Result<LogGuard> {
    std::fs::create_dir_all(run_dir)?;

    let filter_str = if verbose { "trace" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let log_path = run_dir.join(LOG_FILE_NAME);
    let file = std::fs::File::create(&log_path)?;

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(SharedFileWriter::new(file))
        .with_target(true)
        .with_thread_ids(true);

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(terminal_layer)
        .with(json_layer)
        .try_init()
        .map_err(|err| SliceError::internal(format!("logging already initialised: {err}")))?;

    Ok(LogGuard { log_path })
}

/// Terminal-only logging, for runs without a run directory.
///
/// # Errors
///
/// `Internal` if a global subscriber is already installed.
pub fn init_terminal_logging(verbose: bool) -> Result<()> {
    let filter_str = if verbose { "trace" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|err| SliceError::internal(format!("logging already initialised: {err}")))
}

/// Terminal-only logging for tests. Safe to call repeatedly.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

/// Run `f`, logging `stage`, elapsed time and success.
pub fn log_timed_stage<T, E: std::fmt::Display>(
    stage: &str,
    f: impl FnOnce() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let start = std::time::Instant::now();
    let result = f();
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match &result {
        Ok(_) => tracing::info!(stage, elapsed_ms, success = true, "stage complete"),
        Err(e) => tracing::warn!(stage, elapsed_ms, success = false, error = %e, "stage failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped_json_subscriber(
        log_path: &Path,
        filter: &str,
    ) -> impl tracing::Subscriber + Send + Sync {
        let file = std::fs::File::create(log_path).unwrap();
        tracing_subscriber::registry().with(EnvFilter::new(filter)).with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(SharedFileWriter::new(file))
                .with_target(true),
        )
    }

    #[test]
    fn json_lines_are_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join(LOG_FILE_NAME);

        tracing::subscriber::with_default(scoped_json_subscriber(&log_path, "info"), || {
            tracing::info!(trial = "7", round = 3_usize, "round evaluated");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        let mut lines = 0;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("level").is_some(), "missing level: {parsed}");
            lines += 1;
        }
        assert_eq!(lines, 1);
        assert!(content.contains("\"trial\":\"7\""));
    }

    #[test]
    fn filter_drops_lower_levels() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join(LOG_FILE_NAME);

        tracing::subscriber::with_default(scoped_json_subscriber(&log_path, "info"), || {
            tracing::trace!(hidden_detail = true, "trace event");
            tracing::info!(kept_detail = true, "info event");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("kept_detail"));
        assert!(!content.contains("hidden_detail"));
    }

    #[test]
    fn timed_stage_records_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join(LOG_FILE_NAME);

        tracing::subscriber::with_default(scoped_json_subscriber(&log_path, "info"), || {
            let ok: std::result::Result<u32, String> = log_timed_stage("load", || Ok(3));
            assert_eq!(ok.unwrap(), 3);
            let err: std::result::Result<u32, String> =
                log_timed_stage("aggregate", || Err("no trials".to_owned()));
            assert!(err.is_err());
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("elapsed_ms"));
        assert!(content.contains("\"stage\":\"aggregate\""));
        assert!(content.contains("no trials"));
    }
}
