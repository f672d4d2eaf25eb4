use thiserror::Error;

/// Primary error type for slice corruption analysis.
///
/// Variants are grouped by the stage that raises them: log recovery, trial
/// record parsing, snapshot validation, and batch/settings handling. Every
/// variant carries enough context to locate the offending input.
#[derive(Error, Debug)]
pub enum SliceError {
    // === Log Recovery Errors ===
    /// A log line is missing an expected separator or holds a bad number.
    #[error("malformed log line {line}: {detail}")]
    MalformedLog { line: usize, detail: String },

    /// The newest block for a volume declares more entries than the log holds.
    #[error("truncated block for volume '{volume}': declared {declared} entries, found {available}")]
    TruncatedBlock {
        volume: String,
        declared: usize,
        available: usize,
    },

    /// No log entry mentions the volume at all.
    #[error("no log entries for volume '{volume}'")]
    EmptyLog { volume: String },

    // === Trial Record Errors ===
    /// A trial record line is not an integer-list literal, or is missing.
    #[error("malformed trial record at line {line}: {detail} (content: {content:?})")]
    MalformedRecord {
        line: usize,
        detail: String,
        content: String,
    },

    /// A trial holds a different number of rounds than required.
    #[error("round count mismatch: expected {expected}, got {actual}")]
    RoundCountMismatch { expected: usize, actual: usize },

    // === Snapshot Errors ===
    /// Decoy and hidden slice sets of one snapshot are not disjoint.
    #[error("inconsistent {phase} snapshot: {} slice(s) owned by both volumes (first: {:?})", .overlap.len(), .overlap.first())]
    InconsistentSnapshot { phase: String, overlap: Vec<u32> },

    /// A slice index lies outside `[0, total_slices)`.
    #[error("slice {slice} out of range for a device of {total_slices} slices")]
    SliceOutOfRange { slice: u32, total_slices: u32 },

    // === Batch Errors ===
    /// Experiment settings failed validation.
    #[error("invalid settings: {detail}")]
    InvalidSettings { detail: String },

    /// Every trial of a batch failed, nothing left to aggregate.
    #[error("no valid trials to aggregate")]
    NoValidTrials,

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classes, used for process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorClass {
    /// Raw log text could not be reconciled.
    Log = 10,
    /// A persisted trial record is unreadable.
    Record = 11,
    /// A snapshot violates slice ownership invariants.
    Snapshot = 12,
    /// Settings are unusable.
    Settings = 13,
    /// Nothing survived to be aggregated.
    Empty = 14,
    /// Filesystem or serialization failure.
    Io = 15,
    /// Bug.
    Internal = 70,
}

impl SliceError {
    /// Map this error to its coarse class.
    #[allow(clippy::match_same_arms)]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedLog { .. } | Self::TruncatedBlock { .. } | Self::EmptyLog { .. } => {
                ErrorClass::Log
            }
            Self::MalformedRecord { .. } | Self::RoundCountMismatch { .. } => ErrorClass::Record,
            Self::InconsistentSnapshot { .. } | Self::SliceOutOfRange { .. } => {
                ErrorClass::Snapshot
            }
            Self::InvalidSettings { .. } => ErrorClass::Settings,
            Self::NoValidTrials => ErrorClass::Empty,
            Self::Serialization(_) | Self::Io(_) => ErrorClass::Io,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether the log text failed to match the expected field structure,
    /// including a self-declared block that does not fit in the log.
    pub const fn is_malformed_log(&self) -> bool {
        matches!(
            self,
            Self::MalformedLog { .. } | Self::TruncatedBlock { .. }
        )
    }

    /// Whether this error disqualifies one trial without affecting others.
    pub const fn is_trial_local(&self) -> bool {
        matches!(
            self,
            Self::MalformedLog { .. }
                | Self::TruncatedBlock { .. }
                | Self::EmptyLog { .. }
                | Self::MalformedRecord { .. }
                | Self::RoundCountMismatch { .. }
                | Self::InconsistentSnapshot { .. }
                | Self::SliceOutOfRange { .. }
                | Self::Io(_)
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::EmptyLog { .. } => {
                Some("Check that the volume was opened before the log was captured")
            }
            Self::TruncatedBlock { .. } => {
                Some("Capture the log again; the ring buffer may have rotated mid-block")
            }
            Self::RoundCountMismatch { .. } => {
                Some("Re-run the trial or lower the configured round count")
            }
            Self::SliceOutOfRange { .. } => {
                Some("Verify total_slices matches the device the trial ran on")
            }
            Self::NoValidTrials => Some("Inspect per-trial failures in the report"),
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        self.class() as i32
    }

    /// Create a malformed-log error.
    pub fn malformed_log(line: usize, detail: impl Into<String>) -> Self {
        Self::MalformedLog {
            line,
            detail: detail.into(),
        }
    }

    /// Create a malformed-record error.
    pub fn malformed_record(
        line: usize,
        detail: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::MalformedRecord {
            line,
            detail: detail.into(),
            content: content.into(),
        }
    }

    /// Create an invalid-settings error.
    pub fn invalid_settings(detail: impl Into<String>) -> Self {
        Self::InvalidSettings {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `SliceError`.
pub type Result<T> = std::result::Result<T, SliceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_truncated_block() {
        let err = SliceError::TruncatedBlock {
            volume: "test1".to_owned(),
            declared: 5,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "truncated block for volume 'test1': declared 5 entries, found 3"
        );
    }

    #[test]
    fn error_display_inconsistent_snapshot() {
        let err = SliceError::InconsistentSnapshot {
            phase: "baseline".to_owned(),
            overlap: vec![4, 9],
        };
        assert_eq!(
            err.to_string(),
            "inconsistent baseline snapshot: 2 slice(s) owned by both volumes (first: Some(4))"
        );
    }

    #[test]
    fn malformed_log_covers_truncation() {
        assert!(SliceError::malformed_log(3, "missing '->'").is_malformed_log());
        assert!(
            SliceError::TruncatedBlock {
                volume: "v".to_owned(),
                declared: 2,
                available: 1,
            }
            .is_malformed_log()
        );
        assert!(
            !SliceError::EmptyLog {
                volume: "v".to_owned()
            }
            .is_malformed_log()
        );
    }

    #[test]
    fn trial_local_classification() {
        assert!(SliceError::malformed_record(7, "bad literal", "[1,").is_trial_local());
        assert!(
            SliceError::RoundCountMismatch {
                expected: 10,
                actual: 9
            }
            .is_trial_local()
        );
        assert!(!SliceError::NoValidTrials.is_trial_local());
        assert!(!SliceError::invalid_settings("x").is_trial_local());
        assert!(!SliceError::internal("bug").is_trial_local());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(SliceError::malformed_log(1, "x").exit_code(), 10);
        assert_eq!(SliceError::malformed_record(1, "x", "").exit_code(), 11);
        assert_eq!(SliceError::NoValidTrials.exit_code(), 14);
        assert_eq!(SliceError::internal("x").exit_code(), 70);
    }

    #[test]
    fn suggestions() {
        assert!(SliceError::NoValidTrials.suggestion().is_some());
        assert!(
            SliceError::EmptyLog {
                volume: "test2".to_owned()
            }
            .suggestion()
            .is_some()
        );
        assert!(SliceError::internal("x").suggestion().is_none());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "results1.txt");
        let err: SliceError = io_err.into();
        assert!(matches!(err, SliceError::Io(_)));
        assert_eq!(err.class(), ErrorClass::Io);
        assert!(err.is_trial_local());
    }
}
