//! Filesystem-integrity side channel.
//!
//! The analysis never checks filesystems itself. The driver leaves two kinds
//! of traces that are folded into reports as an opaque pass/fail signal:
//!
//! - an fsck log per trial: for every round whose `fsck` output deviated from
//!   the clean banner, a line holding the round number followed by the raw
//!   output;
//! - an error summary per trial, one line per category:
//!   `invalid journal,3,7` lists the rounds where the journal was invalid.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};

/// Rounds flagged in an fsck log.
pub fn parse_fsck_log(text: &str) -> BTreeSet<usize> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|l| l.parse().ok())
        .collect()
}

/// For each round `1..=n_rounds`, the number of trials whose fsck log flags it.
pub fn failures_per_round(logs: &[BTreeSet<usize>], n_rounds: usize) -> Vec<u32> {
    let mut counts = vec![0_u32; n_rounds];
    for rounds in logs {
        for &r in rounds {
            if (1..=n_rounds).contains(&r) {
                counts[r - 1] += 1;
            }
        }
    }
    counts
}

/// Filesystem damage categories reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsEvent {
    InvalidJournal,
    InvalidSuperblock,
    CorruptedDirectory,
    Other(String),
}

impl FsEvent {
    fn from_label(label: &str) -> Self {
        match label {
            "invalid journal" => Self::InvalidJournal,
            "invalid superblock" => Self::InvalidSuperblock,
            "corrupted directory" => Self::CorruptedDirectory,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for FsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJournal => f.write_str("invalid journal"),
            Self::InvalidSuperblock => f.write_str("invalid superblock"),
            Self::CorruptedDirectory => f.write_str("corrupted directory"),
            Self::Other(label) => f.write_str(label),
        }
    }
}

/// One trial's error summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsErrorLog {
    pub events: Vec<(FsEvent, Vec<usize>)>,
}

impl FsErrorLog {
    /// Lines with a single component (a category with no rounds) are skipped.
    ///
    /// # Errors
    ///
    /// `MalformedRecord` for a round that is not a number.
    pub fn parse(text: &str) -> Result<Self> {
        let mut events = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let mut parts = line.split(',');
            let label = parts.next().unwrap_or_default().trim();
            let rounds = parts
                .map(|p| {
                    p.trim().parse::<usize>().map_err(|err| {
                        SliceError::malformed_record(
                            idx + 1,
                            format!("bad round number {:?}: {err}", p.trim()),
                            line,
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if rounds.is_empty() {
                continue;
            }
            events.push((FsEvent::from_label(label), rounds));
        }
        Ok(Self { events })
    }
}

/// Event counts per category and round, summed over trials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsErrorTally {
    counts: BTreeMap<FsEvent, BTreeMap<usize, u32>>,
}

impl FsErrorTally {
    pub fn add(&mut self, log: &FsErrorLog) {
        for (event, rounds) in &log.events {
            let per_round = self.counts.entry(event.clone()).or_default();
            for &r in rounds {
                *per_round.entry(r).or_default() += 1;
            }
        }
    }

    /// Dense counts for rounds `1..=n_rounds`, per category.
    pub fn per_round(&self, n_rounds: usize) -> BTreeMap<FsEvent, Vec<u32>> {
        self.counts
            .iter()
            .map(|(event, rounds)| {
                let dense = (1..=n_rounds)
                    .map(|r| rounds.get(&r).copied().unwrap_or(0))
                    .collect();
                (event.clone(), dense)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsck_log_rounds() {
        let text = "\
4
fsck from util-linux 2.37.2
Pass 1: Checking inodes, blocks, and sizes
Inode 12 has illegal block(s).  Clear? yes
11
fsck from util-linux 2.37.2
";
        let rounds = parse_fsck_log(text);
        assert_eq!(rounds.into_iter().collect::<Vec<_>>(), vec![4, 11]);
    }

    #[test]
    fn per_round_failure_counts() {
        let a: BTreeSet<usize> = [1, 3].into_iter().collect();
        let b: BTreeSet<usize> = [3, 9].into_iter().collect();
        assert_eq!(failures_per_round(&[a, b], 4), vec![1, 0, 2, 0]);
    }

    #[test]
    fn error_log_categories() {
        let text = "invalid journal,3, 5\ninvalid superblock\ncorrupted directory,5\nbad bitmap,2\n";
        let log = FsErrorLog::parse(text).unwrap();
        assert_eq!(log.events.len(), 3);
        assert_eq!(log.events[0], (FsEvent::InvalidJournal, vec![3, 5]));
        assert_eq!(log.events[2].0, FsEvent::Other("bad bitmap".to_owned()));
        assert_eq!(log.events[2].0.to_string(), "bad bitmap");
    }

    #[test]
    fn error_log_bad_round() {
        let err = FsErrorLog::parse("invalid journal,x\n").unwrap_err();
        assert!(matches!(err, SliceError::MalformedRecord { line: 1, .. }));
    }

    #[test]
    fn tally_across_trials() {
        let mut tally = FsErrorTally::default();
        tally.add(&FsErrorLog::parse("invalid journal,1,2\n").unwrap());
        tally.add(&FsErrorLog::parse("invalid journal,2\ncorrupted directory,3\n").unwrap());

        let dense = tally.per_round(3);
        assert_eq!(dense[&FsEvent::InvalidJournal], vec![1, 2, 0]);
        assert_eq!(dense[&FsEvent::CorruptedDirectory], vec![0, 0, 1]);
        assert!(!dense.contains_key(&FsEvent::InvalidSuperblock));
    }
}
