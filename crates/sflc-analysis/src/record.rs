//! Trial record format.
//!
//! The experiment driver persists one text file per trial. Each snapshot is
//! two lines holding integer-list literals (decoy first, then hidden)
//! followed by a blank separator line:
//!
//! ```text
//! [0, 1, 5]        <- decoy, baseline
//! [2, 3]           <- hidden, baseline
//!
//! [0, 1, 5]        <- decoy, after hidden files were written
//! [2, 3, 7, 8]     <- hidden, after hidden files were written
//!
//! [0, 1, 5, 7, 9]  <- decoy, round 1
//! [2, 3, 7, 8]     <- hidden, round 1
//!
//! ...
//! ```
//!
//! The separator after the last group may be missing.

use std::fmt::{self, Write as _};
use std::iter::{Enumerate, Peekable};
use std::str::Lines;

use sflc_error::{Result, SliceError};
use sflc_types::{Snapshot, VolumeSliceSet};

/// One trial: baseline, post-hidden snapshot, and one snapshot per round.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Trial {
    /// Before any hidden content was written.
    pub baseline: Snapshot,
    /// After the hidden payload was written, before any decoy round.
    pub post_hidden: Snapshot,
    /// After each round of decoy writes, in round order.
    pub rounds: Vec<Snapshot>,
}

/// Where a snapshot sits within a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Baseline,
    PostHidden,
    /// 1-based round number.
    Round(usize),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => f.write_str("baseline"),
            Self::PostHidden => f.write_str("post_hidden"),
            Self::Round(n) => write!(f, "round {n}"),
        }
    }
}

/// Slices that appeared in, or vanished from, the decoy volume between the
/// baseline and the post-hidden snapshot.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BaselineDrift {
    pub appeared: Vec<u32>,
    pub vanished: Vec<u32>,
}

impl Trial {
    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Slices attributable to the hidden payload:
    /// `post_hidden.hidden − baseline.hidden`.
    pub fn hidden_files(&self) -> VolumeSliceSet {
        self.post_hidden.hidden.difference(&self.baseline.hidden)
    }

    /// `None` when the decoy allocation stayed stable while the hidden
    /// payload was written.
    pub fn baseline_drift(&self) -> Option<BaselineDrift> {
        if self.post_hidden.decoy == self.baseline.decoy {
            return None;
        }
        Some(BaselineDrift {
            appeared: self
                .post_hidden
                .decoy
                .difference(&self.baseline.decoy)
                .to_vec(),
            vanished: self
                .baseline
                .decoy
                .difference(&self.post_hidden.decoy)
                .to_vec(),
        })
    }

    /// Keep exactly `n` rounds.
    ///
    /// # Errors
    ///
    /// [`SliceError::RoundCountMismatch`] if fewer than `n` rounds exist.
    pub fn truncate_rounds(&mut self, n: usize) -> Result<()> {
        if self.rounds.len() < n {
            return Err(SliceError::RoundCountMismatch {
                expected: n,
                actual: self.rounds.len(),
            });
        }
        self.rounds.truncate(n);
        Ok(())
    }

    /// Range-check every snapshot against the device size.
    pub fn check_range(&self, total_slices: u32) -> Result<()> {
        self.baseline.check_range(total_slices)?;
        self.post_hidden.check_range(total_slices)?;
        self.rounds
            .iter()
            .try_for_each(|r| r.check_range(total_slices))
    }
}

/// Parser and renderer for the on-disk trial format.
pub struct TrialRecord;

impl TrialRecord {
    /// Parse a whole trial file.
    ///
    /// # Errors
    ///
    /// [`SliceError::MalformedRecord`] naming the 1-based line, the phase,
    /// and the offending content.
    pub fn parse(text: &str) -> Result<Trial> {
        let mut cursor = Cursor {
            lines: text.lines().enumerate().peekable(),
            last_line: 0,
        };

        let baseline = cursor.snapshot(Phase::Baseline)?;
        let post_hidden = cursor.snapshot(Phase::PostHidden)?;

        let mut rounds = Vec::new();
        while cursor.has_more_content() {
            rounds.push(cursor.snapshot(Phase::Round(rounds.len() + 1))?);
        }

        Ok(Trial {
            baseline,
            post_hidden,
            rounds,
        })
    }

    /// Render a trial in the same format the driver writes.
    pub fn render(trial: &Trial) -> String {
        let mut out = String::new();
        for snap in std::iter::once(&trial.baseline)
            .chain(std::iter::once(&trial.post_hidden))
            .chain(trial.rounds.iter())
        {
            let _ = writeln!(out, "{}", render_list(&snap.decoy));
            let _ = writeln!(out, "{}", render_list(&snap.hidden));
            out.push('\n');
        }
        out
    }
}

/// `[1, 2, 3]`, or `[]` for an empty set.
pub fn render_list(set: &VolumeSliceSet) -> String {
    let mut out = String::from("[");
    for (i, slice) in set.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{slice}");
    }
    out.push(']');
    out
}

/// Parse one integer-list literal. The driver writes lists as JSON arrays.
pub fn parse_list(line_no: usize, raw: &str) -> Result<VolumeSliceSet> {
    let slices: Vec<u32> = serde_json::from_str(raw.trim()).map_err(|err| {
        SliceError::malformed_record(line_no, format!("bad slice list: {err}"), raw)
    })?;
    Ok(slices.into_iter().collect())
}

struct Cursor<'a> {
    lines: Peekable<Enumerate<Lines<'a>>>,
    last_line: usize,
}

impl Cursor<'_> {
    fn snapshot(&mut self, phase: Phase) -> Result<Snapshot> {
        let decoy = self.list(phase, "decoy")?;
        let hidden = self.list(phase, "hidden")?;
        self.separator(phase)?;
        Ok(Snapshot::new(decoy, hidden))
    }

    fn list(&mut self, phase: Phase, role: &str) -> Result<VolumeSliceSet> {
        let Some((idx, line)) = self.lines.next() else {
            return Err(SliceError::malformed_record(
                self.last_line + 1,
                format!("{phase}: missing {role} line"),
                "",
            ));
        };
        self.last_line = idx + 1;
        parse_list(idx + 1, line).map_err(|err| match err {
            SliceError::MalformedRecord {
                line,
                detail,
                content,
            } => SliceError::MalformedRecord {
                line,
                detail: format!("{phase} {role}: {detail}"),
                content,
            },
            other => other,
        })
    }

    fn separator(&mut self, phase: Phase) -> Result<()> {
        match self.lines.next() {
            None => Ok(()),
            Some((_, line)) if line.trim().is_empty() => {
                self.last_line += 1;
                Ok(())
            }
            Some((idx, line)) => Err(SliceError::malformed_record(
                idx + 1,
                format!("{phase}: expected blank separator"),
                line,
            )),
        }
    }

    fn has_more_content(&mut self) -> bool {
        while let Some((_, line)) = self.lines.peek() {
            if !line.trim().is_empty() {
                return true;
            }
            self.lines.next();
        }
        false
    }
}
