//! Per-round slice occupancy of one trial.
//!
//! Row 0 is the state after the hidden payload was written; row `r` is the
//! state after decoy round `r`. Within a row the order is fixed: hidden
//! baseline slices, hidden payload slices, decoy baseline slices, then the
//! slices the decoy volume wrote since the baseline. Rows grow as the decoy
//! volume fills the device, so their lengths differ.

use serde::{Deserialize, Serialize};
use sflc_types::VolumeSliceSet;

use crate::record::Trial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceState {
    HiddenBaseline,
    HiddenPayload,
    /// A hidden slice the decoy volume has claimed.
    Corrupted,
    DecoyBaseline,
    DecoyWritten,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRow {
    pub states: Vec<SliceState>,
    /// Percentage of device slices allocated to either volume.
    pub fill_percent: f64,
}

impl OccupancyRow {
    pub fn count(&self, state: SliceState) -> usize {
        self.states.iter().filter(|&&s| s == state).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyMap {
    pub rows: Vec<OccupancyRow>,
}

impl OccupancyMap {
    pub fn build(trial: &Trial, total_slices: u32) -> Self {
        let hidden_baseline = &trial.baseline.hidden;
        let hidden_payload = trial.hidden_files();
        let decoy_baseline = &trial.baseline.decoy;

        let mut rows = Vec::with_capacity(trial.n_rounds() + 1);
        let mut start = Vec::new();
        start.extend(hidden_baseline.iter().map(|_| SliceState::HiddenBaseline));
        start.extend(hidden_payload.iter().map(|_| SliceState::HiddenPayload));
        start.extend(decoy_baseline.iter().map(|_| SliceState::DecoyBaseline));
        rows.push(OccupancyRow {
            fill_percent: fill(start.len(), total_slices),
            states: start,
        });

        for round in &trial.rounds {
            let mut written = round.decoy.difference(decoy_baseline);
            let mut states = Vec::new();
            classify(hidden_baseline, SliceState::HiddenBaseline, &mut written, &mut states);
            classify(&hidden_payload, SliceState::HiddenPayload, &mut written, &mut states);
            states.extend(decoy_baseline.iter().map(|_| SliceState::DecoyBaseline));
            states.extend(written.iter().map(|_| SliceState::DecoyWritten));
            rows.push(OccupancyRow {
                fill_percent: fill(states.len(), total_slices),
                states,
            });
        }

        Self { rows }
    }

    /// Longest row, the width a renderer has to pad to.
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.states.len()).max().unwrap_or(0)
    }
}

/// Hidden slices the round wrote over are consumed from `written`.
fn classify(
    hidden: &VolumeSliceSet,
    intact: SliceState,
    written: &mut VolumeSliceSet,
    out: &mut Vec<SliceState>,
) {
    for slice in hidden.iter() {
        if written.remove(slice) {
            out.push(SliceState::Corrupted);
        } else {
            out.push(intact);
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn fill(used: usize, total_slices: u32) -> f64 {
    if total_slices == 0 {
        return 0.0;
    }
    100.0 * used as f64 / f64::from(total_slices)
}
