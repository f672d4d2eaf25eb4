//! Corruption versus repair over rounds.
//!
//! A mitigation run reports, per round, how many hidden slices were
//! corrupted and how many of those the redundancy layer repaired. The
//! interesting curve is what stays unresolved.

use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};

use crate::aggregate::cumulative;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationSeries {
    pub cumulative_corrupted: Vec<f64>,
    pub cumulative_repaired: Vec<f64>,
    /// `cumulative_corrupted - cumulative_repaired`, never negative.
    pub unresolved: Vec<f64>,
}

impl MitigationSeries {
    /// # Errors
    ///
    /// `InvalidSettings` if the two series differ in length or a round
    /// repairs more slices than it corrupted.
    pub fn from_counts(corrupted: &[u32], repaired: &[u32]) -> Result<Self> {
        if corrupted.len() != repaired.len() {
            return Err(SliceError::invalid_settings(format!(
                "corrupted series has {} rounds, repaired series has {}",
                corrupted.len(),
                repaired.len()
            )));
        }
        if let Some(round) = corrupted.iter().zip(repaired).position(|(c, r)| r > c) {
            return Err(SliceError::invalid_settings(format!(
                "round {} repairs {} slices but only {} were corrupted",
                round + 1,
                repaired[round],
                corrupted[round]
            )));
        }

        let mut cumulative_corrupted: Vec<f64> = corrupted.iter().copied().map(f64::from).collect();
        let mut cumulative_repaired: Vec<f64> = repaired.iter().copied().map(f64::from).collect();
        cumulative(&mut cumulative_corrupted);
        cumulative(&mut cumulative_repaired);

        let unresolved = cumulative_corrupted
            .iter()
            .zip(&cumulative_repaired)
            .map(|(c, r)| c - r)
            .collect();

        Ok(Self {
            cumulative_corrupted,
            cumulative_repaired,
            unresolved,
        })
    }

    /// Share of all corrupted slices that were repaired, in `[0, 1]`.
    pub fn repair_ratio(&self) -> f64 {
        match (self.cumulative_corrupted.last(), self.cumulative_repaired.last()) {
            (Some(&c), Some(&r)) if c > 0.0 => r / c,
            _ => 1.0,
        }
    }
}
