//! Synthetic trials under uniform random allocation.
//!
//! A generated trial follows the null hypothesis behind the model: every
//! decoy write lands on a slice drawn uniformly from those the decoy volume
//! does not own yet. Averaged over enough trials, observed corruption should
//! then track the expected curve.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};
use sflc_types::{Snapshot, VolumeSliceSet};
use tracing::debug;

use crate::derive_trial_seed;
use crate::record::Trial;
use crate::store::write_trial;

/// Shape of a generated trial. Counts are in slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticExperiment {
    pub total_slices: u32,
    /// Decoy slices allocated before the hidden payload.
    pub decoy_baseline: u32,
    /// Hidden slices allocated before the hidden payload.
    pub hidden_baseline: u32,
    /// Slices the hidden payload adds.
    pub hidden_payload: u32,
    /// New decoy slices per round; fewer once the device runs out.
    pub decoy_per_round: u32,
    pub rounds: usize,
}

impl SyntheticExperiment {
    /// # Errors
    ///
    /// `InvalidSettings` if the initial allocation does not fit the device.
    pub fn validate(&self) -> Result<()> {
        let initial = u64::from(self.decoy_baseline)
            + u64::from(self.hidden_baseline)
            + u64::from(self.hidden_payload);
        if self.total_slices == 0 {
            return Err(SliceError::invalid_settings("total_slices must be > 0"));
        }
        if initial > u64::from(self.total_slices) {
            return Err(SliceError::invalid_settings(format!(
                "initial allocation of {initial} slices exceeds the device's {}",
                self.total_slices
            )));
        }
        Ok(())
    }

    /// Generate one trial from `seed`.
    ///
    /// # Errors
    ///
    /// See [`Self::validate`].
    pub fn generate(&self, seed: u64) -> Result<Trial> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut free: Vec<u32> = (0..self.total_slices).collect();
        let decoy: VolumeSliceSet = draw(&mut rng, &mut free, self.decoy_baseline).into_iter().collect();
        let hidden_base: VolumeSliceSet =
            draw(&mut rng, &mut free, self.hidden_baseline).into_iter().collect();
        let payload: VolumeSliceSet =
            draw(&mut rng, &mut free, self.hidden_payload).into_iter().collect();
        let hidden_after = hidden_base.union(&payload);

        // Everything the decoy volume does not own is a candidate, hidden
        // slices included.
        let mut candidates: Vec<u32> = (0..self.total_slices)
            .filter(|&s| !decoy.contains(s.into()))
            .collect();
        let mut decoy_now = decoy.clone();
        let mut rounds = Vec::with_capacity(self.rounds);
        for round in 1..=self.rounds {
            for slice in draw(&mut rng, &mut candidates, self.decoy_per_round) {
                decoy_now.insert(slice.into());
            }
            debug!(round, decoy_owned = decoy_now.len(), "synthetic round");
            rounds.push(Snapshot::new(decoy_now.clone(), hidden_after.clone()));
        }

        Ok(Trial {
            baseline: Snapshot::new(decoy.clone(), hidden_base),
            post_hidden: Snapshot::new(decoy, hidden_after),
            rounds,
        })
    }

    /// Write trials `1..=n` as `<dir>/<prefix><k>.txt`, trial `k` seeded with
    /// `derive_trial_seed(base_seed, k)`.
    ///
    /// # Errors
    ///
    /// Generation or I/O errors.
    pub fn write_batch(
        &self,
        dir: &Path,
        prefix: &str,
        n: usize,
        base_seed: u64,
    ) -> Result<Vec<PathBuf>> {
        (1..=n)
            .map(|k| {
                let trial = self.generate(derive_trial_seed(base_seed, k))?;
                write_trial(dir, prefix, k, &trial)
            })
            .collect()
    }
}

/// Remove up to `n` uniformly chosen elements from `pool`.
fn draw(rng: &mut StdRng, pool: &mut Vec<u32>, n: u32) -> Vec<u32> {
    let take = pool.len().min(n as usize);
    let mut out = Vec::with_capacity(take);
    for _ in 0..take {
        let idx = rng.gen_range(0..pool.len());
        out.push(pool.swap_remove(idx));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ANALYSIS_SEED;

    fn experiment() -> SyntheticExperiment {
        SyntheticExperiment {
            total_slices: 200,
            decoy_baseline: 20,
            hidden_baseline: 10,
            hidden_payload: 40,
            decoy_per_round: 15,
            rounds: 8,
        }
    }

    #[test]
    fn shape_of_generated_trial() {
        let trial = experiment().generate(ANALYSIS_SEED).unwrap();
        assert_eq!(trial.baseline.decoy.len(), 20);
        assert_eq!(trial.baseline.hidden.len(), 10);
        assert_eq!(trial.post_hidden.hidden.len(), 50);
        assert_eq!(trial.hidden_files().len(), 40);
        assert!(trial.baseline.overlap().is_empty());
        assert!(trial.baseline_drift().is_none());
        assert_eq!(trial.n_rounds(), 8);
        assert_eq!(trial.rounds.last().unwrap().decoy.len(), 20 + 15 * 8);
        trial.check_range(200).unwrap();
    }

    #[test]
    fn decoy_only_grows() {
        let trial = experiment().generate(7).unwrap();
        let mut prev = &trial.post_hidden.decoy;
        for round in &trial.rounds {
            assert!(prev.difference(&round.decoy).is_empty());
            prev = &round.decoy;
        }
    }

    #[test]
    fn same_seed_same_trial() {
        let a = experiment().generate(42).unwrap();
        let b = experiment().generate(42).unwrap();
        let c = experiment().generate(43).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn device_exhaustion_caps_writes() {
        let small = SyntheticExperiment {
            total_slices: 10,
            decoy_baseline: 2,
            hidden_baseline: 1,
            hidden_payload: 2,
            decoy_per_round: 5,
            rounds: 3,
        };
        let trial = small.generate(1).unwrap();
        assert_eq!(trial.rounds[1].decoy.len(), 10);
        assert_eq!(trial.rounds[2].decoy.len(), 10);
    }

    #[test]
    fn oversized_allocation_is_rejected() {
        let bad = SyntheticExperiment {
            hidden_payload: 500,
            ..experiment()
        };
        assert!(matches!(bad.generate(1), Err(SliceError::InvalidSettings { .. })));
    }

    #[test]
    fn batch_files_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let paths = experiment().write_batch(dir.path(), "results", 3, ANALYSIS_SEED).unwrap();
        assert_eq!(paths.len(), 3);
        for (k, path) in paths.iter().enumerate() {
            let loaded = crate::store::load_trial(dir.path(), "results", k + 1).unwrap();
            assert_eq!(&loaded.path, path);
            assert_eq!(
                loaded.trial,
                experiment().generate(derive_trial_seed(ANALYSIS_SEED, k + 1)).unwrap()
            );
        }
    }
}
