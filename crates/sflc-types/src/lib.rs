//! Core value types for hidden-volume slice analysis.
//!
//! A device is split into fixed-size physical slices. Each logical volume
//! maps some of them; a [`Snapshot`] captures which slices the decoy and the
//! hidden volume own at one instant.

use std::collections::BTreeSet;
use std::collections::btree_set;
use std::fmt;

use serde::{Deserialize, Serialize};
use sflc_error::{Result, SliceError};

/// Index of one physical slice on the underlying device.
///
/// Indices are drawn from `[0, total_slices)` for the device at hand; the
/// type itself does not know the bound, see [`VolumeSliceSet::check_range`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SliceIndex(u32);

impl SliceIndex {
    #[inline]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SliceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SliceIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The two logical volumes an experiment tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeRole {
    /// The volume unlocked under coercion; its writes may land anywhere free.
    Decoy,
    /// The volume whose content is at risk of being overwritten.
    Hidden,
}

impl fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decoy => f.write_str("decoy"),
            Self::Hidden => f.write_str("hidden"),
        }
    }
}

/// Deduplicated, sorted set of slices owned by one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeSliceSet(BTreeSet<SliceIndex>);

impl VolumeSliceSet {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, slice: SliceIndex) -> bool {
        self.0.contains(&slice)
    }

    /// Returns `true` if the slice was not already present.
    pub fn insert(&mut self, slice: SliceIndex) -> bool {
        self.0.insert(slice)
    }

    /// Returns `true` if the slice was present.
    pub fn remove(&mut self, slice: SliceIndex) -> bool {
        self.0.remove(&slice)
    }

    /// Slices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = SliceIndex> + '_ {
        self.0.iter().copied()
    }

    /// `self − other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).copied().collect())
    }

    /// `self ∪ other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// `self ∩ other`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Raw slice numbers in ascending order.
    pub fn to_vec(&self) -> Vec<u32> {
        self.0.iter().map(|s| s.get()).collect()
    }

    /// Highest slice index, if any.
    pub fn last(&self) -> Option<SliceIndex> {
        self.0.last().copied()
    }

    /// Reject any slice at or beyond `total_slices`.
    pub fn check_range(&self, total_slices: u32) -> Result<()> {
        match self.last() {
            Some(slice) if slice.get() >= total_slices => Err(SliceError::SliceOutOfRange {
                slice: slice.get(),
                total_slices,
            }),
            _ => Ok(()),
        }
    }
}

impl FromIterator<SliceIndex> for VolumeSliceSet {
    fn from_iter<I: IntoIterator<Item = SliceIndex>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromIterator<u32> for VolumeSliceSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().map(SliceIndex).collect())
    }
}

impl<'a> IntoIterator for &'a VolumeSliceSet {
    type Item = &'a SliceIndex;
    type IntoIter = btree_set::Iter<'a, SliceIndex>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Slice ownership of both tracked volumes, observed at one instant.
///
/// Construction does not enforce disjointness: a round snapshot taken after
/// an overwrite legitimately lists a slice under both volumes. Call
/// [`Snapshot::ensure_disjoint`] where the invariant must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub decoy: VolumeSliceSet,
    pub hidden: VolumeSliceSet,
}

impl Snapshot {
    pub fn new(decoy: VolumeSliceSet, hidden: VolumeSliceSet) -> Self {
        Self { decoy, hidden }
    }

    pub fn get(&self, role: VolumeRole) -> &VolumeSliceSet {
        match role {
            VolumeRole::Decoy => &self.decoy,
            VolumeRole::Hidden => &self.hidden,
        }
    }

    /// Slices claimed by both volumes.
    pub fn overlap(&self) -> VolumeSliceSet {
        self.decoy.intersection(&self.hidden)
    }

    /// Fail with [`SliceError::InconsistentSnapshot`] unless the two sets are
    /// disjoint. `phase` names the snapshot in the error.
    pub fn ensure_disjoint(&self, phase: &str) -> Result<()> {
        if self.decoy.is_disjoint(&self.hidden) {
            return Ok(());
        }
        Err(SliceError::InconsistentSnapshot {
            phase: phase.to_owned(),
            overlap: self.overlap().to_vec(),
        })
    }

    /// Range-check both sets against the device size.
    pub fn check_range(&self, total_slices: u32) -> Result<()> {
        self.decoy.check_range(total_slices)?;
        self.hidden.check_range(total_slices)
    }
}
