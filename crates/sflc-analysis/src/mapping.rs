//! Slice-mapping recovery from accumulated kernel log text.
//!
//! The driver prints one line per mapped slice every time a volume is
//! opened, e.g.
//!
//! ```text
//! [  812.004112] VOLUME:test1:3/12->417
//! ```
//!
//! meaning "entry 3 of a 12-entry block for volume `test1` maps to physical
//! slice 417". Older drivers print `VOLUME:test1:3->417` for each entry and
//! close the block with a summary line `VOLUME:test1:12/890` (12 slices
//! mapped out of 890 on the device).
//!
//! The log keeps every earlier open, so only the newest block per volume is
//! authoritative. Recovery runs in two passes: [`group_by_volume`] collects
//! the lines of each tracked volume in log order, then [`newest_block`]
//! cuts the trailing block whose length the entries declare themselves.

use std::collections::BTreeMap;

use sflc_error::{Result, SliceError};
use sflc_types::{SliceIndex, Snapshot, VolumeSliceSet};
use tracing::debug;

/// Marker preceding every slice-mapping line.
pub const DEFAULT_MARKER: &str = "VOLUME";

const MAP_ARROW: &str = "->";

/// One parsed mapping line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapRecord {
    /// `position[/block_len]->slice`
    Entry {
        position: u32,
        block_len: Option<u32>,
        slice: SliceIndex,
    },
    /// `mapped/device_slices`, closing a block of `mapped` entries.
    Summary { mapped: u32, device_slices: u32 },
}

/// A tracked volume's lines, in log order, tagged with 1-based line numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeLines {
    pub records: Vec<(usize, MapRecord)>,
}

/// The volumes whose membership a recovery pass reconstructs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePair<'a> {
    pub marker: &'a str,
    pub decoy: &'a str,
    pub hidden: &'a str,
}

impl Default for VolumePair<'_> {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER,
            decoy: "test1",
            hidden: "test2",
        }
    }
}

/// Result of one recovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredMapping {
    pub snapshot: Snapshot,
    /// Device size announced by a summary line, if the log carries one.
    pub device_slices: Option<u32>,
}

/// Recover the current decoy/hidden membership from raw log text.
///
/// # Errors
///
/// [`SliceError::MalformedLog`] for a tracked line missing its separators or
/// numbers, [`SliceError::TruncatedBlock`] when the newest open of a volume
/// is missing entries, and [`SliceError::EmptyLog`] when a tracked volume never
/// appears.
pub fn recover_snapshot(log: &str, volumes: &VolumePair<'_>) -> Result<RecoveredMapping> {
    let groups = group_by_volume(log, volumes.marker, &[volumes.decoy, volumes.hidden])?;

    let decoy_lines = lines_for(&groups, volumes.decoy)?;
    let hidden_lines = lines_for(&groups, volumes.hidden)?;

    let (decoy, decoy_device) = newest_block(volumes.decoy, decoy_lines)?;
    let (hidden, hidden_device) = newest_block(volumes.hidden, hidden_lines)?;

    debug!(
        decoy_volume = volumes.decoy,
        hidden_volume = volumes.hidden,
        decoy_slices = decoy.len(),
        hidden_slices = hidden.len(),
        "recovered slice mapping"
    );

    Ok(RecoveredMapping {
        snapshot: Snapshot::new(decoy, hidden),
        device_slices: decoy_device.or(hidden_device),
    })
}

fn lines_for<'g>(
    groups: &'g BTreeMap<String, VolumeLines>,
    volume: &str,
) -> Result<&'g VolumeLines> {
    groups
        .get(volume)
        .filter(|g| !g.records.is_empty())
        .ok_or_else(|| SliceError::EmptyLog {
            volume: volume.to_owned(),
        })
}

/// First pass: parse marker lines of the tracked volumes, grouped by volume
/// name and kept in log order. Lines without the marker, or for other
/// volumes, are discarded.
pub fn group_by_volume(
    log: &str,
    marker: &str,
    tracked: &[&str],
) -> Result<BTreeMap<String, VolumeLines>> {
    let mut groups: BTreeMap<String, VolumeLines> = BTreeMap::new();

    for (idx, line) in log.lines().enumerate() {
        let line_no = idx + 1;
        let Some(at) = line.find(marker) else {
            continue;
        };
        let body = line[at + marker.len()..]
            .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
            .trim_end();

        let Some((name, fields)) = body.split_once(':') else {
            return Err(SliceError::malformed_log(
                line_no,
                format!("missing ':' after volume name in {body:?}"),
            ));
        };
        if !tracked.contains(&name) {
            continue;
        }

        let record = parse_fields(line_no, fields)?;
        groups
            .entry(name.to_owned())
            .or_default()
            .records
            .push((line_no, record));
    }

    Ok(groups)
}

fn parse_fields(line_no: usize, fields: &str) -> Result<MapRecord> {
    if let Some((left, slice)) = fields.split_once(MAP_ARROW) {
        let slice = parse_u32(line_no, slice, "physical slice")?;
        let (position, block_len) = match left.split_once('/') {
            Some((pos, len)) => (
                parse_u32(line_no, pos, "position")?,
                Some(parse_u32(line_no, len, "block length")?),
            ),
            None => (parse_u32(line_no, left, "position")?, None),
        };
        return Ok(MapRecord::Entry {
            position,
            block_len,
            slice: SliceIndex::new(slice),
        });
    }

    let Some((mapped, device)) = fields.split_once('/') else {
        return Err(SliceError::malformed_log(
            line_no,
            format!("expected '{MAP_ARROW}' or '/' in {fields:?}"),
        ));
    };
    Ok(MapRecord::Summary {
        mapped: parse_u32(line_no, mapped, "mapped count")?,
        device_slices: parse_u32(line_no, device, "device slices")?,
    })
}

fn parse_u32(line_no: usize, raw: &str, what: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|err| {
        SliceError::malformed_log(line_no, format!("bad {what} {:?}: {err}", raw.trim()))
    })
}

/// Second pass: take the newest block of one volume's lines.
///
/// The block length comes from the newest line itself: a summary closes a
/// block of `mapped` entries numbered from 0, an entry declares
/// `position/block_len` with positions numbered from 1. The newest open is
/// the trailing run of entries whose positions descend by one down to the
/// first position; it must hold exactly the declared number of entries.
pub fn newest_block(volume: &str, lines: &VolumeLines) -> Result<(VolumeSliceSet, Option<u32>)> {
    let Some(&(last_line, last)) = lines.records.last() else {
        return Err(SliceError::EmptyLog {
            volume: volume.to_owned(),
        });
    };

    let (declared, entries, block_len, first, device_slices) = match last {
        MapRecord::Summary {
            mapped,
            device_slices,
        } => {
            let before = &lines.records[..lines.records.len() - 1];
            (mapped, before, None, 0, Some(device_slices))
        }
        MapRecord::Entry {
            block_len: Some(len),
            ..
        } => (len, &lines.records[..], Some(len), 1, None),
        MapRecord::Entry {
            block_len: None, ..
        } => {
            return Err(SliceError::malformed_log(
                last_line,
                format!("newest entry for volume '{volume}' declares no block length"),
            ));
        }
    };

    if declared == 0 {
        return Ok((VolumeSliceSet::new(), device_slices));
    }

    let run = newest_run(entries, block_len, first);
    let declared = declared as usize;
    if run.complete && run.slices.len() == declared {
        return Ok((run.slices.into_iter().collect(), device_slices));
    }
    if run.slices.len() < declared {
        return Err(SliceError::TruncatedBlock {
            volume: volume.to_owned(),
            declared,
            available: run.slices.len(),
        });
    }
    Err(SliceError::malformed_log(
        last_line,
        format!(
            "block for volume '{volume}' declares {declared} entries but numbers {}",
            run.slices.len()
        ),
    ))
}

struct Run {
    slices: Vec<SliceIndex>,
    /// The walk reached the block's first position.
    complete: bool,
}

/// Walk back from the tail of `records` over the newest open: each entry
/// must carry `block_len` and a position one below the entry after it. The
/// walk ends once `first` is taken or the chain breaks.
fn newest_run(records: &[(usize, MapRecord)], block_len: Option<u32>, first: u32) -> Run {
    let mut slices = Vec::new();
    let mut next: Option<u32> = None;
    for (_, record) in records.iter().rev() {
        let MapRecord::Entry {
            position,
            block_len: len,
            slice,
        } = *record
        else {
            break;
        };
        if len != block_len || position < first || next.is_some_and(|n| n != position) {
            break;
        }
        slices.push(slice);
        if position == first {
            return Run {
                slices,
                complete: true,
            };
        }
        next = Some(position - 1);
    }
    Run {
        slices,
        complete: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_lines(volume: &str, slices: &[u32]) -> String {
        let total = slices.len();
        slices
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[ 10.0{i}] VOLUME:{volume}:{}/{total}->{s}\n", i + 1))
            .collect()
    }

    #[test]
    fn recovers_newest_blocks_for_both_volumes() {
        let mut log = String::new();
        log.push_str(&entry_lines("test1", &[9, 8]));
        log.push_str("unrelated kernel chatter\n");
        log.push_str(&entry_lines("test2", &[1]));
        // Reopen: the newer blocks win.
        log.push_str(&entry_lines("test1", &[7, 3, 3, 5]));
        log.push_str(&entry_lines("test2", &[4, 2]));

        let recovered = recover_snapshot(&log, &VolumePair::default()).unwrap();
        assert_eq!(recovered.snapshot.decoy.to_vec(), vec![3, 5, 7]);
        assert_eq!(recovered.snapshot.hidden.to_vec(), vec![2, 4]);
        assert_eq!(recovered.device_slices, None);
    }

    #[test]
    fn volume_order_in_log_does_not_matter() {
        let mut log = entry_lines("test2", &[11, 10]);
        log.push_str(&entry_lines("test1", &[0]));
        let recovered = recover_snapshot(&log, &VolumePair::default()).unwrap();
        assert_eq!(recovered.snapshot.decoy.to_vec(), vec![0]);
        assert_eq!(recovered.snapshot.hidden.to_vec(), vec![10, 11]);
    }

    #[test]
    fn truncated_block_is_malformed() {
        // Three lines for test1 while each declares a block of five.
        let mut log = String::new();
        for (i, s) in [4, 5, 6].iter().enumerate() {
            log.push_str(&format!("VOLUME:test1:{}/5->{s}\n", i + 1));
        }
        log.push_str(&entry_lines("test2", &[1]));
        let err = recover_snapshot(&log, &VolumePair::default()).unwrap_err();
        assert!(err.is_malformed_log());
        assert!(matches!(
            err,
            SliceError::TruncatedBlock {
                ref volume,
                declared: 5,
                available: 3
            } if volume == "test1"
        ));
    }

    #[test]
    fn missing_volume_is_empty_log() {
        let log = entry_lines("test1", &[1, 2]);
        let err = recover_snapshot(&log, &VolumePair::default()).unwrap_err();
        assert!(matches!(err, SliceError::EmptyLog { ref volume } if volume == "test2"));
    }

    #[test]
    fn missing_arrow_and_slash_is_malformed() {
        let log = "VOLUME:test1:garbage\n";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(matches!(err, SliceError::MalformedLog { line: 1, .. }));
    }

    #[test]
    fn missing_volume_separator_is_malformed() {
        let log = "VOLUME test1\n";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(err.is_malformed_log());
    }

    #[test]
    fn bad_number_is_malformed() {
        let log = "VOLUME:test1:1/1->x17\n";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(matches!(err, SliceError::MalformedLog { line: 1, .. }));
    }

    #[test]
    fn other_volumes_are_ignored_even_if_odd() {
        let mut log = String::from("VOLUME:scratch:whatever\n");
        log.push_str(&entry_lines("test1", &[1]));
        log.push_str(&entry_lines("test2", &[2]));
        assert!(recover_snapshot(&log, &VolumePair::default()).is_ok());
    }

    #[test]
    fn summary_lines_close_blocks() {
        let log = "\
VOLUME:test1:0->40
VOLUME:test1:1/890
VOLUME:test1:0->41
VOLUME:test1:1->42
VOLUME:test1:2/890
VOLUME:test2:0->7
VOLUME:test2:1/890
";
        let recovered = recover_snapshot(log, &VolumePair::default()).unwrap();
        assert_eq!(recovered.snapshot.decoy.to_vec(), vec![41, 42]);
        assert_eq!(recovered.snapshot.hidden.to_vec(), vec![7]);
        assert_eq!(recovered.device_slices, Some(890));
    }

    #[test]
    fn summary_with_too_few_entries_is_truncated() {
        let log = "\
VOLUME:test1:0->41
VOLUME:test1:3/890
VOLUME:test2:0->7
VOLUME:test2:1/890
";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(matches!(
            err,
            SliceError::TruncatedBlock {
                declared: 3,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn empty_volume_block_via_summary() {
        let log = "VOLUME:test1:0/890\nVOLUME:test2:0->5\nVOLUME:test2:1/890\n";
        let recovered = recover_snapshot(log, &VolumePair::default()).unwrap();
        assert!(recovered.snapshot.decoy.is_empty());
        assert_eq!(recovered.snapshot.hidden.to_vec(), vec![5]);
    }

    #[test]
    fn newest_entry_without_length_is_malformed() {
        let log = "VOLUME:test1:0->3\nVOLUME:test2:0->4\n";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(matches!(err, SliceError::MalformedLog { line: 1, .. }));
    }

    #[test]
    fn custom_marker_and_names() {
        let log = "SLC decoy:1/1->3\nSLC secret:1/1->4\n";
        let pair = VolumePair {
            marker: "SLC",
            decoy: "decoy",
            hidden: "secret",
        };
        let recovered = recover_snapshot(log, &pair).unwrap();
        assert_eq!(recovered.snapshot.decoy.to_vec(), vec![3]);
        assert_eq!(recovered.snapshot.hidden.to_vec(), vec![4]);
    }

    #[test]
    fn grouping_preserves_log_order() {
        let log = "VOLUME:test1:1/2->5\nVOLUME:test2:1/1->6\nVOLUME:test1:2/2->4\n";
        let groups = group_by_volume(log, DEFAULT_MARKER, &["test1", "test2"]).unwrap();
        let lines: Vec<usize> = groups["test1"].records.iter().map(|(n, _)| *n).collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn truncated_reopen_is_not_spliced_onto_an_older_block() {
        // A complete open of three slices, then a newer open of the same
        // size that stops after two entries.
        let log = "\
VOLUME:test1:1/3->1
VOLUME:test1:2/3->2
VOLUME:test1:3/3->3
VOLUME:test2:1/1->50
VOLUME:test1:1/3->7
VOLUME:test1:2/3->8
VOLUME:test2:1/1->50
";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(matches!(
            err,
            SliceError::TruncatedBlock {
                ref volume,
                declared: 3,
                available: 2
            } if volume == "test1"
        ));
    }

    #[test]
    fn reopen_missing_its_head_is_truncated() {
        // The newest open lost its first entry: positions 2 and 3 follow a
        // complete older block.
        let mut log = entry_lines("test1", &[1, 2, 3]);
        log.push_str("VOLUME:test1:2/3->8
VOLUME:test1:3/3->9
");
        log.push_str(&entry_lines("test2", &[50]));
        let err = recover_snapshot(&log, &VolumePair::default()).unwrap_err();
        assert!(matches!(
            err,
            SliceError::TruncatedBlock {
                declared: 3,
                available: 2,
                ..
            }
        ));
    }

    #[test]
    fn repeated_reopens_take_only_the_last_block() {
        // The trailing run of same-sized entries is three blocks long.
        let mut log = String::new();
        for slices in [[1, 2], [3, 4], [5, 6]] {
            log.push_str(&entry_lines("test1", &slices));
        }
        log.push_str(&entry_lines("test2", &[50]));
        let recovered = recover_snapshot(&log, &VolumePair::default()).unwrap();
        assert_eq!(recovered.snapshot.decoy.to_vec(), vec![5, 6]);
    }

    #[test]
    fn summary_block_after_a_partial_block_is_truncated() {
        // Entries 0 and 1 of a three-slice block, after an unclosed older
        // entry numbered 2.
        let log = "\
VOLUME:test1:2->40
VOLUME:test1:0->41
VOLUME:test1:1->42
VOLUME:test1:3/890
VOLUME:test2:0->7
VOLUME:test2:1/890
";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(matches!(
            err,
            SliceError::TruncatedBlock {
                declared: 3,
                available: 2,
                ..
            }
        ));
    }

    #[test]
    fn position_beyond_block_length_is_malformed() {
        let log = "VOLUME:test1:1/1->4\nVOLUME:test1:2/1->5\nVOLUME:test2:1/1->6\n";
        let err = recover_snapshot(log, &VolumePair::default()).unwrap_err();
        assert!(matches!(err, SliceError::MalformedLog { line: 2, .. }));
    }
}
