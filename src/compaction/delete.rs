//! Space-reclamation policy: compact files that the tombstone collector
//! marked for compaction.

use super::{compression_for, Descriptor, InputGroup, Reason};
use crate::{
    levels::Levels,
    meta::{FileMeta, Purpose},
    options::Options,
    path::pick_path_id,
    tracker::CompactionTracker,
};
use std::sync::Arc;

pub(crate) fn pick(
    name: &str,
    levels: &Levels,
    opts: &Options,
    tracker: &CompactionTracker,
    score: f64,
) -> Option<Descriptor> {
    let (inputs, output_level) = if levels.depth() == 1 {
        pick_single_level(levels, tracker)?
    } else {
        pick_multi_level(name, levels, opts, tracker)?
    };

    let estimated_total_size = levels.level(output_level).size();
    let output_path_id = pick_path_id(opts, estimated_total_size);

    let (purpose, max_subcompactions) = if opts.enable_lazy_compaction && output_level != 0 {
        (Purpose::Map, 1)
    } else {
        (Purpose::Essence, opts.max_subcompactions)
    };

    Some(Descriptor {
        inputs,
        output_level,
        output_path_id,
        target_file_size: opts.target_file_size,
        max_compaction_bytes: u64::MAX,
        compression: compression_for(opts, true),
        max_subcompactions,
        manual: true,
        partial: false,
        purpose,
        reason: Reason::FilesMarkedForCompaction,
        score,
        input_ranges: Vec::new(),
        trivial_move: false,
    })
}

/// Single-level universal reclaims space like a size-amp compaction:
/// the contiguous tail of L0 starting at the first marked file.
fn pick_single_level(
    levels: &Levels,
    tracker: &CompactionTracker,
) -> Option<(Vec<InputGroup>, u8)> {
    let mut files = Vec::new();
    let mut compact = false;

    for file in levels.level(0).iter() {
        if file.marked_for_compaction {
            compact = true;
        }
        if compact {
            files.push(file.clone());
        }
    }

    // If only the last L0 file is marked, there is nothing to merge it with
    if files.len() <= 1 {
        return None;
    }

    if tracker.any_busy(&files) {
        return None;
    }

    Some((vec![InputGroup { level: 0, files }], 0))
}

/// Multi-level universal reclaims space like a leveled compaction:
/// one marked file merged with the overlapping files of the next
/// non-empty level.
fn pick_multi_level(
    name: &str,
    levels: &Levels,
    opts: &Options,
    tracker: &CompactionTracker,
) -> Option<(Vec<InputGroup>, u8)> {
    let (start_level, marked) = find_marked_file(levels, tracker)?;

    let mut start_files = vec![marked];

    // Pick the first non-empty level below as the output
    let mut output_level = None;
    for level in start_level + 1..levels.depth() {
        if !levels.level(level).is_empty() {
            output_level = Some(level);
            break;
        }
    }

    let mut output_level = match output_level {
        Some(level) => level,
        // All deeper levels are empty: L0 drains to the bottom; for a
        // deeper start this would only amount to a trivial move, which
        // reclaims nothing
        None if start_level == 0 => levels.last_level_index(),
        None => return None,
    };

    // The last level is reserved for the files ingested behind
    if opts.allow_ingest_behind && output_level == levels.last_level_index() {
        debug_assert!(output_level > 1);
        output_level -= 1;
    }

    let mut inputs = Vec::new();

    if output_level == 0 {
        inputs.push(InputGroup {
            level: start_level,
            files: start_files,
        });
        return Some((inputs, output_level));
    }

    if start_level == 0 {
        start_files = expand_l0_inputs(levels, start_files);
    }

    if tracker.any_busy(&start_files) {
        log::debug!("{name}: marked files are being compacted, skipping");
        return None;
    }

    let (start, end) = user_key_range(&start_files)?;
    let mut output_files = levels.level(output_level).overlapping_files(&start, &end);

    if tracker.any_busy(&output_files) {
        log::debug!("{name}: output level files are being compacted, skipping");
        return None;
    }

    // The output files may widen the key range; take one expansion
    // round over the start level so the cut stays clean
    if start_level > 0 && !output_files.is_empty() {
        let all: Vec<_> = start_files
            .iter()
            .chain(output_files.iter())
            .cloned()
            .collect();
        let (start, end) = user_key_range(&all)?;

        start_files = levels.level(start_level).overlapping_files(&start, &end);
        if tracker.any_busy(&start_files) {
            return None;
        }

        output_files = levels.level(output_level).overlapping_files(&start, &end);
        if tracker.any_busy(&output_files) {
            return None;
        }
    }

    inputs.push(InputGroup {
        level: start_level,
        files: start_files,
    });
    if !output_files.is_empty() {
        // Keep the level span contiguous; levels between the start and
        // the output contribute empty groups
        for level in start_level + 1..output_level {
            inputs.push(InputGroup {
                level,
                files: Vec::new(),
            });
        }
        inputs.push(InputGroup {
            level: output_level,
            files: output_files,
        });
    }

    if tracker.range_overlaps(&inputs, output_level) {
        log::debug!("{name}: key range overlaps a live compaction, skipping");
        return None;
    }

    Some((inputs, output_level))
}

/// Finds the first marked, non-busy file in level order
fn find_marked_file(
    levels: &Levels,
    tracker: &CompactionTracker,
) -> Option<(u8, Arc<FileMeta>)> {
    for level in 0..levels.depth() {
        for file in levels.level(level).iter() {
            if file.marked_for_compaction && !tracker.is_busy(file.num) {
                return Some((level, file.clone()));
            }
        }
    }

    None
}

/// Expands a set of L0 files until it covers every L0 file its key
/// range overlaps; L0 files interleave, so a partial pick would lose
/// write ordering.
fn expand_l0_inputs(levels: &Levels, mut files: Vec<Arc<FileMeta>>) -> Vec<Arc<FileMeta>> {
    loop {
        let Some((start, end)) = user_key_range(&files) else {
            return files;
        };

        let expanded = levels.level(0).overlapping_files(&start, &end);
        if expanded.len() == files.len() {
            return expanded;
        }

        files = expanded;
    }
}

fn user_key_range(files: &[Arc<FileMeta>]) -> Option<(Arc<[u8]>, Arc<[u8]>)> {
    let mut min: Option<Arc<[u8]>> = None;
    let mut max: Option<Arc<[u8]>> = None;

    for file in files {
        min = Some(match min {
            Some(cur) if cur <= file.smallest.user_key => cur,
            _ => file.smallest.user_key.clone(),
        });
        max = Some(match max {
            Some(cur) if cur >= file.largest.user_key => cur,
            _ => file.largest.user_key.clone(),
        });
    }

    Some((min?, max?))
}
