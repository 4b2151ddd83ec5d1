//! Read-amplification policy: find a window of consecutive sorted runs
//! whose sizes are close enough to merge, based on their size
//! differences in time order.

use super::{compression_for, inputs_for_window, window_tail_compression, Descriptor, Reason};
use crate::{
    levels::Levels,
    meta::Purpose,
    options::{Options, StopStyle},
    path::pick_path_id,
    run::SortedRun,
};

/// Picks a window of runs to merge.
///
/// In ratio mode (`max_files == usize::MAX`), a window grows while the
/// next run is at most `ratio` percent larger than what was accumulated
/// so far. In count mode, the window is bounded by `max_files` and the
/// ratio is effectively unlimited, forcing the run count down.
#[allow(clippy::too_many_lines)]
pub(crate) fn pick(
    name: &str,
    levels: &Levels,
    opts: &Options,
    runs: &[SortedRun],
    score: f64,
    ratio: u64,
    max_files: usize,
) -> Option<Descriptor> {
    let min_merge_width = opts.universal.min_merge_width.max(2) as usize;
    let max_merge_width = opts.universal.max_merge_width as usize;
    let max_files_to_compact = max_files.min(max_merge_width);

    debug_assert!(!runs.is_empty());

    let mut start_index = 0;
    let mut candidate_count = 0;
    let mut done = false;

    let mut loop_index = 0;
    while loop_index < runs.len() {
        // Skip runs that are already being compacted
        while loop_index < runs.len() && runs[loop_index].being_compacted {
            log::debug!(
                "{name}: {}[{loop_index}] being compacted, skipping",
                runs[loop_index]
            );
            loop_index += 1;
        }
        if loop_index >= runs.len() {
            break;
        }

        let first = &runs[loop_index];
        candidate_count = 1;
        let mut candidate_size = first.compensated_size;

        log::debug!("{name}: possible candidate {first}[{loop_index}]");

        // Check how far the succeeding runs can be taken along
        for succeeding in runs.iter().skip(loop_index + 1) {
            if candidate_count >= max_files_to_compact || succeeding.being_compacted {
                break;
            }

            // Pick the run if the accumulated size, inflated by the
            // ratio, still covers it
            let sz = candidate_size as f64 * (100.0 + ratio as f64) / 100.0;
            if sz < succeeding.size as f64 {
                break;
            }

            if opts.universal.stop_style == StopStyle::SimilarSize {
                // Also reject a much smaller run; if it begins a run of
                // similar-sized files, a later window will pick them up
                let sz = succeeding.size as f64 * (100.0 + ratio as f64) / 100.0;
                if sz < candidate_size as f64 {
                    break;
                }
                candidate_size = succeeding.compensated_size;
            } else {
                candidate_size += succeeding.compensated_size;
            }

            candidate_count += 1;
        }

        if candidate_count >= min_merge_width {
            start_index = loop_index;
            done = true;
            break;
        }

        for (i, run) in runs
            .iter()
            .enumerate()
            .skip(loop_index)
            .take(candidate_count)
        {
            log::debug!("{name}: skipping {run}[{i}]");
        }

        loop_index += 1;
    }

    if !done || candidate_count <= 1 {
        return None;
    }

    let first_index_after = start_index + candidate_count;

    let enable_compression = window_tail_compression(opts, runs, first_index_after);

    let estimated_total_size: u64 = runs[..first_index_after].iter().map(|run| run.size).sum();
    let output_path_id = pick_path_id(opts, estimated_total_size);

    let mut output_level = if first_index_after == runs.len() {
        levels.last_level_index()
    } else if runs[first_index_after].level == 0 {
        0
    } else {
        runs[first_index_after].level - 1
    };

    // The last level is reserved for the files ingested behind
    if opts.allow_ingest_behind && output_level == levels.last_level_index() {
        debug_assert!(output_level > 1);
        output_level -= 1;
    }

    let window = &runs[start_index..first_index_after];
    for (i, run) in window.iter().enumerate() {
        log::debug!(
            "{name}: picking {run}[{}] with size {} (compensated size {})",
            start_index + i,
            run.size,
            run.compensated_size
        );
    }

    let reason = if max_files == usize::MAX {
        Reason::SizeRatio
    } else {
        Reason::SortedRunNum
    };

    Some(Descriptor {
        inputs: inputs_for_window(levels, window),
        output_level,
        output_path_id,
        target_file_size: opts.target_file_size,
        max_compaction_bytes: u64::MAX,
        compression: compression_for(opts, enable_compression),
        max_subcompactions: opts.max_subcompactions,
        manual: false,
        partial: false,
        purpose: Purpose::Essence,
        reason,
        score,
        input_ranges: Vec::new(),
        trivial_move: false,
    })
}

#[cfg(test)]
mod tests {
    use super::pick;
    use crate::{
        compaction::Reason,
        key::InternalKey,
        meta::{FileMeta, FileNum, Purpose},
        options::{Options, StopStyle},
        run::sorted_runs,
        tracker::CompactionTracker,
        Levels,
    };
    use std::sync::Arc;
    use test_log::test;

    fn fixture_file(num: FileNum, size: u64) -> Arc<FileMeta> {
        Arc::new(FileMeta {
            num,
            path_id: 0,
            file_size: size,
            compensated_size: size,
            smallest: InternalKey::new(&b"a"[..], num * 2),
            largest: InternalKey::new(&b"z"[..], num * 2 + 1),
            seqnos: (num * 2, num * 2 + 1),
            purpose: Purpose::Essence,
            dependents: Vec::new(),
            marked_for_compaction: false,
        })
    }

    #[test]
    fn ratio_window_stops_at_the_giant() {
        let mut levels = Levels::new(5);

        // L0 = [10, 11, 12], L3 = 1000; the window may not grow into L3
        levels.insert_into_level(0, fixture_file(3, 10));
        levels.insert_into_level(0, fixture_file(2, 11));
        levels.insert_into_level(0, fixture_file(1, 12));
        levels.insert_into_level(3, fixture_file(4, 1_000));

        let opts = Options::default().size_ratio(20);
        let runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        let descriptor = pick("default", &levels, &opts, &runs, 1.0, 20, usize::MAX)
            .expect("window should qualify");

        assert_eq!(Reason::SizeRatio, descriptor.reason);
        assert_eq!(3, descriptor.input_files().count());
        assert_eq!(0, descriptor.start_level());
        // Output lands just above the level of the 1000 run
        assert_eq!(2, descriptor.output_level);
    }

    #[test]
    fn too_narrow_window_is_rejected() {
        let mut levels = Levels::new(5);

        levels.insert_into_level(0, fixture_file(2, 10));
        levels.insert_into_level(3, fixture_file(1, 1_000));

        let opts = Options::default().min_merge_width(2);
        let runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        assert!(pick("default", &levels, &opts, &runs, 1.0, 1, usize::MAX).is_none());
    }

    #[test]
    fn count_mode_ignores_size_ratios() {
        let mut levels = Levels::new(5);

        levels.insert_into_level(0, fixture_file(4, 10));
        levels.insert_into_level(0, fixture_file(3, 500));
        levels.insert_into_level(0, fixture_file(2, 10));
        levels.insert_into_level(0, fixture_file(1, 700));

        let opts = Options::default();
        let runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        let descriptor = pick("default", &levels, &opts, &runs, 1.0, u64::MAX, 3)
            .expect("count mode should pick");

        assert_eq!(Reason::SortedRunNum, descriptor.reason);
        assert_eq!(3, descriptor.input_files().count());
    }

    #[test]
    fn similar_size_rejects_much_smaller_runs() {
        let mut levels = Levels::new(5);

        levels.insert_into_level(0, fixture_file(4, 100));
        levels.insert_into_level(0, fixture_file(3, 100));
        levels.insert_into_level(0, fixture_file(2, 1));
        levels.insert_into_level(0, fixture_file(1, 1));

        let mut opts = Options::default().min_merge_width(2);
        opts.universal.stop_style = StopStyle::SimilarSize;

        let runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        let descriptor = pick("default", &levels, &opts, &runs, 1.0, 20, usize::MAX)
            .expect("the similar-sized head should qualify");

        // Only the two 100s merge; the tiny stragglers are left for later
        assert_eq!(2, descriptor.input_files().count());
        let nums: Vec<_> = descriptor.input_files().map(|f| f.num).collect();
        assert_eq!(vec![4, 3], nums);
    }
}
