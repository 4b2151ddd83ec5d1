//! Lazy run-reduction policy: group the sorted runs geometrically and
//! meta-merge the first group that holds more than one run.
//!
//! Instead of rewriting bytes, the merge produces a map file that
//! indexes the group's data, so reduction is cheap; the composite
//! planner later rewrites the indexed ranges for real.

use super::{
    compression_for, grouping::group_runs, inputs_for_window, window_tail_compression, Descriptor,
    Reason,
};
use crate::{
    levels::Levels, meta::Purpose, options::Options, path::pick_path_id, run::SortedRun,
};

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) fn pick(
    name: &str,
    levels: &Levels,
    opts: &Options,
    runs: &mut [SortedRun],
    score: f64,
    reduce_sorted_run_target: usize,
) -> Option<Descriptor> {
    let reduce_sorted_run_target = if reduce_sorted_run_target == 0 {
        runs.len()
    } else {
        reduce_sorted_run_target.min(runs.len())
    };

    let base_size = opts.write_buffer_size as f64;
    let run_ratios: Vec<f64> = runs.iter().map(|run| run.size as f64 / base_size).collect();

    let (groups, common_ratio) = group_runs(&run_ratios, reduce_sorted_run_target);

    log::debug!(
        "{name}: reduce to {reduce_sorted_run_target} sorted runs, common ratio = {common_ratio}"
    );

    let mut start_index = 0;
    let mut end_index = 0;

    for (group_index, group) in groups.iter().enumerate() {
        let mut being_compacted = false;

        if group.count > 1 {
            for run in &mut runs[group.start..group.start + group.count] {
                being_compacted |= run.being_compacted;
                run.wait_reduce = true;
            }
        }

        if end_index != 0 {
            continue;
        }

        if group.count == 1 {
            log::debug!(
                "{name}: group {}, count = 1, size = {}, single sorted run, skip",
                group_index + 1,
                (group.ratio * base_size) as u64
            );
            continue;
        }

        if being_compacted {
            log::debug!(
                "{name}: group {}, count = {}, size = {}, being compacted, skip",
                group_index + 1,
                group.count,
                (group.ratio * base_size) as u64
            );
            continue;
        }

        start_index = group.start;
        end_index = group.start + group.count;
    }

    if end_index == 0 {
        return None;
    }

    let enable_compression = window_tail_compression(opts, runs, end_index);

    let estimated_total_size: u64 = runs[start_index..end_index]
        .iter()
        .map(|run| run.size)
        .sum();
    let output_path_id = pick_path_id(opts, estimated_total_size);

    let mut output_level = if end_index == runs.len() {
        levels.last_level_index()
    } else if runs[end_index].level == 0 {
        0
    } else {
        runs[end_index].level - 1
    };

    // The last level is reserved for the files ingested behind
    if opts.allow_ingest_behind && output_level == levels.last_level_index() {
        debug_assert!(output_level > 1);
        output_level -= 1;
    }

    let window = &runs[start_index..end_index];
    for (i, run) in window.iter().enumerate() {
        log::debug!("{name}: picking {run}[{}]", start_index + i);
    }

    Some(Descriptor {
        inputs: inputs_for_window(levels, window),
        output_level,
        output_path_id,
        target_file_size: opts.target_file_size,
        max_compaction_bytes: u64::MAX,
        compression: compression_for(opts, enable_compression),
        // A meta-merge writes one index; splitting it makes no sense
        max_subcompactions: 1,
        manual: false,
        partial: false,
        purpose: Purpose::Map,
        reason: Reason::SortedRunNum,
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
        options::Options,
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
    fn merges_the_first_multi_run_group() {
        let mut levels = Levels::new(7);

        // Newest first: 1, 1, 4, 16, 64 (write buffer units)
        let mib = 1_024 * 1_024;
        levels.insert_into_level(0, fixture_file(5, 64 * mib));
        levels.insert_into_level(0, fixture_file(4, 64 * mib));
        levels.insert_into_level(0, fixture_file(3, 4 * 64 * mib));
        levels.insert_into_level(0, fixture_file(2, 16 * 64 * mib));
        levels.insert_into_level(0, fixture_file(1, 64 * 64 * mib));

        let opts = Options::default().write_buffer_size(64 * mib);
        let mut runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        let descriptor = pick("default", &levels, &opts, &mut runs, 1.0, 3)
            .expect("should reduce the head group");

        assert_eq!(Reason::SortedRunNum, descriptor.reason);
        assert_eq!(Purpose::Map, descriptor.purpose);
        assert_eq!(1, descriptor.max_subcompactions);

        // The head group [1, 1, 4] is merged
        let nums: Vec<_> = descriptor.input_files().map(|f| f.num).collect();
        assert_eq!(vec![5, 4, 3], nums);

        // Its runs are flagged so the composite planner leaves them alone
        assert!(runs[0].wait_reduce);
        assert!(runs[1].wait_reduce);
        assert!(runs[2].wait_reduce);
        assert!(!runs[3].wait_reduce);
    }

    #[test]
    fn all_groups_single_is_nothing_to_do() {
        let mut levels = Levels::new(7);

        let mib = 1_024 * 1_024;
        levels.insert_into_level(0, fixture_file(2, 64 * mib));
        levels.insert_into_level(2, fixture_file(1, 64 * 64 * mib));

        let opts = Options::default().write_buffer_size(64 * mib);
        let mut runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        assert!(pick("default", &levels, &opts, &mut runs, 1.0, 2).is_none());
    }
}
