//! Space-amplification policy: if the bytes newer than the oldest run
//! exceed a percentage of the oldest run's size, merge everything into
//! the bottom level.

use super::{compression_for, inputs_for_window, Descriptor, Reason};
use crate::{
    levels::Levels, meta::Purpose, options::Options, path::pick_path_id, run::SortedRun,
};

pub(crate) fn pick(
    name: &str,
    levels: &Levels,
    opts: &Options,
    runs: &[SortedRun],
    score: f64,
) -> Option<Descriptor> {
    let ratio = opts.universal.max_size_amplification_percent;

    let oldest = runs.last()?;
    if oldest.being_compacted {
        return None;
    }

    // Skip leading runs that are already being compacted
    let start_index = runs[..runs.len() - 1]
        .iter()
        .position(|run| !run.being_compacted)?;

    // A busy run in the middle would tear the window apart
    let candidates = &runs[start_index..runs.len() - 1];
    if candidates.iter().any(|run| run.being_compacted) {
        log::debug!("{name}: size amp blocked by a compaction in progress");
        return None;
    }

    let candidate_size: u64 = candidates.iter().map(|run| run.compensated_size).sum();
    let earliest_file_size = oldest.size;

    if candidate_size * 100 < ratio * earliest_file_size {
        log::debug!(
            "{name}: size amp not needed, newer bytes {candidate_size} vs oldest {earliest_file_size}"
        );
        return None;
    }

    log::debug!(
        "{name}: size amp needed, newer bytes {candidate_size} vs oldest {earliest_file_size}"
    );

    let estimated_total_size: u64 = runs[start_index..].iter().map(|run| run.size).sum();
    let output_path_id = pick_path_id(opts, estimated_total_size);

    // Everything goes to the bottom, unless the bottom is reserved
    let mut output_level = levels.last_level_index();
    if opts.allow_ingest_behind {
        debug_assert!(output_level > 1);
        output_level -= 1;
    }

    let inputs = inputs_for_window(levels, &runs[start_index..]);

    Some(Descriptor {
        inputs,
        output_level,
        output_path_id,
        target_file_size: opts.target_file_size,
        max_compaction_bytes: u64::MAX,
        // We compact all the files, so always compress
        compression: compression_for(opts, true),
        max_subcompactions: opts.max_subcompactions,
        manual: false,
        partial: false,
        purpose: Purpose::Essence,
        reason: Reason::SizeAmplification,
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
        meta::{CompressionType, FileMeta, FileNum, Purpose},
        options::Options,
        run::sorted_runs,
        tracker::CompactionTracker,
        Levels,
    };
    use std::sync::Arc;
    use test_log::test;

    fn fixture_file(num: FileNum, size_mib: u64) -> Arc<FileMeta> {
        let size = size_mib * 1_024 * 1_024;

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

    fn fixture_levels(l0_sizes_mib: &[u64]) -> Levels {
        let mut levels = Levels::new(5);

        // Higher file numbers are newer; insert oldest first
        for (i, size) in l0_sizes_mib.iter().rev().enumerate() {
            levels.insert_into_level(0, fixture_file(i as FileNum + 1, *size));
        }

        levels
    }

    #[test]
    fn below_threshold_is_left_alone() {
        // Newer runs sum to 8 MiB against a 200 MiB base: no amplification
        let levels = fixture_levels(&[1, 1, 2, 4, 200]);
        let opts = Options::default().max_size_amplification_percent(25);
        let runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        assert!(pick("default", &levels, &opts, &runs, 1.0).is_none());
    }

    #[test]
    fn above_threshold_compacts_everything() {
        let levels = fixture_levels(&[100, 100, 100, 50]);
        let opts = Options::default().max_size_amplification_percent(200);
        let runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        let descriptor =
            pick("default", &levels, &opts, &runs, 1.0).expect("should pick size amp");

        assert_eq!(Reason::SizeAmplification, descriptor.reason);
        assert_eq!(4, descriptor.input_files().count());
        assert_eq!(levels.last_level_index(), descriptor.output_level);
        assert_eq!(CompressionType::Lz4, descriptor.compression);
    }

    #[test]
    fn ingest_behind_reserves_the_last_level() {
        let levels = fixture_levels(&[100, 100, 100, 50]);
        let opts = Options {
            allow_ingest_behind: true,
            ..Options::default().max_size_amplification_percent(200)
        };
        let runs = sorted_runs(&levels, &opts, &CompactionTracker::new());

        let descriptor =
            pick("default", &levels, &opts, &runs, 1.0).expect("should pick size amp");

        assert_eq!(levels.last_level_index() - 1, descriptor.output_level);
    }

    #[test]
    fn busy_oldest_run_blocks_the_pick() {
        let levels = fixture_levels(&[100, 100, 100, 50]);
        let opts = Options::default().max_size_amplification_percent(200);

        let mut tracker = CompactionTracker::new();
        let runs = sorted_runs(&levels, &opts, &tracker);

        // Mask the oldest file
        let oldest = runs.last().and_then(|r| r.file.clone()).expect("L0 run");
        let descriptor = Arc::new(crate::compaction::Descriptor {
            inputs: vec![crate::compaction::InputGroup {
                level: 0,
                files: vec![oldest],
            }],
            output_level: 4,
            output_path_id: 0,
            target_file_size: 1,
            max_compaction_bytes: u64::MAX,
            compression: CompressionType::None,
            max_subcompactions: 1,
            manual: false,
            partial: false,
            purpose: Purpose::Essence,
            reason: Reason::SizeRatio,
            score: 0.0,
            input_ranges: Vec::new(),
            trivial_move: false,
        });
        tracker.register(&descriptor);

        let runs = sorted_runs(&levels, &opts, &tracker);
        assert!(pick("default", &levels, &opts, &runs, 1.0).is_none());
    }
}
