use crate::{levels::Levels, meta::FileMeta, options::Options, tracker::CompactionTracker};
use std::sync::Arc;

/// A sorted run: one L0 file, or one whole level below L0
///
/// The unit the universal picker reasons over. L0 files overlap each
/// other, so each is its own run; a deeper level is key-disjoint as a
/// whole and forms a single run.
#[derive(Clone, Debug)]
pub struct SortedRun {
    /// Level this run lives in
    pub level: u8,

    /// The file, set iff `level` is 0
    pub file: Option<Arc<FileMeta>>,

    /// Run size in bytes, following map/link dependencies
    pub size: u64,

    /// Run size inflated by the estimated dead bytes
    pub compensated_size: u64,

    /// Whether (any of) the run's files are consumed by a live compaction
    pub being_compacted: bool,

    /// Set when the run was grouped for reduction this pick cycle;
    /// the composite planner leaves such runs alone
    pub(crate) wait_reduce: bool,
}

impl std::fmt::Display for SortedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "file {}", file.num),
            None => write!(f, "level {}", self.level),
        }
    }
}

/// Builds the sorted-run view over a snapshot: one run per L0 file in
/// L0 order (newest first), followed by one run per non-empty level.
///
/// Without trivial moves, a level is always compacted as a whole, so
/// all its files share the same busy state.
pub(crate) fn sorted_runs(
    levels: &Levels,
    opts: &Options,
    tracker: &CompactionTracker,
) -> Vec<SortedRun> {
    let mut runs = Vec::with_capacity(levels.len());

    for file in levels.level(0).iter() {
        runs.push(SortedRun {
            level: 0,
            file: Some(file.clone()),
            size: levels.transitive_size(file),
            compensated_size: file.compensated_size,
            being_compacted: tracker.is_busy(file.num),
            wait_reduce: false,
        });
    }

    for level_no in 1..levels.depth() {
        let level = levels.level(level_no);

        let mut total_size = 0;
        let mut total_compensated_size = 0;
        let mut being_compacted = false;
        let mut is_first = true;

        for file in level.iter() {
            total_size += levels.transitive_size(file);
            total_compensated_size += file.compensated_size;

            let busy = tracker.is_busy(file.num);

            if opts.universal.allow_trivial_move {
                being_compacted |= busy;
            } else {
                // Without trivial moves, a level enters compaction as a
                // whole, so its files cannot disagree here
                debug_assert!(is_first || busy == being_compacted);
            }

            if is_first {
                being_compacted = busy;
                is_first = false;
            }
        }

        if total_compensated_size > 0 {
            runs.push(SortedRun {
                level: level_no,
                file: None,
                size: total_size,
                compensated_size: total_compensated_size,
                being_compacted,
                wait_reduce: false,
            });
        }
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::sorted_runs;
    use crate::{
        key::InternalKey,
        meta::{FileMeta, FileNum, Purpose},
        options::Options,
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
            smallest: InternalKey::new(&b"a"[..], 0),
            largest: InternalKey::new(&b"z"[..], 0),
            seqnos: (num, num),
            purpose: Purpose::Essence,
            dependents: Vec::new(),
            marked_for_compaction: false,
        })
    }

    #[test]
    fn one_run_per_l0_file_then_one_per_level() {
        let mut levels = Levels::new(4);

        levels.insert_into_level(0, fixture_file(1, 10));
        levels.insert_into_level(0, fixture_file(2, 10));
        levels.insert_into_level(2, fixture_file(3, 100));
        levels.insert_into_level(2, fixture_file(4, 100));

        let runs = sorted_runs(&levels, &Options::default(), &CompactionTracker::new());

        assert_eq!(3, runs.len());
        assert_eq!(0, runs[0].level);
        assert_eq!(0, runs[1].level);
        assert_eq!(2, runs[2].level);
        assert_eq!(200, runs[2].size);
        assert!(runs[2].file.is_none());
    }

    #[test]
    fn empty_levels_produce_no_runs() {
        let levels = Levels::new(7);
        let runs = sorted_runs(&levels, &Options::default(), &CompactionTracker::new());
        assert!(runs.is_empty());
    }

    #[test]
    fn map_file_run_size_is_transitive() {
        let mut levels = Levels::new(4);

        levels.insert_dependent(fixture_file(1, 500));
        levels.insert_into_level(
            1,
            Arc::new(FileMeta {
                purpose: Purpose::Map,
                dependents: vec![1],
                ..(*fixture_file(2, 8)).clone()
            }),
        );

        let runs = sorted_runs(&levels, &Options::default(), &CompactionTracker::new());

        assert_eq!(1, runs.len());
        assert_eq!(508, runs[0].size);
        assert_eq!(8, runs[0].compensated_size);
    }
}
