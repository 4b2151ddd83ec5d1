//! The universal picker: polls the snapshot, tries the policies in a
//! fixed priority and registers the winning descriptor.

use super::{
    composite, compression_for, delete, overlap, range, reduce, size_amp, sorted_runs,
    trivial_move, Descriptor, InputGroup, ManualChoice, Reason,
};
use crate::{
    levels::Levels,
    meta::{FileMeta, FileNum, Purpose},
    options::Options,
    path::pick_path_id,
    run::{sorted_runs as build_sorted_runs, SortedRun},
    table::TableCache,
    tracker::CompactionTracker,
};
use std::{collections::HashSet, sync::Arc};

/// What a manual compaction request targets
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompactTarget {
    /// Compact everything, from the first non-empty level down
    AllLevels,

    /// Compact one level
    Level(u8),
}

/// Universal-style compaction picker
///
/// Stateless apart from the optional table cache; the caller holds the
/// snapshot, the options and the tracker, and invokes the picker inside
/// its compaction critical section.
pub struct UniversalPicker {
    table: Option<Arc<TableCache>>,
}

impl UniversalPicker {
    /// Creates a picker.
    ///
    /// Without a table cache, the composite planner and the manual
    /// range planner stay disabled; everything else works from file
    /// metadata alone.
    #[must_use]
    pub fn new(table: Option<Arc<TableCache>>) -> Self {
        Self { table }
    }

    /// Returns the compaction score: sorted runs per trigger.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compaction_score(levels: &Levels, opts: &Options) -> f64 {
        let run_count = levels.first_level_file_count()
            + (1..levels.depth())
                .filter(|&level| !levels.level(level).is_empty())
                .count();

        run_count as f64 / opts.level0_file_num_compaction_trigger.max(1) as f64
    }

    /// Returns `true` if the snapshot warrants calling
    /// [`UniversalPicker::pick_compaction`].
    #[must_use]
    pub fn needs_compaction(levels: &Levels, opts: &Options) -> bool {
        if Self::compaction_score(levels, opts) >= 1.0 {
            return true;
        }
        if levels.has_marked_files() {
            return true;
        }
        levels.has_space_amplification()
    }

    /// Picks the next compaction, if any, and registers it.
    ///
    /// `None` is the normal "nothing to do" outcome, not an error.
    #[allow(clippy::too_many_lines)]
    pub fn pick_compaction(
        &self,
        name: &str,
        levels: &Levels,
        opts: &Options,
        tracker: &mut CompactionTracker,
    ) -> Option<Arc<Descriptor>> {
        let score = Self::compaction_score(levels, opts);
        let trigger = opts.level0_file_num_compaction_trigger;

        let mut runs = build_sorted_runs(levels, opts, tracker);

        if runs.is_empty()
            || (!levels.has_marked_files()
                && !levels.has_space_amplification()
                && runs.len() < trigger)
        {
            log::debug!("{name}: universal: nothing to do");
            return None;
        }

        log::debug!("{name}: universal: {} sorted runs", runs.len());

        let mut choice: Option<Descriptor> = None;

        if levels.has_space_amplification() || runs.len() >= trigger {
            if opts.enable_lazy_compaction {
                choice = self.pick_lazy(name, levels, opts, &mut runs, score, tracker);
            } else if let Some(c) = size_amp::pick(name, levels, opts, &runs, score) {
                log::debug!("{name}: universal: compacting for size amp");
                choice = Some(c);
            } else {
                // Size amplification is within limits; try reducing
                // read amplification while maintaining size ratios
                let ratio = u64::from(opts.universal.size_ratio);

                if let Some(c) =
                    sorted_runs::pick(name, levels, opts, &runs, score, ratio, usize::MAX)
                {
                    log::debug!("{name}: universal: compacting for size ratio");
                    choice = Some(c);
                } else {
                    // Still too many runs: force the count down without
                    // looking at size ratios
                    let num_not_compacted =
                        runs.iter().filter(|run| !run.being_compacted).count();

                    if num_not_compacted > trigger {
                        let num_files = num_not_compacted - trigger + 1;

                        if let Some(c) = sorted_runs::pick(
                            name, levels, opts, &runs, score, u64::MAX, num_files,
                        ) {
                            log::debug!(
                                "{name}: universal: compacting for file num -- {num_files}"
                            );
                            choice = Some(c);
                        }
                    }
                }
            }
        }

        if choice.is_none() {
            if let Some(table) = &self.table {
                choice = composite::pick(name, levels, opts, &runs, table, tracker);
            }
        }

        if choice.is_none() {
            choice = delete::pick(name, levels, opts, tracker, score);
            if choice.is_some() {
                log::debug!("{name}: universal: delete triggered compaction");
            }
        }

        let mut choice = choice?;

        // A pick whose inputs are key-disjoint may be realized as a
        // pointer-level move, unless an input level resolves through
        // map or link files
        let mut allow_trivial_move = opts.universal.allow_trivial_move;
        if choice.reason != Reason::TrivialMove && allow_trivial_move {
            let amplified = choice
                .inputs
                .iter()
                .any(|group| levels.has_space_amplification_at(group.level));
            if amplified {
                allow_trivial_move = false;
            }
        }
        if allow_trivial_move {
            choice.trivial_move = overlap::nonoverlapping(&choice);
            debug_assert!(choice.reason != Reason::TrivialMove || choice.trivial_move);
        }

        let choice = Arc::new(choice);
        tracker.register(&choice);

        Some(choice)
    }

    /// The lazy path: trivial moves first, then grouped run reduction;
    /// the composite planner catches whatever is left.
    fn pick_lazy(
        &self,
        name: &str,
        levels: &Levels,
        opts: &Options,
        runs: &mut Vec<SortedRun>,
        score: f64,
        tracker: &CompactionTracker,
    ) -> Option<Descriptor> {
        let trigger = opts.level0_file_num_compaction_trigger;
        let mut reduce_target = trigger + levels.depth() as usize - 1;

        // While a map merge runs, another one would fight over the
        // same index
        if tracker.has_map_compaction() {
            reduce_target = usize::MAX;
        } else if let Some(c) = trivial_move::pick(levels, opts, tracker) {
            log::debug!("{name}: universal: trivial move");
            return Some(c);
        } else if let Some(table) = &self.table {
            if runs.len() > 1 && runs.len() <= reduce_target {
                let mut level_read_amp = 0usize;
                let mut needs_rebuild = false;

                for run in runs.iter() {
                    let file = if run.level > 0 {
                        if !levels.has_space_amplification_at(run.level) {
                            continue;
                        }
                        let level_files = levels.level(run.level);
                        if level_files.len() > 1 {
                            // The composite planner will rebuild the map
                            needs_rebuild = true;
                            break;
                        }
                        level_files.first()?.clone()
                    } else {
                        let file = run.file.as_ref()?;
                        if file.purpose != Purpose::Map {
                            continue;
                        }
                        file.clone()
                    };

                    if let Ok(props) = table.properties(&file) {
                        if props.read_amp > 1 {
                            level_read_amp += props.read_amp as usize;
                        }
                    }
                }

                if needs_rebuild {
                    reduce_target = usize::MAX;
                } else if level_read_amp < reduce_target {
                    reduce_target = trigger.max(runs.len() - 1);
                }
            }
        }

        if runs.len() > reduce_target {
            let c = reduce::pick(name, levels, opts, runs, score, reduce_target);
            if c.is_some() {
                log::debug!("{name}: universal: compacting for lazy compaction");
            }
            return c;
        }

        None
    }

    /// Handles a manual compaction request.
    ///
    /// Full compactions build one job over every level from the first
    /// non-empty one down; single-level requests delegate to the range
    /// planner under lazy compaction. Conflicting requests report
    /// [`ManualChoice::Conflict`]; the first registered compaction
    /// wins and the controller decides how to proceed.
    #[allow(clippy::too_many_arguments)]
    pub fn compact_range(
        &self,
        name: &str,
        levels: &Levels,
        opts: &Options,
        tracker: &mut CompactionTracker,
        target: CompactTarget,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        files_being_compact: &HashSet<FileNum>,
    ) -> ManualChoice {
        let mut target = target;

        // Under lazy compaction the affected files may live in a single
        // level; narrowing avoids rewriting the whole tree
        if opts.enable_lazy_compaction && target == CompactTarget::AllLevels {
            let mut hit_levels = Vec::new();

            for level in 0..levels.depth() {
                let hit = levels
                    .level(level)
                    .iter()
                    .any(|file| hits_file(levels, file, files_being_compact));
                if hit {
                    hit_levels.push(level);
                }
            }

            match hit_levels.as_slice() {
                [] => return ManualChoice::Nothing,
                [single] => target = CompactTarget::Level(*single),
                _ => {}
            }
        }

        match target {
            CompactTarget::AllLevels => self.compact_all_levels(name, levels, opts, tracker),
            CompactTarget::Level(level) => {
                if opts.enable_lazy_compaction {
                    let choice = range::pick(
                        name,
                        levels,
                        opts,
                        level,
                        begin,
                        end,
                        files_being_compact,
                        self.table.as_deref(),
                        tracker,
                    );
                    if let ManualChoice::Compact(descriptor) = &choice {
                        tracker.register(descriptor);
                    }
                    choice
                } else {
                    self.compact_level(name, levels, opts, tracker, level, begin, end)
                }
            }
        }
    }

    fn compact_all_levels(
        &self,
        name: &str,
        levels: &Levels,
        opts: &Options,
        tracker: &mut CompactionTracker,
    ) -> ManualChoice {
        let mut output_level = levels.last_level_index();
        if opts.allow_ingest_behind {
            debug_assert!(output_level > 1);
            output_level -= 1;
        }

        let Some(start_level) = (0..levels.depth()).find(|&l| !levels.level(l).is_empty())
        else {
            return ManualChoice::Nothing;
        };

        // Only one L0 compaction may run at a time
        if start_level == 0 && tracker.has_live_l0() {
            log::debug!("{name}: universal: manual compaction conflicts with a live L0 job");
            return ManualChoice::Conflict;
        }

        let mut inputs = Vec::new();
        for level in start_level..levels.depth() {
            let files: Vec<Arc<FileMeta>> = levels.level(level).iter().cloned().collect();

            if tracker.any_busy(&files) {
                return ManualChoice::Conflict;
            }

            inputs.push(InputGroup { level, files });
        }

        // Two non-exclusive manual compactions could produce
        // overlapping outputs in the same level
        if tracker.range_overlaps(&inputs, output_level) {
            return ManualChoice::Conflict;
        }

        let estimated_total_size: u64 = inputs
            .iter()
            .flat_map(|group| group.files.iter())
            .map(|file| file.file_size)
            .sum();

        let (purpose, max_subcompactions) = if opts.enable_lazy_compaction {
            (Purpose::Map, 1)
        } else {
            (Purpose::Essence, opts.max_subcompactions)
        };

        let descriptor = Arc::new(Descriptor {
            inputs,
            output_level,
            output_path_id: pick_path_id(opts, estimated_total_size),
            target_file_size: opts.target_file_size,
            max_compaction_bytes: u64::MAX,
            compression: compression_for(opts, true),
            max_subcompactions,
            manual: true,
            partial: false,
            purpose,
            reason: Reason::Manual,
            score: 0.0,
            input_ranges: Vec::new(),
            trivial_move: false,
        });

        tracker.register(&descriptor);
        ManualChoice::Compact(descriptor)
    }

    /// Plain single-level manual compaction: the files of the level
    /// overlapping the requested bounds move to the next non-empty
    /// level.
    #[allow(clippy::too_many_arguments)]
    fn compact_level(
        &self,
        name: &str,
        levels: &Levels,
        opts: &Options,
        tracker: &mut CompactionTracker,
        level: u8,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> ManualChoice {
        use std::ops::Bound::{Included, Unbounded};

        let bounds = (
            begin.map_or(Unbounded, Included),
            end.map_or(Unbounded, Included),
        );

        let files: Vec<Arc<FileMeta>> = levels
            .level(level)
            .iter()
            .filter(|file| file.check_user_range_overlap(&bounds))
            .cloned()
            .collect();

        if files.is_empty() {
            return ManualChoice::Nothing;
        }

        if tracker.any_busy(&files) {
            log::debug!("{name}: universal: manual compaction conflicts with a live job");
            return ManualChoice::Conflict;
        }

        let mut output_level = (level + 1..levels.depth())
            .find(|&l| !levels.level(l).is_empty())
            .unwrap_or_else(|| levels.last_level_index());

        if opts.allow_ingest_behind && output_level == levels.last_level_index() {
            debug_assert!(output_level > 1);
            output_level -= 1;
        }

        let estimated_total_size: u64 = files.iter().map(|file| file.file_size).sum();

        let mut inputs = vec![InputGroup { level, files }];

        if output_level != level {
            let output_files: Vec<Arc<FileMeta>> = levels
                .level(output_level)
                .iter()
                .filter(|file| file.check_user_range_overlap(&bounds))
                .cloned()
                .collect();

            if tracker.any_busy(&output_files) {
                return ManualChoice::Conflict;
            }

            for middle in level + 1..output_level {
                inputs.push(InputGroup {
                    level: middle,
                    files: Vec::new(),
                });
            }
            inputs.push(InputGroup {
                level: output_level,
                files: output_files,
            });
        }

        if tracker.range_overlaps(&inputs, output_level) {
            return ManualChoice::Conflict;
        }

        let descriptor = Arc::new(Descriptor {
            inputs,
            output_level,
            output_path_id: pick_path_id(opts, estimated_total_size),
            target_file_size: opts.target_file_size,
            max_compaction_bytes: u64::MAX,
            compression: compression_for(opts, true),
            max_subcompactions: opts.max_subcompactions,
            manual: true,
            partial: false,
            purpose: Purpose::Essence,
            reason: Reason::Manual,
            score: 0.0,
            input_ranges: Vec::new(),
            trivial_move: false,
        });

        tracker.register(&descriptor);
        ManualChoice::Compact(descriptor)
    }
}

/// Whether a file, or anything it transitively depends on, is in the
/// requested set
fn hits_file(levels: &Levels, file: &FileMeta, targets: &HashSet<FileNum>) -> bool {
    if targets.contains(&file.num) {
        return true;
    }

    file.dependents.iter().any(|&num| {
        if targets.contains(&num) {
            return true;
        }
        match levels.lookup(num) {
            Some(dependent) => dependent
                .dependents
                .iter()
                .any(|inner| targets.contains(inner)),
            None => {
                log::warn!("dependent file {num} not found in snapshot");
                false
            }
        }
    })
}
