//! Contains the compaction descriptor types and the universal picker

pub(crate) mod composite;
pub(crate) mod delete;
pub(crate) mod grouping;
pub(crate) mod overlap;
mod picker;
pub(crate) mod range;
pub(crate) mod reduce;
pub(crate) mod size_amp;
pub(crate) mod sorted_runs;
pub(crate) mod trivial_move;

pub use picker::{CompactTarget, UniversalPicker};

use crate::{
    key::UserKey,
    levels::Levels,
    meta::{CompressionType, FileMeta, Purpose},
    options::Options,
    run::SortedRun,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a compaction was picked
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Reason {
    /// The bytes newer than the oldest run exceeded the space
    /// amplification threshold
    SizeAmplification,

    /// A window of similar-sized runs qualified under the size ratio
    SizeRatio,

    /// The amount of sorted runs had to be brought back under the trigger
    SortedRunNum,

    /// Files can be moved down a level without merging
    TrivialMove,

    /// Files were marked for compaction by the tombstone collector
    FilesMarkedForCompaction,

    /// A map file's ranges were selected to reduce read amplification
    CompositeAmplification,

    /// The user asked for it
    Manual,
}

/// A user-key range targeted by a partial compaction
///
/// Owns its key bytes; ranges outlive the snapshot they were read from.
#[derive(Clone, Eq, PartialEq)]
pub struct Range {
    /// First user key of the range
    pub start: UserKey,

    /// Last user key of the range
    pub limit: UserKey,

    /// Whether `start` itself belongs to the range
    pub include_start: bool,

    /// Whether `limit` itself belongs to the range
    pub include_limit: bool,
}

impl std::fmt::Debug for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{:?}, {:?}{}",
            if self.include_start { '[' } else { '(' },
            self.start,
            self.limit,
            if self.include_limit { ']' } else { ')' },
        )
    }
}

/// The files of one level participating in a compaction
#[derive(Clone, Debug, PartialEq)]
pub struct InputGroup {
    /// Level the files live in
    pub level: u8,

    /// Files to compact; for levels >= 1 this is the whole level,
    /// except for single-file composite picks
    pub files: Vec<Arc<FileMeta>>,
}

/// Fully-specified compaction job descriptor
///
/// The picker's output: which files to merge, where the result goes
/// and under which policy. The scheduler owns it for the compaction's
/// duration; the merger never talks to the picker again.
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    /// Per-level input groups, levels consecutive, shallowest first
    pub inputs: Vec<InputGroup>,

    /// Level the outputs go into
    pub output_level: u8,

    /// Storage path the outputs go into
    pub output_path_id: u32,

    /// Target size of output files
    pub target_file_size: u64,

    /// Byte budget of the whole job
    pub max_compaction_bytes: u64,

    /// Compression for the outputs
    pub compression: CompressionType,

    /// How many sub-compactions the job may be split into
    pub max_subcompactions: usize,

    /// Whether a user asked for this compaction
    pub manual: bool,

    /// Whether only parts of the input key space are rewritten
    pub partial: bool,

    /// Purpose of the output files
    pub purpose: Purpose,

    /// Why this compaction was picked
    pub reason: Reason,

    /// Compaction score of the snapshot at pick time
    pub score: f64,

    /// Ranges to rewrite, for partial compactions
    pub input_ranges: Vec<Range>,

    /// Whether the merger may realize this job as a pointer-level move
    pub trivial_move: bool,
}

impl Descriptor {
    /// Returns the shallowest input level
    #[must_use]
    pub fn start_level(&self) -> u8 {
        self.inputs.first().map_or(0, |group| group.level)
    }

    /// Iterates over all input files
    pub fn input_files(&self) -> impl Iterator<Item = &Arc<FileMeta>> {
        self.inputs.iter().flat_map(|group| group.files.iter())
    }

    /// Returns the user-key range spanned by all input files
    #[must_use]
    pub fn user_key_range(&self) -> Option<(UserKey, UserKey)> {
        let mut min: Option<UserKey> = None;
        let mut max: Option<UserKey> = None;

        for file in self.input_files() {
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
}

/// Outcome of a manual compaction request
#[derive(Clone, Debug, PartialEq)]
pub enum ManualChoice {
    /// A job was picked and registered
    Compact(Arc<Descriptor>),

    /// The request conflicts with a live compaction; the controller
    /// decides whether to retry or give up
    Conflict,

    /// There is nothing to do
    Nothing,
}

impl ManualChoice {
    /// Returns `true` if the request conflicted with a live compaction
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Builds per-level input groups for a window of sorted runs.
///
/// The groups span every level from the window's first run to its last,
/// so input levels stay consecutive; levels that are empty in the
/// snapshot contribute an empty group in the middle of the span.
pub(crate) fn inputs_for_window(levels: &Levels, window: &[SortedRun]) -> Vec<InputGroup> {
    let Some(first) = window.first() else {
        return Vec::new();
    };

    #[allow(clippy::expect_used)]
    let last = window.last().expect("window is not empty");

    let mut groups = Vec::with_capacity((last.level - first.level + 1) as usize);

    for level in first.level..=last.level {
        let files = if level == 0 {
            window
                .iter()
                .filter_map(|run| run.file.clone())
                .collect::<Vec<_>>()
        } else if window.iter().any(|run| run.level == level) {
            levels.level(level).iter().cloned().collect()
        } else {
            Vec::new()
        };

        groups.push(InputGroup { level, files });
    }

    groups
}

/// Compression is only enabled if the files older than the window have
/// not yet reached the configured percentage of all bytes; if they
/// have, the window is in the young tail that stays uncompressed.
pub(crate) fn window_tail_compression(opts: &Options, runs: &[SortedRun], end: usize) -> bool {
    let pct = opts.universal.compression_size_percent;

    if pct < 0 {
        return true;
    }

    let total: u64 = runs.iter().map(|run| run.compensated_size).sum();
    let older: u64 = runs.iter().skip(end).map(|run| run.size).sum();

    older.saturating_mul(100) < total.saturating_mul(pct.unsigned_abs())
}

/// Maps the enable-compression decision onto a concrete compression type
pub(crate) fn compression_for(opts: &Options, enabled: bool) -> CompressionType {
    if enabled {
        opts.compression
    } else {
        CompressionType::None
    }
}
