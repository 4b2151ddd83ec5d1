use crate::{meta::CompressionType, path::StoragePath};
use serde::{Deserialize, Serialize};

/// Controls when a sorted-run window stops growing
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum StopStyle {
    /// Compare the next run against the total size accumulated so far
    TotalSize,

    /// Compare the next run against the previously picked run only,
    /// in both directions, so only similar-sized runs are merged
    SimilarSize,
}

/// Knobs of the universal compaction heuristics
#[derive(Clone, Debug, PartialEq)]
pub struct UniversalOptions {
    /// Percentage by which a run may exceed the accumulated candidate
    /// size and still be merged into the window
    ///
    /// Default = 1
    pub size_ratio: u32,

    /// Minimum amount of runs a window must contain
    ///
    /// Default = 2
    pub min_merge_width: u32,

    /// Maximum amount of runs a window may contain
    ///
    /// Default = unlimited
    pub max_merge_width: u32,

    /// Space amplification threshold in percent: if the bytes newer than
    /// the oldest run exceed this percentage of the oldest run's size,
    /// everything is merged into the bottom level
    ///
    /// Default = 200
    pub max_size_amplification_percent: u64,

    /// If >= 0, only the oldest `n` percent of all bytes are compressed;
    /// if negative, outputs are always compressed
    ///
    /// Default = -1
    pub compression_size_percent: i64,

    /// Window accumulation rule
    ///
    /// Default = [`StopStyle::TotalSize`]
    pub stop_style: StopStyle,

    /// Allows realizing compactions as pointer-level moves when the
    /// input files are key-disjoint
    ///
    /// Default = false
    pub allow_trivial_move: bool,
}

impl Default for UniversalOptions {
    fn default() -> Self {
        Self {
            size_ratio: 1,
            min_merge_width: 2,
            max_merge_width: u32::MAX,
            max_size_amplification_percent: 200,
            compression_size_percent: -1,
            stop_style: StopStyle::TotalSize,
            allow_trivial_move: false,
        }
    }
}

/// Picker configuration
///
/// The snapshot carries the level layout; everything else the picker
/// needs to know comes from here.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// Size of the in-memory write buffer, used as the base unit when
    /// grouping runs into geometric-ratio groups
    ///
    /// Default = 64 MiB
    pub write_buffer_size: u64,

    /// Amount of sorted runs that triggers compaction
    ///
    /// Default = 4
    pub level0_file_num_compaction_trigger: usize,

    /// Target size of compaction output files
    ///
    /// Default = 64 MiB
    pub target_file_size: u64,

    /// Byte budget of a single sub-compaction range in manual range
    /// compactions
    ///
    /// Default = 25 * `target_file_size`
    pub max_compaction_bytes: u64,

    /// Maximum amount of sub-compactions a job may be split into
    ///
    /// Default = 4
    pub max_subcompactions: usize,

    /// Compression to use for compaction outputs, where enabled
    ///
    /// Default = [`CompressionType::Lz4`]
    pub compression: CompressionType,

    /// Reserves the deepest level for files ingested behind the tree;
    /// the picker never writes into it
    ///
    /// Default = false
    pub allow_ingest_behind: bool,

    /// Switches the picker to lazy compaction: runs are reduced through
    /// meta-merges into map files, and map files are split into
    /// range-targeted jobs by the composite planner
    ///
    /// Default = false
    pub enable_lazy_compaction: bool,

    /// Ordered storage paths compaction outputs may be placed in
    ///
    /// Default = one path without a capacity target
    pub paths: Vec<StoragePath>,

    /// Universal heuristics knobs
    pub universal: UniversalOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1_024 * 1_024,
            level0_file_num_compaction_trigger: 4,
            target_file_size: 64 * 1_024 * 1_024,
            max_compaction_bytes: 25 * 64 * 1_024 * 1_024,
            max_subcompactions: 4,
            compression: CompressionType::Lz4,
            allow_ingest_behind: false,
            enable_lazy_compaction: false,
            paths: vec![StoragePath::new(".", u64::MAX)],
            universal: UniversalOptions::default(),
        }
    }
}

impl Options {
    /// Sets the compaction trigger.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn level0_file_num_compaction_trigger(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.level0_file_num_compaction_trigger = n;
        self
    }

    /// Sets the write buffer size.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is 0.
    #[must_use]
    pub fn write_buffer_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0);

        self.write_buffer_size = bytes;
        self
    }

    /// Sets the target output file size.
    #[must_use]
    pub fn target_file_size(mut self, bytes: u64) -> Self {
        self.target_file_size = bytes;
        self
    }

    /// Sets the minimum window width.
    ///
    /// # Panics
    ///
    /// Panics if `n` is less than 2.
    #[must_use]
    pub fn min_merge_width(mut self, n: u32) -> Self {
        assert!(n >= 2);

        self.universal.min_merge_width = n;
        self
    }

    /// Sets the maximum window width.
    ///
    /// # Panics
    ///
    /// Panics if `n` is less than 2.
    #[must_use]
    pub fn max_merge_width(mut self, n: u32) -> Self {
        assert!(n >= 2);

        self.universal.max_merge_width = n;
        self
    }

    /// Sets the size-ratio admission percentage.
    #[must_use]
    pub fn size_ratio(mut self, pct: u32) -> Self {
        self.universal.size_ratio = pct;
        self
    }

    /// Sets the space amplification threshold.
    #[must_use]
    pub fn max_size_amplification_percent(mut self, pct: u64) -> Self {
        self.universal.max_size_amplification_percent = pct;
        self
    }

    /// Enables or disables trivial moves.
    #[must_use]
    pub fn allow_trivial_move(mut self, enabled: bool) -> Self {
        self.universal.allow_trivial_move = enabled;
        self
    }

    /// Enables or disables lazy compaction.
    #[must_use]
    pub fn enable_lazy_compaction(mut self, enabled: bool) -> Self {
        self.enable_lazy_compaction = enabled;
        self
    }
}
