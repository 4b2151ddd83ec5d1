//! Universal-style compaction picking for log-structured merge-trees (LSM-trees/LSMTs).
//!
//! ##### NOTE
//!
//! > This crate only decides *what* to compact.
//! > It performs no I/O and moves no bytes: given a read-only snapshot
//! > of the level layout, it produces a fully-specified job descriptor
//! > that a separate merger executes.
//!
//! ##### About
//!
//! Universal (tiered) compaction treats the tree as a stack of sorted
//! runs: each L0 file is one run, each deeper level is one run. Runs
//! are merged when disk space amplifies beyond a threshold, when too
//! many runs accumulate, when similar-sized runs can be folded
//! together cheaply, or when files were marked for space reclamation.
//!
//! On top of the classic heuristics, the picker supports *lazy*
//! compaction: instead of rewriting bytes, runs are first meta-merged
//! into **map files** (indexes resolving ranges to other files), and a
//! composite planner later splits those indexes into range-targeted
//! rewrites where the read amplification actually hurts.
//!
//! # Example usage
//!
//! ```
//! use universal_compaction::{
//!     CompactionTracker, FileMeta, InternalKey, Levels, Options, Purpose, UniversalPicker,
//! };
//! use std::sync::Arc;
//!
//! let mut levels = Levels::new(7);
//!
//! // A snapshot is usually built by the version system
//! for num in 1..=4 {
//!     levels.insert_into_level(0, Arc::new(FileMeta {
//!         num,
//!         path_id: 0,
//!         file_size: 64 * 1_024 * 1_024,
//!         compensated_size: 64 * 1_024 * 1_024,
//!         smallest: InternalKey::new(&b"a"[..], num * 2),
//!         largest: InternalKey::new(&b"z"[..], num * 2 + 1),
//!         seqnos: (num * 2, num * 2 + 1),
//!         purpose: Purpose::Essence,
//!         dependents: Vec::new(),
//!         marked_for_compaction: false,
//!     }));
//! }
//!
//! let opts = Options::default();
//! let mut tracker = CompactionTracker::new();
//!
//! let picker = UniversalPicker::new(None);
//! assert!(UniversalPicker::needs_compaction(&levels, &opts));
//!
//! let descriptor = picker
//!     .pick_compaction("default", &levels, &opts, &mut tracker)
//!     .expect("4 runs at trigger 4 should compact");
//!
//! // The inputs are masked until the job finishes or is abandoned
//! assert!(tracker.is_busy(1));
//! assert_eq!(4, descriptor.input_files().count());
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]

pub mod compaction;
mod error;
mod key;
mod levels;
mod meta;
mod options;
mod path;
mod run;
mod serde;
mod table;
mod tracker;

pub use {
    compaction::{
        CompactTarget, Descriptor, InputGroup, ManualChoice, Range, Reason, UniversalPicker,
    },
    error::{Error, Result},
    key::{InternalKey, SeqNo, UserKey},
    levels::{Level, Levels},
    meta::{CompressionType, FileMeta, FileNum, Purpose},
    options::{Options, StopStyle, UniversalOptions},
    path::StoragePath,
    run::SortedRun,
    serde::{Deserializable, DeserializeError, Serializable, SerializeError},
    table::{LinkedFile, MapElement, MapEntryIter, TableCache, TableProperties, TableSource},
    tracker::CompactionTracker,
};
