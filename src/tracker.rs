use crate::{
    compaction::{Descriptor, InputGroup},
    key::UserKey,
    meta::{FileMeta, FileNum, Purpose},
};
use std::{collections::HashSet, sync::Arc};

/// Live-compaction bookkeeping, owned by the compaction controller
///
/// Holds the set of descriptors that are currently being executed and
/// the file numbers they consume. The database serializes all access
/// behind its compaction lock, so the tracker itself carries no locks;
/// the picker consults and mutates it inside that critical section.
///
/// A caller that discards a picked descriptor without running it must
/// [`CompactionTracker::unregister`] it, otherwise its input files stay
/// masked forever.
#[derive(Default)]
pub struct CompactionTracker {
    live: Vec<Arc<Descriptor>>,

    /// File numbers consumed by live compactions
    ///
    /// While files are consumed they cannot be picked again, so
    /// concurrent compactions never share a file.
    busy: HashSet<FileNum>,
}

impl CompactionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no compaction is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Returns the live descriptors.
    #[must_use]
    pub fn live(&self) -> &[Arc<Descriptor>] {
        &self.live
    }

    /// Returns `true` if the file is consumed by a live compaction.
    #[must_use]
    pub fn is_busy(&self, num: FileNum) -> bool {
        self.busy.contains(&num)
    }

    /// Returns `true` if any of the files is consumed by a live compaction.
    #[must_use]
    pub fn any_busy(&self, files: &[Arc<FileMeta>]) -> bool {
        files.iter().any(|f| self.is_busy(f.num))
    }

    /// Registers a descriptor, masking all of its input files.
    pub fn register(&mut self, descriptor: &Arc<Descriptor>) {
        for file in descriptor.input_files() {
            debug_assert!(
                !self.busy.contains(&file.num),
                "file picked into two live compactions"
            );
            self.busy.insert(file.num);
        }

        self.live.push(descriptor.clone());
    }

    /// Unregisters a descriptor, unmasking its input files.
    pub fn unregister(&mut self, descriptor: &Arc<Descriptor>) {
        self.live.retain(|d| !Arc::ptr_eq(d, descriptor));

        for file in descriptor.input_files() {
            self.busy.remove(&file.num);
        }
    }

    /// Returns `true` if a live compaction produces map files.
    #[must_use]
    pub fn has_map_compaction(&self) -> bool {
        self.live.iter().any(|d| d.purpose == Purpose::Map)
    }

    /// Returns `true` if a live compaction consumes L0 files.
    #[must_use]
    pub fn has_live_l0(&self) -> bool {
        self.live.iter().any(|d| d.start_level() == 0)
    }

    /// Returns `true` if a live compaction writes into the given level.
    #[must_use]
    pub fn is_output_level(&self, level: u8) -> bool {
        self.live.iter().any(|d| d.output_level == level)
    }

    /// Returns `true` if the prospective inputs' key range overlaps a
    /// live compaction's key range at the same output level.
    ///
    /// Two jobs writing overlapping key ranges into one level would
    /// produce files that are not key-disjoint, so such picks are
    /// rejected.
    #[must_use]
    pub fn range_overlaps(&self, inputs: &[InputGroup], output_level: u8) -> bool {
        let Some((start, end)) = user_key_range(inputs) else {
            return false;
        };

        self.live
            .iter()
            .filter(|d| d.output_level == output_level)
            .filter_map(|d| d.user_key_range())
            .any(|(live_start, live_end)| start <= live_end && live_start <= end)
    }
}

fn user_key_range(inputs: &[InputGroup]) -> Option<(UserKey, UserKey)> {
    let mut min: Option<UserKey> = None;
    let mut max: Option<UserKey> = None;

    for file in inputs.iter().flat_map(|group| group.files.iter()) {
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
