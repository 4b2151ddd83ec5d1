mod level;

pub use level::Level;

use crate::{
    key::UserKey,
    meta::{FileMeta, FileNum},
};
use std::{collections::HashMap, sync::Arc};

/// Read-only snapshot of the level layout of an LSM-tree
///
/// Holds the files of each level plus an index of dependent files
/// (files that are referenced by map or link files instead of living
/// in a level themselves). The snapshot does not change during a pick;
/// the version system hands the picker a fresh one each cycle.
pub struct Levels {
    levels: Vec<Level>,

    /// Every file keyed by number, including dependents
    index: HashMap<FileNum, Arc<FileMeta>>,

    /// Files only reachable through map/link entries
    dependents: HashMap<FileNum, Arc<FileMeta>>,
}

impl Levels {
    /// Creates an empty snapshot with the given amount of levels.
    ///
    /// # Panics
    ///
    /// Panics if `level_count` is 0.
    #[must_use]
    pub fn new(level_count: u8) -> Self {
        assert!(level_count > 0, "level_count should be >= 1");

        let levels = (0..level_count).map(|_| Level::default()).collect();

        Self {
            levels,
            index: HashMap::with_capacity(100),
            dependents: HashMap::with_capacity(100),
        }
    }

    /// Places a file into a level (clamped to the deepest level).
    pub fn insert_into_level(&mut self, level_no: u8, file: Arc<FileMeta>) {
        let last_level_index = self.depth() - 1;
        let index = level_no.clamp(0, last_level_index);

        #[allow(clippy::expect_used)]
        let level = self
            .levels
            .get_mut(index as usize)
            .expect("level should exist");

        level.push(file.clone());
        self.index.insert(file.num, file);

        self.sort_levels();
    }

    /// Registers a file that is only reachable through map/link entries.
    pub fn insert_dependent(&mut self, file: Arc<FileMeta>) {
        self.index.insert(file.num, file.clone());
        self.dependents.insert(file.num, file);
    }

    /// Sorts L0 newest to oldest and the levels below by smallest key
    fn sort_levels(&mut self) {
        for (idx, level) in self.levels.iter_mut().enumerate() {
            if idx == 0 {
                level.sort_by(|a, b| b.seqnos.1.cmp(&a.seqnos.1));
            } else {
                level.sort_by(|a, b| a.smallest.cmp(&b.smallest));
            }
        }
    }

    /// Returns the amount of levels in the tree
    // NOTE: There are never that many levels
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn depth(&self) -> u8 {
        self.levels.len() as u8
    }

    /// Returns the index of the deepest level
    #[must_use]
    pub fn last_level_index(&self) -> u8 {
        self.depth() - 1
    }

    /// Returns the files of the given level
    ///
    /// # Panics
    ///
    /// Panics if the level does not exist.
    #[must_use]
    pub fn level(&self, level_no: u8) -> &Level {
        #[allow(clippy::expect_used)]
        self.levels
            .get(level_no as usize)
            .expect("level should exist")
    }

    /// Iterates over all levels, shallowest first
    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        self.levels.iter()
    }

    /// Returns the amount of files, summed over all levels
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    /// Returns `true` if there are no files in any level
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the amount of files in L0
    #[must_use]
    pub fn first_level_file_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.levels.first().expect("L0 should always exist").len()
    }

    /// Looks up any file (level-resident or dependent) by number
    #[must_use]
    pub fn lookup(&self, num: FileNum) -> Option<&Arc<FileMeta>> {
        self.index.get(&num)
    }

    /// Looks up a dependent file by number
    #[must_use]
    pub fn dependent(&self, num: FileNum) -> Option<&Arc<FileMeta>> {
        self.dependents.get(&num)
    }

    /// Computes a file's size following map/link dependencies.
    ///
    /// A dependent that is absent from the snapshot contributes 0; the
    /// version snapshot is authoritative, so a gap means the referenced
    /// file was already reclaimed.
    #[must_use]
    pub fn transitive_size(&self, file: &FileMeta) -> u64 {
        let mut size = file.file_size;

        if file.purpose.is_composite() {
            for &num in &file.dependents {
                size += self.dependent_size(num);
            }
        }

        size
    }

    fn dependent_size(&self, num: FileNum) -> u64 {
        match self.lookup(num) {
            Some(file) => self.transitive_size(file),
            None => {
                log::warn!("dependent file {num} not found in snapshot, counting as reclaimed");
                0
            }
        }
    }

    /// Returns `true` if the given level holds map or link files
    ///
    /// Such a level uses more bytes on disk than its key space needs,
    /// because entries resolve through other files.
    #[must_use]
    pub fn has_space_amplification_at(&self, level_no: u8) -> bool {
        self.level(level_no)
            .iter()
            .any(|f| f.purpose.is_composite() || !f.dependents.is_empty())
    }

    /// Returns `true` if any level has space amplification
    #[must_use]
    pub fn has_space_amplification(&self) -> bool {
        (0..self.depth()).any(|level| self.has_space_amplification_at(level))
    }

    /// Returns `true` if any file is marked for compaction
    #[must_use]
    pub fn has_marked_files(&self) -> bool {
        self.levels
            .iter()
            .any(|level| level.iter().any(|f| f.marked_for_compaction))
    }

    /// Returns the largest user key of a level, if the level is not empty
    #[must_use]
    pub fn max_user_key_of_level(&self, level_no: u8) -> Option<UserKey> {
        let level = self.level(level_no);

        if level_no == 0 {
            level
                .iter()
                .map(|f| &f.largest.user_key)
                .max()
                .cloned()
        } else {
            level.last().map(|f| f.largest.user_key.clone())
        }
    }
}
