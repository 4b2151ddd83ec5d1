use crate::meta::FileMeta;
use std::{ops::DerefMut, sync::Arc};

/// The files of one level, in level order
///
/// L0 holds possibly-overlapping files ordered newest first.
/// Levels below hold key-disjoint files sorted by smallest key.
pub struct Level(pub(crate) Vec<Arc<FileMeta>>);

impl std::ops::Deref for Level {
    type Target = Vec<Arc<FileMeta>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Level {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Default for Level {
    fn default() -> Self {
        Self(Vec::with_capacity(20))
    }
}

impl Level {
    /// Gets the level size in bytes, not following dependents
    pub fn size(&self) -> u64 {
        self.iter().map(|x| x.file_size).sum()
    }

    /// Returns all files whose key range intersects `[start, end]` (inclusive)
    pub fn overlapping_files(&self, start: &[u8], end: &[u8]) -> Vec<Arc<FileMeta>> {
        use std::ops::Bound::Included;

        let bounds = (Included(start), Included(end));

        self.0
            .iter()
            .filter(|x| x.check_user_range_overlap(&bounds))
            .cloned()
            .collect()
    }
}
