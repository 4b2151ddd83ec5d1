use crate::key::{InternalKey, SeqNo};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// On-disk file number, unique within a database instance
pub type FileNum = u64;

/// Role a sorted file plays in the file-relationship graph
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Purpose {
    /// A normal data file without dependents
    Essence,

    /// A file whose payload is an index of ranges resolving to other files
    Map,

    /// A map-like file whose entries reference multiple underlying files per range
    Link,
}

impl Purpose {
    /// Returns `true` if files of this purpose resolve to other files
    #[must_use]
    pub fn is_composite(self) -> bool {
        !matches!(self, Self::Essence)
    }
}

/// Compression to apply to compaction outputs
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum CompressionType {
    /// No compression
    None,

    /// LZ4 compression
    Lz4,
}

/// Immutable descriptor of one on-disk sorted file
///
/// The picker never opens the file itself; everything it reasons over
/// is in here or behind the table-properties cache.
#[derive(Clone, Eq, PartialEq)]
pub struct FileMeta {
    /// File number
    pub num: FileNum,

    /// Storage path this file lives in
    pub path_id: u32,

    /// File size in bytes
    pub file_size: u64,

    /// File size inflated by an estimate of the dead bytes it contains
    pub compensated_size: u64,

    /// Smallest key in this file
    pub smallest: InternalKey,

    /// Largest key in this file
    pub largest: InternalKey,

    /// (Lowest, highest) sequence number in this file
    pub seqnos: (SeqNo, SeqNo),

    /// Role of this file in the file-relationship graph
    pub purpose: Purpose,

    /// File numbers this file resolves to (map and link files only)
    ///
    /// A file may depend only on files created earlier, so the
    /// relationship graph is acyclic by construction.
    pub dependents: Vec<FileNum>,

    /// Set by the tombstone collector to request space reclamation
    pub marked_for_compaction: bool,
}

impl std::fmt::Debug for FileMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "File:{}", self.num)
    }
}

impl FileMeta {
    /// Returns `true` if the file's user-key range intersects the given bounds
    pub(crate) fn check_user_range_overlap(
        &self,
        bounds: &(Bound<&[u8]>, Bound<&[u8]>),
    ) -> bool {
        let (lo, hi) = bounds;

        let below_hi = match hi {
            Bound::Unbounded => true,
            Bound::Included(key) => &*self.smallest.user_key <= *key,
            Bound::Excluded(key) => &*self.smallest.user_key < *key,
        };

        let above_lo = match lo {
            Bound::Unbounded => true,
            Bound::Included(key) => &*self.largest.user_key >= *key,
            Bound::Excluded(key) => &*self.largest.user_key > *key,
        };

        below_hi && above_lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn fixture_file(num: FileNum, key_range: (&[u8], &[u8])) -> FileMeta {
        FileMeta {
            num,
            path_id: 0,
            file_size: 1,
            compensated_size: 1,
            smallest: InternalKey::new(key_range.0, 0),
            largest: InternalKey::new(key_range.1, 0),
            seqnos: (0, 0),
            purpose: Purpose::Essence,
            dependents: Vec::new(),
            marked_for_compaction: false,
        }
    }

    #[test]
    fn range_overlap() {
        use std::ops::Bound::{Included, Unbounded};

        let file = fixture_file(1, (b"c", b"k"));

        assert!(file.check_user_range_overlap(&(Included(&b"a"[..]), Included(&b"d"[..]))));
        assert!(file.check_user_range_overlap(&(Included(&b"d"[..]), Unbounded)));
        assert!(!file.check_user_range_overlap(&(Included(&b"l"[..]), Included(&b"z"[..]))));
        assert!(!file.check_user_range_overlap(&(Unbounded, Included(&b"b"[..]))));
    }

    #[test]
    fn purpose_composite() {
        assert!(!Purpose::Essence.is_composite());
        assert!(Purpose::Map.is_composite());
        assert!(Purpose::Link.is_composite());
    }
}
