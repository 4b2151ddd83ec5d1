//! Checks whether the input files of a compaction are key-disjoint.
//!
//! If they are, the merger may short-circuit the job into a
//! pointer-level move instead of rewriting bytes.

use super::Descriptor;
use crate::meta::FileMeta;
use min_max_heap::MinMaxHeap;
use std::sync::Arc;

struct HeapEntry {
    file: Arc<FileMeta>,
    group: usize,
    index: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by smallest key; group/index break ties deterministically
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.file.smallest, self.group, self.index).cmp(&(
            &other.file.smallest,
            other.group,
            other.index,
        ))
    }
}

/// Returns `true` if no two input files overlap in key range.
///
/// Merges the per-level file lists through a min-heap keyed by smallest
/// key. Every L0 input is seeded individually (L0 files are unordered
/// between each other); deeper levels are already sorted, so only their
/// first file is seeded and successors follow as files are drained.
pub(crate) fn nonoverlapping(descriptor: &Descriptor) -> bool {
    let mut heap = MinMaxHeap::new();

    for (group_index, group) in descriptor.inputs.iter().enumerate() {
        if group.files.is_empty() {
            continue;
        }

        if group.level == 0 {
            for (index, file) in group.files.iter().enumerate() {
                heap.push(HeapEntry {
                    file: file.clone(),
                    group: group_index,
                    index,
                });
            }
        } else {
            heap.push(HeapEntry {
                file: group.files[0].clone(),
                group: group_index,
                index: 0,
            });
        }
    }

    if heap.len() <= 1 {
        return true;
    }

    let mut prev: Option<Arc<FileMeta>> = None;

    while let Some(entry) = heap.pop_min() {
        if let Some(prev) = &prev {
            if prev.largest >= entry.file.smallest {
                return false;
            }
        }

        let group = &descriptor.inputs[entry.group];
        if group.level != 0 {
            if let Some(next) = group.files.get(entry.index + 1) {
                heap.push(HeapEntry {
                    file: next.clone(),
                    group: entry.group,
                    index: entry.index + 1,
                });
            }
        }

        prev = Some(entry.file);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::nonoverlapping;
    use crate::{
        compaction::{Descriptor, InputGroup, Reason},
        key::InternalKey,
        meta::{CompressionType, FileMeta, FileNum, Purpose},
    };
    use std::sync::Arc;
    use test_log::test;

    fn fixture_file(num: FileNum, key_range: (&[u8], &[u8])) -> Arc<FileMeta> {
        Arc::new(FileMeta {
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
        })
    }

    fn fixture_descriptor(inputs: Vec<InputGroup>) -> Descriptor {
        Descriptor {
            inputs,
            output_level: 1,
            output_path_id: 0,
            target_file_size: 64 * 1_024 * 1_024,
            max_compaction_bytes: u64::MAX,
            compression: CompressionType::Lz4,
            max_subcompactions: 1,
            manual: false,
            partial: false,
            purpose: Purpose::Essence,
            reason: Reason::SizeRatio,
            score: 0.0,
            input_ranges: Vec::new(),
            trivial_move: false,
        }
    }

    #[test]
    fn single_file_is_disjoint() {
        let descriptor = fixture_descriptor(vec![InputGroup {
            level: 0,
            files: vec![fixture_file(1, (b"a", b"z"))],
        }]);

        assert!(nonoverlapping(&descriptor));
    }

    #[test]
    fn disjoint_levels() {
        let descriptor = fixture_descriptor(vec![
            InputGroup {
                level: 1,
                files: vec![fixture_file(1, (b"a", b"c")), fixture_file(2, (b"d", b"f"))],
            },
            InputGroup {
                level: 2,
                files: vec![fixture_file(3, (b"g", b"k")), fixture_file(4, (b"l", b"z"))],
            },
        ]);

        assert!(nonoverlapping(&descriptor));
    }

    #[test]
    fn interleaved_but_disjoint() {
        let descriptor = fixture_descriptor(vec![
            InputGroup {
                level: 1,
                files: vec![fixture_file(1, (b"a", b"c")), fixture_file(2, (b"g", b"k"))],
            },
            InputGroup {
                level: 2,
                files: vec![fixture_file(3, (b"d", b"f")), fixture_file(4, (b"l", b"z"))],
            },
        ]);

        assert!(nonoverlapping(&descriptor));
    }

    #[test]
    fn overlapping_levels() {
        let descriptor = fixture_descriptor(vec![
            InputGroup {
                level: 1,
                files: vec![fixture_file(1, (b"a", b"h"))],
            },
            InputGroup {
                level: 2,
                files: vec![fixture_file(2, (b"d", b"f"))],
            },
        ]);

        assert!(!nonoverlapping(&descriptor));
    }

    #[test]
    fn overlapping_l0_files() {
        let descriptor = fixture_descriptor(vec![InputGroup {
            level: 0,
            files: vec![fixture_file(1, (b"a", b"m")), fixture_file(2, (b"k", b"z"))],
        }]);

        assert!(!nonoverlapping(&descriptor));
    }
}
