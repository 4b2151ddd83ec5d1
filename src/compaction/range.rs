//! Manual range planner: split a level into sub-compaction ranges
//! covering the map elements that touch a given set of files.

use super::{compression_for, Descriptor, InputGroup, ManualChoice, Range, Reason};
use crate::{
    levels::Levels,
    meta::{FileNum, Purpose},
    options::Options,
    path::pick_path_id,
    table::{MapElement, TableCache},
    tracker::CompactionTracker,
};
use std::{collections::HashSet, sync::Arc};

#[allow(clippy::too_many_lines, clippy::too_many_arguments)]
pub(crate) fn pick(
    name: &str,
    levels: &Levels,
    opts: &Options,
    level: u8,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
    files_being_compact: &HashSet<FileNum>,
    table: Option<&TableCache>,
    tracker: &CompactionTracker,
) -> ManualChoice {
    let level_files = levels.level(level);

    if files_being_compact.is_empty() || level_files.is_empty() {
        return ManualChoice::Nothing;
    }

    if tracker.any_busy(level_files) {
        return ManualChoice::Conflict;
    }

    let inputs = InputGroup {
        level,
        files: level_files.iter().cloned().collect(),
    };

    // L0 files overlap each other, so there is no single index to
    // split by; fold them into one map first
    if level == 0 && level_files.len() > 1 {
        let output_path_id = pick_path_id(opts, 1 << 20);

        return ManualChoice::Compact(Arc::new(Descriptor {
            inputs: vec![inputs],
            output_level: level,
            output_path_id,
            target_file_size: opts.target_file_size,
            max_compaction_bytes: u64::MAX,
            compression: compression_for(opts, true),
            max_subcompactions: 1,
            manual: true,
            partial: false,
            purpose: Purpose::Map,
            reason: Reason::Manual,
            score: 0.0,
            input_ranges: Vec::new(),
            trivial_move: false,
        }));
    }

    let Some(table) = table else {
        log::warn!("{name}: no table cache configured, cannot plan a range compaction");
        return ManualChoice::Nothing;
    };

    // Levels below L0 are key-disjoint and sorted, so chaining the
    // per-file indexes yields one stream in key order
    let mut elements = Vec::new();
    for file in level_files.iter() {
        match table.map_elements(file) {
            Ok(mut file_elements) => elements.append(&mut file_elements),
            Err(e) => {
                log::warn!("{name}: reading level files failed: {e}");
                return ManualChoice::Nothing;
            }
        }
    }

    let needs_compact = |element: &MapElement| {
        if let Some(begin) = begin {
            if &*element.largest.user_key < begin {
                return false;
            }
        }
        if let Some(end) = end {
            if &*element.smallest.user_key > end {
                return false;
            }
        }

        element.links.iter().any(|link| {
            if files_being_compact.contains(&link.num) {
                return true;
            }
            match levels.lookup(link.num) {
                Some(file) => file
                    .dependents
                    .iter()
                    .any(|num| files_being_compact.contains(num)),
                None => {
                    log::warn!("linked file {} not found in snapshot", link.num);
                    false
                }
            }
        })
    };

    let mut input_range: Vec<Range> = Vec::new();
    let mut current: Option<Range> = None;
    let mut subcompact_size: u64 = 0;
    let mut estimated_total_size: u64 = 0;

    for element in &elements {
        if let Some(range) = &mut current {
            if needs_compact(element) {
                if subcompact_size < opts.max_compaction_bytes {
                    subcompact_size += element.link_size();
                    range.limit = element.largest.user_key.clone();
                } else {
                    // Budget exhausted: split here and open the next range
                    range.limit = element.smallest.user_key.clone();
                    estimated_total_size += subcompact_size;

                    if let Some(range) = current.take() {
                        input_range.push(range);
                    }
                    if input_range.len() >= opts.max_subcompactions {
                        break;
                    }

                    subcompact_size = element.link_size();
                    current = Some(Range {
                        start: element.smallest.user_key.clone(),
                        limit: element.largest.user_key.clone(),
                        include_start: true,
                        include_limit: false,
                    });
                }
            } else {
                range.limit = element.smallest.user_key.clone();
                estimated_total_size += subcompact_size;
                subcompact_size = 0;

                if let Some(range) = current.take() {
                    input_range.push(range);
                }
                if input_range.len() >= opts.max_subcompactions {
                    break;
                }
            }
        } else {
            if !needs_compact(element) {
                continue;
            }

            subcompact_size += element.link_size();
            current = Some(Range {
                start: element.smallest.user_key.clone(),
                limit: element.largest.user_key.clone(),
                include_start: true,
                include_limit: false,
            });
        }
    }

    if let Some(mut range) = current.take() {
        // The trailing range swallows the rest of the level
        if let Some(level_end) = levels.max_user_key_of_level(level) {
            debug_assert!(range.limit <= level_end);
            range.limit = level_end;
        }
        range.include_limit = true;
        estimated_total_size += subcompact_size;
        input_range.push(range);
    }

    if input_range.is_empty() {
        return ManualChoice::Nothing;
    }

    let output_path_id = pick_path_id(opts, estimated_total_size);

    ManualChoice::Compact(Arc::new(Descriptor {
        inputs: vec![inputs],
        output_level: level,
        output_path_id,
        target_file_size: opts.target_file_size,
        max_compaction_bytes: u64::MAX,
        compression: compression_for(opts, true),
        max_subcompactions: opts.max_subcompactions,
        manual: true,
        partial: true,
        purpose: Purpose::Essence,
        reason: Reason::Manual,
        score: 0.0,
        input_ranges: input_range,
        trivial_move: false,
    }))
}

#[cfg(test)]
mod tests {
    use super::pick;
    use crate::{
        compaction::ManualChoice,
        key::InternalKey,
        meta::{FileMeta, FileNum, Purpose},
        options::Options,
        serde::Serializable,
        table::{LinkedFile, MapElement, MapEntryIter, TableCache, TableProperties, TableSource},
        tracker::CompactionTracker,
        Levels,
    };
    use std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    };
    use test_log::test;

    struct MemorySource {
        elements: HashMap<FileNum, Vec<MapElement>>,
    }

    impl TableSource for MemorySource {
        fn properties(&self, _: &FileMeta) -> crate::Result<TableProperties> {
            Ok(TableProperties::default())
        }

        fn map_entries(&self, file: &FileMeta) -> crate::Result<MapEntryIter<'_>> {
            let elements = self.elements.get(&file.num).cloned().unwrap_or_default();

            let entries: Vec<crate::Result<Vec<u8>>> = elements
                .iter()
                .map(|element| {
                    let mut bytes = Vec::new();
                    element.serialize(&mut bytes)?;
                    Ok(bytes)
                })
                .collect();

            Ok(Box::new(entries.into_iter()))
        }
    }

    fn fixture_file(num: FileNum, key_range: (&[u8], &[u8]), purpose: Purpose) -> Arc<FileMeta> {
        Arc::new(FileMeta {
            num,
            path_id: 0,
            file_size: 1_024,
            compensated_size: 1_024,
            smallest: InternalKey::new(key_range.0, 1),
            largest: InternalKey::new(key_range.1, 1),
            seqnos: (1, 1),
            purpose,
            dependents: Vec::new(),
            marked_for_compaction: false,
        })
    }

    fn element(key_range: (&[u8], &[u8]), links: Vec<(FileNum, u64)>) -> MapElement {
        MapElement {
            smallest: InternalKey::new(key_range.0, 1),
            largest: InternalKey::new(key_range.1, 1),
            include_smallest: true,
            include_largest: true,
            links: links
                .into_iter()
                .map(|(num, size)| LinkedFile { num, size })
                .collect(),
        }
    }

    #[test]
    fn empty_target_set_is_nothing() {
        let mut levels = Levels::new(4);
        levels.insert_into_level(1, fixture_file(1, (b"a", b"z"), Purpose::Map));

        let choice = pick(
            "default",
            &levels,
            &Options::default(),
            1,
            None,
            None,
            &HashSet::new(),
            None,
            &CompactionTracker::new(),
        );

        assert_eq!(ManualChoice::Nothing, choice);
    }

    #[test]
    fn busy_level_conflicts() {
        let mut levels = Levels::new(4);
        let file = fixture_file(1, (b"a", b"z"), Purpose::Map);
        levels.insert_into_level(1, file.clone());

        let mut tracker = CompactionTracker::new();
        tracker.register(&Arc::new(crate::compaction::Descriptor {
            inputs: vec![crate::compaction::InputGroup {
                level: 1,
                files: vec![file],
            }],
            output_level: 1,
            output_path_id: 0,
            target_file_size: 1,
            max_compaction_bytes: u64::MAX,
            compression: crate::meta::CompressionType::None,
            max_subcompactions: 1,
            manual: false,
            partial: false,
            purpose: Purpose::Map,
            reason: crate::compaction::Reason::SortedRunNum,
            score: 0.0,
            input_ranges: Vec::new(),
            trivial_move: false,
        }));

        let choice = pick(
            "default",
            &levels,
            &Options::default(),
            1,
            None,
            None,
            &HashSet::from([7]),
            None,
            &tracker,
        );

        assert!(choice.is_conflict());
    }

    #[test]
    fn multi_file_l0_becomes_a_map_rebuild() {
        let mut levels = Levels::new(4);
        levels.insert_into_level(0, fixture_file(2, (b"a", b"m"), Purpose::Essence));
        levels.insert_into_level(0, fixture_file(1, (b"k", b"z"), Purpose::Essence));

        let choice = pick(
            "default",
            &levels,
            &Options::default(),
            0,
            None,
            None,
            &HashSet::from([1]),
            None,
            &CompactionTracker::new(),
        );

        let ManualChoice::Compact(descriptor) = choice else {
            panic!("expected a pick");
        };

        assert_eq!(Purpose::Map, descriptor.purpose);
        assert_eq!(0, descriptor.output_level);
        assert_eq!(2, descriptor.input_files().count());
    }

    #[test]
    fn splits_ranges_over_the_hit_elements() {
        let mut levels = Levels::new(4);

        let map = fixture_file(1, (b"a", b"z"), Purpose::Map);
        levels.insert_into_level(1, map);

        levels.insert_dependent(fixture_file(10, (b"a", b"f"), Purpose::Essence));
        levels.insert_dependent(fixture_file(11, (b"g", b"m"), Purpose::Essence));
        levels.insert_dependent(fixture_file(12, (b"n", b"z"), Purpose::Essence));

        let elements = vec![
            element((b"a", b"f"), vec![(10, 100)]),
            element((b"g", b"m"), vec![(11, 100)]),
            element((b"n", b"z"), vec![(12, 100)]),
        ];

        let table = TableCache::new(
            Arc::new(MemorySource {
                elements: HashMap::from([(1, elements)]),
            }),
            100,
        );

        // Only file 10 and 12 are targeted; the middle element splits
        let choice = pick(
            "default",
            &levels,
            &Options::default(),
            1,
            None,
            None,
            &HashSet::from([10, 12]),
            Some(&table),
            &CompactionTracker::new(),
        );

        let ManualChoice::Compact(descriptor) = choice else {
            panic!("expected a pick");
        };

        assert_eq!(Purpose::Essence, descriptor.purpose);
        assert!(descriptor.partial);
        assert!(descriptor.manual);
        assert_eq!(2, descriptor.input_ranges.len());

        let first = &descriptor.input_ranges[0];
        assert_eq!(&b"a"[..], &*first.start);
        assert_eq!(&b"g"[..], &*first.limit);
        assert!(!first.include_limit);

        let last = &descriptor.input_ranges[1];
        assert_eq!(&b"n"[..], &*last.start);
        // The trailing range swallows the rest of the level
        assert_eq!(&b"z"[..], &*last.limit);
        assert!(last.include_limit);
    }

    #[test]
    fn range_bounds_filter_elements() {
        let mut levels = Levels::new(4);

        let map = fixture_file(1, (b"a", b"z"), Purpose::Map);
        levels.insert_into_level(1, map);

        levels.insert_dependent(fixture_file(10, (b"a", b"f"), Purpose::Essence));
        levels.insert_dependent(fixture_file(11, (b"g", b"m"), Purpose::Essence));

        let elements = vec![
            element((b"a", b"f"), vec![(10, 100)]),
            element((b"g", b"m"), vec![(11, 100)]),
        ];

        let table = TableCache::new(
            Arc::new(MemorySource {
                elements: HashMap::from([(1, elements)]),
            }),
            100,
        );

        // Both files are targeted, but the manual range ends before "g"
        let choice = pick(
            "default",
            &levels,
            &Options::default(),
            1,
            None,
            Some(b"f"),
            &HashSet::from([10, 11]),
            Some(&table),
            &CompactionTracker::new(),
        );

        let ManualChoice::Compact(descriptor) = choice else {
            panic!("expected a pick");
        };

        assert_eq!(1, descriptor.input_ranges.len());
        assert_eq!(&b"a"[..], &*descriptor.input_ranges[0].start);
    }
}
