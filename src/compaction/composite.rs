//! Composite planner: split the map file with the worst read
//! amplification into sub-compaction ranges by reading its index.
//!
//! Three passes over the index elements, first hit wins:
//! link rewrites (elements fanning out into many small fragments),
//! an essence rewrite around the highest-priority elements, and a
//! sweep over every imperfect stretch. A level holding more than one
//! file gets its map rebuilt instead.

use super::{compression_for, Descriptor, InputGroup, Range, Reason};
use crate::{
    levels::Levels,
    meta::{FileMeta, FileNum, Purpose},
    options::Options,
    path::pick_path_id,
    run::SortedRun,
    table::{MapElement, TableCache},
    tracker::CompactionTracker,
};
use min_max_heap::MinMaxHeap;
use std::{collections::HashMap, sync::Arc};

struct FileUse {
    size: u64,
    used: u64,
}

struct RangeCandidate {
    priority: f64,
    index: usize,
}

impl PartialEq for RangeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for RangeCandidate {}

impl PartialOrd for RangeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Highest priority first; earlier elements win ties so repeated picks
// on the same snapshot stay deterministic
impl Ord for RangeCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then(other.index.cmp(&self.index))
    }
}

#[allow(clippy::too_many_lines)]
pub(crate) fn pick(
    name: &str,
    levels: &Levels,
    opts: &Options,
    runs: &[SortedRun],
    table: &TableCache,
    tracker: &CompactionTracker,
) -> Option<Descriptor> {
    if !levels.has_space_amplification() {
        return None;
    }

    // Choose the run with the worst read amplification, oldest first;
    // a multi-file level short-circuits into a map rebuild
    let mut chosen: Option<(u8, Arc<FileMeta>)> = None;
    let mut max_read_amp = 0;

    for run in runs.iter().rev() {
        if run.wait_reduce {
            continue;
        }

        let file = if run.level > 0 {
            if !levels.has_space_amplification_at(run.level) {
                continue;
            }

            let level_files = levels.level(run.level);
            if tracker.any_busy(level_files) {
                continue;
            }

            if level_files.len() > 1 {
                let files: Vec<_> = level_files.iter().cloned().collect();
                return Some(rebuild_map(opts, run.level, files));
            }

            level_files.first()?.clone()
        } else {
            let file = run.file.as_ref()?;
            if tracker.is_busy(file.num) || file.purpose != Purpose::Map {
                continue;
            }
            file.clone()
        };

        match table.properties(&file) {
            Ok(props) => {
                if props.read_amp >= max_read_amp {
                    max_read_amp = props.read_amp;
                    chosen = Some((run.level, file));
                }
            }
            Err(e) => {
                log::debug!("{name}: table properties unavailable for {file:?}: {e}, skipping");
            }
        }
    }

    let (level, file) = chosen?;

    let elements = match table.map_elements(&file) {
        Ok(elements) => elements,
        Err(e) => {
            log::warn!("{name}: reading map file {file:?} failed: {e}");
            return None;
        }
    };

    let perfect: Vec<bool> = elements
        .iter()
        .map(|element| is_perfect(levels, element))
        .collect();

    let file_largest = file.largest.user_key.clone();
    let set_include_limit = |range: &mut Range| {
        debug_assert!(range.limit <= file_largest);
        range.limit = file_largest.clone();
        range.include_limit = true;
    };

    // Link pass: elements that fan out into many small fragments are
    // rewritten as link files; consecutive ones coalesce into a range
    let mut file_used: HashMap<FileNum, FileUse> = HashMap::new();
    let mut ranges: Vec<Range> = Vec::new();
    let mut current: Option<Range> = None;

    for (i, element) in elements.iter().enumerate() {
        if perfect[i] {
            continue;
        }

        let mut sum = 0;
        let mut max = 0;

        for link in &element.links {
            sum += link.size;
            max = max.max(link.size);

            file_used
                .entry(link.num)
                .and_modify(|usage| usage.used += link.size)
                .or_insert_with(|| FileUse {
                    size: file_size_of(levels, link.num),
                    used: link.size,
                });
        }

        if element.links.len() > 2 && (sum - max) * 2 < max {
            match &mut current {
                Some(range) => range.limit = element.largest.user_key.clone(),
                None => {
                    current = Some(Range {
                        start: element.smallest.user_key.clone(),
                        limit: element.largest.user_key.clone(),
                        include_start: true,
                        include_limit: false,
                    });
                }
            }
        } else if let Some(mut range) = current.take() {
            // Closing on an element that begins at the range's limit
            // would split a user key across ranges; drop the range
            if element.smallest.user_key != range.limit {
                range.limit = element.smallest.user_key.clone();
                ranges.push(range);
                if ranges.len() >= opts.max_subcompactions {
                    break;
                }
            }
        }
    }

    if let Some(mut range) = current.take() {
        set_include_limit(&mut range);
        ranges.push(range);
    }

    if !ranges.is_empty() {
        return Some(finish(
            opts,
            level,
            vec![file],
            Purpose::Link,
            opts.max_subcompactions,
            ranges,
        ));
    }

    // Essence pass: grow ranges around the elements with the most
    // links and the most dead bytes behind them
    let max_range_bytes = 2 * opts.target_file_size;
    let mut heap = MinMaxHeap::new();

    for (i, element) in elements.iter().enumerate() {
        let mut priority = element.links.len() as f64;
        let mut size = 0;
        let mut used = 0;

        for link in &element.links {
            // Links that never showed up above belong to perfect
            // elements; those have nothing to reclaim
            let Some(usage) = file_used.get(&link.num) else {
                priority = -1.0;
                break;
            };
            size += usage.size;
            used += usage.used;
        }

        if priority < 0.0 || size == 0 {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let dead_ratio = (size - used.min(size)) as f64 / size as f64;
        priority += 2.0 * dead_ratio;

        heap.push(RangeCandidate { priority, index: i });
    }

    let mut covered = vec![false; elements.len()];

    while let Some(candidate) = heap.pop_max() {
        let i = candidate.index;
        if covered[i] {
            continue;
        }

        let element = &elements[i];
        let mut range = Range {
            start: element.smallest.user_key.clone(),
            limit: element.largest.user_key.clone(),
            include_start: true,
            include_limit: false,
        };
        let mut sum = element.link_size();
        covered[i] = true;

        // Walk forward collecting contiguous imperfect elements
        let mut j = i + 1;
        loop {
            if sum >= max_range_bytes {
                break;
            }
            let Some(next) = elements.get(j) else {
                set_include_limit(&mut range);
                break;
            };
            if covered[j] || (perfect[j] && next.smallest.user_key != range.limit) {
                range.limit = next.smallest.user_key.clone();
                break;
            }
            range.limit = next.largest.user_key.clone();
            sum += next.link_size();
            covered[j] = true;
            j += 1;
        }

        // Then backward
        if sum < max_range_bytes {
            let mut k = i;
            while k > 0 {
                k -= 1;
                if covered[k] || perfect[k] {
                    break;
                }
                range.start = elements[k].smallest.user_key.clone();
                sum += elements[k].link_size();
                covered[k] = true;
                if sum >= max_range_bytes {
                    break;
                }
            }
        }

        ranges.push(range);
        if ranges.len() >= opts.max_subcompactions {
            break;
        }
    }

    if !ranges.is_empty() {
        ranges.sort_by(|a, b| {
            a.limit
                .cmp(&b.limit)
                .then(a.include_limit.cmp(&b.include_limit))
                .then(a.start.cmp(&b.start))
                .then(b.include_start.cmp(&a.include_start))
        });

        return Some(finish(
            opts,
            level,
            vec![file],
            Purpose::Essence,
            opts.max_subcompactions,
            ranges,
        ));
    }

    // Final sweep: cover every contiguous stretch of imperfect elements
    let mut current: Option<Range> = None;

    for (i, element) in elements.iter().enumerate() {
        let closes = current
            .as_ref()
            .is_some_and(|range| perfect[i] && element.smallest.user_key != range.limit);

        if closes {
            if let Some(mut range) = current.take() {
                range.limit = element.smallest.user_key.clone();
                ranges.push(range);
                if ranges.len() >= opts.max_subcompactions {
                    break;
                }
            }
        } else if let Some(range) = &mut current {
            range.limit = element.largest.user_key.clone();
        } else if !perfect[i] {
            current = Some(Range {
                start: element.smallest.user_key.clone(),
                limit: element.largest.user_key.clone(),
                include_start: true,
                include_limit: false,
            });
        }
    }

    if let Some(mut range) = current.take() {
        set_include_limit(&mut range);
        ranges.push(range);
    }

    if !ranges.is_empty() {
        return Some(finish(
            opts,
            level,
            vec![file],
            Purpose::Essence,
            opts.max_subcompactions,
            ranges,
        ));
    }

    // Everything resolves cleanly; rebuilding the map at least drops
    // the stale index entries, except on L0 where there is no index
    if level != 0 {
        return Some(rebuild_map(opts, level, vec![file]));
    }

    None
}

/// A map element is perfect if it resolves 1:1 to a single essence
/// file covering exactly the element's range.
fn is_perfect(levels: &Levels, element: &MapElement) -> bool {
    if element.links.len() != 1 {
        return false;
    }

    let num = element.links[0].num;
    let Some(file) = levels.lookup(num) else {
        log::warn!("linked file {num} not found in snapshot");
        return false;
    };

    if file.purpose != Purpose::Essence {
        return false;
    }

    element.include_smallest
        && element.include_largest
        && element.smallest == file.smallest
        && element.largest == file.largest
}

fn file_size_of(levels: &Levels, num: FileNum) -> u64 {
    match levels.lookup(num) {
        Some(file) => levels.transitive_size(file),
        None => {
            log::warn!("linked file {num} not found in snapshot, counting as reclaimed");
            0
        }
    }
}

fn rebuild_map(opts: &Options, level: u8, files: Vec<Arc<FileMeta>>) -> Descriptor {
    finish(opts, level, files, Purpose::Map, 1, Vec::new())
}

fn finish(
    opts: &Options,
    level: u8,
    files: Vec<Arc<FileMeta>>,
    purpose: Purpose,
    max_subcompactions: usize,
    mut ranges: Vec<Range>,
) -> Descriptor {
    // Neighboring ranges sharing a bound collapse into one
    if ranges.len() > 1 {
        ranges.dedup_by(|cur, prev| {
            if cur.start == prev.start || cur.limit == prev.limit {
                prev.limit = cur.limit.clone();
                prev.include_limit = cur.include_limit;
                true
            } else {
                false
            }
        });
    }

    debug_assert!(ranges.windows(2).all(|w| w[0].start <= w[1].start));
    debug_assert!(ranges.windows(2).all(|w| w[0].limit <= w[1].limit));
    debug_assert!(ranges.iter().all(|r| r.start <= r.limit));

    let estimated_total_size: u64 = files.iter().map(|f| f.file_size).sum();
    let output_path_id = pick_path_id(opts, estimated_total_size);

    Descriptor {
        inputs: vec![InputGroup { level, files }],
        output_level: level,
        output_path_id,
        target_file_size: opts.target_file_size,
        max_compaction_bytes: u64::MAX,
        compression: compression_for(opts, true),
        max_subcompactions,
        manual: false,
        partial: true,
        purpose,
        reason: Reason::CompositeAmplification,
        score: 0.0,
        input_ranges: ranges,
        trivial_move: false,
    }
}
