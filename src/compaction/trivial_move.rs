//! Trivial-move policy: relocate whole runs into an empty deeper level
//! by relinking files instead of merging their keys.

use super::{Descriptor, InputGroup, Reason};
use crate::{
    levels::Levels, meta::CompressionType, meta::Purpose, options::Options,
    tracker::CompactionTracker,
};

pub(crate) fn pick(
    levels: &Levels,
    opts: &Options,
    tracker: &CompactionTracker,
) -> Option<Descriptor> {
    if !opts.universal.allow_trivial_move {
        return None;
    }

    let mut output_level = i32::from(levels.last_level_index());

    // The last level is reserved for the files ingested behind
    if opts.allow_ingest_behind {
        output_level -= 1;
    }

    let mut start_level;

    loop {
        // Find the deepest empty level that no live job writes into
        while output_level >= 1 {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let l = output_level as u8;

            if levels.level(l).is_empty() && !tracker.is_output_level(l) {
                break;
            }
            output_level -= 1;
        }
        if output_level < 1 {
            return None;
        }

        // Walk back up to the shallowest non-empty level below another job
        start_level = output_level - 1;
        let mut found_start_level = false;

        while start_level > 0 {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let l = start_level as u8;

            if tracker.is_output_level(l) {
                break;
            }
            if !levels.level(l).is_empty() {
                found_start_level = true;
                break;
            }
            start_level -= 1;
        }

        if start_level == 0 {
            // Will move the oldest L0 file
            break;
        }

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let l = start_level as u8;

        if found_start_level && !tracker.any_busy(levels.level(l)) {
            break;
        }

        output_level = start_level - 1;
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let output_level = output_level as u8;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let start_level = start_level as u8;

    let (files, output_path_id) = if start_level == 0 {
        let level0 = levels.level(0);

        // The oldest L0 file sits at the back
        let file = level0.last()?;
        if tracker.is_busy(file.num) {
            return None;
        }

        (vec![file.clone()], file.path_id)
    } else {
        let files: Vec<_> = levels.level(start_level).iter().cloned().collect();
        let path_id = files.first()?.path_id;
        (files, path_id)
    };

    debug_assert!(!tracker.any_busy(&files));

    Some(Descriptor {
        inputs: vec![InputGroup {
            level: start_level,
            files,
        }],
        output_level,
        output_path_id,
        target_file_size: opts.target_file_size,
        max_compaction_bytes: u64::MAX,
        // Nothing is rewritten, so nothing is compressed
        compression: CompressionType::None,
        max_subcompactions: 1,
        manual: false,
        partial: false,
        purpose: Purpose::Essence,
        reason: Reason::TrivialMove,
        score: 0.0,
        input_ranges: Vec::new(),
        trivial_move: false,
    })
}
