use crate::options::Options;
use std::path::PathBuf;

/// One storage path compaction outputs may be placed in
///
/// Paths are ordered fastest first; each carries a capacity target
/// that the picker tries not to exceed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoragePath {
    /// Folder path
    pub path: PathBuf,

    /// Capacity target in bytes
    pub target_size: u64,
}

impl StoragePath {
    /// Creates a new storage path with a capacity target.
    pub fn new<P: Into<PathBuf>>(path: P, target_size: u64) -> Self {
        Self {
            path: path.into(),
            target_size,
        }
    }
}

/// Selects the storage path for a projected output of `file_size` bytes.
///
/// Two conditions need to be satisfied: the target path must be able to
/// hold the file, and the capacity left in this and the previous paths
/// must cover the projected geometric growth of future compactions,
/// estimated from the size ratio. That way the fast paths keep room for
/// the files later compactions will produce.
// NOTE: There are never that many paths
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn pick_path_id(opts: &Options, file_size: u64) -> u32 {
    let ratio = u64::from(opts.universal.size_ratio);
    let future_size = file_size.saturating_mul(100u64.saturating_sub(ratio)) / 100;

    let mut accumulated: u64 = 0;
    let mut p = 0;

    debug_assert!(!opts.paths.is_empty());

    while p + 1 < opts.paths.len() {
        let target_size = opts.paths[p].target_size;

        if target_size > file_size && accumulated + (target_size - file_size) > future_size {
            break;
        }

        accumulated = accumulated.saturating_add(target_size);
        p += 1;
    }

    p as u32
}

#[cfg(test)]
mod tests {
    use super::{pick_path_id, StoragePath};
    use crate::options::Options;
    use test_log::test;

    fn fixture_options(targets: &[u64]) -> Options {
        Options {
            paths: targets
                .iter()
                .map(|size| StoragePath::new(".", *size))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn single_path() {
        let opts = fixture_options(&[u64::MAX]);
        assert_eq!(0, pick_path_id(&opts, 500));
    }

    #[test]
    fn overflows_into_later_paths() {
        let opts = fixture_options(&[100, 1_000, u64::MAX]);

        assert_eq!(0, pick_path_id(&opts, 10));
        assert_eq!(1, pick_path_id(&opts, 150));
        assert_eq!(2, pick_path_id(&opts, 5_000));
    }

    #[test]
    fn is_monotone() {
        let opts = fixture_options(&[100, 1_000, 10_000, u64::MAX]);

        let mut prev = 0;
        for size in (0..20_000).step_by(77) {
            let p = pick_path_id(&opts, size);
            assert!(p >= prev, "growing size selected an earlier path");
            prev = p;
        }
    }
}
