use crate::logger;
use crate::util::comparator::Comparator;
use log::LevelFilter;

/// Options controlling level geometry and compaction scheduling.
///
/// The thresholds below shape the whole tree, so they are fixed at open time
/// and shared (behind an `Arc`) by every `Version` derived from them.
#[derive(Clone)]
pub struct Options<C: Comparator> {
    /// The comparator defining the order of user keys.
    pub comparator: C,

    /// Number of levels in the tree.
    pub max_levels: usize,

    /// Number of level-0 files that triggers a size compaction. Level 0 is
    /// bounded by file count rather than bytes: small write buffers would
    /// otherwise defer useful compactions, and every read fans out to all
    /// level-0 files.
    pub l0_compaction_threshold: usize,

    /// Highest level a flushed memtable may be pushed down to when it does
    /// not overlap anything above it.
    pub max_mem_compact_level: usize,

    /// Target size of a compaction output file. The grandparent-overlap and
    /// expansion limits derive from this.
    pub max_file_size: u64,

    /// Reuse the existing MANIFEST on recovery instead of rewriting a fresh
    /// snapshot, when it is still reasonably small.
    pub reuse_logs: bool,

    /// Ask the table cache to verify checksums on compaction reads.
    pub paranoid_checks: bool,

    /// Drain for crate logging. `None` builds a default terminal drain.
    pub logger: Option<slog::Logger>,

    /// Severity below which log statements are discarded.
    pub logger_level: LevelFilter,
}

impl<C: Comparator> Default for Options<C> {
    fn default() -> Self {
        Self {
            comparator: C::default(),
            max_levels: 7,
            l0_compaction_threshold: 4,
            max_mem_compact_level: 2,
            max_file_size: 2 * 1024 * 1024,
            reuse_logs: false,
            paranoid_checks: false,
            logger: None,
            logger_level: LevelFilter::Info,
        }
    }
}

impl<C: Comparator> Options<C> {
    /// Maximum total bytes for `level` before it scores a size compaction.
    /// 10 MiB at level 1, multiplied by 10 per level below.
    ///
    /// The result for level 0 is not used: level 0 is scored by file count.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut result: u64 = 10 * 1024 * 1024;
        let mut l = level;
        while l > 1 {
            result *= 10;
            l -= 1;
        }
        result
    }

    /// Maximum bytes of grandparent overlap before an output file is cut, and
    /// before a trivial move is rejected.
    #[inline]
    pub fn max_grandparent_overlap_bytes(&self) -> u64 {
        10 * self.max_file_size
    }

    /// Cap on `bytes(expanded inputs) + bytes(parent inputs)` when growing a
    /// compaction's base level input set.
    #[inline]
    pub fn expanded_compaction_byte_size_limit(&self) -> u64 {
        25 * self.max_file_size
    }

    /// Installs the configured logger as the global `log` backend.
    pub fn apply_logger(&self) {
        logger::init(self.logger.clone(), self.logger_level);
    }
}

/// Read-time flags handed through to the table cache.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
    /// Verify block checksums while reading.
    pub verify_checksums: bool,
    /// Whether data read for this operation should populate the block cache.
    pub fill_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::comparator::BytewiseComparator;

    #[test]
    fn test_max_bytes_for_level() {
        let opts = Options::<BytewiseComparator>::default();
        let mib = 1024 * 1024;
        assert_eq!(opts.max_bytes_for_level(1), 10 * mib);
        assert_eq!(opts.max_bytes_for_level(2), 100 * mib);
        assert_eq!(opts.max_bytes_for_level(3), 1000 * mib);
    }

    #[test]
    fn test_derived_limits() {
        let opts = Options::<BytewiseComparator>::default();
        assert_eq!(opts.max_grandparent_overlap_bytes(), 20 * 1024 * 1024);
        assert_eq!(opts.expanded_compaction_byte_size_limit(), 50 * 1024 * 1024);
    }
}
