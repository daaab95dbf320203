use crate::db::format::{InternalKey, InternalKeyComparator};
use crate::iterator::{ConcatenateIterator, Iterator, MergingIterator};
use crate::options::{Options, ReadOptions};
use crate::table_cache::TableCache;
use crate::util::comparator::Comparator;
use crate::version::version_edit::{FileMetaData, VersionEdit};
use crate::version::version_set::{total_file_size, FileIterFactory};
use crate::version::{LevelFileNumIterator, Version};
use crate::Result;
use crossbeam_channel::Sender;
use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;

/// A user-requested compaction of a key range at one level.
#[derive(Clone)]
pub struct ManualCompaction {
    pub level: usize,
    /// Signalled when the compaction finishes or fails.
    pub done: Sender<Result<()>>,
    /// `None` means the start of the key space.
    pub begin: Option<InternalKey>,
    /// `None` means the end of the key space.
    pub end: Option<InternalKey>,
}

/// The files feeding one compaction. Both lists are sorted by key range.
#[derive(Default)]
pub struct CompactionInputs {
    /// Files at the compaction's own level.
    pub base: Vec<Arc<FileMetaData>>,
    /// Overlapping files at the next level.
    pub parent: Vec<Arc<FileMetaData>>,
}

impl CompactionInputs {
    fn iter_all(&self) -> impl std::iter::Iterator<Item = &Arc<FileMetaData>> {
        self.base.iter().chain(self.parent.iter())
    }

    #[inline]
    pub fn desc_base_files(&self) -> String {
        self.base
            .iter()
            .map(|f| f.number.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    #[inline]
    pub fn desc_parent_files(&self) -> String {
        self.parent
            .iter()
            .map(|f| f.number.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionReason {
    /// A level outgrew its size (or, for level 0, file-count) budget.
    MaxSize,
    /// A file exhausted its seek budget.
    SeekLimit,
    /// Requested through `compact_range`.
    Manual,
}

/// A planned compaction: its input files, the edit it will install, and the
/// streaming state the executor consults while merging.
pub struct Compaction<C: Comparator> {
    options: Arc<Options<C>>,
    pub reason: CompactionReason,
    /// The level being compacted; outputs land at `level + 1`.
    pub level: usize,
    /// The version the inputs were planned against. Holding it pins every
    /// input file until the compaction is done.
    pub input_version: Option<Arc<Version<C>>>,
    /// Accumulates the result: input deletions, output additions, and the
    /// advanced compaction cursor.
    pub edit: VersionEdit,
    pub inputs: CompactionInputs,
    /// Cut an output table once it reaches this size.
    pub max_output_file_size: u64,

    /// Files at `level + 2` overlapping the compaction's range.
    pub grand_parents: Vec<Arc<FileMetaData>>,
    // Streaming cursor into `grand_parents` for `should_stop_before`.
    grand_parent_index: usize,
    // False until the first key of the compaction has been seen.
    seen_key: bool,
    // Grandparent bytes overlapped by the current output.
    overlapped_bytes: u64,
    // Per-level cursors for `is_base_level_for_key`; valid because keys are
    // consulted in non-decreasing user-key order.
    level_ptrs: Vec<usize>,

    /// Metadata of the tables written so far.
    pub outputs: Vec<FileMetaData>,
    /// Total bytes written to the outputs.
    pub total_bytes: u64,
}

impl<C: Comparator + 'static> Compaction<C> {
    pub fn new(options: Arc<Options<C>>, level: usize, reason: CompactionReason) -> Self {
        let max_levels = options.max_levels;
        let max_output_file_size = options.max_file_size;
        Self {
            options,
            reason,
            level,
            input_version: None,
            edit: VersionEdit::new(max_levels),
            inputs: CompactionInputs::default(),
            max_output_file_size,
            grand_parents: vec![],
            grand_parent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: vec![0; max_levels],
            outputs: vec![],
            total_bytes: 0,
        }
    }

    /// True when the compaction can be served by re-parenting its single
    /// input file instead of rewriting it: exactly one base file, no parent
    /// overlap, and little enough grandparent overlap that the moved file
    /// will not force an expensive merge later.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs.base.len() == 1
            && self.inputs.parent.is_empty()
            && total_file_size(&self.grand_parents) <= self.options.max_grandparent_overlap_bytes()
    }

    /// An iterator over all input tables in merged internal-key order.
    /// Level-0 inputs each get their own child (their ranges overlap); other
    /// levels are concatenated and opened lazily.
    pub fn new_input_iterator<T: TableCache + 'static>(
        &self,
        icmp: InternalKeyComparator<C>,
        table_cache: T,
    ) -> Result<MergingIterator<InternalKeyComparator<C>>> {
        let read_options = ReadOptions {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        let mut children: Vec<Box<dyn Iterator>> = vec![];
        if self.level == 0 {
            for file in self.inputs.base.iter() {
                debug!(
                    "compaction input: level {} table #{} [{:?} ... {:?}]",
                    self.level, file.number, file.smallest, file.largest
                );
                children.push(Box::new(table_cache.new_iter(
                    read_options,
                    file.number,
                    file.file_size,
                )?));
            }
        } else if !self.inputs.base.is_empty() {
            let index_iter = LevelFileNumIterator::new(icmp.clone(), self.inputs.base.clone());
            let factory = FileIterFactory::new(read_options, table_cache.clone());
            children.push(Box::new(ConcatenateIterator::new(index_iter, factory)));
        }
        if !self.inputs.parent.is_empty() {
            let index_iter = LevelFileNumIterator::new(icmp.clone(), self.inputs.parent.clone());
            let factory = FileIterFactory::new(read_options, table_cache);
            children.push(Box::new(ConcatenateIterator::new(index_iter, factory)));
        }
        Ok(MergingIterator::new(icmp, children))
    }

    /// Whether the current output should be cut before appending `ikey`.
    /// Tracks how many grandparent bytes the output has come to overlap;
    /// past the limit the answer is true once and the tally restarts.
    /// Bounding the overlap caps the cost of the *next* compaction, the one
    /// that merges the output into the grandparent level.
    pub fn should_stop_before(&mut self, ikey: &[u8], icmp: &InternalKeyComparator<C>) -> bool {
        // Skip grandparents entirely before `ikey`. The first key never
        // counts: an output must accept at least one key.
        while self.grand_parent_index < self.grand_parents.len()
            && icmp.compare(
                ikey,
                self.grand_parents[self.grand_parent_index].largest.data(),
            ) == CmpOrdering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grand_parents[self.grand_parent_index].file_size;
            }
            self.grand_parent_index += 1;
        }
        self.seen_key = true;
        if self.overlapped_bytes > self.options.max_grandparent_overlap_bytes() {
            self.overlapped_bytes = 0;
            return true;
        }
        false
    }

    /// True when `user_key` cannot exist at any level below the compaction's
    /// output level, which lets the executor drop tombstones for it.
    ///
    /// Must be called with non-decreasing user keys within one compaction:
    /// each higher level keeps a cursor that only moves forward, making the
    /// whole scan linear in the total file count.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let v = self
            .input_version
            .as_ref()
            .expect("[compaction] input version must be set")
            .clone();
        let ucmp = v.comparator().user_comparator;
        for level in self.level + 2..self.options.max_levels {
            let files = v.get_level_files(level);
            while self.level_ptrs[level] < files.len() {
                let f = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, f.largest.user_key()) != CmpOrdering::Greater {
                    if ucmp.compare(user_key, f.smallest.user_key()) != CmpOrdering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Folds the input deletions and the collected outputs into the edit.
    pub fn apply_to_edit(&mut self) {
        for f in self.inputs.base.iter() {
            self.edit.delete_file(self.level, f.number);
        }
        for f in self.inputs.parent.iter() {
            self.edit.delete_file(self.level + 1, f.number);
        }
        for output in self.outputs.drain(..) {
            self.edit
                .file_delta
                .new_files
                .push((self.level + 1, output));
        }
    }

    /// Total bytes this compaction reads.
    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.inputs.iter_all().fold(0, |sum, f| sum + f.file_size)
    }

    /// Total bytes written to output tables so far.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.outputs.iter().fold(0, |sum, f| sum + f.file_size)
    }
}

/// The minimal key range covering every entry in `files`. Level-0 files may
/// overlap, so all of them are inspected; deeper levels are sorted and
/// disjoint, making the ends enough.
///
/// # Panics
///
/// Panics when `files` is empty.
pub fn base_range<C: Comparator>(
    files: &[Arc<FileMetaData>],
    level: usize,
    icmp: &InternalKeyComparator<C>,
) -> (InternalKey, InternalKey) {
    assert!(
        !files.is_empty(),
        "[compaction] inputs should not be empty when computing the covered range"
    );
    if level == 0 {
        let mut smallest = &files[0].smallest;
        let mut largest = &files[0].largest;
        for f in files.iter().skip(1) {
            if icmp.compare(f.smallest.data(), smallest.data()) == CmpOrdering::Less {
                smallest = &f.smallest;
            }
            if icmp.compare(f.largest.data(), largest.data()) == CmpOrdering::Greater {
                largest = &f.largest;
            }
        }
        (smallest.clone(), largest.clone())
    } else {
        (
            files[0].smallest.clone(),
            files[files.len() - 1].largest.clone(),
        )
    }
}

/// The minimal key range covering `base_files` at `level` plus `next_files`
/// at the level below it.
pub fn total_range<C: Comparator>(
    base_files: &[Arc<FileMetaData>],
    next_files: &[Arc<FileMetaData>],
    level: usize,
    icmp: &InternalKeyComparator<C>,
) -> (InternalKey, InternalKey) {
    let (mut smallest, mut largest) = base_range(base_files, level, icmp);
    if let (Some(first), Some(last)) = (next_files.first(), next_files.last()) {
        if icmp.compare(first.smallest.data(), smallest.data()) == CmpOrdering::Less {
            smallest = first.smallest.clone();
        }
        if icmp.compare(last.largest.data(), largest.data()) == CmpOrdering::Greater {
            largest = last.largest.clone();
        }
    }
    (smallest, largest)
}

/// Accounting for one finished compaction.
#[derive(Debug, Default)]
pub struct CompactionStats {
    /// Wall time the compaction took, in microseconds.
    pub micros: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::format::ValueType;
    use crate::util::comparator::BytewiseComparator;
    use crate::version::version_set::VersionBuilder;

    type Icmp = InternalKeyComparator<BytewiseComparator>;

    fn new_file(number: u64, smallest: &str, largest: &str, size: u64) -> Arc<FileMetaData> {
        let mut f = FileMetaData::default();
        f.number = number;
        f.file_size = size;
        f.smallest = InternalKey::new(smallest.as_bytes(), 100, ValueType::Value);
        f.largest = InternalKey::new(largest.as_bytes(), 1, ValueType::Value);
        Arc::new(f)
    }

    fn build_version(
        files: Vec<(usize, u64, &str, &str)>,
    ) -> Arc<Version<BytewiseComparator>> {
        let opts = Arc::new(Options::<BytewiseComparator>::default());
        let icmp = InternalKeyComparator::new(BytewiseComparator::default());
        let base = Version::new(opts.clone(), icmp.clone());
        let mut builder = VersionBuilder::new(opts.max_levels, &base);
        for (level, number, smallest, largest) in files {
            let mut f = FileMetaData::default();
            f.number = number;
            f.file_size = 1000;
            f.smallest = InternalKey::new(smallest.as_bytes(), 100, ValueType::Value);
            f.largest = InternalKey::new(largest.as_bytes(), 1, ValueType::Value);
            builder.add_file(level, f);
        }
        Arc::new(builder.apply_to_new(&icmp))
    }

    fn new_compaction(level: usize) -> Compaction<BytewiseComparator> {
        let opts = Arc::new(Options::<BytewiseComparator>::default());
        Compaction::new(opts, level, CompactionReason::MaxSize)
    }

    fn seek_key(key: &str) -> InternalKey {
        InternalKey::new(
            key.as_bytes(),
            crate::db::format::MAX_KEY_SEQUENCE,
            crate::db::format::VALUE_TYPE_FOR_SEEK,
        )
    }

    #[test]
    fn test_is_trivial_move() {
        let mut c = new_compaction(1);
        c.inputs.base.push(new_file(1, "a", "c", 1000));
        assert!(c.is_trivial_move());

        // Parent overlap disqualifies.
        c.inputs.parent.push(new_file(2, "b", "d", 1000));
        assert!(!c.is_trivial_move());
        c.inputs.parent.clear();

        // More than one base file disqualifies.
        c.inputs.base.push(new_file(3, "d", "e", 1000));
        assert!(!c.is_trivial_move());
        c.inputs.base.truncate(1);

        // Heavy grandparent overlap disqualifies.
        let limit = c.options.max_grandparent_overlap_bytes();
        c.grand_parents.push(new_file(4, "a", "b", limit));
        assert!(c.is_trivial_move());
        c.grand_parents.push(new_file(5, "c", "d", 1));
        assert!(!c.is_trivial_move());
    }

    #[test]
    fn test_should_stop_before() {
        let icmp = Icmp::default();
        let mut c = new_compaction(1);
        let unit = c.options.max_grandparent_overlap_bytes() / 4 * 3;
        // Two grandparents, each overlapping 3/4 of the limit.
        c.grand_parents.push(new_file(1, "b", "c", unit));
        c.grand_parents.push(new_file(2, "e", "f", unit));

        // First key never cuts, even past a grandparent.
        assert!(!c.should_stop_before(seek_key("a").data(), &icmp));
        // Skipping the first grandparent stays under the limit.
        assert!(!c.should_stop_before(seek_key("d").data(), &icmp));
        // Skipping the second crosses it: cut once, then reset.
        assert!(c.should_stop_before(seek_key("g").data(), &icmp));
        assert!(!c.should_stop_before(seek_key("h").data(), &icmp));
    }

    #[test]
    fn test_should_stop_before_ignores_preceding_files() {
        let icmp = Icmp::default();
        let mut c = new_compaction(1);
        let big = c.options.max_grandparent_overlap_bytes() * 2;
        c.grand_parents.push(new_file(1, "a", "b", big));
        // The first call skips the file before any key was seen, so its size
        // never counts.
        assert!(!c.should_stop_before(seek_key("z").data(), &icmp));
        assert!(!c.should_stop_before(seek_key("z1").data(), &icmp));
    }

    #[test]
    fn test_is_base_level_for_key() {
        let version = build_version(vec![
            (3, 7, "d", "f"),
            (3, 8, "k", "n"),
            (4, 9, "p", "r"),
        ]);
        let mut c = new_compaction(1);
        c.input_version = Some(version);
        // Ascending user keys, as the executor issues them.
        assert!(c.is_base_level_for_key(b"a"));
        assert!(!c.is_base_level_for_key(b"d"));
        assert!(!c.is_base_level_for_key(b"e"));
        assert!(c.is_base_level_for_key(b"g"));
        assert!(!c.is_base_level_for_key(b"m"));
        assert!(!c.is_base_level_for_key(b"q"));
        assert!(c.is_base_level_for_key(b"z"));
        // The cursors moved past every file.
        assert_eq!(c.level_ptrs[3], 2);
        assert_eq!(c.level_ptrs[4], 1);
    }

    #[test]
    fn test_levels_above_output_are_ignored() {
        // A file at level 2 (the output level) must not block tombstone
        // dropping for a level-1 compaction.
        let version = build_version(vec![(2, 7, "a", "z")]);
        let mut c = new_compaction(1);
        c.input_version = Some(version);
        assert!(c.is_base_level_for_key(b"m"));
    }

    #[test]
    fn test_apply_to_edit() {
        let mut c = new_compaction(1);
        c.inputs.base.push(new_file(11, "a", "c", 1000));
        c.inputs.base.push(new_file(12, "d", "f", 1000));
        c.inputs.parent.push(new_file(21, "b", "e", 1000));
        let mut output = FileMetaData::default();
        output.number = 31;
        output.file_size = 2000;
        output.smallest = InternalKey::new(b"a", 100, ValueType::Value);
        output.largest = InternalKey::new(b"f", 1, ValueType::Value);
        c.outputs.push(output);

        c.apply_to_edit();
        let delta = &c.edit.file_delta;
        assert!(delta.deleted_files.contains(&(1, 11)));
        assert!(delta.deleted_files.contains(&(1, 12)));
        assert!(delta.deleted_files.contains(&(2, 21)));
        assert_eq!(delta.new_files.len(), 1);
        assert_eq!(delta.new_files[0].0, 2);
        assert_eq!(delta.new_files[0].1.number, 31);
        assert!(c.outputs.is_empty());
        assert_eq!(c.bytes_read(), 3000);
    }

    #[test]
    fn test_range_helpers() {
        let icmp = Icmp::default();
        // Overlapping level-0 files: every file participates.
        let l0 = vec![
            new_file(1, "c", "m", 100),
            new_file(2, "a", "f", 100),
            new_file(3, "e", "z", 100),
        ];
        let (smallest, largest) = base_range(&l0, 0, &icmp);
        assert_eq!(smallest.user_key(), b"a");
        assert_eq!(largest.user_key(), b"z");

        // Disjoint level: ends suffice.
        let l1 = vec![new_file(4, "b", "d", 100), new_file(5, "f", "h", 100)];
        let (smallest, largest) = base_range(&l1, 1, &icmp);
        assert_eq!(smallest.user_key(), b"b");
        assert_eq!(largest.user_key(), b"h");

        let parent = vec![new_file(6, "a", "c", 100), new_file(7, "g", "k", 100)];
        let (smallest, largest) = total_range(&l1, &parent, 1, &icmp);
        assert_eq!(smallest.user_key(), b"a");
        assert_eq!(largest.user_key(), b"k");
    }

    #[test]
    fn test_manual_compaction_channel() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let manual = ManualCompaction {
            level: 1,
            done: tx,
            begin: Some(InternalKey::new(b"a", 100, ValueType::Value)),
            end: None,
        };
        manual.done.send(Ok(())).unwrap();
        assert!(rx.recv().unwrap().is_ok());
    }
}
