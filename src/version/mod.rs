use crate::db::format::{
    InternalKey, InternalKeyComparator, LookupKey, ParsedInternalKey, ValueType, MAX_KEY_SEQUENCE,
    VALUE_TYPE_FOR_SEEK,
};
use crate::iterator::Iterator;
use crate::options::{Options, ReadOptions};
use crate::table_cache::TableCache;
use crate::util::coding::encode_fixed_64;
use crate::util::comparator::Comparator;
use crate::version::version_edit::FileMetaData;
use crate::version::version_set::total_file_size;
use crate::{Error, Result};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

pub mod version_edit;
pub mod version_set;

/// Identifies the file a point lookup should be charged to.
#[derive(Debug)]
pub struct SeekStats {
    pub file: Arc<FileMetaData>,
    /// The level the charged file lives at.
    pub level: usize,
}

/// An immutable snapshot of the level -> table mapping.
///
/// Level-0 tables may overlap each other and are kept in file-number order,
/// oldest first. Tables at level 1 and below are disjoint in key range and
/// sorted by smallest key. Once a user key reaches some level, older entries
/// for it can only exist at that level or below.
pub struct Version<C: Comparator> {
    // Sequential number of this version, for debugging.
    vnum: usize,
    options: Arc<Options<C>>,
    icmp: InternalKeyComparator<C>,

    files: Vec<Vec<Arc<FileMetaData>>>,

    // The file charged with the most recent exhausted seek budget, waiting
    // for the compaction scheduler to pick it up. Set at most once per
    // version.
    file_to_compact: RwLock<Option<Arc<FileMetaData>>>,
    file_to_compact_level: AtomicUsize,

    // Level scored most in need of a size compaction and its score, filled
    // in by `finalize`. A score >= 1 means the compaction is due.
    compaction_score: f32,
    compaction_level: usize,
}

impl<C: Comparator> fmt::Debug for Version<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "vnum: {} ", self.vnum)?;
        for (level, files) in self.files.iter().enumerate() {
            write!(f, "level {}: [ ", level)?;
            for file in files {
                write!(
                    f,
                    "File {}({}): [{:?}..{:?}], ",
                    file.number, file.file_size, file.smallest, file.largest
                )?;
            }
            writeln!(f, " ]")?;
        }
        Ok(())
    }
}

impl<C: Comparator + 'static> Version<C> {
    pub fn new(options: Arc<Options<C>>, icmp: InternalKeyComparator<C>) -> Self {
        let max_levels = options.max_levels;
        let mut files = Vec::with_capacity(max_levels);
        for _ in 0..max_levels {
            files.push(Vec::new());
        }
        Self {
            vnum: 0,
            options,
            icmp,
            files,
            file_to_compact: RwLock::new(None),
            file_to_compact_level: AtomicUsize::new(0),
            compaction_score: 0f32,
            compaction_level: 0,
        }
    }

    /// Looks `key` up level by level, stopping at the first definitive
    /// answer: entries never hop levels, so data found at a smaller level
    /// shadows everything below it.
    ///
    /// The returned `SeekStats` names the file to charge for a wasted seek,
    /// set only when more than one table had to be probed. Feed it to
    /// `update_stats`.
    pub fn get<T: TableCache>(
        &self,
        options: ReadOptions,
        key: LookupKey,
        table_cache: &T,
    ) -> Result<(Option<Vec<u8>>, Option<SeekStats>)> {
        let ikey = key.internal_key();
        let ukey = key.user_key();
        let ucmp = &self.icmp.user_comparator;
        let mut seek_stats: Option<SeekStats> = None;
        let mut last_file_read: Option<(Arc<FileMetaData>, usize)> = None;

        for (level, files) in self.files.iter().enumerate() {
            if files.is_empty() {
                continue;
            }
            let candidates: Vec<Arc<FileMetaData>> = if level == 0 {
                // Level-0 files may overlap each other: collect every file
                // whose range covers the user key and probe newest first.
                let mut overlapping = files
                    .iter()
                    .filter(|f| {
                        ucmp.compare(ukey, f.smallest.user_key()) != CmpOrdering::Less
                            && ucmp.compare(ukey, f.largest.user_key()) != CmpOrdering::Greater
                    })
                    .cloned()
                    .collect::<Vec<_>>();
                overlapping.sort_by(|a, b| b.number.cmp(&a.number));
                overlapping
            } else {
                // Disjoint level: at most one file can hold the key.
                let index = find_file(&self.icmp, files, ikey);
                match files.get(index) {
                    Some(target)
                        if ucmp.compare(ukey, target.smallest.user_key())
                            != CmpOrdering::Less =>
                    {
                        vec![target.clone()]
                    }
                    _ => vec![],
                }
            };

            for file in candidates {
                if seek_stats.is_none() {
                    if let Some((f, l)) = last_file_read.take() {
                        // This read is probing a second table; charge the
                        // first one for failing to answer.
                        seek_stats = Some(SeekStats { file: f, level: l });
                    }
                }
                last_file_read = Some((file.clone(), level));

                match table_cache.get(options, ikey, file.number, file.file_size)? {
                    None => continue,
                    Some((encoded_key, value)) => {
                        match ParsedInternalKey::decode_from(&encoded_key) {
                            None => {
                                return Err(Error::Corruption("bad internal key".to_owned()))
                            }
                            Some(parsed) => {
                                if ucmp.compare(parsed.user_key, ukey) == CmpOrdering::Equal {
                                    return match parsed.value_type {
                                        ValueType::Value => Ok((Some(value), seek_stats)),
                                        _ => Ok((None, seek_stats)),
                                    };
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok((None, seek_stats))
    }

    /// Burns one unit of the charged file's seek budget. Returns true when
    /// the budget ran out and the file was recorded as this version's
    /// seek-compaction candidate, i.e. the caller should wake the compaction
    /// scheduler. At most one candidate is held; further charges are ignored
    /// until a new version is installed.
    pub fn update_stats(&self, stats: Option<SeekStats>) -> bool {
        if let Some(ss) = stats {
            let old = ss
                .file
                .allowed_seeks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some(v.saturating_sub(1))
                })
                .unwrap();
            let mut file_to_compact = self.file_to_compact.write().unwrap();
            if file_to_compact.is_none() && old <= 1 {
                *file_to_compact = Some(ss.file);
                self.file_to_compact_level.store(ss.level, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Whether this version wants a compaction, for either reason.
    pub fn needs_compaction(&self) -> bool {
        self.compaction_score >= 1.0 || self.file_to_compact.read().unwrap().is_some()
    }

    /// A short rendering of the per-level file counts.
    pub fn level_summary(&self) -> String {
        let mut s = String::from("files[ ");
        for files in &self.files {
            s.push_str(&format!("{} ", files.len()));
        }
        s.push(']');
        s
    }

    /// Picks the level a flushed memtable covering `[smallest_ukey,
    /// largest_ukey]` should land at. Level 0 when it overlaps level 0;
    /// otherwise pushed down while the next level is clear and the
    /// grandparent overlap stays below the limit, capped at
    /// `max_mem_compact_level`.
    ///
    /// The grandparent check looks two levels down because placing the file
    /// at level `n` commits to an eventual compaction into `n + 1`, whose
    /// cost is governed by the overlap at `n + 2`.
    pub fn pick_level_for_memtable_output(
        &self,
        smallest_ukey: &[u8],
        largest_ukey: &[u8],
    ) -> usize {
        let mut level = 0;
        if !self.overlap_in_level(level, Some(smallest_ukey), Some(largest_ukey)) {
            let smallest_ikey =
                InternalKey::new(smallest_ukey, MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK);
            let largest_ikey = InternalKey::new(largest_ukey, 0, ValueType::Deletion);
            while level < self.options.max_mem_compact_level {
                if self.overlap_in_level(level + 1, Some(smallest_ukey), Some(largest_ukey)) {
                    break;
                }
                if level + 2 < self.options.max_levels {
                    let overlaps = self.get_overlapping_inputs(
                        level + 2,
                        Some(&smallest_ikey),
                        Some(&largest_ikey),
                    );
                    if total_file_size(&overlaps) > self.options.max_grandparent_overlap_bytes() {
                        break;
                    }
                }
                level += 1;
            }
        }
        level
    }

    /// Recomputes the compaction score of every level and caches the argmax.
    /// Ties go to the lower level.
    pub fn finalize(&mut self) {
        let mut best_level = 0;
        let mut best_score = 0f64;
        for level in 0..self.options.max_levels - 1 {
            let score = if level == 0 {
                // Level 0 is scored by file count: it is searched on every
                // read regardless of bytes, and tiny write buffers would
                // otherwise never score.
                self.files[0].len() as f64 / self.options.l0_compaction_threshold as f64
            } else {
                total_file_size(&self.files[level]) as f64
                    / self.options.max_bytes_for_level(level) as f64
            };
            if score > best_score {
                best_score = score;
                best_level = level;
            }
        }
        self.compaction_level = best_level;
        self.compaction_score = best_score as f32;
    }

    /// Returns a clone of the internal key comparator.
    #[inline]
    pub fn comparator(&self) -> InternalKeyComparator<C> {
        self.icmp.clone()
    }

    /// The files at `level`.
    ///
    /// # Panics
    ///
    /// Panics when `level` is out of bounds.
    #[inline]
    pub fn get_level_files(&self, level: usize) -> &[Arc<FileMetaData>] {
        assert!(
            level < self.files.len(),
            "[version] invalid level {}, the max level is {}",
            level,
            self.options.max_levels - 1
        );
        self.files[level].as_slice()
    }

    /// Calls `func(level, file)` for every file that may contain `user_key`,
    /// newest first, stopping when `func` returns false.
    pub fn for_each_overlapping(
        &self,
        user_key: &[u8],
        internal_key: &[u8],
        mut func: Box<dyn FnMut(usize, Arc<FileMetaData>) -> bool>,
    ) {
        let ucmp = &self.icmp.user_comparator;
        for (level, files) in self.files.iter().enumerate() {
            if files.is_empty() {
                continue;
            }
            if level == 0 {
                let mut targets = files
                    .iter()
                    .filter(|f| {
                        ucmp.compare(user_key, f.smallest.user_key()) != CmpOrdering::Less
                            && ucmp.compare(user_key, f.largest.user_key()) != CmpOrdering::Greater
                    })
                    .collect::<Vec<_>>();
                targets.sort_by(|a, b| b.number.cmp(&a.number));
                for target in targets {
                    if !func(0, target.clone()) {
                        return;
                    }
                }
            } else {
                let index = find_file(&self.icmp, files, internal_key);
                if let Some(target) = files.get(index) {
                    if ucmp.compare(user_key, target.smallest.user_key()) != CmpOrdering::Less
                        && !func(level, target.clone())
                    {
                        return;
                    }
                }
            }
        }
    }

    /// Accounts one sampled read at `internal_key`, as issued by iterator
    /// users. When at least two files overlap the key, the first gets a seek
    /// charge; returns true when that triggered a compaction candidate.
    pub fn record_read_sample(&self, internal_key: &[u8]) -> bool {
        if let Some(pkey) = ParsedInternalKey::decode_from(internal_key) {
            let stats = Rc::new(Cell::new(None));
            let matches = Rc::new(RefCell::new(0usize));
            let stats_clone = stats.clone();
            let matches_clone = matches.clone();
            self.for_each_overlapping(
                pkey.user_key,
                internal_key,
                Box::new(move |level, file| {
                    *matches_clone.borrow_mut() += 1;
                    if *matches_clone.borrow() == 1 {
                        stats_clone.set(Some(SeekStats { file, level }));
                    }
                    *matches_clone.borrow() < 2
                }),
            );
            if *matches.borrow() >= 2 {
                if let Ok(s) = Rc::try_unwrap(stats) {
                    return self.update_stats(s.into_inner());
                }
            }
        }
        false
    }

    /// Whether any file at `level` overlaps `[smallest_ukey, largest_ukey]`.
    /// A `None` bound is unbounded on that side.
    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_ukey: Option<&[u8]>,
        largest_ukey: Option<&[u8]>,
    ) -> bool {
        some_file_overlaps_range(
            &self.icmp,
            level > 0,
            &self.files[level],
            smallest_ukey,
            largest_ukey,
        )
    }

    /// All files at `level` whose user-key range intersects `[begin, end]`
    /// (`None` = unbounded). For level 0 the result is transitively closed:
    /// whenever a hit widens the window, the scan restarts with the widened
    /// window. Terminates because each restart strictly widens the window
    /// over a finite file set.
    pub(crate) fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = &self.icmp.user_comparator;
        let mut user_begin = begin.map(|ik| ik.user_key());
        let mut user_end = end.map(|ik| ik.user_key());
        let mut result = vec![];
        let mut need_restart = true;
        while need_restart {
            need_restart = false;
            for file in self.files[level].iter() {
                let file_begin = file.smallest.user_key();
                let file_end = file.largest.user_key();
                if user_begin.map_or(false, |ub| ucmp.compare(file_end, ub) == CmpOrdering::Less)
                    || user_end
                        .map_or(false, |ue| ucmp.compare(file_begin, ue) == CmpOrdering::Greater)
                {
                    // Entirely before or after the window.
                    continue;
                }
                if level == 0 {
                    let expand_begin = user_begin
                        .map_or(false, |ub| ucmp.compare(file_begin, ub) == CmpOrdering::Less);
                    let expand_end = user_end
                        .map_or(false, |ue| ucmp.compare(file_end, ue) == CmpOrdering::Greater);
                    if expand_begin || expand_end {
                        if expand_begin {
                            user_begin = Some(file_begin);
                        }
                        if expand_end {
                            user_end = Some(file_end);
                        }
                        result.clear();
                        need_restart = true;
                        break;
                    }
                }
                result.push(file.clone());
            }
        }
        result
    }
}

/// Binary-searches a disjoint, sorted file list for the first file whose
/// largest key is at or after `ikey`. Returns `files.len()` when every file
/// ends before it.
fn find_file<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    files: &[Arc<FileMetaData>],
    ikey: &[u8],
) -> usize {
    let mut left = 0usize;
    let mut right = files.len();
    while left < right {
        let mid = (left + right) / 2;
        if icmp.compare(files[mid].largest.data(), ikey) == CmpOrdering::Less {
            left = mid + 1;
        } else {
            right = mid;
        }
    }
    right
}

// Whether any file overlaps `[smallest_ukey, largest_ukey]`. `disjoint`
// marks the file list as sorted and non-overlapping, enabling binary search.
fn some_file_overlaps_range<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    disjoint: bool,
    files: &[Arc<FileMetaData>],
    smallest_ukey: Option<&[u8]>,
    largest_ukey: Option<&[u8]>,
) -> bool {
    if !disjoint {
        return files.iter().any(|file| {
            !(key_is_after_file(icmp, file, smallest_ukey)
                || key_is_before_file(icmp, file, largest_ukey))
        });
    }
    let index = match smallest_ukey {
        Some(ukey) => {
            // The maximal internal key for this user key.
            let smallest_ikey = InternalKey::new(ukey, MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, smallest_ikey.data())
        }
        None => 0,
    };
    if index >= files.len() {
        // Every file ends before the range begins.
        return false;
    }
    !key_is_before_file(icmp, &files[index], largest_ukey)
}

// Whether `ukey` lies strictly after `file`'s range.
fn key_is_after_file<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    file: &Arc<FileMetaData>,
    ukey: Option<&[u8]>,
) -> bool {
    ukey.map_or(false, |k| {
        icmp.user_comparator.compare(k, file.largest.user_key()) == CmpOrdering::Greater
    })
}

// Whether `ukey` lies strictly before `file`'s range.
fn key_is_before_file<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    file: &Arc<FileMetaData>,
    ukey: Option<&[u8]>,
) -> bool {
    ukey.map_or(false, |k| {
        icmp.user_comparator.compare(k, file.smallest.user_key()) == CmpOrdering::Less
    })
}

/// Byte length of a `LevelFileNumIterator` value: file number plus file size.
pub const FILE_META_LENGTH: usize = 2 * mem::size_of::<u64>();

/// The index half of a two-level iterator over one disjoint level.
///
/// `key()` is the largest internal key of a file; `value()` is 16 bytes of
/// fixed-encoded file number and file size, fed to a factory that opens the
/// table lazily.
pub struct LevelFileNumIterator<C: Comparator> {
    files: Vec<Arc<FileMetaData>>,
    icmp: InternalKeyComparator<C>,
    index: usize,
    value_buf: [u8; FILE_META_LENGTH],
}

impl<C: Comparator + 'static> LevelFileNumIterator<C> {
    pub fn new(icmp: InternalKeyComparator<C>, files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        Self {
            files,
            icmp,
            index,
            value_buf: [0; FILE_META_LENGTH],
        }
    }

    #[inline]
    fn fill_value_buf(&mut self) {
        if self.valid() {
            let file = &self.files[self.index];
            encode_fixed_64(&mut self.value_buf, file.number);
            encode_fixed_64(&mut self.value_buf[8..], file.file_size);
        }
    }

    fn valid_or_panic(&self) {
        assert!(self.valid(), "[level file num iterator] out of bounds")
    }
}

impl<C: Comparator + 'static> Iterator for LevelFileNumIterator<C> {
    fn valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) {
        self.index = 0;
        self.fill_value_buf();
    }

    fn seek_to_last(&mut self) {
        self.index = self.files.len().saturating_sub(1);
        self.fill_value_buf();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = find_file(&self.icmp, &self.files, target);
        self.fill_value_buf();
    }

    fn next(&mut self) {
        self.valid_or_panic();
        self.index += 1;
        self.fill_value_buf();
    }

    fn prev(&mut self) {
        self.valid_or_panic();
        if self.index == 0 {
            // Marks the iterator invalid.
            self.index = self.files.len();
        } else {
            self.index -= 1;
            self.fill_value_buf();
        }
    }

    fn key(&self) -> &[u8] {
        self.valid_or_panic();
        self.files[self.index].largest.data()
    }

    fn value(&self) -> &[u8] {
        self.valid_or_panic();
        &self.value_buf
    }

    fn status(&mut self) -> Result<()> {
        Ok(())
    }
}


#[cfg(test)]
mod version_tests {
    use super::*;
    use crate::util::collection::HashMap;
    use crate::util::comparator::BytewiseComparator;
    use crate::version::version_set::VersionBuilder;
    use std::sync::Mutex;

    type Icmp = InternalKeyComparator<BytewiseComparator>;

    // A `TableCache` over in-memory sorted entry lists, one per file number.
    #[derive(Clone, Default)]
    struct MemTables {
        icmp: Icmp,
        tables: Arc<Mutex<HashMap<u64, Vec<(Vec<u8>, Vec<u8>)>>>>,
    }

    impl MemTables {
        fn put(&self, file_number: u64, entries: Vec<(&str, u64, ValueType, &str)>) {
            let table = entries
                .into_iter()
                .map(|(k, seq, t, v)| {
                    (
                        InternalKey::new(k.as_bytes(), seq, t).data().to_vec(),
                        v.as_bytes().to_vec(),
                    )
                })
                .collect();
            self.tables.lock().unwrap().insert(file_number, table);
        }
    }

    impl TableCache for MemTables {
        type Iter = crate::iterator::testutil::VecIterator;

        fn new_iter(
            &self,
            _opts: ReadOptions,
            file_number: u64,
            _file_size: u64,
        ) -> Result<Self::Iter> {
            let entries = self
                .tables
                .lock()
                .unwrap()
                .get(&file_number)
                .cloned()
                .unwrap_or_default();
            Ok(crate::iterator::testutil::VecIterator::new(entries))
        }

        fn get(
            &self,
            _opts: ReadOptions,
            ikey: &[u8],
            file_number: u64,
            _file_size: u64,
        ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
            let tables = self.tables.lock().unwrap();
            let entries = match tables.get(&file_number) {
                Some(e) => e,
                None => return Ok(None),
            };
            for (k, v) in entries {
                if self.icmp.compare(k, ikey) != CmpOrdering::Less {
                    return Ok(Some((k.clone(), v.clone())));
                }
            }
            Ok(None)
        }
    }

    struct VersionFixture {
        version: Version<BytewiseComparator>,
        tables: MemTables,
    }

    // Builds a version through the regular builder path so level invariants
    // hold.
    fn build_version(
        files: Vec<(usize, u64, &str, &str)>,
        populate: &dyn Fn(&MemTables, u64, &str, &str),
    ) -> VersionFixture {
        let opts = Arc::new(Options::<BytewiseComparator>::default());
        let icmp = InternalKeyComparator::new(BytewiseComparator::default());
        let base = Version::new(opts.clone(), icmp.clone());
        let mut builder = VersionBuilder::new(opts.max_levels, &base);
        let tables = MemTables::default();
        for (level, number, smallest, largest) in files {
            let mut f = FileMetaData::default();
            f.number = number;
            f.file_size = 1000;
            f.smallest = InternalKey::new(smallest.as_bytes(), 100, ValueType::Value);
            f.largest = InternalKey::new(largest.as_bytes(), 1, ValueType::Value);
            builder.add_file(level, f);
            populate(&tables, number, smallest, largest);
        }
        let mut version = builder.apply_to_new(&icmp);
        version.finalize();
        VersionFixture { version, tables }
    }

    fn put_single(tables: &MemTables, number: u64, smallest: &str, largest: &str) {
        tables.put(
            number,
            vec![
                (smallest, 100, ValueType::Value, "head"),
                (largest, 1, ValueType::Value, "tail"),
            ],
        );
    }

    fn get(
        fixture: &VersionFixture,
        key: &str,
        seq: u64,
    ) -> (Option<Vec<u8>>, Option<SeekStats>) {
        fixture
            .version
            .get(
                ReadOptions::default(),
                LookupKey::new(key.as_bytes(), seq),
                &fixture.tables,
            )
            .unwrap()
    }

    #[test]
    fn test_get_hits_across_levels() {
        let fixture = build_version(
            vec![(0, 5, "d", "f"), (1, 3, "a", "c"), (2, 1, "g", "i")],
            &put_single,
        );
        let (value, _) = get(&fixture, "a", 200);
        assert_eq!(value, Some(b"head".to_vec()));
        let (value, _) = get(&fixture, "d", 200);
        assert_eq!(value, Some(b"head".to_vec()));
        let (value, _) = get(&fixture, "i", 200);
        assert_eq!(value, Some(b"tail".to_vec()));
        let (value, _) = get(&fixture, "x", 200);
        assert_eq!(value, None);
    }

    #[test]
    fn test_get_respects_sequence_visibility() {
        let fixture = build_version(vec![(1, 3, "a", "c")], &put_single);
        // The head entry was written at seq 100; a lookup at seq 50 must not
        // see it.
        let (value, _) = get(&fixture, "a", 50);
        assert_eq!(value, None);
        let (value, _) = get(&fixture, "a", 100);
        assert_eq!(value, Some(b"head".to_vec()));
    }

    #[test]
    fn test_get_sees_tombstone() {
        let fixture = build_version(vec![(1, 3, "a", "c")], &|tables, number, _, _| {
            tables.put(
                number,
                vec![
                    ("a", 90, ValueType::Deletion, ""),
                    ("a", 80, ValueType::Value, "old"),
                ],
            );
        });
        let (value, _) = get(&fixture, "a", 200);
        assert_eq!(value, None);
        // Below the tombstone the old value is still visible.
        let (value, _) = get(&fixture, "a", 85);
        assert_eq!(value, Some(b"old".to_vec()));
    }

    #[test]
    fn test_get_charges_first_file_on_second_probe() {
        // Two overlapping level-0 files; the key only exists in the older
        // one, so the newer file is probed first and wastes a seek.
        let fixture = build_version(
            vec![(0, 2, "a", "e"), (0, 1, "a", "e")],
            &|tables, number, _, _| {
                if number == 1 {
                    tables.put(number, vec![("b", 10, ValueType::Value, "hit")]);
                } else {
                    tables.put(number, vec![("d", 10, ValueType::Value, "miss")]);
                }
            },
        );
        let (value, stats) = get(&fixture, "b", 200);
        assert_eq!(value, Some(b"hit".to_vec()));
        let stats = stats.expect("second probe should charge a seek");
        assert_eq!(stats.file.number, 2);
        assert_eq!(stats.level, 0);
    }

    #[test]
    fn test_get_single_probe_charges_nothing() {
        let fixture = build_version(vec![(1, 3, "a", "c")], &put_single);
        let (_, stats) = get(&fixture, "b", 200);
        assert!(stats.is_none());
    }

    #[test]
    fn test_update_stats_triggers_once_budget_exhausted() {
        let fixture = build_version(
            vec![(0, 2, "a", "e"), (0, 1, "a", "e")],
            &|tables, number, _, _| {
                if number == 1 {
                    tables.put(number, vec![("b", 10, ValueType::Value, "hit")]);
                } else {
                    tables.put(number, vec![("d", 10, ValueType::Value, "miss")]);
                }
            },
        );
        let charged = fixture.version.files[0]
            .iter()
            .find(|f| f.number == 2)
            .unwrap();
        // Burn the budget down to a single remaining seek.
        let initial = charged.allowed_seeks.load(Ordering::Acquire);
        assert_eq!(initial, 100);
        charged.allowed_seeks.store(1, Ordering::Release);

        let (_, stats) = get(&fixture, "b", 200);
        assert!(fixture.version.update_stats(stats));
        assert!(fixture.version.needs_compaction());
        let guard = fixture.version.file_to_compact.read().unwrap();
        assert_eq!(guard.as_ref().unwrap().number, 2);
        drop(guard);
        assert_eq!(
            fixture.version.file_to_compact_level.load(Ordering::Acquire),
            0
        );

        // A second candidate is ignored while one is pending.
        let (_, stats) = get(&fixture, "b", 200);
        assert!(!fixture.version.update_stats(stats));
    }

    #[test]
    fn test_record_read_sample() {
        let fixture = build_version(
            vec![(0, 2, "a", "e"), (0, 1, "a", "e")],
            &|tables, number, _, _| {
                tables.put(number, vec![("b", 10, ValueType::Value, "v")]);
            },
        );
        let ikey = InternalKey::new(b"b", 200, ValueType::Value);
        // Drain the newest file's budget so the sample trips it.
        let newest = fixture.version.files[0]
            .iter()
            .find(|f| f.number == 2)
            .unwrap();
        newest.allowed_seeks.store(1, Ordering::Release);
        assert!(fixture.version.record_read_sample(ikey.data()));
        // A key overlapping only one file never triggers.
        let fixture2 = build_version(vec![(1, 3, "a", "c")], &put_single);
        assert!(!fixture2.version.record_read_sample(ikey.data()));
    }

    #[test]
    fn test_pick_level_for_memtable_output() {
        // Level 2 holds [k..n]; level 4 nothing; the grandparent check and
        // the mem-compact cap both come into play.
        let fixture = build_version(
            vec![(2, 7, "k", "n"), (3, 8, "x", "z")],
            &|_, _, _, _| {},
        );
        let v = &fixture.version;
        // Overlaps nothing: pushed to the cap.
        assert_eq!(v.pick_level_for_memtable_output(b"a", b"b"), 2);
        // Overlaps level 2: stops at level 1.
        assert_eq!(v.pick_level_for_memtable_output(b"m", b"p"), 1);
        // A level-0 overlap keeps it at level 0.
        let fixture2 = build_version(vec![(0, 9, "a", "c")], &|_, _, _, _| {});
        assert_eq!(fixture2.version.pick_level_for_memtable_output(b"b", b"d"), 0);
    }

    #[test]
    fn test_finalize_scores() {
        // One level-0 file: score 1/4, no compaction needed.
        let fixture = build_version(vec![(0, 5, "a", "c")], &|_, _, _, _| {});
        assert_eq!(fixture.version.compaction_level, 0);
        assert!((fixture.version.compaction_score - 0.25).abs() < 1e-6);
        assert!(!fixture.version.needs_compaction());

        // Four level-0 files: score 1.0 at level 0.
        let fixture = build_version(
            vec![
                (0, 1, "a", "d"),
                (0, 2, "b", "e"),
                (0, 3, "c", "f"),
                (0, 4, "d", "g"),
            ],
            &|_, _, _, _| {},
        );
        assert_eq!(fixture.version.compaction_level, 0);
        assert!((fixture.version.compaction_score - 1.0).abs() < 1e-6);
        assert!(fixture.version.needs_compaction());
    }

    #[test]
    fn test_level_file_num_iterator() {
        let fixture = build_version(
            vec![(1, 1, "a", "c"), (1, 2, "e", "g"), (1, 3, "i", "k")],
            &|_, _, _, _| {},
        );
        let icmp = fixture.version.comparator();
        let mut iter = LevelFileNumIterator::new(icmp, fixture.version.files[1].clone());
        assert!(!iter.valid());
        iter.seek_to_first();
        let mut numbers = vec![];
        while iter.valid() {
            let value = iter.value();
            numbers.push(crate::util::coding::decode_fixed_64(value));
            iter.next();
        }
        assert_eq!(numbers, vec![1, 2, 3]);
        let target = InternalKey::new(b"f", MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK);
        iter.seek(target.data());
        assert!(iter.valid());
        assert_eq!(crate::util::coding::decode_fixed_64(iter.value()), 2);
        iter.prev();
        assert_eq!(crate::util::coding::decode_fixed_64(iter.value()), 1);
    }
}
