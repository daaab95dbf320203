use crate::compaction::{base_range, total_range, Compaction, CompactionReason};
use crate::db::filename::{generate_filename, parse_filename, update_current, FileType};
use crate::db::format::{InternalKey, InternalKeyComparator};
use crate::iterator::{ConcatenateIterator, DerivedIterFactory, Iterator, MergingIterator};
use crate::options::{Options, ReadOptions};
use crate::record::reader::Reader;
use crate::record::writer::Writer;
use crate::record::BLOCK_SIZE;
use crate::storage::{File, Storage};
use crate::table_cache::TableCache;
use crate::util::coding::decode_fixed_64;
use crate::util::collection::HashSet;
use crate::util::comparator::Comparator;
use crate::util::reporter::LogReporter;
use crate::version::version_edit::{FileDelta, FileMetaData, VersionEdit};
use crate::version::{LevelFileNumIterator, Version, FILE_META_LENGTH};
use crate::{Error, Result};
use std::cmp::Ordering as CmpOrdering;
use std::io::SeekFrom;
use std::path::MAIN_SEPARATOR;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// Pending file changes for one level.
struct LevelDiff {
    deleted_files: HashSet<u64>,
    added_files: Vec<Arc<FileMetaData>>,
}

/// Accumulates version edits on top of a base version and materializes the
/// result as a single new version, without building intermediates.
pub struct VersionBuilder<'a, C: Comparator> {
    levels: Vec<LevelDiff>,
    base: &'a Version<C>,
}

impl<'a, C: Comparator + 'static> VersionBuilder<'a, C> {
    pub fn new(max_levels: usize, base: &'a Version<C>) -> Self {
        let mut levels = Vec::with_capacity(max_levels);
        for _ in 0..max_levels {
            levels.push(LevelDiff {
                deleted_files: HashSet::default(),
                added_files: vec![],
            })
        }
        Self { levels, base }
    }

    /// Folds one edit's file changes in. Compaction pointer updates are
    /// applied to `compaction_pointers` immediately.
    pub fn accumulate(
        &mut self,
        delta: FileDelta,
        compaction_pointers: &mut [InternalKey],
    ) {
        for (level, key) in delta.compaction_pointers {
            compaction_pointers[level] = key;
        }
        for (level, number) in delta.deleted_files {
            self.levels[level].deleted_files.insert(number);
        }
        for (level, file) in delta.new_files {
            self.add_file(level, file);
        }
    }

    /// Registers `file` as added at `level`, cancelling any deletion of the
    /// same number recorded earlier in this batch.
    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        file.init_allowed_seeks();
        self.levels[level].deleted_files.remove(&file.number);
        self.levels[level].added_files.push(Arc::new(file));
    }

    /// Registers the deletion of `number` from `level`.
    #[inline]
    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.levels[level].deleted_files.insert(number);
    }

    /// Merges the base version with the accumulated changes into a fresh
    /// version.
    ///
    /// # Panics
    ///
    /// Panics when the merge would leave overlapping files at some level
    /// above 0, which indicates a bug in the edit stream.
    pub fn apply_to_new(self, icmp: &InternalKeyComparator<C>) -> Version<C> {
        let mut v = Version::new(self.base.options.clone(), icmp.clone());
        v.vnum = self.base.vnum + 1;
        for (level, (base_files, delta)) in self
            .base
            .files
            .iter()
            .zip(self.levels.into_iter())
            .enumerate()
        {
            let deleted = &delta.deleted_files;
            let mut added = delta
                .added_files
                .into_iter()
                .filter(|f| !deleted.contains(&f.number))
                .collect::<Vec<_>>();
            let mut kept = base_files
                .iter()
                .filter(|f| !deleted.contains(&f.number))
                .cloned()
                .collect::<Vec<_>>();
            if level == 0 {
                // Level 0 stays in file-number order, oldest first, so the
                // newest table is always identifiable.
                kept.extend(added);
                kept.sort_by(|a, b| a.number.cmp(&b.number));
                v.files[0] = kept;
            } else {
                let sort_key = |a: &Arc<FileMetaData>, b: &Arc<FileMetaData>| {
                    icmp.compare(a.smallest.data(), b.smallest.data())
                        .then_with(|| a.number.cmp(&b.number))
                };
                added.sort_by(|a, b| sort_key(a, b));
                // Single-pass stable merge of two sorted runs.
                let mut merged = Vec::with_capacity(kept.len() + added.len());
                let (mut i, mut j) = (0, 0);
                while i < kept.len() && j < added.len() {
                    if sort_key(&kept[i], &added[j]) == CmpOrdering::Less {
                        merged.push(kept[i].clone());
                        i += 1;
                    } else {
                        merged.push(added[j].clone());
                        j += 1;
                    }
                }
                merged.extend_from_slice(&kept[i..]);
                merged.extend_from_slice(&added[j..]);
                if let Some((prev, next)) = first_overlap(icmp, &merged) {
                    panic!(
                        "[version builder] compaction left overlapping files at level {}: #{} [{:?}..{:?}] vs #{} [{:?}..{:?}]",
                        level, prev.number, prev.smallest, prev.largest,
                        next.number, next.smallest, next.largest,
                    );
                }
                v.files[level] = merged;
            }
        }
        v
    }
}

// First adjacent pair violating strict ordering, if any.
fn first_overlap<'a, C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    files: &'a [Arc<FileMetaData>],
) -> Option<(&'a FileMetaData, &'a FileMetaData)> {
    files.windows(2).find_map(|w| {
        if icmp.compare(w[0].largest.data(), w[1].smallest.data()) != CmpOrdering::Less {
            Some((w[0].as_ref(), w[1].as_ref()))
        } else {
            None
        }
    })
}

/// Owns every live version, the manifest writer, and the bookkeeping
/// counters that edits persist. All mutation funnels through
/// `log_and_apply`; the embedding engine serializes calls with its own
/// mutex, and that mutex must not be held across the manifest sync (the one
/// deliberately slow step here).
pub struct VersionSet<S: Storage + Clone, C: Comparator> {
    /// Output numbers of in-flight flushes and compactions. Files named here
    /// are protected from garbage collection even though no version
    /// references them yet.
    pub pending_outputs: HashSet<u64>,
    db_path: String,
    storage: S,
    options: Arc<Options<C>>,
    icmp: InternalKeyComparator<C>,

    next_file_number: u64,
    last_sequence: u64,
    // File number of the write-ahead log currently in service, and of its
    // predecessor while the previous memtable is still flushing.
    log_number: u64,
    prev_log_number: u64,

    manifest_file_number: u64,
    manifest_writer: Option<Writer<S::F>>,

    // Live versions, oldest first; the last entry is current. Superseded
    // versions stay while externally referenced.
    versions: Vec<Arc<Version<C>>>,

    // Where the next size compaction at each level should start.
    compaction_pointer: Vec<InternalKey>,
}

impl<S: Storage + Clone + 'static, C: Comparator + 'static> VersionSet<S, C> {
    pub fn new(db_path: String, options: Arc<Options<C>>, storage: S) -> Self {
        let max_levels = options.max_levels;
        let mut compaction_pointer = Vec::with_capacity(max_levels);
        for _ in 0..max_levels {
            compaction_pointer.push(InternalKey::default());
        }
        let icmp = InternalKeyComparator::new(options.comparator.clone());
        // Start from an empty version so there is always a current.
        let first = Arc::new(Version::new(options.clone(), icmp.clone()));
        Self {
            pending_outputs: HashSet::default(),
            db_path,
            storage,
            options,
            icmp,
            next_file_number: 2,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            manifest_file_number: 1,
            manifest_writer: None,
            versions: vec![first],
            compaction_pointer,
        }
    }

    /// Number of files at `level` in the current version.
    #[inline]
    pub fn level_files_count(&self, level: usize) -> usize {
        assert!(level < self.options.max_levels);
        self.current().get_level_files(level).len()
    }

    #[inline]
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    #[inline]
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    #[inline]
    pub fn set_log_number(&mut self, n: u64) {
        self.log_number = n;
    }

    #[inline]
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    /// Allocates and returns a fresh file number.
    #[inline]
    pub fn inc_next_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Allocates a number for a compaction or flush output and shields it
    /// from garbage collection until the edit installing it lands.
    pub fn new_output_file_number(&mut self) -> u64 {
        let n = self.inc_next_file_number();
        self.pending_outputs.insert(n);
        n
    }

    #[inline]
    pub fn manifest_number(&self) -> u64 {
        self.manifest_file_number
    }

    #[inline]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    #[inline]
    pub fn set_last_sequence(&mut self, n: u64) {
        self.last_sequence = n;
    }

    /// The current version.
    #[inline]
    pub fn current(&self) -> Arc<Version<C>> {
        self.versions.last().unwrap().clone()
    }

    /// An iterator over every entry in the current version's tables, in
    /// internal-key order. One child per level-0 file, one lazily-opening
    /// concatenated child per deeper level.
    pub fn current_sst_iter<T: TableCache + 'static>(
        &self,
        read_opt: ReadOptions,
        table_cache: T,
    ) -> Result<MergingIterator<InternalKeyComparator<C>>> {
        let version = self.current();
        let mut children: Vec<Box<dyn Iterator>> = vec![];
        for file in version.get_level_files(0) {
            children.push(Box::new(table_cache.new_iter(
                read_opt,
                file.number,
                file.file_size,
            )?));
        }
        for level in 1..self.options.max_levels {
            let files = version.get_level_files(level);
            if !files.is_empty() {
                let index_iter = LevelFileNumIterator::new(self.icmp.clone(), files.to_vec());
                let factory = FileIterFactory::new(read_opt, table_cache.clone());
                children.push(Box::new(ConcatenateIterator::new(index_iter, factory)));
            }
        }
        Ok(MergingIterator::new(self.icmp.clone(), children))
    }

    /// Applies `edit` to the current version, persists it to the manifest,
    /// and installs the result as current.
    ///
    /// The first call creates the manifest, seeds it with a snapshot of the
    /// current state, and flips `CURRENT` to it once the record is durable.
    /// On failure the prospective version is dropped and the set stays at
    /// the prior current; a manifest created by this call is deleted again.
    pub fn log_and_apply(&mut self, mut edit: VersionEdit) -> Result<()> {
        if let Some(target_log) = edit.log_number {
            assert!(
                target_log >= self.log_number && target_log < self.next_file_number,
                "[version set] applying a VersionEdit with invalid log number {}, expect in [{}, {})",
                target_log,
                self.log_number,
                self.next_file_number,
            );
        } else {
            edit.set_log_number(self.log_number);
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut record = vec![];
        edit.encode_to(&mut record);

        let (v, summary_before) = {
            let current = self.current();
            let summary_before = current.level_summary();
            let mut builder = VersionBuilder::new(self.options.max_levels, &current);
            builder.accumulate(edit.file_delta, &mut self.compaction_pointer);
            let mut v = builder.apply_to_new(&self.icmp);
            v.finalize();
            (v, summary_before)
        };

        let mut new_manifest_file = String::new();
        if self.manifest_writer.is_none() {
            new_manifest_file =
                generate_filename(&self.db_path, FileType::Manifest, self.manifest_file_number);
            debug!("create new manifest file #{}", self.manifest_file_number);
            let f = self.storage.create(&new_manifest_file)?;
            let mut writer = Writer::new(f);
            match self.write_snapshot(&mut writer) {
                Ok(()) => self.manifest_writer = Some(writer),
                Err(e) => {
                    let _ = self.storage.remove(&new_manifest_file);
                    return Err(e);
                }
            }
        }

        // The mutex serializing edits should be released around this write;
        // nothing below touches shared state until the install step.
        let mut status = Ok(());
        if let Some(writer) = self.manifest_writer.as_mut() {
            status = writer.add_record(&record).and_then(|_| writer.sync());
        }
        if let Err(e) = &status {
            warn!("MANIFEST persist error: {}", e);
            // Some environments report an error after the write actually hit
            // the disk. If a re-read finds the record, advancing is the only
            // way to keep the in-memory and logged states in agreement.
            if self.manifest_contains(&record) {
                info!("MANIFEST contains the record despite the error; treating the write as durable");
                status = Ok(());
            }
        }

        match status {
            Ok(()) => {
                if !new_manifest_file.is_empty() {
                    if let Err(e) =
                        update_current(&self.storage, &self.db_path, self.manifest_file_number)
                    {
                        self.manifest_writer = None;
                        let _ = self.storage.remove(&new_manifest_file);
                        return Err(e);
                    }
                }
                self.log_number = edit.log_number.unwrap();
                self.prev_log_number = edit.prev_log_number.unwrap();
                info!(
                    "level changing summary: before {} now {}",
                    summary_before,
                    v.level_summary()
                );
                self.append_new_version(v);
                Ok(())
            }
            Err(e) => {
                self.manifest_writer = None;
                if !new_manifest_file.is_empty() {
                    let _ = self.storage.remove(&new_manifest_file);
                }
                Err(e)
            }
        }
    }

    /// Rebuilds the state recorded by the last durable `log_and_apply`:
    /// follows `CURRENT` to the manifest, replays every edit, and installs
    /// the resulting version. Returns whether a fresh manifest should be
    /// created for subsequent edits.
    pub fn recover(&mut self) -> Result<bool> {
        let env = self.storage.clone();
        let mut current =
            env.open(&generate_filename(&self.db_path, FileType::Current, 0))?;
        let mut buf = vec![];
        current.read_all(&mut buf)?;
        match buf.last() {
            Some(b'\n') => {
                buf.pop();
            }
            _ => {
                return Err(Error::Corruption(
                    "CURRENT file does not end with newline".to_owned(),
                ))
            }
        }
        let manifest_name = String::from_utf8(buf)?;
        let manifest_path = format!("{}{}{}", self.db_path, MAIN_SEPARATOR, manifest_name);
        let manifest_file = env.open(&manifest_path)?;
        let manifest_len = manifest_file.len()?;

        let base = Version::new(self.options.clone(), self.icmp.clone());
        let mut builder = VersionBuilder::new(self.options.max_levels, &base);
        let reporter = LogReporter::new();
        let mut reader = Reader::new(manifest_file, Some(Box::new(reporter.clone())), true, 0);

        let mut next_file_number = None;
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut last_sequence = None;
        let mut record = vec![];
        while reader.read_record(&mut record) {
            reporter.result()?;
            let mut edit = VersionEdit::new(self.options.max_levels);
            edit.decoded_from(&record)?;
            debug!("decoded manifest record: {:?}", &edit);
            if let Some(name) = &edit.comparator_name {
                if name.as_str() != self.icmp.user_comparator.name() {
                    return Err(Error::InvalidArgument(format!(
                        "comparator {} does not match existing comparator {}",
                        name,
                        self.icmp.user_comparator.name()
                    )));
                }
            }
            builder.accumulate(edit.file_delta, &mut self.compaction_pointer);
            if let Some(n) = edit.next_file_number {
                next_file_number = Some(n);
            }
            if let Some(n) = edit.log_number {
                log_number = Some(n);
            }
            if let Some(n) = edit.prev_log_number {
                prev_log_number = Some(n);
            }
            if let Some(n) = edit.last_sequence {
                last_sequence = Some(n);
            }
        }
        reporter.result()?;

        let next_file_number = next_file_number
            .ok_or_else(|| Error::Corruption("no meta-nextfile entry in manifest".to_owned()))?;
        let log_number = log_number
            .ok_or_else(|| Error::Corruption("no meta-lognumber entry in manifest".to_owned()))?;
        let last_sequence = last_sequence.ok_or_else(|| {
            Error::Corruption("no last-sequence-number entry in manifest".to_owned())
        })?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        self.mark_file_number_used(prev_log_number);
        self.mark_file_number_used(log_number);

        let mut v = builder.apply_to_new(&self.icmp);
        v.finalize();
        info!("recovered version: {}", v.level_summary());
        self.versions.push(Arc::new(v));
        self.manifest_file_number = next_file_number;
        self.next_file_number = next_file_number + 1;
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;

        Ok(!self.should_reuse_manifest(&manifest_path, manifest_len))
    }

    /// Bumps the file-number counter past `num`, so recovered numbers are
    /// never reallocated.
    pub fn mark_file_number_used(&mut self, num: u64) {
        if self.next_file_number <= num {
            self.next_file_number = num + 1;
        }
    }

    /// The union of file numbers referenced by any live version. The
    /// external garbage collector deletes only tables outside this set (and
    /// outside `pending_outputs`).
    pub fn live_files(&self) -> HashSet<u64> {
        let mut set = HashSet::default();
        for version in self.versions.iter() {
            for level in 0..self.options.max_levels {
                for f in version.get_level_files(level) {
                    set.insert(f.number);
                }
            }
        }
        set
    }

    /// Folds every live file number into `pending_outputs`, pinning them all
    /// across an external sweep.
    pub fn lock_live_files(&mut self) {
        let live = self.live_files();
        self.pending_outputs.extend(live);
    }

    /// Largest next-level overlap (in bytes) of any single file at a level
    /// >= 1, a gauge of how expensive future compactions will be.
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let mut res = 0;
        let current = self.current();
        for level in 1..self.options.max_levels - 1 {
            for f in current.get_level_files(level) {
                let overlaps =
                    current.get_overlapping_inputs(level + 1, Some(&f.smallest), Some(&f.largest));
                res = res.max(total_file_size(&overlaps));
            }
        }
        res
    }

    /// Plans a compaction of the files at `level` overlapping `[begin,
    /// end]`, or `None` when nothing overlaps. For levels above 0 the input
    /// list is truncated so one manual call over a huge range does not turn
    /// into one huge compaction; level 0 cannot be truncated because its
    /// files overlap.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction<C>> {
        assert!(
            level + 1 < self.options.max_levels,
            "[version set] invalid manual compaction level {}, expect < {}",
            level,
            self.options.max_levels - 1,
        );
        let version = self.current();
        let mut overlapping_inputs = version.get_overlapping_inputs(level, begin, end);
        if overlapping_inputs.is_empty() {
            return None;
        }
        if level > 0 {
            let mut total = 0;
            for (i, file) in overlapping_inputs.iter().enumerate() {
                total += file.file_size;
                if total >= self.options.max_file_size {
                    overlapping_inputs.truncate(i + 1);
                    break;
                }
            }
        }
        let mut c = Compaction::new(self.options.clone(), level, CompactionReason::Manual);
        c.input_version = Some(version);
        c.inputs.base = overlapping_inputs;
        Some(self.setup_other_inputs(c))
    }

    /// Picks the next compaction to run, or `None` when the tree is healthy.
    /// Size-triggered compactions (some level scored >= 1) take precedence
    /// over seek-triggered ones.
    pub fn pick_compaction(&mut self) -> Option<Compaction<C>> {
        let current = self.current();
        let size_compaction = current.compaction_score >= 1.0;
        let seek_compaction = current.file_to_compact.read().unwrap().clone();

        let mut compaction = if size_compaction {
            let level = current.compaction_level;
            assert!(
                level + 1 < self.options.max_levels,
                "[version set] invalid compaction level {}, expect < {}",
                level,
                self.options.max_levels - 1,
            );
            let mut compaction =
                Compaction::new(self.options.clone(), level, CompactionReason::MaxSize);
            // Round-robin across the key space: first file past the cursor,
            // wrapping to the start when the cursor ran off the end.
            for file in current.get_level_files(level) {
                if self.compaction_pointer[level].is_empty()
                    || self
                        .icmp
                        .compare(file.largest.data(), self.compaction_pointer[level].data())
                        == CmpOrdering::Greater
                {
                    compaction.inputs.base.push(file.clone());
                    break;
                }
            }
            if compaction.inputs.base.is_empty() {
                if let Some(file) = current.get_level_files(level).first() {
                    compaction.inputs.base.push(file.clone());
                }
            }
            compaction
        } else if let Some(file) = seek_compaction {
            let level = current.file_to_compact_level.load(Ordering::Acquire);
            if level + 1 >= self.options.max_levels {
                // Nowhere further down to push this file.
                return None;
            }
            let mut compaction =
                Compaction::new(self.options.clone(), level, CompactionReason::SeekLimit);
            compaction.inputs.base.push(file);
            compaction
        } else {
            return None;
        };

        compaction.input_version = Some(current.clone());
        if compaction.level == 0 {
            // Level-0 files overlap; widen to the transitive closure of the
            // picked file's range so no newer entry is left behind.
            let (smallest, largest) = base_range(&compaction.inputs.base, 0, &self.icmp);
            compaction.inputs.base =
                current.get_overlapping_inputs(0, Some(&smallest), Some(&largest));
            assert!(!compaction.inputs.base.is_empty());
        }
        Some(self.setup_other_inputs(compaction))
    }

    // Fills in everything beyond `inputs.base`: parent files, an optional
    // base-level expansion, the grandparent set, and the compaction cursor.
    fn setup_other_inputs(&mut self, mut c: Compaction<C>) -> Compaction<C> {
        let current = self.current();
        let level = c.level;
        add_boundary_inputs(&self.icmp, current.get_level_files(level), &mut c.inputs.base);
        let (smallest, largest) = base_range(&c.inputs.base, level, &self.icmp);
        let mut parent =
            current.get_overlapping_inputs(level + 1, Some(&smallest), Some(&largest));
        let (all_smallest, all_largest) =
            total_range(&c.inputs.base, &parent, level, &self.icmp);

        // Try to grow the base input set without dragging in more parent
        // files: more data compacted per run, but never a cascade.
        let mut expanded0 =
            current.get_overlapping_inputs(level, Some(&all_smallest), Some(&all_largest));
        add_boundary_inputs(&self.icmp, current.get_level_files(level), &mut expanded0);
        let base_size = total_file_size(&c.inputs.base);
        let parent_size = total_file_size(&parent);
        let expanded0_size = total_file_size(&expanded0);
        if expanded0.len() > c.inputs.base.len()
            && parent_size + expanded0_size < self.options.expanded_compaction_byte_size_limit()
        {
            let (new_smallest, new_largest) = base_range(&expanded0, level, &self.icmp);
            let expanded1 =
                current.get_overlapping_inputs(level + 1, Some(&new_smallest), Some(&new_largest));
            if expanded1.len() == parent.len() {
                info!(
                    "expanding@{} {}+{} ({}+{} bytes) to {}+{} ({}+{} bytes)",
                    level,
                    c.inputs.base.len(),
                    parent.len(),
                    base_size,
                    parent_size,
                    expanded0.len(),
                    expanded1.len(),
                    expanded0_size,
                    total_file_size(&expanded1),
                );
                c.inputs.base = expanded0;
                parent = expanded1;
            }
        }

        let (_, largest) = base_range(&c.inputs.base, level, &self.icmp);
        let (all_smallest, all_largest) =
            total_range(&c.inputs.base, &parent, level, &self.icmp);
        if level + 2 < self.options.max_levels {
            c.grand_parents = current.get_overlapping_inputs(
                level + 2,
                Some(&all_smallest),
                Some(&all_largest),
            );
        }
        // Advance the cursor now rather than when the edit lands: a failed
        // compaction should try a different key range next time.
        self.compaction_pointer[level] = largest.clone();
        c.edit
            .file_delta
            .compaction_pointers
            .push((level, largest));
        c.inputs.parent = parent;
        c
    }

    #[inline]
    fn append_new_version(&mut self, v: Version<C>) {
        self.versions.push(Arc::new(v));
        self.gc();
    }

    // Drops superseded versions nobody references anymore. The current
    // version always stays.
    fn gc(&mut self) {
        let last = self.versions.len() - 1;
        let mut i = 0;
        self.versions.retain(|v| {
            let keep = i == last || Arc::strong_count(v) > 1;
            i += 1;
            keep
        })
    }

    // Writes a snapshot of the whole current state (comparator name,
    // compaction cursors, every file) as the first record of a new manifest.
    fn write_snapshot(&self, writer: &mut Writer<S::F>) -> Result<()> {
        let mut edit = VersionEdit::new(self.options.max_levels);
        edit.set_comparator_name(self.icmp.user_comparator.name().to_owned());
        for (level, key) in self.compaction_pointer.iter().enumerate() {
            if !key.is_empty() {
                edit.file_delta
                    .compaction_pointers
                    .push((level, key.clone()));
            }
        }
        let current = self.current();
        for level in 0..self.options.max_levels {
            for file in current.get_level_files(level) {
                edit.add_file(
                    level,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
            }
        }
        let mut record = vec![];
        edit.encode_to(&mut record);
        writer.add_record(&record)?;
        writer.sync()
    }

    // Re-reads the active manifest and reports whether `record` landed in it
    // despite a reported write error.
    fn manifest_contains(&self, record: &[u8]) -> bool {
        let path =
            generate_filename(&self.db_path, FileType::Manifest, self.manifest_file_number);
        let file = match self.storage.open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("manifest re-read {}: {}", path, e);
                return false;
            }
        };
        let mut reader = Reader::new(file, None, true, 0);
        let mut buf = vec![];
        while reader.read_record(&mut buf) {
            if buf.as_slice() == record {
                return true;
            }
        }
        false
    }

    // Keeps appending to the recovered manifest when allowed and still worth
    // it, instead of rewriting a fresh snapshot.
    fn should_reuse_manifest(&mut self, manifest_path: &str, manifest_len: u64) -> bool {
        if !self.options.reuse_logs {
            return false;
        }
        match parse_filename(manifest_path) {
            Some((FileType::Manifest, file_number)) => {
                if manifest_len > self.options.max_file_size {
                    // Too big; start a compacted one.
                    return false;
                }
                match self.storage.open(manifest_path) {
                    Ok(mut f) => match f.seek(SeekFrom::End(0)) {
                        Ok(len) => {
                            info!("reusing MANIFEST {}", manifest_path);
                            self.manifest_writer =
                                Some(Writer::with_block_offset(f, len as usize % BLOCK_SIZE));
                            self.manifest_file_number = file_number;
                            true
                        }
                        Err(e) => {
                            error!("seek MANIFEST {}: {}", manifest_path, e);
                            false
                        }
                    },
                    Err(e) => {
                        error!("reopen MANIFEST {}: {}", manifest_path, e);
                        false
                    }
                }
            }
            _ => false,
        }
    }
}

// Extends `files_to_compact` with the boundary files of its largest key: a
// user key whose entries straddle two files at the same level must be
// compacted as a unit, otherwise an older entry could surface from the lower
// level while the newer one has already moved down.
fn add_boundary_inputs<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    level_files: &[Arc<FileMetaData>],
    files_to_compact: &mut Vec<Arc<FileMetaData>>,
) {
    if files_to_compact.is_empty() {
        return;
    }
    let mut largest_key = {
        let mut largest = &files_to_compact[0];
        for f in files_to_compact.iter().skip(1) {
            if icmp.compare(f.largest.data(), largest.largest.data()) == CmpOrdering::Greater {
                largest = f;
            }
        }
        largest.largest.clone()
    };
    // Appending only the boundary file may leave holes in the picked set;
    // the later overlap query fills them.
    while let Some(file) = find_smallest_boundary_file(icmp, level_files, &largest_key) {
        largest_key = file.largest.clone();
        files_to_compact.push(file);
    }
}

// The file whose smallest key shares `largest_key`'s user key while sorting
// after it (an older entry for the same user key), smallest such first.
fn find_smallest_boundary_file<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    level_files: &[Arc<FileMetaData>],
    largest_key: &InternalKey,
) -> Option<Arc<FileMetaData>> {
    let ucmp = &icmp.user_comparator;
    let mut smallest_boundary_file: Option<&Arc<FileMetaData>> = None;
    for f in level_files {
        if icmp.compare(f.smallest.data(), largest_key.data()) == CmpOrdering::Greater
            && ucmp.compare(f.smallest.user_key(), largest_key.user_key()) == CmpOrdering::Equal
        {
            match smallest_boundary_file {
                None => smallest_boundary_file = Some(f),
                Some(current) => {
                    if icmp.compare(f.smallest.data(), current.smallest.data())
                        == CmpOrdering::Less
                    {
                        smallest_boundary_file = Some(f);
                    }
                }
            }
        }
    }
    smallest_boundary_file.cloned()
}

/// Opens per-file iterators for a `LevelFileNumIterator`'s entries through
/// the table cache.
pub struct FileIterFactory<T: TableCache> {
    options: ReadOptions,
    table_cache: T,
}

impl<T: TableCache> FileIterFactory<T> {
    pub fn new(options: ReadOptions, table_cache: T) -> Self {
        Self {
            options,
            table_cache,
        }
    }
}

impl<T: TableCache> DerivedIterFactory for FileIterFactory<T> {
    type Iter = T::Iter;

    fn derive(&self, value: &[u8]) -> Result<Self::Iter> {
        if value.len() != FILE_META_LENGTH {
            return Err(Error::Corruption(
                "file iterator invoked with unexpected value".to_owned(),
            ));
        }
        let file_number = decode_fixed_64(value);
        let file_size = decode_fixed_64(&value[std::mem::size_of::<u64>()..]);
        self.table_cache
            .new_iter(self.options, file_number, file_size)
    }
}

/// Total size in bytes of `files`.
#[inline]
pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().fold(0, |acc, f| acc + f.file_size)
}



#[cfg(test)]
mod version_set_tests {
    use super::*;
    use crate::compaction::CompactionReason;
    use crate::db::format::ValueType;
    use crate::storage::mem::MemStorage;
    use crate::util::comparator::BytewiseComparator;

    type TestVersionSet = VersionSet<MemStorage, BytewiseComparator>;

    fn ikey(key: &str, seq: u64) -> InternalKey {
        InternalKey::new(key.as_bytes(), seq, ValueType::Value)
    }

    fn new_vset(opts: Options<BytewiseComparator>) -> (TestVersionSet, MemStorage) {
        let storage = MemStorage::default();
        let vset = VersionSet::new("db".to_owned(), Arc::new(opts), storage.clone());
        (vset, storage)
    }

    // Applies one edit adding `(level, number, smallest, largest, size)`
    // tuples.
    fn apply_new_files(
        vset: &mut TestVersionSet,
        files: Vec<(usize, u64, &str, &str, u64)>,
    ) {
        let mut edit = VersionEdit::new(7);
        for (level, number, smallest, largest, size) in files {
            vset.mark_file_number_used(number);
            edit.add_file(level, number, size, ikey(smallest, 100), ikey(largest, 1));
        }
        vset.log_and_apply(edit).unwrap();
    }

    fn numbers_by_level(v: &Version<BytewiseComparator>) -> Vec<Vec<u64>> {
        (0..7)
            .map(|level| {
                let mut ns = v
                    .get_level_files(level)
                    .iter()
                    .map(|f| f.number)
                    .collect::<Vec<_>>();
                ns.sort_unstable();
                ns
            })
            .collect()
    }

    #[test]
    fn test_flush_path_installs_version() {
        let (mut vset, storage) = new_vset(Options::default());
        apply_new_files(&mut vset, vec![(0, 5, "a", "c", 1000)]);
        let current = vset.current();
        assert_eq!(current.get_level_files(0).len(), 1);
        assert!((current.compaction_score - 0.25).abs() < 1e-6);
        assert!(!current.needs_compaction());
        assert!(vset.pick_compaction().is_none());
        // The manifest exists and CURRENT points at it.
        let current_file = generate_filename("db", FileType::Current, 0);
        assert!(storage.exists(&current_file));
        assert_eq!(
            storage.inner_content(&current_file),
            format!("MANIFEST-{:06}\n", vset.manifest_number()).into_bytes()
        );
    }

    #[test]
    fn test_recover_round_trip() {
        let (mut vset, storage) = new_vset(Options::default());
        apply_new_files(
            &mut vset,
            vec![(0, 5, "a", "c", 1000), (1, 6, "d", "f", 1000)],
        );
        let mut edit = VersionEdit::new(7);
        edit.delete_file(0, 5);
        edit.add_file(2, 7, 1000, ikey("a", 100), ikey("c", 1));
        vset.mark_file_number_used(7);
        vset.log_and_apply(edit).unwrap();
        vset.set_last_sequence(42);
        apply_new_files(&mut vset, vec![(0, 8, "x", "z", 1000)]);
        let expected = numbers_by_level(&vset.current());

        let opts = Arc::new(Options::<BytewiseComparator>::default());
        let mut recovered = VersionSet::new("db".to_owned(), opts, storage.clone());
        let need_new_manifest = recovered.recover().unwrap();
        assert!(need_new_manifest);
        assert_eq!(numbers_by_level(&recovered.current()), expected);
        assert_eq!(recovered.last_sequence(), 42);
        assert_eq!(recovered.log_number(), vset.log_number());
        assert_eq!(recovered.manifest_number(), vset.next_file_number());
        assert_eq!(recovered.next_file_number(), vset.next_file_number() + 1);
    }

    #[test]
    fn test_recover_rejects_current_without_newline() {
        let (mut vset, storage) = new_vset(Options::default());
        apply_new_files(&mut vset, vec![(0, 5, "a", "c", 1000)]);
        let current_file = generate_filename("db", FileType::Current, 0);
        let mut content = storage.inner_content(&current_file);
        content.pop();
        storage.overwrite(&current_file, content);
        let opts = Arc::new(Options::<BytewiseComparator>::default());
        let mut recovered = VersionSet::new("db".to_owned(), opts, storage);
        match recovered.recover() {
            Err(Error::Corruption(msg)) => assert!(msg.contains("newline")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_recover_rejects_garbled_manifest() {
        let (mut vset, storage) = new_vset(Options::default());
        apply_new_files(&mut vset, vec![(0, 5, "a", "c", 1000)]);
        let manifest = generate_filename("db", FileType::Manifest, vset.manifest_number());
        let mut raw = storage.inner_content(&manifest);
        let mid = raw.len() / 2;
        raw[mid] ^= 0xff;
        storage.overwrite(&manifest, raw);
        let opts = Arc::new(Options::<BytewiseComparator>::default());
        let mut recovered = VersionSet::new("db".to_owned(), opts, storage);
        assert!(recovered.recover().is_err());
    }

    #[test]
    fn test_recover_missing_current_fails() {
        let storage = MemStorage::default();
        let opts = Arc::new(Options::<BytewiseComparator>::default());
        let mut vset = VersionSet::new("db".to_owned(), opts, storage);
        assert!(vset.recover().is_err());
    }

    #[test]
    fn test_pick_compaction_l0_trigger() {
        let (mut vset, _) = new_vset(Options::default());
        apply_new_files(
            &mut vset,
            vec![
                (0, 1, "a", "d", 1000),
                (0, 2, "b", "e", 1000),
                (0, 3, "c", "f", 1000),
                (0, 4, "d", "g", 1000),
            ],
        );
        let current = vset.current();
        assert_eq!(current.compaction_level, 0);
        assert!((current.compaction_score - 1.0).abs() < 1e-6);

        let c = vset.pick_compaction().expect("should pick a compaction");
        assert_eq!(c.reason, CompactionReason::MaxSize);
        assert_eq!(c.level, 0);
        // The transitive level-0 closure pulls in all four files.
        assert_eq!(c.inputs.base.len(), 4);
        assert!(c.inputs.parent.is_empty());
        assert!(!c.is_trivial_move());
        // The cursor advanced to the end of the picked range, both in the
        // set and in the pending edit.
        assert_eq!(vset.compaction_pointer[0].user_key(), b"g");
        assert_eq!(c.edit.file_delta.compaction_pointers.len(), 1);
    }

    #[test]
    fn test_trivial_move() {
        let (mut vset, _) = new_vset(Options::default());
        // One level-1 file bigger than the 10 MiB level budget.
        apply_new_files(&mut vset, vec![(1, 7, "m", "p", 11 * 1024 * 1024)]);
        let c = vset.pick_compaction().expect("should pick a compaction");
        assert_eq!(c.reason, CompactionReason::MaxSize);
        assert_eq!(c.level, 1);
        assert_eq!(c.inputs.base.len(), 1);
        assert!(c.inputs.parent.is_empty());
        assert!(c.grand_parents.is_empty());
        assert!(c.is_trivial_move());

        // The executor re-parents the file with a plain edit.
        let mut edit = VersionEdit::new(7);
        edit.delete_file(1, 7);
        edit.add_file(
            2,
            7,
            11 * 1024 * 1024,
            ikey("m", 100),
            ikey("p", 1),
        );
        vset.log_and_apply(edit).unwrap();
        let v = numbers_by_level(&vset.current());
        assert!(v[1].is_empty());
        assert_eq!(v[2], vec![7]);
    }

    #[test]
    fn test_seek_triggered_compaction() {
        let (mut vset, _) = new_vset(Options::default());
        apply_new_files(&mut vset, vec![(1, 7, "m", "p", 1000)]);
        let current = vset.current();
        assert!(current.compaction_score < 1.0);
        let file = current.get_level_files(1)[0].clone();
        *current.file_to_compact.write().unwrap() = Some(file);
        current.file_to_compact_level.store(1, Ordering::Release);

        let c = vset.pick_compaction().expect("should pick a compaction");
        assert_eq!(c.reason, CompactionReason::SeekLimit);
        assert_eq!(c.level, 1);
        assert_eq!(c.inputs.base.len(), 1);
        assert_eq!(c.inputs.base[0].number, 7);
    }

    #[test]
    fn test_pick_compaction_none_when_healthy() {
        let (mut vset, _) = new_vset(Options::default());
        assert!(vset.pick_compaction().is_none());
        apply_new_files(&mut vset, vec![(1, 7, "m", "p", 1000)]);
        assert!(vset.pick_compaction().is_none());
    }

    #[test]
    fn test_expansion_without_parent_growth() {
        let opts = Options::<BytewiseComparator> {
            l0_compaction_threshold: 2,
            ..Options::default()
        };
        let (mut vset, _) = new_vset(opts);
        apply_new_files(
            &mut vset,
            vec![
                (0, 1, "b", "d", 1000),
                (0, 2, "e", "f", 1000),
                (1, 3, "a", "c", 1000),
                (1, 4, "c", "e", 1000),
            ],
        );
        let c = vset.pick_compaction().expect("should pick a compaction");
        assert_eq!(c.level, 0);
        // The parent range [a..e] makes level-0 file #2 eligible, and taking
        // it drags in no further parent files, so the expansion is accepted.
        let mut base = c.inputs.base.iter().map(|f| f.number).collect::<Vec<_>>();
        base.sort_unstable();
        assert_eq!(base, vec![1, 2]);
        let mut parent = c.inputs.parent.iter().map(|f| f.number).collect::<Vec<_>>();
        parent.sort_unstable();
        assert_eq!(parent, vec![3, 4]);
    }

    #[test]
    fn test_compact_range_truncates_above_l0() {
        let (mut vset, _) = new_vset(Options::default());
        let mib = 1024 * 1024;
        apply_new_files(
            &mut vset,
            vec![
                (1, 1, "a", "c", 3 * mib / 2),
                (1, 2, "d", "f", 3 * mib / 2),
                (1, 3, "g", "i", 3 * mib / 2),
            ],
        );
        let c = vset
            .compact_range(1, None, None)
            .expect("should plan a compaction");
        assert_eq!(c.reason, CompactionReason::Manual);
        // 1.5 MiB + 1.5 MiB crosses the 2 MiB cap; the third file is cut.
        assert_eq!(
            c.inputs.base.iter().map(|f| f.number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_compact_range_unbounded_l0_has_no_cap() {
        let (mut vset, _) = new_vset(Options::default());
        let mib = 1024 * 1024;
        apply_new_files(
            &mut vset,
            vec![(0, 1, "a", "c", 3 * mib), (0, 2, "b", "d", 3 * mib)],
        );
        let c = vset
            .compact_range(0, None, None)
            .expect("should plan a compaction");
        assert_eq!(c.inputs.base.len(), 2);
        assert!(vset.compact_range(5, None, None).is_none());
    }

    #[test]
    fn test_manifest_contains() {
        let (mut vset, _) = new_vset(Options::default());
        apply_new_files(&mut vset, vec![(0, 5, "a", "c", 1000)]);
        vset.manifest_writer
            .as_mut()
            .unwrap()
            .add_record(b"probe-record")
            .unwrap();
        assert!(vset.manifest_contains(b"probe-record"));
        assert!(!vset.manifest_contains(b"never-written"));
    }

    #[test]
    fn test_live_files_and_version_gc() {
        let (mut vset, _) = new_vset(Options::default());
        apply_new_files(&mut vset, vec![(0, 5, "a", "c", 1000)]);
        let pinned = vset.current();
        apply_new_files(&mut vset, vec![(0, 6, "d", "f", 1000)]);
        // The pinned version keeps file 5 alive alongside the new state.
        assert_eq!(vset.versions.len(), 2);
        let live = vset.live_files();
        assert!(live.contains(&5));
        assert!(live.contains(&6));

        drop(pinned);
        apply_new_files(&mut vset, vec![(1, 7, "m", "p", 1000)]);
        // Unreferenced ancestors are pruned; only current remains.
        assert_eq!(vset.versions.len(), 1);
        vset.lock_live_files();
        assert!(vset.pending_outputs.contains(&7));
    }

    #[test]
    fn test_new_output_file_number_is_pending() {
        let (mut vset, _) = new_vset(Options::default());
        let n = vset.new_output_file_number();
        assert!(vset.pending_outputs.contains(&n));
        assert!(vset.next_file_number() > n);
    }
}
