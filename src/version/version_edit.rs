use crate::db::format::InternalKey;
use crate::util::collection::HashSet;
use crate::util::varint::{VarintU32, VarintU64};
use crate::{Error, Result};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

// Manifest record field tags. Tag 8 was used for large value refs and is no
// longer written; decoding treats it as unknown.
enum Tag {
    Comparator = 1,
    LogNumber = 2,
    NextFileNumber = 3,
    LastSequence = 4,
    CompactPointer = 5,
    DeletedFile = 6,
    NewFile = 7,
    PrevLogNumber = 9,
    Unknown,
}

impl From<u32> for Tag {
    fn from(i: u32) -> Self {
        match i {
            1 => Tag::Comparator,
            2 => Tag::LogNumber,
            3 => Tag::NextFileNumber,
            4 => Tag::LastSequence,
            5 => Tag::CompactPointer,
            6 => Tag::DeletedFile,
            7 => Tag::NewFile,
            9 => Tag::PrevLogNumber,
            _ => Tag::Unknown,
        }
    }
}

/// Metadata of a single SSTable. Immutable once constructed, except for the
/// seek budget, which is a disposable in-memory hint.
#[derive(Debug)]
pub struct FileMetaData {
    /// Seeks allowed before this file becomes a compaction candidate.
    ///
    /// A file that keeps failing to answer lookups is probably heavily
    /// overlapped by the level below; once the budget runs out it is worth
    /// merging it down. Not persisted; reset from the file size on recovery.
    pub allowed_seeks: AtomicUsize,
    pub file_size: u64,
    pub number: u64,
    /// Smallest internal key served by the table.
    pub smallest: InternalKey,
    /// Largest internal key served by the table.
    pub largest: InternalKey,
}

impl FileMetaData {
    /// Resets the seek budget from the file size.
    ///
    /// One seek costs roughly 10ms; compacting 1MiB costs about 25MiB of IO,
    /// also roughly 250ms, so one seek pays for about 40KiB of compaction.
    /// 16KiB per seek is a conservative setting, floored at 100 seeks for
    /// small files.
    #[inline]
    pub fn init_allowed_seeks(&self) {
        let allowed = (self.file_size as usize / (16 * 1024)).max(100);
        self.allowed_seeks.store(allowed, Ordering::Release);
    }
}

impl PartialEq for FileMetaData {
    fn eq(&self, other: &FileMetaData) -> bool {
        // `allowed_seeks` is a hint, not identity.
        self.number == other.number
            && self.file_size == other.file_size
            && self.smallest == other.smallest
            && self.largest == other.largest
    }
}
impl Eq for FileMetaData {}

impl Default for FileMetaData {
    fn default() -> Self {
        Self {
            allowed_seeks: AtomicUsize::new(0),
            file_size: 0,
            number: 0,
            smallest: InternalKey::default(),
            largest: InternalKey::default(),
        }
    }
}

/// The file-level changes an edit applies to its base version.
#[derive(Default, Debug)]
pub struct FileDelta {
    /// Per-level cursor updates: the key where the next size compaction at
    /// that level should start.
    pub compaction_pointers: Vec<(usize, InternalKey)>,
    /// `(level, file_number)` pairs removed by this edit.
    pub deleted_files: HashSet<(usize, u64)>,
    /// Files added by this edit.
    pub new_files: Vec<(usize, FileMetaData)>,
}

/// A delta between two versions: `old version + edit = new version`.
/// Serialized as one manifest record.
pub struct VersionEdit {
    max_levels: usize,
    pub comparator_name: Option<String>,
    /// File number of the write-ahead log in service after this edit.
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    /// The last allocated sequence number.
    pub last_sequence: Option<u64>,
    pub file_delta: FileDelta,
}

impl VersionEdit {
    pub fn new(max_levels: usize) -> Self {
        Self {
            max_levels,
            comparator_name: None,
            log_number: None,
            prev_log_number: None,
            next_file_number: None,
            last_sequence: None,
            file_delta: FileDelta::default(),
        }
    }

    /// Resets everything except the compaction pointers, which accumulate.
    #[inline]
    pub fn clear(&mut self) {
        self.comparator_name = None;
        self.log_number = None;
        self.prev_log_number = None;
        self.next_file_number = None;
        self.last_sequence = None;
        self.file_delta.deleted_files.clear();
        self.file_delta.new_files.clear();
    }

    /// Records the addition of the file `file_number` at `level`.
    pub fn add_file(
        &mut self,
        level: usize,
        file_number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        self.file_delta.new_files.push((
            level,
            FileMetaData {
                allowed_seeks: AtomicUsize::new(0),
                file_size,
                number: file_number,
                smallest,
                largest,
            },
        ))
    }

    /// Records the removal of the file `file_number` from `level`.
    #[inline]
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.file_delta.deleted_files.insert((level, file_number));
    }

    #[inline]
    pub fn set_comparator_name(&mut self, name: String) {
        self.comparator_name = Some(name);
    }

    #[inline]
    pub fn set_log_number(&mut self, n: u64) {
        self.log_number = Some(n);
    }

    #[inline]
    pub fn set_prev_log_number(&mut self, n: u64) {
        self.prev_log_number = Some(n);
    }

    #[inline]
    pub fn set_next_file(&mut self, n: u64) {
        self.next_file_number = Some(n);
    }

    #[inline]
    pub fn set_last_sequence(&mut self, n: u64) {
        self.last_sequence = Some(n);
    }

    /// Appends the tagged encoding of this edit to `dst`.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        if let Some(name) = &self.comparator_name {
            VarintU32::put_varint(dst, Tag::Comparator as u32);
            VarintU32::put_varint_prefixed_slice(dst, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            VarintU32::put_varint(dst, Tag::LogNumber as u32);
            VarintU64::put_varint(dst, n);
        }
        if let Some(n) = self.prev_log_number {
            VarintU32::put_varint(dst, Tag::PrevLogNumber as u32);
            VarintU64::put_varint(dst, n);
        }
        if let Some(n) = self.next_file_number {
            VarintU32::put_varint(dst, Tag::NextFileNumber as u32);
            VarintU64::put_varint(dst, n);
        }
        if let Some(n) = self.last_sequence {
            VarintU32::put_varint(dst, Tag::LastSequence as u32);
            VarintU64::put_varint(dst, n);
        }
        for (level, key) in &self.file_delta.compaction_pointers {
            VarintU32::put_varint(dst, Tag::CompactPointer as u32);
            VarintU32::put_varint(dst, *level as u32);
            VarintU32::put_varint_prefixed_slice(dst, key.data());
        }
        for (level, number) in &self.file_delta.deleted_files {
            VarintU32::put_varint(dst, Tag::DeletedFile as u32);
            VarintU32::put_varint(dst, *level as u32);
            VarintU64::put_varint(dst, *number);
        }
        for (level, f) in &self.file_delta.new_files {
            VarintU32::put_varint(dst, Tag::NewFile as u32);
            VarintU32::put_varint(dst, *level as u32);
            VarintU64::put_varint(dst, f.number);
            VarintU64::put_varint(dst, f.file_size);
            VarintU32::put_varint_prefixed_slice(dst, f.smallest.data());
            VarintU32::put_varint_prefixed_slice(dst, f.largest.data());
        }
    }

    /// Replaces this edit with the decoding of `src`. Any malformed or
    /// unknown field is corruption.
    pub fn decoded_from(&mut self, src: &[u8]) -> Result<()> {
        self.clear();
        let mut s = src;
        while !s.is_empty() {
            let tag = VarintU32::drain_read(&mut s)
                .ok_or_else(|| corrupted("invalid tag"))?;
            match Tag::from(tag) {
                Tag::Comparator => {
                    let raw = VarintU32::get_varint_prefixed_slice(&mut s)
                        .ok_or_else(|| corrupted("comparator name"))?;
                    self.comparator_name = Some(String::from_utf8(raw.to_vec())?);
                }
                Tag::LogNumber => {
                    self.log_number = Some(read_u64(&mut s, "log number")?);
                }
                Tag::NextFileNumber => {
                    self.next_file_number = Some(read_u64(&mut s, "next file number")?);
                }
                Tag::LastSequence => {
                    self.last_sequence = Some(read_u64(&mut s, "last sequence number")?);
                }
                Tag::PrevLogNumber => {
                    self.prev_log_number = Some(read_u64(&mut s, "previous log number")?);
                }
                Tag::CompactPointer => {
                    let level = read_level(&mut s, self.max_levels, "compaction pointer")?;
                    let key = read_internal_key(&mut s, "compaction pointer")?;
                    self.file_delta.compaction_pointers.push((level, key));
                }
                Tag::DeletedFile => {
                    let level = read_level(&mut s, self.max_levels, "deleted file entry")?;
                    let number = read_u64(&mut s, "deleted file entry")?;
                    self.file_delta.deleted_files.insert((level, number));
                }
                Tag::NewFile => {
                    let level = read_level(&mut s, self.max_levels, "new-file entry")?;
                    let number = read_u64(&mut s, "new-file entry")?;
                    let file_size = read_u64(&mut s, "new-file entry")?;
                    let smallest = read_internal_key(&mut s, "new-file entry")?;
                    let largest = read_internal_key(&mut s, "new-file entry")?;
                    self.file_delta.new_files.push((
                        level,
                        FileMetaData {
                            allowed_seeks: AtomicUsize::new(0),
                            file_size,
                            number,
                            smallest,
                            largest,
                        },
                    ));
                }
                Tag::Unknown => return Err(corrupted("unknown tag")),
            }
        }
        Ok(())
    }
}

fn corrupted(what: &str) -> Error {
    Error::Corruption(format!("VersionEdit: {}", what))
}

fn read_u64(src: &mut &[u8], what: &str) -> Result<u64> {
    VarintU64::drain_read(src).ok_or_else(|| corrupted(what))
}

fn read_level(src: &mut &[u8], max_levels: usize, what: &str) -> Result<usize> {
    let level = VarintU32::drain_read(src).ok_or_else(|| corrupted(what))? as usize;
    if level >= max_levels {
        return Err(corrupted(what));
    }
    Ok(level)
}

fn read_internal_key(src: &mut &[u8], what: &str) -> Result<InternalKey> {
    VarintU32::get_varint_prefixed_slice(src)
        .map(InternalKey::decoded_from)
        .ok_or_else(|| corrupted(what))
}

impl Debug for VersionEdit {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "VersionEdit {{")?;
        if let Some(name) = &self.comparator_name {
            write!(f, "\n  Comparator: {}", name)?;
        }
        if let Some(n) = self.log_number {
            write!(f, "\n  LogNumber: {}", n)?;
        }
        if let Some(n) = self.prev_log_number {
            write!(f, "\n  PrevLogNumber: {}", n)?;
        }
        if let Some(n) = self.next_file_number {
            write!(f, "\n  NextFile: {}", n)?;
        }
        if let Some(n) = self.last_sequence {
            write!(f, "\n  LastSeq: {}", n)?;
        }
        for (level, key) in &self.file_delta.compaction_pointers {
            write!(f, "\n  CompactPointer: @{} {:?}", level, key)?;
        }
        for (level, number) in &self.file_delta.deleted_files {
            write!(f, "\n  DeleteFile: @{} #{}", level, number)?;
        }
        for (level, meta) in &self.file_delta.new_files {
            write!(
                f,
                "\n  AddFile: @{} #{} {}bytes range: [{:?}, {:?}]",
                level, meta.number, meta.file_size, meta.smallest, meta.largest
            )?;
        }
        write!(f, "\n}}\n")
    }
}
