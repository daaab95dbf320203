use crate::record::{RecordType, BLOCK_SIZE, HEADER_SIZE};
use crate::storage::File;
use crate::util::coding::encode_fixed_32;
use crate::util::crc32;
use crate::Result;

/// Appends length-prefixed, checksummed records to an underlying log file.
pub struct Writer<F: File> {
    dest: F,
    // Write offset within the current block.
    block_offset: usize,
    // crc of each record type byte, precomputed so a record's checksum is a
    // single extend over its payload.
    type_crc: [u32; RecordType::Last as usize + 1],
}

impl<F: File> Writer<F> {
    pub fn new(dest: F) -> Self {
        Self::with_block_offset(dest, 0)
    }

    /// Opens a writer that continues an existing log. `block_offset` must be
    /// `len % BLOCK_SIZE` of the data already present.
    pub fn with_block_offset(dest: F, block_offset: usize) -> Self {
        let mut type_crc = [0u32; RecordType::Last as usize + 1];
        for (t, crc) in type_crc.iter_mut().enumerate() {
            *crc = crc32::hash(&[t as u8]);
        }
        Self {
            dest,
            block_offset,
            type_crc,
        }
    }

    /// Appends `s` as one logical record, fragmenting across blocks as
    /// needed.
    pub fn add_record(&mut self, s: &[u8]) -> Result<()> {
        let mut left = s.len();
        let mut begin = true;
        loop {
            assert!(
                self.block_offset <= BLOCK_SIZE,
                "[record writer] block offset {} overflows block size {}",
                self.block_offset,
                BLOCK_SIZE,
            );
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Not even a header fits; pad the tail and switch to a fresh
                // block. Readers treat the zero bytes as an empty trailer.
                if leftover > 0 {
                    self.dest.write(&vec![0u8; leftover])?;
                }
                self.block_offset = 0;
            }

            let space = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let to_write = left.min(space);
            let end = to_write == left;
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };
            let start = s.len() - left;
            self.emit(record_type, &s[start..start + to_write])?;
            left -= to_write;
            begin = false;
            if left == 0 {
                return Ok(());
            }
        }
    }

    /// Flushes buffered data and syncs the underlying file.
    #[inline]
    pub fn sync(&mut self) -> Result<()> {
        self.dest.flush()?;
        self.dest.sync()
    }

    fn emit(&mut self, rt: RecordType, data: &[u8]) -> Result<()> {
        let size = data.len();
        assert!(
            size <= 0xffff,
            "[record writer] fragment length must fit in 2 bytes, got {}",
            size
        );
        assert!(
            self.block_offset + HEADER_SIZE + size <= BLOCK_SIZE,
            "[record writer] fragment [{:?}] overflows the current block",
            rt,
        );
        let mut header = [0u8; HEADER_SIZE];
        header[4] = (size & 0xff) as u8;
        header[5] = (size >> 8) as u8;
        header[6] = rt as u8;
        let crc = crc32::mask(crc32::extend(self.type_crc[rt as usize], data));
        encode_fixed_32(&mut header, crc);
        self.dest.write(&header)?;
        self.dest.write(data)?;
        self.block_offset += HEADER_SIZE + size;
        Ok(())
    }
}
