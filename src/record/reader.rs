use crate::record::{RecordType, BLOCK_SIZE, HEADER_SIZE};
use crate::storage::File;
use crate::util::coding::decode_fixed_32;
use crate::util::crc32;
use crate::util::reporter::Reporter;
use std::io::SeekFrom;

// Outcome of decoding one physical fragment from the block buffer.
enum Physical {
    Fragment(RecordType, Vec<u8>),
    Eof,
    Bad,
}

/// Sequentially decodes records produced by `record::Writer`, verifying
/// checksums and reporting dropped bytes through an optional `Reporter`.
pub struct Reader<F: File> {
    file: F,
    reporter: Option<Box<dyn Reporter>>,
    verify_checksum: bool,
    // The current block, and the read cursor within it.
    buf: Vec<u8>,
    buf_offset: usize,
    // The file offset just past the buffered block.
    end_of_buffer_offset: u64,
    // Offset of the first location past the end of the last record returned.
    last_record_offset: u64,
    initial_offset: u64,
    eof: bool,
    // After an initial-offset skip we may land inside a fragmented record;
    // swallow fragments until the next record boundary.
    resyncing: bool,
}

impl<F: File> Reader<F> {
    pub fn new(
        file: F,
        reporter: Option<Box<dyn Reporter>>,
        verify_checksum: bool,
        initial_offset: u64,
    ) -> Self {
        Self {
            file,
            reporter,
            verify_checksum,
            buf: vec![],
            buf_offset: 0,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
            initial_offset,
            eof: false,
            resyncing: initial_offset > 0,
        }
    }

    /// Reads the next logical record into `record`. Returns false at EOF.
    pub fn read_record(&mut self, record: &mut Vec<u8>) -> bool {
        if self.last_record_offset < self.initial_offset && !self.skip_to_initial_block() {
            return false;
        }
        record.clear();
        let mut in_fragmented_record = false;
        // Offset of the first fragment of the record being assembled.
        let mut prospective_offset = 0u64;
        loop {
            match self.read_physical_record() {
                Physical::Fragment(rt, mut fragment) => {
                    let fragment_offset = self.end_of_buffer_offset
                        - (self.buf.len() - self.buf_offset) as u64
                        - (HEADER_SIZE + fragment.len()) as u64;
                    if self.resyncing {
                        match rt {
                            RecordType::Middle => continue,
                            RecordType::Last => {
                                self.resyncing = false;
                                continue;
                            }
                            _ => self.resyncing = false,
                        }
                    }
                    match rt {
                        RecordType::Full => {
                            if in_fragmented_record {
                                self.report(record.len() as u64, "partial record without end(1)");
                            }
                            *record = fragment;
                            self.last_record_offset = fragment_offset;
                            return true;
                        }
                        RecordType::First => {
                            if in_fragmented_record {
                                self.report(record.len() as u64, "partial record without end(2)");
                            }
                            prospective_offset = fragment_offset;
                            record.clear();
                            record.append(&mut fragment);
                            in_fragmented_record = true;
                        }
                        RecordType::Middle => {
                            if !in_fragmented_record {
                                self.report(
                                    fragment.len() as u64,
                                    "missing start of fragmented record(1)",
                                );
                            } else {
                                record.append(&mut fragment);
                            }
                        }
                        RecordType::Last => {
                            if !in_fragmented_record {
                                self.report(
                                    fragment.len() as u64,
                                    "missing start of fragmented record(2)",
                                );
                            } else {
                                record.append(&mut fragment);
                                self.last_record_offset = prospective_offset;
                                return true;
                            }
                        }
                        RecordType::Zero | RecordType::Unknown => {
                            self.report(
                                (fragment.len() + if in_fragmented_record { record.len() } else { 0 })
                                    as u64,
                                "unknown record type",
                            );
                            in_fragmented_record = false;
                            record.clear();
                        }
                    }
                }
                Physical::Eof => return false,
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report(record.len() as u64, "error in middle of record");
                        in_fragmented_record = false;
                        record.clear();
                    }
                }
            }
        }
    }

    /// The offset just past the end of the last returned record.
    #[inline]
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    fn read_physical_record(&mut self) -> Physical {
        loop {
            if self.buf.len() - self.buf_offset < HEADER_SIZE {
                if self.eof {
                    // A truncated header at EOF means the writer died
                    // mid-write; not corruption.
                    self.buf.clear();
                    self.buf_offset = 0;
                    return Physical::Eof;
                }
                // Discard the block trailer (if any) and buffer a new block.
                self.buf.clear();
                self.buf_offset = 0;
                let mut block = vec![0u8; BLOCK_SIZE];
                match self.file.read(&mut block) {
                    Ok(read) => {
                        block.truncate(read);
                        self.end_of_buffer_offset += read as u64;
                        self.buf = block;
                        if read < BLOCK_SIZE {
                            self.eof = true;
                        }
                        continue;
                    }
                    Err(e) => {
                        self.report(BLOCK_SIZE as u64, &e.to_string());
                        self.eof = true;
                        return Physical::Eof;
                    }
                }
            }

            let header = &self.buf[self.buf_offset..self.buf_offset + HEADER_SIZE];
            let masked_crc = decode_fixed_32(header);
            let length = (header[4] as usize) | ((header[5] as usize) << 8);
            let type_byte = header[6];
            if HEADER_SIZE + length > self.buf.len() - self.buf_offset {
                let drop_size = (self.buf.len() - self.buf_offset) as u64;
                self.buf.clear();
                self.buf_offset = 0;
                if !self.eof {
                    self.report(drop_size, "bad record length");
                    return Physical::Bad;
                }
                // The writer died while writing this fragment's payload.
                return Physical::Eof;
            }
            if type_byte == RecordType::Zero as u8 && length == 0 {
                // Zero-filled region from preallocation; skip the rest of the
                // buffer without reporting.
                self.buf.clear();
                self.buf_offset = 0;
                return Physical::Bad;
            }

            let data_start = self.buf_offset + HEADER_SIZE;
            let data = &self.buf[data_start..data_start + length];
            if self.verify_checksum {
                let expect = crc32::unmask(masked_crc);
                let actual = crc32::extend(crc32::hash(&[type_byte]), data);
                if expect != actual {
                    // The length field itself may be garbage, so everything
                    // left in the buffer is suspect.
                    let drop_size = (self.buf.len() - self.buf_offset) as u64;
                    self.buf.clear();
                    self.buf_offset = 0;
                    self.report(drop_size, "checksum mismatch");
                    return Physical::Bad;
                }
            }
            let fragment = data.to_vec();
            self.buf_offset += HEADER_SIZE + length;
            return Physical::Fragment(RecordType::from(type_byte as usize), fragment);
        }
    }

    fn skip_to_initial_block(&mut self) -> bool {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start = self.initial_offset - offset_in_block;
        // A record never starts in a block's trailer.
        if offset_in_block > (BLOCK_SIZE - 6) as u64 {
            block_start += BLOCK_SIZE as u64;
        }
        self.end_of_buffer_offset = block_start;
        if block_start > 0 {
            if let Err(e) = self.file.seek(SeekFrom::Start(block_start)) {
                self.report(block_start, &e.to_string());
                return false;
            }
        }
        true
    }

    fn report(&mut self, bytes: u64, reason: &str) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.corruption(bytes, reason);
        }
    }
}
