use crate::storage::{File, Storage};
use crate::Result;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// `Storage` over the local filesystem.
#[derive(Clone, Copy, Default)]
pub struct FileStorage;

impl Storage for FileStorage {
    type F = SysFile;

    fn create<P: AsRef<Path>>(&self, name: P) -> Result<Self::F> {
        let inner = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .read(true)
            .open(name)?;
        Ok(SysFile { inner })
    }

    fn open<P: AsRef<Path>>(&self, name: P) -> Result<Self::F> {
        let inner = fs::OpenOptions::new().read(true).write(true).open(name)?;
        Ok(SysFile { inner })
    }

    fn remove<P: AsRef<Path>>(&self, name: P) -> Result<()> {
        fs::remove_file(name)?;
        Ok(())
    }

    fn exists<P: AsRef<Path>>(&self, name: P) -> bool {
        name.as_ref().exists()
    }

    fn rename<P: AsRef<Path>>(&self, old: P, new: P) -> Result<()> {
        fs::rename(old, new)?;
        Ok(())
    }

    fn mkdir_all<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn list<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let mut entries = vec![];
        for entry in fs::read_dir(dir)? {
            entries.push(entry?.path());
        }
        Ok(entries)
    }
}

pub struct SysFile {
    inner: fs::File,
}

impl File for SysFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync_all()?;
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let offset = self.inner.seek(pos)?;
        Ok(offset)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // io::Read::read may return early; loop until the buffer is full or
        // EOF so block-sized reads behave the same as on the mem backend.
        let mut total = 0;
        while total < buf.len() {
            let n = self.inner.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let n = self.inner.read_to_end(buf)?;
        Ok(n)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }
}
