pub mod file;
pub mod mem;

use crate::Result;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

/// The filesystem surface the core needs: enough to create, scan and swap
/// manifest files. Implementations must be safe to share across threads.
pub trait Storage: Send + Sync {
    type F: File + 'static;

    /// Creates (truncating) a writable file.
    fn create<P: AsRef<Path>>(&self, name: P) -> Result<Self::F>;

    /// Opens an existing file for reading and appending.
    fn open<P: AsRef<Path>>(&self, name: P) -> Result<Self::F>;

    fn remove<P: AsRef<Path>>(&self, name: P) -> Result<()>;

    fn exists<P: AsRef<Path>>(&self, name: P) -> bool;

    /// Renames `old` to `new`, replacing `new` if present. Must be atomic:
    /// the CURRENT pointer update relies on it.
    fn rename<P: AsRef<Path>>(&self, old: P, new: P) -> Result<()>;

    fn mkdir_all<P: AsRef<Path>>(&self, dir: P) -> Result<()>;

    /// Lists the entries of `dir`.
    fn list<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>>;
}

/// An open file handle.
pub trait File {
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn flush(&mut self) -> Result<()>;
    /// Forces written data onto durable media.
    fn sync(&mut self) -> Result<()>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Reads everything from the current position to EOF.
    fn read_all(&mut self, buf: &mut Vec<u8>) -> Result<usize>;
    fn len(&self) -> Result<u64>;
}

/// Writes `data` to a fresh file named `tmp`, syncs it, then atomically
/// renames it over `target`.
pub fn write_file_atomically<S: Storage, P: AsRef<Path>>(
    storage: &S,
    tmp: P,
    target: P,
    data: &[u8],
) -> Result<()> {
    let result = (|| {
        let mut f = storage.create(tmp.as_ref())?;
        f.write(data)?;
        f.flush()?;
        f.sync()?;
        storage.rename(tmp.as_ref(), target.as_ref())
    })();
    if result.is_err() && storage.exists(tmp.as_ref()) {
        // Leave no half-written temp file behind.
        let _ = storage.remove(tmp.as_ref());
    }
    result
}
