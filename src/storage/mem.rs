use crate::storage::{File, Storage};
use crate::{Error, Result};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

type FileNode = Arc<RwLock<Vec<u8>>>;

/// An in-memory `Storage`, keyed by path string. Handles share the byte
/// buffer, so a reader opened after a writer sees its writes. Used to drive
/// the manifest write/recover paths hermetically in tests.
#[derive(Clone, Default)]
pub struct MemStorage {
    files: Arc<RwLock<HashMap<String, FileNode>>>,
}

fn key_of<P: AsRef<Path>>(name: P) -> String {
    name.as_ref().to_string_lossy().into_owned()
}

impl MemStorage {
    fn node<P: AsRef<Path>>(&self, name: P) -> Option<FileNode> {
        self.files.read().unwrap().get(&key_of(name)).cloned()
    }
}

impl Storage for MemStorage {
    type F = MemFile;

    fn create<P: AsRef<Path>>(&self, name: P) -> Result<Self::F> {
        let node: FileNode = Arc::new(RwLock::new(vec![]));
        self.files
            .write()
            .unwrap()
            .insert(key_of(name), node.clone());
        Ok(MemFile { node, pos: 0 })
    }

    fn open<P: AsRef<Path>>(&self, name: P) -> Result<Self::F> {
        match self.node(name.as_ref()) {
            Some(node) => Ok(MemFile { node, pos: 0 }),
            None => Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {:?}", name.as_ref()),
            ))),
        }
    }

    fn remove<P: AsRef<Path>>(&self, name: P) -> Result<()> {
        match self.files.write().unwrap().remove(&key_of(name.as_ref())) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("{:?}", name.as_ref()))),
        }
    }

    fn exists<P: AsRef<Path>>(&self, name: P) -> bool {
        self.files.read().unwrap().contains_key(&key_of(name))
    }

    fn rename<P: AsRef<Path>>(&self, old: P, new: P) -> Result<()> {
        let mut files = self.files.write().unwrap();
        match files.remove(&key_of(old.as_ref())) {
            Some(node) => {
                files.insert(key_of(new), node);
                Ok(())
            }
            None => Err(Error::NotFound(format!("{:?}", old.as_ref()))),
        }
    }

    fn mkdir_all<P: AsRef<Path>>(&self, _dir: P) -> Result<()> {
        Ok(())
    }

    fn list<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let prefix = key_of(dir);
        let files = self.files.read().unwrap();
        Ok(files
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .map(PathBuf::from)
            .collect())
    }
}

#[cfg(test)]
impl MemStorage {
    pub(crate) fn inner_content(&self, name: &str) -> Vec<u8> {
        self.node(name).unwrap().read().unwrap().clone()
    }

    pub(crate) fn overwrite(&self, name: &str, data: Vec<u8>) {
        *self.node(name).unwrap().write().unwrap() = data;
    }
}

pub struct MemFile {
    node: FileNode,
    pos: usize,
}

impl File for MemFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut data = self.node.write().unwrap();
        if self.pos < data.len() {
            let overlap = buf.len().min(data.len() - self.pos);
            data[self.pos..self.pos + overlap].copy_from_slice(&buf[..overlap]);
            data.extend_from_slice(&buf[overlap..]);
        } else {
            data.resize(self.pos, 0);
            data.extend_from_slice(buf);
        }
        self.pos += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.node.read().unwrap().len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(Error::InvalidArgument("seek before start".to_owned()));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.node.read().unwrap();
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let data = self.node.read().unwrap();
        let n = data.len().saturating_sub(self.pos);
        buf.extend_from_slice(&data[self.pos..]);
        self.pos = data.len();
        Ok(n)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.node.read().unwrap().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_open_shares_content() {
        let storage = MemStorage::default();
        let mut w = storage.create("a/f1").unwrap();
        w.write(b"abc").unwrap();
        let mut r = storage.open("a/f1").unwrap();
        let mut buf = vec![];
        assert_eq!(r.read_all(&mut buf).unwrap(), 3);
        assert_eq!(buf, b"abc");
        // Writes after the open are visible too.
        w.write(b"def").unwrap();
        let mut rest = vec![];
        r.read_all(&mut rest).unwrap();
        assert_eq!(rest, b"def");
    }

    #[test]
    fn test_open_missing_fails() {
        let storage = MemStorage::default();
        assert!(storage.open("nope").is_err());
        assert!(!storage.exists("nope"));
    }

    #[test]
    fn test_rename_replaces_target() {
        let storage = MemStorage::default();
        storage.create("old").unwrap().write(b"x").unwrap();
        storage.create("target").unwrap().write(b"stale").unwrap();
        storage.rename("old", "target").unwrap();
        assert!(!storage.exists("old"));
        assert_eq!(storage.inner_content("target"), b"x");
    }

    #[test]
    fn test_seek_and_overwrite() {
        let storage = MemStorage::default();
        let mut f = storage.create("f").unwrap();
        f.write(b"hello world").unwrap();
        f.seek(SeekFrom::Start(6)).unwrap();
        f.write(b"there").unwrap();
        assert_eq!(storage.inner_content("f"), b"hello there");
        assert_eq!(f.seek(SeekFrom::End(0)).unwrap(), 11);
    }
}
