use crate::storage::{write_file_atomically, Storage};
use crate::Result;
use std::path::MAIN_SEPARATOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// `<number>.log`: a write-ahead log.
    Log,
    /// `LOCK`: the database lock file.
    Lock,
    /// `<number>.ldb`: an SSTable.
    Table,
    /// `MANIFEST-<number>`: a version-edit log.
    Manifest,
    /// `CURRENT`: names the active manifest.
    Current,
    /// `<number>.dbtmp`: scratch for atomic replacements.
    Temp,
    /// `LOG`: the info log.
    InfoLog,
    /// `LOG.old`: the previous info log.
    OldInfoLog,
}

/// Builds the full path of the file of kind `ft` with sequence `seq` under
/// `dirname`. `seq` is ignored for the singleton files.
pub fn generate_filename(dirname: &str, ft: FileType, seq: u64) -> String {
    match ft {
        FileType::Log => format!("{}{}{:06}.log", dirname, MAIN_SEPARATOR, seq),
        FileType::Lock => format!("{}{}LOCK", dirname, MAIN_SEPARATOR),
        FileType::Table => format!("{}{}{:06}.ldb", dirname, MAIN_SEPARATOR, seq),
        FileType::Manifest => format!("{}{}MANIFEST-{:06}", dirname, MAIN_SEPARATOR, seq),
        FileType::Current => format!("{}{}CURRENT", dirname, MAIN_SEPARATOR),
        FileType::Temp => format!("{}{}{:06}.dbtmp", dirname, MAIN_SEPARATOR, seq),
        FileType::InfoLog => format!("{}{}LOG", dirname, MAIN_SEPARATOR),
        FileType::OldInfoLog => format!("{}{}LOG.old", dirname, MAIN_SEPARATOR),
    }
}

/// Recognizes a database file path, returning its kind and sequence number.
/// Returns `None` for anything else.
pub fn parse_filename<P: AsRef<str>>(path: P) -> Option<(FileType, u64)> {
    let name = path.as_ref().rsplit(MAIN_SEPARATOR).next()?;
    match name {
        "" => return None,
        "CURRENT" => return Some((FileType::Current, 0)),
        "LOCK" => return Some((FileType::Lock, 0)),
        "LOG" => return Some((FileType::InfoLog, 0)),
        "LOG.old" => return Some((FileType::OldInfoLog, 0)),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        let seq = rest.parse::<u64>().ok()?;
        return Some((FileType::Manifest, seq));
    }
    let mut parts = name.splitn(2, '.');
    let stem = parts.next()?;
    let ext = parts.next()?;
    let seq = stem.parse::<u64>().ok()?;
    match ext {
        "log" => Some((FileType::Log, seq)),
        "ldb" => Some((FileType::Table, seq)),
        "dbtmp" => Some((FileType::Temp, seq)),
        _ => None,
    }
}

/// Points `CURRENT` at `MANIFEST-<manifest_file_number>`. The content is
/// staged in a temp file and renamed into place so readers always observe a
/// complete pointer.
pub fn update_current<S: Storage>(
    storage: &S,
    dirname: &str,
    manifest_file_number: u64,
) -> Result<()> {
    // The stored name is relative to the database directory.
    let content = format!("MANIFEST-{:06}\n", manifest_file_number);
    let tmp = generate_filename(dirname, FileType::Temp, manifest_file_number);
    let current = generate_filename(dirname, FileType::Current, 0);
    write_file_atomically(storage, &tmp, &current, content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mem::MemStorage;
    use crate::storage::File;

    #[test]
    fn test_generate_then_parse() {
        let cases = vec![
            (FileType::Log, 17),
            (FileType::Table, 123456789),
            (FileType::Manifest, 3),
            (FileType::Temp, 42),
            (FileType::Current, 0),
            (FileType::Lock, 0),
            (FileType::InfoLog, 0),
            (FileType::OldInfoLog, 0),
        ];
        for (ft, seq) in cases {
            let name = generate_filename("db", ft, seq);
            assert_eq!(parse_filename(&name), Some((ft, seq)), "file {}", name);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for name in vec![
            "db/README",
            "db/MANIFEST",
            "db/MANIFEST-abc",
            "db/12.sst.bak",
            "db/.log",
            "",
        ] {
            assert_eq!(parse_filename(name), None, "input {:?}", name);
        }
    }

    #[test]
    fn test_update_current() {
        let storage = MemStorage::default();
        update_current(&storage, "db", 5).unwrap();
        update_current(&storage, "db", 9).unwrap();
        let current = generate_filename("db", FileType::Current, 0);
        let mut buf = vec![];
        storage.open(&current).unwrap().read_all(&mut buf).unwrap();
        assert_eq!(buf, b"MANIFEST-000009\n");
        // No temp files left behind.
        assert!(!storage.exists(&generate_filename("db", FileType::Temp, 5)));
        assert!(!storage.exists(&generate_filename("db", FileType::Temp, 9)));
    }
}
