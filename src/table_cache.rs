use crate::iterator::Iterator;
use crate::options::ReadOptions;
use crate::Result;

/// The table-reading capability the version core consumes.
///
/// The core never touches SSTable contents itself; it only knows
/// `(file_number, file_size)` pairs and asks the cache to open or probe the
/// corresponding table. The engine wires in an implementation backed by its
/// block cache.
pub trait TableCache: Clone {
    type Iter: Iterator + 'static;

    /// Opens an iterator over the whole table `file_number`.
    fn new_iter(&self, opts: ReadOptions, file_number: u64, file_size: u64) -> Result<Self::Iter>;

    /// Searches table `file_number` for the first entry at or after `ikey`
    /// that shares its user key, returning the raw `(internal_key, value)`
    /// found, or `None` when the table holds nothing relevant.
    ///
    /// The caller decides what the entry means: the sequence/type tail may
    /// mark it a live value or a tombstone, and the user key may differ from
    /// the sought one when the table simply has no entry for it.
    fn get(
        &self,
        opts: ReadOptions,
        ikey: &[u8],
        file_number: u64,
        file_size: u64,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>>;
}
