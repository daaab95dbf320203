//! The version and compaction-planning core of an LSM-tree storage engine.
//!
//! This crate tracks which SSTables belong to which level of the tree,
//! evolves that mapping atomically through a crash-consistent MANIFEST, and
//! decides what to compact next. It performs no table I/O itself: tables are
//! reached through the [`TableCache`] capability and the filesystem through
//! the [`storage::Storage`] trait, so the surrounding engine supplies the
//! write path, the table format, and the compaction executor.
//!
//! The flow is: a flush or compaction produces a [`VersionEdit`];
//! [`VersionSet::log_and_apply`] persists it and installs the resulting
//! [`version::Version`] as current; readers pin whichever version was
//! current when they started; [`VersionSet::pick_compaction`] inspects the
//! current version to plan the next [`Compaction`].

#[macro_use]
extern crate log;

pub mod compaction;
pub mod db;
mod error;
pub mod iterator;
pub mod logger;
pub mod options;
pub mod record;
pub mod storage;
mod table_cache;
pub mod util;
pub mod version;

pub use compaction::{Compaction, CompactionStats, ManualCompaction};
pub use error::{Error, Result};
pub use iterator::Iterator;
pub use logger::Logger;
pub use options::{Options, ReadOptions};
pub use table_cache::TableCache;
pub use util::comparator::{BytewiseComparator, Comparator};
pub use version::version_edit::VersionEdit;
pub use version::version_set::VersionSet;
