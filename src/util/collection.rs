use fxhash::FxHasher;
use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};
use std::hash::BuildHasherDefault;

/// A `HashMap` using the fx hash algorithm. Keys here are small integers or
/// short byte strings, which fx handles well.
pub type HashMap<K, V> = StdHashMap<K, V, BuildHasherDefault<FxHasher>>;

/// A `HashSet` using the fx hash algorithm.
pub type HashSet<V> = StdHashSet<V, BuildHasherDefault<FxHasher>>;
