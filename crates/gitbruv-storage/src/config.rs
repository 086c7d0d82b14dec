use serde::{Deserialize, Serialize};

/// Tuning for a repository's object database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Decoded commits kept per repository.
    pub commit_cache_size: usize,
    /// Decoded trees kept per repository.
    pub tree_cache_size: usize,
    /// Pushed packs with at least this many objects are kept as a pack with a
    /// generated index instead of being exploded into loose objects.
    pub unpack_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            commit_cache_size: 4096,
            tree_cache_size: 4096,
            unpack_limit: 100,
        }
    }
}

impl StoreConfig {
    pub fn with_unpack_limit(mut self, limit: usize) -> Self {
        self.unpack_limit = limit;
        self
    }

    pub fn with_cache_sizes(mut self, commits: usize, trees: usize) -> Self {
        self.commit_cache_size = commits;
        self.tree_cache_size = trees;
        self
    }
}
