//! Transform cache keyed by (path, source length, framework).
//!
//! Entries are grouped by path so one edit evicts every variant of that file.
//! Each path also carries a generation counter: a result computed from a
//! [`CacheTicket`] taken before a clear is dropped instead of stored, so a
//! request racing an edit cannot reinstate output built from the old content.

use super::TransformResult;
use crate::framework::FrameworkTag;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Length and framework half of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_len: usize,
    pub framework: FrameworkTag,
}

/// Snapshot of the generations a computation started under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket {
    path_generation: u64,
    epoch: u64,
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<PathBuf, HashMap<CacheKey, Arc<TransformResult>>>,
    generations: HashMap<PathBuf, u64>,
    /// Bumped by a full clear.
    epoch: u64,
}

impl CacheState {
    fn ticket(&self, path: &Path) -> CacheTicket {
        CacheTicket {
            path_generation: self.generations.get(path).copied().unwrap_or(0),
            epoch: self.epoch,
        }
    }
}

#[derive(Debug, Default)]
pub struct TransformCache {
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TransformCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry, counting the hit or miss.
    pub fn get(&self, path: &Path, key: CacheKey) -> Option<Arc<TransformResult>> {
        let found = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(path)
            .and_then(|variants| variants.get(&key))
            .cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Current generation of `path`, to be passed back to [`Self::insert`].
    pub fn ticket(&self, path: &Path) -> CacheTicket {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ticket(path)
    }

    /// Store a result unless `path` was cleared after `ticket` was taken.
    ///
    /// Returns whether the entry was stored. Concurrent inserts for the same
    /// key are last-write-wins.
    pub fn insert(
        &self,
        path: &Path,
        key: CacheKey,
        ticket: CacheTicket,
        result: Arc<TransformResult>,
    ) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.ticket(path) != ticket {
            return false;
        }
        state
            .entries
            .entry(path.to_path_buf())
            .or_default()
            .insert(key, result);
        true
    }

    /// Evict every entry for `path`, or everything when `path` is `None`.
    pub fn clear(&self, path: Option<&Path>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match path {
            Some(path) => {
                state.entries.remove(path);
                *state.generations.entry(path.to_path_buf()).or_insert(0) += 1;
            }
            None => {
                state.entries.clear();
                state.epoch += 1;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .map(HashMap::len)
            .sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: &str) -> Arc<TransformResult> {
        Arc::new(TransformResult {
            code: code.to_string(),
            source_map: None,
            dependencies: Vec::new(),
        })
    }

    fn key(len: usize) -> CacheKey {
        CacheKey {
            source_len: len,
            framework: FrameworkTag::React,
        }
    }

    #[test]
    fn test_hit_after_insert() {
        let cache = TransformCache::new();
        let path = Path::new("/p/src/App.tsx");
        assert!(cache.get(path, key(10)).is_none());
        let ticket = cache.ticket(path);
        assert!(cache.insert(path, key(10), ticket, result("a")));
        assert_eq!(cache.get(path, key(10)).unwrap().code, "a");
        assert!(cache.get(path, key(11)).is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 2, 1));
    }

    #[test]
    fn test_clear_path_evicts_all_variants() {
        let cache = TransformCache::new();
        let path = Path::new("/p/a.ts");
        let other = Path::new("/p/b.ts");
        for len in [1, 2, 3] {
            cache.insert(path, key(len), cache.ticket(path), result("x"));
        }
        cache.insert(other, key(1), cache.ticket(other), result("y"));

        cache.clear(Some(path));
        assert!(cache.get(path, key(1)).is_none());
        assert!(cache.get(path, key(3)).is_none());
        assert!(cache.get(other, key(1)).is_some());
    }

    #[test]
    fn test_stale_ticket_is_rejected() {
        let cache = TransformCache::new();
        let path = Path::new("/p/a.ts");
        let ticket = cache.ticket(path);
        cache.clear(Some(path));
        assert!(!cache.insert(path, key(1), ticket, result("old")));
        assert!(cache.get(path, key(1)).is_none());

        let fresh = cache.ticket(path);
        assert!(cache.insert(path, key(1), fresh, result("new")));
    }

    #[test]
    fn test_full_clear_invalidates_outstanding_tickets() {
        let cache = TransformCache::new();
        let path = Path::new("/p/a.ts");
        let ticket = cache.ticket(path);
        cache.clear(None);
        assert!(!cache.insert(path, key(1), ticket, result("old")));
        assert_eq!(cache.stats().entries, 0);
    }
}
