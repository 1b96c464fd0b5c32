//! Bounded, thread-safe route cache.
//!
//! Maps a request identity tuple to a precomputed [`Verdict`]. The cache
//! belongs to exactly one `MuxInstance` and is discarded with it, so entries
//! never outlive the graph their `Ok` verdicts point into.

use std::collections::HashMap;
use std::time::Instant;

use hyper::Method;
use parking_lot::RwLock;

use super::verdict::Verdict;

/// Host (with port, as sent), method, and URL path. Headers, query string,
/// and client IP are deliberately excluded; the matcher only stores verdicts
/// whose outcome does not depend on them.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    host: String,
    method: Method,
    path: String,
}

impl CacheKey {
    pub fn new(host: &str, method: &Method, path: &str) -> Self {
        Self {
            host: host.to_string(),
            method: method.clone(),
            path: path.to_string(),
        }
    }
}

struct CacheEntry {
    verdict: Verdict,
    last_accessed: Instant,
    hits: u64,
}

/// Counters for cache behavior.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub size: usize,
}

/// Map and counters under one lock so eviction updates both atomically.
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    stats: CacheStats,
}

pub struct RouteCache {
    capacity: usize,
    state: RwLock<CacheState>,
}

impl std::fmt::Debug for RouteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteCache")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl RouteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: RwLock::new(CacheState {
                entries: HashMap::with_capacity(capacity.min(1024)),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Verdict> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = Instant::now();
                entry.hits += 1;
                let verdict = entry.verdict.clone();
                state.stats.hits += 1;
                Some(verdict)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, verdict: Verdict) {
        if self.capacity == 0 {
            return;
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.entries.len() >= self.capacity && !state.entries.contains_key(&key) {
            Self::evict_one(state);
        }
        state.entries.insert(
            key,
            CacheEntry {
                verdict,
                last_accessed: Instant::now(),
                hits: 0,
            },
        );
        state.stats.inserts += 1;
        state.stats.size = state.entries.len();
    }

    /// Drop the entry least valuable by (hit count, last access): cold and
    /// old before cold and recent before hot.
    fn evict_one(state: &mut CacheState) {
        if let Some(key) = state
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.hits, e.last_accessed))
            .map(|(k, _)| k.clone())
        {
            state.entries.remove(&key);
            state.stats.evictions += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        let mut stats = state.stats.clone();
        stats.size = state.entries.len();
        stats
    }
}
