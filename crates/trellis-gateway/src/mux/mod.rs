//! The request-routing core.
//!
//! [`Mux`] owns the single atomically-replaced pointer to the active
//! [`MuxInstance`]. Instances are immutable once published, so readers are
//! lock-free: a request that loaded the previous instance keeps using it and
//! the instance (with its route cache) is reclaimed when the last reader
//! drops its handle.

mod cache;
mod instance;
mod verdict;

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info};

use crate::config::Config;
use crate::metrics;

pub use cache::{CacheKey, CacheStats, RouteCache};
pub use instance::{MuxInstance, MuxPath, MuxRule};
pub use verdict::Verdict;

pub struct Mux {
    inst: ArcSwap<MuxInstance>,
}

impl Mux {
    /// Starts with an empty instance so the mux is usable (every request is
    /// a 404) before the first reload.
    pub fn new() -> Self {
        Self {
            inst: ArcSwap::from_pointee(MuxInstance::default()),
        }
    }

    /// Compile `config` into a fresh instance and publish it. In-flight
    /// requests finish against whichever instance they already loaded; the
    /// superseded instance and its cache are dropped once they release it.
    pub fn reload(&self, config: &Config) {
        let next = Arc::new(MuxInstance::compile(config));
        let prev = self.inst.swap(next);
        metrics::record_reload();
        info!(rules = config.rules.len(), cache_size = config.cache_size, "mux reloaded");
        if let Some(stats) = prev.cache_stats() {
            debug!(
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions,
                "superseded route cache retiring"
            );
        }
    }

    /// An owned handle to the currently-published instance.
    pub fn instance(&self) -> Arc<MuxInstance> {
        self.inst.load_full()
    }

    pub fn close(&self) {
        if let Some(stats) = self.inst.load().cache_stats() {
            info!(
                hits = stats.hits,
                misses = stats.misses,
                size = stats.size,
                "route cache closed"
            );
        }
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}
