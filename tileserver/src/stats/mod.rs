//! Tile server statistics.
//!
//! Lock-free counters incremented by the dispatcher and the HTTP layer,
//! globally and per map. The per-map table is fixed at construction from the
//! configured map names, so recording never takes a lock.
//!
//! ```text
//! TileDispatcher ─┐
//!                 ├─► TileStats ─► StatsSnapshot ─► /stats (JSON)
//! HTTP layer ─────┘   (atomics)    (serde)
//! ```

mod snapshot;

pub use snapshot::{CounterSnapshot, GlobalSnapshot, StatsSnapshot};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Tile counters for one scope (global or one map).
#[derive(Debug, Default)]
struct Counters {
    tiles_requested: AtomicU64,
    tiles_from_cache: AtomicU64,
    tiles_rendered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tiles_requested: self.tiles_requested.load(Ordering::Relaxed),
            tiles_from_cache: self.tiles_from_cache.load(Ordering::Relaxed),
            tiles_rendered: self.tiles_rendered.load(Ordering::Relaxed),
        }
    }
}

/// Live statistics.
#[derive(Debug, Default)]
pub struct TileStats {
    http_requests: AtomicU64,
    totals: Counters,
    maps: HashMap<String, Counters>,
}

impl TileStats {
    /// Creates counters for the given map names.
    pub fn new<I, S>(maps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            http_requests: AtomicU64::new(0),
            totals: Counters::default(),
            maps: maps
                .into_iter()
                .map(|name| (name.into(), Counters::default()))
                .collect(),
        }
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A valid tile request was accepted for `map`.
    pub fn record_requested(&self, map: &str) {
        self.bump(map, |c| &c.tiles_requested);
    }

    /// A tile was served straight from an existing bundle.
    pub fn record_from_cache(&self, map: &str) {
        self.bump(map, |c| &c.tiles_from_cache);
    }

    /// A tile was served from a freshly rendered bundle.
    pub fn record_rendered(&self, map: &str) {
        self.bump(map, |c| &c.tiles_rendered);
    }

    fn bump(&self, map: &str, counter: impl Fn(&Counters) -> &AtomicU64) {
        counter(&self.totals).fetch_add(1, Ordering::Relaxed);
        if let Some(counters) = self.maps.get(map) {
            counter(counters).fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of all counters.
    ///
    /// Pending-waiter gauges are left at zero; the dispatcher fills them in.
    pub fn snapshot(&self) -> StatsSnapshot {
        let totals = self.totals.snapshot();
        StatsSnapshot {
            stats: GlobalSnapshot {
                tiles_requested: totals.tiles_requested,
                tiles_from_cache: totals.tiles_from_cache,
                tiles_rendered: totals.tiles_rendered,
                http_requests: self.http_requests.load(Ordering::Relaxed),
                pending_bundles: 0,
                pending_waiters: 0,
                oldest_pending_ms: None,
            },
            maps: self
                .maps
                .iter()
                .map(|(name, counters)| (name.clone(), counters.snapshot()))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}
