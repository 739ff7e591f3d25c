//! Serializable statistics snapshots.

use std::collections::BTreeMap;

use serde::Serialize;

/// Tile counters for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub tiles_requested: u64,
    pub tiles_from_cache: u64,
    pub tiles_rendered: u64,
}

/// Server-wide counters and gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalSnapshot {
    pub tiles_requested: u64,
    pub tiles_from_cache: u64,
    pub tiles_rendered: u64,
    pub http_requests: u64,
    /// Bundles with an outstanding render request
    pub pending_bundles: u64,
    /// Requests waiting on those bundles
    pub pending_waiters: u64,
    /// Age of the longest outstanding render request
    pub oldest_pending_ms: Option<u64>,
}

/// Full statistics document, as served on `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub stats: GlobalSnapshot,
    pub maps: BTreeMap<String, CounterSnapshot>,
}
