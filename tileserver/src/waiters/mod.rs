//! Registry of requests waiting on a bundle render.
//!
//! Concurrent cache misses for the same bundle are coalesced into one
//! pending group keyed by [`BundleFingerprint`]. The caller that creates a
//! group is told so and is responsible for sending the single render request
//! for it. A completion drains the whole group at once.
//!
//! # Lifecycle
//!
//! ```text
//! absent ──register──► pending (≥1 waiter) ──drain──► absent
//!                          │    ▲
//!                          └────┘ register / remove (group freed when empty)
//! ```
//!
//! # Thread Safety
//!
//! Groups live in a `DashMap`. Every mutation goes through the map's entry
//! API, which holds the shard lock for the duration, so the "first waiter"
//! decision and the drain are atomic with respect to each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;

use crate::coord::{BundleFingerprint, TileAddress};
use crate::response::{ResponseSink, TileResponse};

/// Identifies one waiter across its lifetime in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// A request waiting for its bundle.
#[derive(Debug)]
pub struct WaiterEntry {
    id: WaiterId,
    tile: TileAddress,
    sink: ResponseSink,
    /// Timer task enforcing this waiter's deadline, if any.
    deadline: Option<AbortHandle>,
}

impl WaiterEntry {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    pub fn tile(&self) -> &TileAddress {
        &self.tile
    }

    /// Resolves the waiter's sink and stops its deadline timer.
    pub fn resolve(mut self, response: TileResponse) -> bool {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
        self.sink.resolve(response)
    }
}

/// Result of [`WaiterRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: WaiterId,
    /// True when this call created the group; the caller must request the
    /// render.
    pub is_first: bool,
}

#[derive(Debug)]
struct PendingGroup {
    entries: Vec<WaiterEntry>,
    created: Instant,
}

/// Keyed store of in-flight bundle fetches.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    groups: DashMap<BundleFingerprint, PendingGroup>,
    next_id: AtomicU64,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a waiter to the group for `fingerprint`, creating the group if
    /// needed.
    ///
    /// Exactly one caller per group lifetime sees `is_first == true`.
    pub fn register(
        &self,
        fingerprint: BundleFingerprint,
        tile: TileAddress,
        sink: ResponseSink,
    ) -> Registration {
        let id = WaiterId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = WaiterEntry {
            id,
            tile,
            sink,
            deadline: None,
        };

        let is_first = match self.groups.entry(fingerprint) {
            Entry::Occupied(mut group) => {
                group.get_mut().entries.push(entry);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingGroup {
                    entries: vec![entry],
                    created: Instant::now(),
                });
                true
            }
        };

        Registration { id, is_first }
    }

    /// Removes and returns every waiter for `fingerprint`, in registration
    /// order. `None` if no group exists.
    pub fn drain(&self, fingerprint: &BundleFingerprint) -> Option<Vec<WaiterEntry>> {
        self.groups
            .remove(fingerprint)
            .map(|(_, group)| group.entries)
    }

    /// Removes a single waiter, leaving its co-waiters in place.
    ///
    /// The group is freed if this was its last waiter, so the next request
    /// for the bundle starts a fresh render.
    pub fn remove(&self, fingerprint: &BundleFingerprint, id: WaiterId) -> Option<WaiterEntry> {
        match self.groups.entry(fingerprint.clone()) {
            Entry::Occupied(mut group) => {
                let pos = group.get().entries.iter().position(|e| e.id == id)?;
                let entry = group.get_mut().entries.remove(pos);
                if group.get().entries.is_empty() {
                    group.remove();
                }
                Some(entry)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Attaches a deadline timer to a registered waiter.
    ///
    /// Returns `false` if the waiter is no longer registered; the caller
    /// should then abort the timer itself.
    pub fn attach_deadline(
        &self,
        fingerprint: &BundleFingerprint,
        id: WaiterId,
        deadline: AbortHandle,
    ) -> bool {
        let Some(mut group) = self.groups.get_mut(fingerprint) else {
            return false;
        };
        match group.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.deadline = Some(deadline);
                true
            }
            None => false,
        }
    }

    /// Removes every group. Used at shutdown.
    pub fn drain_all(&self) -> Vec<(BundleFingerprint, Vec<WaiterEntry>)> {
        let keys: Vec<BundleFingerprint> = self.groups.iter().map(|g| g.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.groups.remove(&key))
            .map(|(key, group)| (key, group.entries))
            .collect()
    }

    pub fn contains(&self, fingerprint: &BundleFingerprint) -> bool {
        self.groups.contains_key(fingerprint)
    }

    /// Number of bundles with at least one waiter.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Total number of waiters across all groups.
    pub fn pending_waiters(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    /// Age of the oldest pending group.
    pub fn oldest_pending(&self) -> Option<Duration> {
        self.groups.iter().map(|g| g.created.elapsed()).max()
    }
}
