//! Tile dispatcher.
//!
//! The [`TileDispatcher`] answers tile requests from the metatile cache and
//! coordinates rendering on a miss:
//!
//! ```text
//! handle(tile, sink)
//!   │
//!   ├─ unknown map / zoom / grid ──► NotFound
//!   │
//!   ├─ open bundle ──► ok ──► read header ─► extract ─► sink
//!   │                  │
//!   │                  └─ fails ──► WaiterRegistry::register
//!   │                                 └─ first waiter ──► EnqueueRequest ─► renderer
//!   │
//! on_datagram(bytes)                                     renderer ─┘
//!   ├─ malformed / foreign ──► dropped
//!   └─ drain group ─► open bundle once ─► extract per waiter ─► sinks
//! ```
//!
//! Rendering happens per bundle, so all misses within one 8×8 block share a
//! single render request while each waiter still receives its own tile.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::MapRegistry;
use crate::coord::{BundleAddress, BundleFingerprint, CoordError, TileAddress};
use crate::metatile::MetatileReader;
use crate::protocol::{CompletionNotice, EnqueueRequest, RequestIdGenerator, DEFAULT_ID_PREFIX};
use crate::render::RenderChannel;
use crate::response::{response_channel, ResponseSink, TileError, TileResponse};
use crate::stats::{StatsSnapshot, TileStats};
use crate::waiters::{WaiterEntry, WaiterId, WaiterRegistry};

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long a request waits for its bundle to be rendered.
    pub render_timeout: Option<Duration>,

    /// Priority attached to render requests.
    pub prio: u8,

    /// Prefix of render request ids.
    pub id_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            render_timeout: Some(Duration::from_secs(crate::config::DEFAULT_RENDER_TIMEOUT_SECS)),
            prio: crate::config::DEFAULT_PRIORITY,
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }
}

/// Serves tiles from the metatile cache and dispatches renders on a miss.
///
/// One instance owns all mutable serving state (waiters, counters). It is
/// built at startup from the map table and shared behind an `Arc`.
pub struct TileDispatcher {
    maps: MapRegistry,
    waiters: Arc<WaiterRegistry>,
    channel: Arc<dyn RenderChannel>,
    ids: RequestIdGenerator,
    stats: TileStats,
    config: DispatcherConfig,
}

impl TileDispatcher {
    /// Creates a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `maps` - Known maps
    /// * `channel` - Transport for render requests
    /// * `config` - Dispatcher settings
    pub fn new(maps: MapRegistry, channel: Arc<dyn RenderChannel>, config: DispatcherConfig) -> Self {
        let stats = TileStats::new(maps.names());
        let ids = RequestIdGenerator::new(&config.id_prefix);
        Self {
            maps,
            waiters: Arc::new(WaiterRegistry::new()),
            channel,
            ids,
            stats,
            config,
        }
    }

    pub fn maps(&self) -> &MapRegistry {
        &self.maps
    }

    pub fn stats(&self) -> &TileStats {
        &self.stats
    }

    pub fn waiters(&self) -> &WaiterRegistry {
        &self.waiters
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Tag identifying this process's render requests.
    pub fn id_tag(&self) -> &str {
        self.ids.tag()
    }

    /// Counters plus the current pending-waiter gauges.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.stats.pending_bundles = self.waiters.pending_groups() as u64;
        snapshot.stats.pending_waiters = self.waiters.pending_waiters() as u64;
        snapshot.stats.oldest_pending_ms = self
            .waiters
            .oldest_pending()
            .map(|age| age.as_millis() as u64);
        snapshot
    }

    /// Handles one tile request.
    ///
    /// Resolves `sink` immediately on a validation failure or cache hit. On a
    /// miss the sink is parked until the bundle's render completes, fails, or
    /// the waiter's deadline expires.
    pub async fn handle(&self, tile: TileAddress, sink: ResponseSink) {
        let Some(map) = self.maps.get(&tile.map) else {
            debug!(tile = %tile, "Unknown map");
            sink.resolve(Err(TileError::NotFound("Unknown map".to_string())));
            return;
        };

        if let Err(e) = tile.validate(map.min_zoom, map.max_zoom) {
            debug!(tile = %tile, error = %e, "Tile out of range");
            let reason = match e {
                CoordError::ZoomOutOfRange { .. } => "z out of range",
                CoordError::TileOutOfRange { .. } => "Not found",
            };
            sink.resolve(Err(TileError::NotFound(reason.to_string())));
            return;
        }

        self.stats.record_requested(&tile.map);

        let bundle = tile.bundle();
        let path = bundle.path_in(&map.tile_dir);

        match MetatileReader::open(&path).await {
            Ok(mut reader) => {
                let response = read_tile(&mut reader, &tile).await;
                if response.is_ok() {
                    self.stats.record_from_cache(&tile.map);
                }
                debug!(tile = %tile, ok = response.is_ok(), "Cache hit");
                sink.resolve(response);
            }
            Err(e) => {
                trace!(tile = %tile, path = %path.display(), error = %e, "Cache miss");
                self.park(tile, bundle, sink).await;
            }
        }
    }

    /// Handles one tile request and waits for its response.
    pub async fn fetch(&self, tile: TileAddress) -> TileResponse {
        let (sink, rx) = response_channel();
        self.handle(tile, sink).await;
        rx.await
            .unwrap_or_else(|_| Err(TileError::Unavailable("request dropped".to_string())))
    }

    /// Registers a waiter and requests the render if it is the first one.
    async fn park(&self, tile: TileAddress, bundle: BundleAddress, sink: ResponseSink) {
        let fingerprint = bundle.fingerprint();
        let registration = self.waiters.register(fingerprint.clone(), tile, sink);
        self.arm_deadline(&fingerprint, registration.id);

        if !registration.is_first {
            debug!(fingerprint = %fingerprint, "Coalesced with in-flight render");
            return;
        }

        let request = EnqueueRequest::new(self.ids.next_id(), self.config.prio, bundle);
        debug!(id = %request.id, fingerprint = %fingerprint, "Requesting render");

        // The group now depends on this send, so it must outlive the caller
        let channel = Arc::clone(&self.channel);
        let waiters = Arc::clone(&self.waiters);
        let sender = tokio::spawn(async move {
            if let Err(e) = channel.send(request).await {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to send render request");
                if let Some(entries) = waiters.drain(&fingerprint) {
                    fail_all(entries, TileError::Unavailable(e.to_string()));
                }
            }
        });

        if let Err(e) = sender.await {
            if e.is_panic() {
                warn!(error = %e, "Render request sender panicked");
            }
        }
    }

    /// Starts the deadline timer for a parked waiter.
    fn arm_deadline(&self, fingerprint: &BundleFingerprint, id: WaiterId) {
        let Some(timeout) = self.config.render_timeout else {
            return;
        };

        let waiters = Arc::clone(&self.waiters);
        let key = fingerprint.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(entry) = waiters.remove(&key, id) {
                warn!(
                    fingerprint = %key,
                    tile = %entry.tile(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Render deadline expired"
                );
                entry.resolve(Err(TileError::RenderTimeout));
            }
        });

        if !self.waiters.attach_deadline(fingerprint, id, timer.abort_handle()) {
            timer.abort();
        }
    }

    /// Handles a datagram from the control channel.
    ///
    /// Malformed messages and messages for other processes are dropped.
    pub async fn on_datagram(&self, datagram: &[u8]) {
        let notice = match CompletionNotice::decode(datagram) {
            Ok(notice) => notice,
            Err(e) => {
                debug!(error = %e, "Dropping malformed control message");
                return;
            }
        };

        if !self.ids.is_own(&notice.id) {
            trace!(id = %notice.id, "Ignoring foreign control message");
            return;
        }

        self.on_completion(notice).await;
    }

    /// Delivers a rendered bundle to everyone waiting on it.
    pub async fn on_completion(&self, notice: CompletionNotice) {
        let fingerprint = notice.fingerprint();
        let Some(entries) = self.waiters.drain(&fingerprint) else {
            debug!(id = %notice.id, fingerprint = %fingerprint, "Completion without waiters");
            return;
        };

        if notice.is_error() {
            let reason = notice
                .errmsg
                .clone()
                .unwrap_or_else(|| "renderer reported an error".to_string());
            warn!(fingerprint = %fingerprint, reason = %reason, waiters = entries.len(), "Render failed");
            fail_all(entries, TileError::RenderFailed(reason));
            return;
        }

        let Some(map) = self.maps.get(&notice.bundle.map) else {
            fail_all(entries, TileError::RenderFailed("unknown map".to_string()));
            return;
        };

        let path = notice.bundle.path_in(&map.tile_dir);
        let mut reader = match MetatileReader::open(&path).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint,
                    path = %path.display(),
                    error = %e,
                    waiters = entries.len(),
                    "Rendered bundle missing"
                );
                fail_all(entries, TileError::RenderFailed(format!("bundle unavailable: {}", e)));
                return;
            }
        };

        debug!(fingerprint = %fingerprint, waiters = entries.len(), "Serving rendered bundle");
        for entry in entries {
            let response = read_tile(&mut reader, entry.tile()).await;
            if response.is_ok() {
                self.stats.record_rendered(&entry.tile().map);
            }
            entry.resolve(response);
        }
    }

    /// Fails every outstanding waiter. Returns how many were resolved.
    pub fn shutdown(&self) -> usize {
        let mut resolved = 0;
        for (fingerprint, entries) in self.waiters.drain_all() {
            debug!(fingerprint = %fingerprint, waiters = entries.len(), "Abandoning pending render");
            resolved += entries.len();
            fail_all(entries, TileError::Unavailable("server shutting down".to_string()));
        }
        resolved
    }
}

async fn read_tile(reader: &mut MetatileReader, tile: &TileAddress) -> TileResponse {
    reader.read_tile(tile.x, tile.y).await.map_err(|e| {
        warn!(
            tile = %tile,
            path = %reader.path().display(),
            error = %e,
            "Corrupt bundle"
        );
        TileError::BundleCorrupt(e.to_string())
    })
}

fn fail_all(entries: Vec<WaiterEntry>, error: TileError) {
    for entry in entries {
        entry.resolve(Err(error.clone()));
    }
}
