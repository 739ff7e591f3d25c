//! Integration tests for request coalescing.
//!
//! These tests drive the dispatcher with many concurrent requests against a
//! simulated renderer and verify:
//! - one render request per bundle, however many requests miss it
//! - every waiter receives its own tile from the shared bundle
//! - failures stay confined to the bundle they belong to
//!
//! Run with: `cargo test --test coalescing_integration`

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use tileserver::config::{MapDefinition, MapRegistry};
use tileserver::coord::{BundleAddress, TileAddress};
use tileserver::dispatcher::{DispatcherConfig, TileDispatcher};
use tileserver::metatile::MetatileWriter;
use tileserver::protocol::EnqueueRequest;
use tileserver::render::{BoxFuture, RenderChannel, RenderChannelError};
use tileserver::response::TileError;

// ============================================================================
// Helper Functions
// ============================================================================

/// Render channel that hands requests to an in-process renderer task.
struct QueueChannel {
    tx: mpsc::UnboundedSender<EnqueueRequest>,
    log: Mutex<Vec<EnqueueRequest>>,
}

impl RenderChannel for QueueChannel {
    fn send(&self, request: EnqueueRequest) -> BoxFuture<'_, Result<(), RenderChannelError>> {
        self.log.lock().unwrap().push(request.clone());
        let sent = self
            .tx
            .send(request)
            .map_err(|_| RenderChannelError::Io(std::io::Error::other("renderer gone")));
        Box::pin(async move { sent })
    }
}

/// What the simulated renderer does with a request.
#[derive(Clone, Copy)]
enum RenderMode {
    /// Write a full bundle, then report success
    Render,
    /// Report success without writing anything
    Forget,
    /// Write a header whose entries point past the end of the file
    Corrupt,
}

fn tile_image(tile: &TileAddress) -> Bytes {
    Bytes::from(format!("tile {}/{}/{}", tile.zoom, tile.x, tile.y))
}

fn write_bundle(tile_dir: &Path, bundle: &BundleAddress) {
    let mut writer = MetatileWriter::new(bundle.x, bundle.y, bundle.zoom);
    for dy in 0..8 {
        for dx in 0..8 {
            let tile = TileAddress::new(bundle.map.clone(), bundle.zoom, bundle.x + dx, bundle.y + dy);
            writer.set_tile(tile.x, tile.y, tile_image(&tile).to_vec());
        }
    }
    writer.write_to(&bundle.path_in(tile_dir)).unwrap();
}

fn write_corrupt_bundle(tile_dir: &Path, bundle: &BundleAddress) {
    let mut writer = MetatileWriter::new(bundle.x, bundle.y, bundle.zoom);
    for dx in 0..8 {
        writer.set_tile(bundle.x + dx, bundle.y, vec![0u8; 64]);
    }
    let bytes = writer.to_bytes();
    let path = bundle.path_in(tile_dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, &bytes[..600]).unwrap();
}

struct Harness {
    dispatcher: Arc<TileDispatcher>,
    channel: Arc<QueueChannel>,
    tile_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn requests(&self) -> Vec<EnqueueRequest> {
        self.channel.log.lock().unwrap().clone()
    }
}

/// Builds a dispatcher whose renderer picks a mode per bundle and answers
/// after `delay`.
fn harness(delay: Duration, mode: impl Fn(&BundleAddress) -> RenderMode + Send + 'static) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let tile_dir = dir.path().join("osm");
    let maps = MapRegistry::from_definitions(vec![MapDefinition::new("osm", 0, 18, &tile_dir)])
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<EnqueueRequest>();
    let channel = Arc::new(QueueChannel {
        tx,
        log: Mutex::new(Vec::new()),
    });
    let config = DispatcherConfig {
        render_timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    };
    let dispatcher = Arc::new(TileDispatcher::new(maps, channel.clone(), config));

    let renderer = Arc::clone(&dispatcher);
    let renderer_dir = tile_dir.clone();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            tokio::time::sleep(delay).await;
            match mode(&request.bundle) {
                RenderMode::Render => write_bundle(&renderer_dir, &request.bundle),
                RenderMode::Forget => {}
                RenderMode::Corrupt => write_corrupt_bundle(&renderer_dir, &request.bundle),
            }
            let reply = format!("{}result=ok\n", request.encode());
            renderer.on_datagram(reply.as_bytes()).await;
        }
    });

    Harness {
        dispatcher,
        channel,
        tile_dir,
        _dir: dir,
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Many concurrent misses on one bundle produce exactly one render request,
/// and every requester gets its own tile.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_render() {
    let h = harness(Duration::from_millis(100), |_| RenderMode::Render);

    let mut handles = Vec::new();
    for i in 0..64u32 {
        let dispatcher = Arc::clone(&h.dispatcher);
        let tile = TileAddress::new("osm", 12, 1024 + i % 8, 512 + i / 8);
        handles.push(tokio::spawn(async move {
            let response = dispatcher.fetch(tile.clone()).await;
            (tile, response)
        }));
    }

    for handle in handles {
        let (tile, response) = handle.await.unwrap();
        assert_eq!(response, Ok(tile_image(&tile)), "tile {}", tile);
    }

    let requests = h.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].bundle, BundleAddress::containing("osm", 12, 1024, 512));
    assert_eq!(h.dispatcher.waiters().pending_groups(), 0);

    let stats = h.dispatcher.stats_snapshot();
    assert_eq!(stats.stats.tiles_requested, 64);
    assert_eq!(stats.stats.tiles_rendered + stats.stats.tiles_from_cache, 64);
}

/// Different bundles get independent render requests.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_bundles_render_independently() {
    let h = harness(Duration::from_millis(50), |_| RenderMode::Render);

    let tiles: Vec<TileAddress> = (0..4u32)
        .flat_map(|b| (0..3u32).map(move |i| TileAddress::new("osm", 10, b * 8 + i, 0)))
        .collect();

    let responses = futures::future::join_all(tiles.iter().map(|tile| {
        let dispatcher = Arc::clone(&h.dispatcher);
        let tile = tile.clone();
        async move { dispatcher.fetch(tile).await }
    }))
    .await;

    for (tile, response) in tiles.iter().zip(responses) {
        assert_eq!(response, Ok(tile_image(tile)));
    }
    assert_eq!(h.requests().len(), 4);
}

/// Requests after a completed render are served from the cache without a
/// new render.
#[tokio::test]
async fn test_rendered_bundle_serves_later_requests_from_cache() {
    let h = harness(Duration::from_millis(10), |_| RenderMode::Render);

    let first = TileAddress::new("osm", 8, 3, 4);
    assert_eq!(h.dispatcher.fetch(first.clone()).await, Ok(tile_image(&first)));

    let neighbour = TileAddress::new("osm", 8, 7, 7);
    assert_eq!(h.dispatcher.fetch(neighbour.clone()).await, Ok(tile_image(&neighbour)));

    assert_eq!(h.requests().len(), 1);
    let stats = h.dispatcher.stats_snapshot();
    assert_eq!(stats.stats.tiles_rendered, 1);
    assert_eq!(stats.stats.tiles_from_cache, 1);
    assert!(BundleAddress::containing("osm", 8, 0, 0).path_in(&h.tile_dir).exists());
}

/// A renderer that reports success without producing the bundle fails the
/// group, and a later request triggers a fresh render.
#[tokio::test]
async fn test_missing_bundle_after_completion_then_retry() {
    let h = harness(Duration::from_millis(10), |_| RenderMode::Forget);
    let tile = TileAddress::new("osm", 6, 1, 1);

    let response = h.dispatcher.fetch(tile.clone()).await;
    assert!(matches!(response, Err(TileError::RenderFailed(_))));

    let response = h.dispatcher.fetch(tile).await;
    assert!(matches!(response, Err(TileError::RenderFailed(_))));
    assert_eq!(h.requests().len(), 2);
}

/// A corrupt bundle fails every waiter whose payload is unreadable while
/// other bundles are served normally.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_corrupt_bundle_is_isolated() {
    let h = harness(Duration::from_millis(50), |bundle| {
        if bundle.x == 0 {
            RenderMode::Corrupt
        } else {
            RenderMode::Render
        }
    });

    let bad: Vec<TileAddress> = (1..8u32).map(|x| TileAddress::new("osm", 10, x, 0)).collect();
    let good: Vec<TileAddress> = (0..8u32).map(|x| TileAddress::new("osm", 10, 8 + x, 0)).collect();

    let bad_responses = futures::future::join_all(bad.iter().cloned().map(|tile| {
        let dispatcher = Arc::clone(&h.dispatcher);
        async move { dispatcher.fetch(tile).await }
    }));
    let good_responses = futures::future::join_all(good.iter().cloned().map(|tile| {
        let dispatcher = Arc::clone(&h.dispatcher);
        async move { dispatcher.fetch(tile).await }
    }));
    let (bad_responses, good_responses) = tokio::join!(bad_responses, good_responses);

    for response in bad_responses {
        assert!(matches!(response, Err(TileError::BundleCorrupt(_))));
    }
    for (tile, response) in good.iter().zip(good_responses) {
        assert_eq!(response, Ok(tile_image(tile)));
    }
}

/// Requests outside the map's range never reach the renderer.
#[tokio::test]
async fn test_out_of_range_requests_never_render() {
    let h = harness(Duration::from_millis(10), |_| RenderMode::Render);

    for tile in [
        TileAddress::new("osm", 19, 0, 0),
        TileAddress::new("osm", 3, 8, 0),
        TileAddress::new("osm", 3, 0, 8),
        TileAddress::new("topo", 3, 0, 0),
    ] {
        let response = h.dispatcher.fetch(tile).await;
        assert!(matches!(response, Err(TileError::NotFound(_))));
    }

    assert!(h.requests().is_empty());
    assert!(!h.tile_dir.exists());
}
