//! End-to-end tests for the tile server.
//!
//! A `TileServerApp` is started on loopback sockets against a fake Tirex
//! master that renders bundles into a temporary tile directory. Requests go
//! through real HTTP and real UDP.
//!
//! Run with: `cargo test --test server_integration`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tileserver::app::TileServerApp;
use tileserver::config::{MapDefinition, MapRegistry, ServerConfig};
use tileserver::coord::BundleAddress;
use tileserver::metatile::MetatileWriter;
use tileserver::protocol::Message;

// ============================================================================
// Helper Functions
// ============================================================================

fn tile_body(zoom: u8, x: u32, y: u32) -> String {
    format!("png {}/{}/{}", zoom, x, y)
}

fn render(tile_dir: &Path, bundle: &BundleAddress) {
    let mut writer = MetatileWriter::new(bundle.x, bundle.y, bundle.zoom);
    for dy in 0..8 {
        for dx in 0..8 {
            let (x, y) = (bundle.x + dx, bundle.y + dy);
            writer.set_tile(x, y, tile_body(bundle.zoom, x, y).into_bytes());
        }
    }
    writer.write_to(&bundle.path_in(tile_dir)).unwrap();
}

/// Fake Tirex master.
///
/// Counts requests and, when `answer` is set, renders the bundle and echoes
/// the request back with `result=ok` after a short delay.
struct FakeMaster {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    peers: Arc<Mutex<Vec<SocketAddr>>>,
    _task: JoinHandle<()>,
}

impl FakeMaster {
    async fn spawn(tile_dir: PathBuf, answer: bool) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        let peers = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&peers);

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(peer);
                if !answer {
                    continue;
                }

                let msg = Message::parse(&buf[..len]).unwrap();
                assert_eq!(msg.get("type"), Some("metatile_enqueue_request"));
                let bundle = BundleAddress::containing(
                    msg.get("map").unwrap(),
                    msg.get("z").unwrap().parse().unwrap(),
                    msg.get("x").unwrap().parse().unwrap(),
                    msg.get("y").unwrap().parse().unwrap(),
                );

                tokio::time::sleep(Duration::from_millis(100)).await;
                render(&tile_dir, &bundle);

                let reply = msg.with("result", "ok").encode();
                socket.send_to(reply.as_bytes(), peer).await.unwrap();
            }
        });

        Self {
            addr,
            requests,
            peers,
            _task: task,
        }
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn peers(&self) -> Vec<SocketAddr> {
        self.peers.lock().unwrap().clone()
    }
}

struct Running {
    base: String,
    control: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<Result<(), tileserver::app::AppError>>,
}

async fn start_server(tile_dir: &Path, master: SocketAddr, timeout: Option<Duration>) -> Running {
    let config = ServerConfig::new("/nonexistent")
        .with_http_addr("127.0.0.1:0".parse().unwrap())
        .with_bind_addr("127.0.0.1:0".parse().unwrap())
        .with_master_addr(master)
        .with_render_timeout(timeout);
    let maps = MapRegistry::from_definitions(vec![MapDefinition::new("osm", 0, 18, tile_dir)])
        .unwrap();

    let app = TileServerApp::start(config, maps).await.unwrap();
    let base = format!("http://{}", app.http_addr().unwrap());
    let control = app.control_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(app.run(shutdown.clone()));

    Running {
        base,
        control,
        shutdown,
        server,
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Concurrent HTTP requests for one bundle trigger a single render and all
/// receive their own tile.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_http_miss_renders_once_and_serves_all() {
    let dir = tempfile::tempdir().unwrap();
    let master = FakeMaster::spawn(dir.path().to_path_buf(), true).await;
    let server = start_server(dir.path(), master.addr, Some(Duration::from_secs(10))).await;
    let client = reqwest::Client::new();

    let coords: Vec<(u32, u32)> = (0..8).map(|i| (16 + i, 40 + i % 3)).collect();
    let responses = futures::future::join_all(coords.iter().map(|(x, y)| {
        let url = format!("{}/tiles/osm/10/{}/{}.png", server.base, x, y);
        let client = client.clone();
        async move { client.get(url).send().await.unwrap() }
    }))
    .await;

    for ((x, y), response) in coords.iter().zip(responses) {
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert_eq!(response.text().await.unwrap(), tile_body(10, *x, *y));
    }
    assert_eq!(master.requests(), 1);
    // Completions go back to the socket the request came from
    assert_eq!(master.peers(), vec![server.control]);

    let stats: serde_json::Value = client
        .get(format!("{}/stats", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["stats"]["tiles_requested"], 8);
    assert_eq!(stats["stats"]["pending_waiters"], 0);
    assert_eq!(stats["maps"]["osm"]["tiles_requested"], 8);

    server.shutdown.cancel();
    server.server.await.unwrap().unwrap();
}

/// A silent master leads to a timeout response once the deadline passes.
#[tokio::test]
async fn test_silent_master_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let master = FakeMaster::spawn(dir.path().to_path_buf(), false).await;
    let server = start_server(dir.path(), master.addr, Some(Duration::from_millis(200))).await;

    let response = reqwest::get(format!("{}/tiles/osm/5/1/1.png", server.base))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(master.requests(), 1);

    server.shutdown.cancel();
    server.server.await.unwrap().unwrap();
}

/// Shutdown answers requests still waiting for a render.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_releases_waiting_requests() {
    let dir = tempfile::tempdir().unwrap();
    let master = FakeMaster::spawn(dir.path().to_path_buf(), false).await;
    let server = start_server(dir.path(), master.addr, None).await;

    let url = format!("{}/tiles/osm/5/2/2.png", server.base);
    let pending = tokio::spawn(async move { reqwest::get(url).await.unwrap() });

    // Wait until the request is parked
    for _ in 0..100 {
        if master.requests() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(master.requests(), 1);

    server.shutdown.cancel();
    let response = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), 500);

    tokio::time::timeout(Duration::from_secs(5), server.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

/// Out-of-range and unknown requests are answered without contacting the
/// master.
#[tokio::test]
async fn test_invalid_requests_do_not_reach_master() {
    let dir = tempfile::tempdir().unwrap();
    let master = FakeMaster::spawn(dir.path().to_path_buf(), true).await;
    let server = start_server(dir.path(), master.addr, Some(Duration::from_secs(5))).await;

    for path in [
        "/tiles/osm/19/0/0.png",
        "/tiles/osm/2/0/4.png",
        "/tiles/other/2/0/0.png",
        "/tiles/osm/2/0/0.webp",
        "/",
    ] {
        let response = reqwest::get(format!("{}{}", server.base, path)).await.unwrap();
        assert_eq!(response.status(), 404, "{}", path);
    }
    assert_eq!(master.requests(), 0);

    server.shutdown.cancel();
    server.server.await.unwrap().unwrap();
}
