//! Application bootstrap implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::AppError;
use crate::config::{MapRegistry, ServerConfig};
use crate::dispatcher::TileDispatcher;
use crate::http;
use crate::render::{RenderChannel, UdpRenderChannel};

/// A bound, ready-to-run tile server.
///
/// Sockets are bound in [`start`](Self::start) so address conflicts surface
/// before anything is served. [`run`](Self::run) then serves until the
/// shutdown token fires.
///
/// # Example
///
/// ```ignore
/// let maps = MapRegistry::load(&config.config_dir)?;
/// let app = TileServerApp::start(config, maps).await?;
/// app.run(shutdown).await?;
/// ```
pub struct TileServerApp {
    dispatcher: Arc<TileDispatcher>,
    channel: Arc<UdpRenderChannel>,
    listener: TcpListener,
    config: ServerConfig,
}

impl TileServerApp {
    /// Binds the control socket and the HTTP listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or either socket
    /// cannot be bound.
    pub async fn start(config: ServerConfig, maps: MapRegistry) -> Result<Self, AppError> {
        config.validate()?;

        let channel = Arc::new(UdpRenderChannel::bind(config.bind_addr, config.master_addr).await?);
        let listener = TcpListener::bind(config.http_addr)
            .await
            .map_err(AppError::HttpBind)?;

        if maps.is_empty() {
            warn!(config_dir = %config.config_dir.display(), "No maps configured");
        }

        let render: Arc<dyn RenderChannel> = channel.clone();
        let dispatcher = Arc::new(TileDispatcher::new(maps, render, config.dispatcher_config()));

        let http_addr = listener.local_addr().map_err(AppError::HttpBind)?;
        let control_addr = channel.local_addr()?;
        info!(
            http = %http_addr,
            control = %control_addr,
            master = %channel.master(),
            maps = dispatcher.maps().len(),
            render_timeout_secs = config.render_timeout.map(|t| t.as_secs()),
            "Tile server started"
        );

        Ok(Self {
            dispatcher,
            channel,
            listener,
            config,
        })
    }

    pub fn dispatcher(&self) -> Arc<TileDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the HTTP server is listening on.
    pub fn http_addr(&self) -> Result<SocketAddr, AppError> {
        self.listener.local_addr().map_err(AppError::HttpBind)
    }

    /// Address render completions are received on.
    pub fn control_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.channel.local_addr()?)
    }

    /// Serves until `shutdown` is cancelled.
    ///
    /// On shutdown every request still waiting for a render is answered with
    /// an `Unavailable` error so in-flight HTTP responses can complete.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let receiver = tokio::spawn(Arc::clone(&self.channel).run(
            Arc::clone(&self.dispatcher),
            shutdown.clone(),
        ));

        // Graceful HTTP shutdown cannot finish while requests are parked
        let releaser = {
            let dispatcher = Arc::clone(&self.dispatcher);
            let token = shutdown.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let released = dispatcher.shutdown();
                info!(released, "Released pending requests");
            })
        };

        let token = shutdown.clone();
        let served = axum::serve(self.listener, http::router(Arc::clone(&self.dispatcher)))
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        // The server may also stop on its own error
        shutdown.cancel();
        for (task, joined) in [("receiver", receiver.await), ("releaser", releaser.await)] {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(task, error = %e, "Background task panicked");
                }
            }
        }

        // Anything that registered after the release
        let late = self.dispatcher.shutdown();
        if late > 0 {
            info!(released = late, "Released late pending requests");
        }

        info!("Tile server stopped");
        served.map_err(AppError::Http)
    }
}
