//! Start command - serve tiles until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use tileserver::app::{AppError, TileServerApp};
use tileserver::config::{MapRegistry, ServerConfig};
use tileserver::logging::{init_logging, LoggingConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CliError;

/// Arguments for the start command.
pub struct StartArgs {
    pub config_dir: PathBuf,
    pub http_port: Option<u16>,
    pub master_port: Option<u16>,
    /// Seconds; `0` waits indefinitely
    pub render_timeout: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
}

/// Resolve server settings: `tirex.conf` first, then CLI overrides.
pub fn build_config(args: &StartArgs) -> Result<ServerConfig, CliError> {
    let mut config = ServerConfig::load(&args.config_dir)?;

    if let Some(port) = args.http_port {
        config = config.with_http_port(port);
    }
    if let Some(port) = args.master_port {
        config = config.with_master_port(port);
    }
    if let Some(secs) = args.render_timeout {
        config = config.with_render_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }

    config.validate()?;
    Ok(config)
}

/// Run the start command.
pub fn run(args: StartArgs) -> Result<(), CliError> {
    let _log_guard = init_logging(
        &LoggingConfig::default()
            .with_level(args.log_level.clone())
            .with_log_dir(args.log_dir.clone()),
    )?;

    let config = build_config(&args)?;
    let maps = MapRegistry::load(&config.config_dir)?;

    println!("Tirex Tile Server v{}", tileserver::VERSION);
    println!("=========================");
    println!();
    println!("Config:  {}", config.config_dir.display());
    println!("HTTP:    {}", config.http_addr);
    println!("Master:  {}", config.master_addr);
    println!("Maps:    {}", maps.names().collect::<Vec<_>>().join(", "));
    match config.render_timeout {
        Some(timeout) => println!("Timeout: {}s", timeout.as_secs()),
        None => println!("Timeout: none"),
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Serve(AppError::RuntimeCreation(e.to_string())))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    runtime.block_on(async {
        let app = TileServerApp::start(config, maps).await?;
        app.run(shutdown).await
    })?;

    info!("Shutdown complete");
    Ok(())
}
