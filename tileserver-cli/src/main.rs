//! Tirex tile server CLI.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tileserver::config::DEFAULT_CONFIG_DIR;
use tileserver::logging::DEFAULT_LOG_LEVEL;

use commands::start::StartArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tileserver")]
#[command(version, about = "Serve Tirex metatiles over HTTP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tile server
    Start {
        /// Tirex configuration directory
        #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
        config_dir: PathBuf,

        /// HTTP listen port (overrides tirex.conf)
        #[arg(long)]
        http_port: Option<u16>,

        /// UDP port of the Tirex master (overrides tirex.conf)
        #[arg(long)]
        master_port: Option<u16>,

        /// Seconds a request waits for its render; 0 waits forever
        #[arg(long, value_name = "SECS")]
        render_timeout: Option<u64>,

        /// Also write logs to daily files in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Log filter, e.g. info or tileserver=debug (RUST_LOG takes precedence)
        #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
        log_level: String,
    },

    /// List configured maps
    Maps {
        /// Tirex configuration directory
        #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
        config_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Commands::Start {
            config_dir,
            http_port,
            master_port,
            render_timeout,
            log_dir,
            log_level,
        } => commands::start::run(StartArgs {
            config_dir,
            http_port,
            master_port,
            render_timeout,
            log_dir,
            log_level,
        }),
        Commands::Maps { config_dir } => commands::maps::run(&config_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start_arguments() {
        let cli = Cli::try_parse_from([
            "tileserver",
            "start",
            "--config-dir",
            "/tmp/tirex",
            "--http-port",
            "8080",
            "--render-timeout",
            "0",
        ])
        .unwrap();

        match cli.command {
            Commands::Start {
                config_dir,
                http_port,
                render_timeout,
                log_level,
                ..
            } => {
                assert_eq!(config_dir, PathBuf::from("/tmp/tirex"));
                assert_eq!(http_port, Some(8080));
                assert_eq!(render_timeout, Some(0));
                assert_eq!(log_level, "info");
            }
            Commands::Maps { .. } => panic!("expected start"),
        }
    }
}
