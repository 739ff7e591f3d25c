//! Server configuration.
//!
//! Settings come from built-in defaults, optionally overridden by the Tirex
//! main configuration file `{config_dir}/tirex.conf`, and finally by the
//! command line (through the `with_*` setters). Map definitions are loaded
//! separately through [`MapRegistry::load`].
//!
//! Recognised `tirex.conf` keys:
//!
//! | Key                         | Meaning                                  |
//! |-----------------------------|------------------------------------------|
//! | `master_udp_port`           | UDP port of the Tirex master             |
//! | `tileserver_http_port`      | HTTP listen port                         |
//! | `tileserver_render_timeout` | Seconds a request waits for a render; `0` waits forever |

mod maps;

pub use maps::{MapDefinition, MapRegistry};

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, ParseOption};
use thiserror::Error;
use tracing::debug;

use crate::dispatcher::DispatcherConfig;
use crate::protocol::DEFAULT_ID_PREFIX;

/// Default Tirex configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/tirex";

/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 9320;

/// Default UDP port of the Tirex master.
pub const DEFAULT_MASTER_UDP_PORT: u16 = 9322;

/// Default time a request waits for its bundle to be rendered.
pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 60;

/// Priority attached to render requests.
pub const DEFAULT_PRIORITY: u8 = 8;

/// Name of the main configuration file inside the config directory.
pub const MAIN_CONFIG_FILE: &str = "tirex.conf";

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("{path}: missing '{key}'")]
    MissingKey { path: PathBuf, key: &'static str },

    #[error("{path}: invalid value for '{key}': {value:?}")]
    InvalidValue {
        path: PathBuf,
        key: &'static str,
        value: String,
    },

    #[error("map '{name}': invalid zoom range {min}..={max}")]
    InvalidZoomRange { name: String, min: u8, max: u8 },

    #[error("request id prefix {0:?} must start with 'n'")]
    InvalidIdPrefix(String),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Runtime settings of the tile server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Tirex configuration directory (`tirex.conf`, `renderer/`)
    pub config_dir: PathBuf,

    /// HTTP listen address.
    pub http_addr: SocketAddr,

    /// Address of the Tirex master's UDP socket.
    pub master_addr: SocketAddr,

    /// Local address of the control socket. Completions arrive here.
    pub bind_addr: SocketAddr,

    /// Per-request render deadline. `None` waits indefinitely.
    pub render_timeout: Option<Duration>,

    /// Priority attached to render requests.
    pub prio: u8,

    /// Prefix of render request ids.
    pub id_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_HTTP_PORT),
            master_addr: SocketAddr::new(localhost, DEFAULT_MASTER_UDP_PORT),
            bind_addr: SocketAddr::new(localhost, 0),
            render_timeout: Some(Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECS)),
            prio: DEFAULT_PRIORITY,
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults rooted at `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults rooted at `config_dir`, overridden by its `tirex.conf` if
    /// present.
    pub fn load(config_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::new(config_dir);
        let path = config.config_dir.join(MAIN_CONFIG_FILE);
        if path.is_file() {
            config.apply_file(&path)?;
        } else {
            debug!(path = %path.display(), "No main configuration file, using defaults");
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let ini = Ini::load_from_file_opt(
            path,
            ParseOption {
                enabled_quote: false,
                enabled_escape: false,
                ..ParseOption::default()
            },
        )
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let props = ini.general_section();

        let number = |key: &'static str| -> Result<Option<u64>, ConfigError> {
            props
                .get(key)
                .map(|value| {
                    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                        path: path.to_path_buf(),
                        key,
                        value: value.to_string(),
                    })
                })
                .transpose()
        };
        let port = |key: &'static str| -> Result<Option<u16>, ConfigError> {
            match number(key)? {
                Some(value) => u16::try_from(value).map(Some).map_err(|_| {
                    ConfigError::InvalidValue {
                        path: path.to_path_buf(),
                        key,
                        value: value.to_string(),
                    }
                }),
                None => Ok(None),
            }
        };

        if let Some(p) = port("master_udp_port")? {
            self.master_addr.set_port(p);
        }
        if let Some(p) = port("tileserver_http_port")? {
            self.http_addr.set_port(p);
        }
        if let Some(secs) = number("tileserver_render_timeout")? {
            self.render_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(())
    }

    /// Checks settings that cannot be expressed by the types alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.id_prefix.starts_with('n') {
            return Err(ConfigError::InvalidIdPrefix(self.id_prefix.clone()));
        }
        Ok(())
    }

    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_addr.set_port(port);
        self
    }

    pub fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    pub fn with_master_port(mut self, port: u16) -> Self {
        self.master_addr.set_port(port);
        self
    }

    pub fn with_master_addr(mut self, addr: SocketAddr) -> Self {
        self.master_addr = addr;
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the render deadline; `None` disables it.
    pub fn with_render_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_prio(mut self, prio: u8) -> Self {
        self.prio = prio;
        self
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            render_timeout: self.render_timeout,
            prio: self.prio,
            id_prefix: self.id_prefix.clone(),
        }
    }
}
