//! Map definitions.
//!
//! Tirex keeps one definition file per map below
//! `{config_dir}/renderer/{renderer}/{map}.conf`. Each is a sectionless
//! `key=value` file:
//!
//! ```text
//! # OSM default style
//! name=osm
//! tiledir=/var/lib/tirex/tiles/osm
//! minz=0
//! maxz=19
//! ```
//!
//! Only `name`, `tiledir`, `minz` and `maxz` matter to the tile server;
//! renderer-specific keys are ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};
use tracing::{debug, warn};

use super::ConfigError;
use crate::coord::MAX_ZOOM;

/// One map the server can serve tiles for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDefinition {
    pub name: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Root of the map's bundle tree
    pub tile_dir: PathBuf,
}

impl MapDefinition {
    pub fn new(name: impl Into<String>, min_zoom: u8, max_zoom: u8, tile_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            min_zoom,
            max_zoom,
            tile_dir: tile_dir.into(),
        }
    }

    /// Checks the zoom range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(ConfigError::InvalidZoomRange {
                name: self.name.clone(),
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        Ok(())
    }

    /// Parses a Tirex map definition file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
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

        let require = |key: &'static str| {
            props.get(key).map(str::trim).ok_or_else(|| ConfigError::MissingKey {
                path: path.to_path_buf(),
                key,
            })
        };
        let zoom = |key: &'static str| -> Result<u8, ConfigError> {
            match props.get(key).map(str::trim) {
                None | Some("") => Ok(0),
                Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                    path: path.to_path_buf(),
                    key,
                    value: value.to_string(),
                }),
            }
        };

        let map = Self {
            name: require("name")?.to_string(),
            tile_dir: PathBuf::from(require("tiledir")?),
            min_zoom: zoom("minz")?,
            max_zoom: zoom("maxz")?,
        };
        map.validate()?;
        Ok(map)
    }
}

/// The set of known maps, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MapRegistry {
    maps: BTreeMap<String, MapDefinition>,
}

impl MapRegistry {
    /// Builds a registry from already parsed definitions.
    ///
    /// Later definitions replace earlier ones with the same name.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = MapDefinition>,
    ) -> Result<Self, ConfigError> {
        let mut maps = BTreeMap::new();
        for map in definitions {
            map.validate()?;
            if let Some(previous) = maps.insert(map.name.clone(), map) {
                warn!(map = %previous.name, "Duplicate map definition, using the later one");
            }
        }
        Ok(Self { maps })
    }

    /// Loads every `renderer/*/*.conf` below `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let pattern = config_dir.join("renderer").join("*").join("*.conf");
        let pattern = pattern.to_string_lossy();

        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry.map_err(|e| ConfigError::Io(e.into_error()))?;
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut definitions = Vec::with_capacity(files.len());
        for path in &files {
            let map = MapDefinition::from_file(path)?;
            debug!(
                map = %map.name,
                min_zoom = map.min_zoom,
                max_zoom = map.max_zoom,
                tile_dir = %map.tile_dir.display(),
                file = %path.display(),
                "Loaded map definition"
            );
            definitions.push(map);
        }

        Self::from_definitions(definitions)
    }

    pub fn get(&self, name: &str) -> Option<&MapDefinition> {
        self.maps.get(name)
    }

    /// Maps in name order.
    pub fn iter(&self) -> impl Iterator<Item = &MapDefinition> {
        self.maps.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
