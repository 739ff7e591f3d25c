//! Tile and bundle address types.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Tiles per bundle edge. A bundle covers an 8×8 block of tiles.
pub const METATILE_SIZE: u32 = 8;

/// Highest zoom level accepted anywhere in the server.
///
/// `2^30` still fits a `u32` tile coordinate.
pub const MAX_ZOOM: u8 = 30;

/// Errors raised while validating a tile address against a map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Zoom outside the map's configured range.
    #[error("zoom {zoom} out of range [{min}, {max}]")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },

    /// Column or row outside `[0, 2^zoom)`.
    #[error("tile {x}/{y} out of range at zoom {zoom}")]
    TileOutOfRange { x: u32, y: u32, zoom: u8 },
}

/// Address of a single renderable tile image.
///
/// # Example
///
/// ```
/// use tileserver::coord::TileAddress;
///
/// let tile = TileAddress::new("osm", 10, 13, 5);
/// assert_eq!(tile.bundle().x, 8);
/// assert_eq!(tile.bundle().y, 0);
/// assert_eq!(tile.sub_index(), 45);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileAddress {
    /// Map name as configured in the renderer definitions
    pub map: String,
    /// Zoom level
    pub zoom: u8,
    /// Tile column
    pub x: u32,
    /// Tile row
    pub y: u32,
}

impl TileAddress {
    /// Create a new tile address.
    pub fn new(map: impl Into<String>, zoom: u8, x: u32, y: u32) -> Self {
        Self {
            map: map.into(),
            zoom,
            x,
            y,
        }
    }

    /// Check the address against a map's zoom range and the tile grid.
    ///
    /// Zoom is checked first, so a request at an unsupported zoom never
    /// reaches the grid check (which would overflow above [`MAX_ZOOM`]).
    pub fn validate(&self, min_zoom: u8, max_zoom: u8) -> Result<(), CoordError> {
        if self.zoom < min_zoom || self.zoom > max_zoom || self.zoom > MAX_ZOOM {
            return Err(CoordError::ZoomOutOfRange {
                zoom: self.zoom,
                min: min_zoom,
                max: max_zoom,
            });
        }

        let limit = 1u64 << self.zoom;
        if u64::from(self.x) >= limit || u64::from(self.y) >= limit {
            return Err(CoordError::TileOutOfRange {
                x: self.x,
                y: self.y,
                zoom: self.zoom,
            });
        }

        Ok(())
    }

    /// The bundle containing this tile.
    pub fn bundle(&self) -> BundleAddress {
        BundleAddress::containing(self.map.clone(), self.zoom, self.x, self.y)
    }

    /// Position of this tile inside its bundle's header table.
    pub fn sub_index(&self) -> usize {
        super::sub_tile_index(self.x, self.y)
    }

    /// Fingerprint of the containing bundle.
    pub fn fingerprint(&self) -> BundleFingerprint {
        BundleFingerprint::new(&self.map, self.zoom, self.x, self.y)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.map, self.zoom, self.x, self.y)
    }
}

/// Origin of an 8×8 tile bundle.
///
/// `x` and `y` are always multiples of [`METATILE_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleAddress {
    pub map: String,
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl BundleAddress {
    /// The bundle containing tile `(x, y)`.
    pub fn containing(map: impl Into<String>, zoom: u8, x: u32, y: u32) -> Self {
        Self {
            map: map.into(),
            zoom,
            x: x - x % METATILE_SIZE,
            y: y - y % METATILE_SIZE,
        }
    }

    pub fn fingerprint(&self) -> BundleFingerprint {
        BundleFingerprint::new(&self.map, self.zoom, self.x, self.y)
    }

    /// Location of this bundle's file below a map's tile directory.
    pub fn path_in(&self, tile_dir: &Path) -> PathBuf {
        super::bundle_path(tile_dir, self.zoom, self.x, self.y)
    }
}

/// Key identifying one bundle: `"{map}/{z}/{bx}/{by}"`.
///
/// Used as the waiter registry key and to correlate render completions.
/// Construction always rounds down to the bundle origin, so any tile of a
/// bundle yields the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleFingerprint(String);

impl BundleFingerprint {
    pub fn new(map: &str, zoom: u8, x: u32, y: u32) -> Self {
        let bx = x - x % METATILE_SIZE;
        let by = y - y % METATILE_SIZE;
        Self(format!("{}/{}/{}/{}", map, zoom, bx, by))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
