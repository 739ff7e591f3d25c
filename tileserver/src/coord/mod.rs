//! Tile coordinate mapping
//!
//! Maps a tile address to the bundle (metatile) file holding it and to the
//! tile's slot inside that bundle.
//!
//! Bundle files live in a hashed directory tree below each map's tile
//! directory. The bundle origin's column and row are consumed four bits at a
//! time, five times, each step producing one path segment
//! `(x_nibble << 4) | y_nibble`. Segments are ordered most significant first
//! and prefixed with the zoom level:
//!
//! ```text
//! {tile_dir}/{zoom}/{s4}/{s3}/{s2}/{s1}/{s0}.meta
//! ```
//!
//! No directory in the tree holds more than 256 entries regardless of zoom.

mod types;

pub use types::{
    BundleAddress, BundleFingerprint, CoordError, TileAddress, MAX_ZOOM, METATILE_SIZE,
};

use std::path::{Path, PathBuf};

/// File extension of bundle files.
pub const BUNDLE_EXTENSION: &str = "meta";

/// Number of nibble pairs encoded into a bundle path.
const PATH_SEGMENTS: usize = 5;

/// Computes the bundle file path for the tile `(x, y)` at `zoom`.
///
/// Any tile of the same bundle yields the same path.
///
/// # Arguments
///
/// * `tile_dir` - The map's tile directory
/// * `zoom` - Zoom level
/// * `x` - Tile column (need not be a bundle origin)
/// * `y` - Tile row (need not be a bundle origin)
pub fn bundle_path(tile_dir: &Path, zoom: u8, x: u32, y: u32) -> PathBuf {
    let mut x = x - x % METATILE_SIZE;
    let mut y = y - y % METATILE_SIZE;

    let mut segments = [0u32; PATH_SEGMENTS];
    for segment in segments.iter_mut().rev() {
        *segment = ((x & 0x0f) << 4) | (y & 0x0f);
        x >>= 4;
        y >>= 4;
    }

    let mut path = tile_dir.join(zoom.to_string());
    for segment in &segments[..PATH_SEGMENTS - 1] {
        path.push(segment.to_string());
    }
    path.push(format!(
        "{}.{}",
        segments[PATH_SEGMENTS - 1],
        BUNDLE_EXTENSION
    ));
    path
}

/// Index of tile `(x, y)` within its bundle's header table.
///
/// Row-major within the 8×8 block: `(y mod 8) * 8 + (x mod 8)`.
#[inline]
pub fn sub_tile_index(x: u32, y: u32) -> usize {
    ((y % METATILE_SIZE) * METATILE_SIZE + (x % METATILE_SIZE)) as usize
}
