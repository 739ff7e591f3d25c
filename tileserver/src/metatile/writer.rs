//! Metatile encoding.
//!
//! The server itself never writes bundles; rendering is the renderer's job.
//! The writer exists for tooling and for building fixtures in tests.

use std::fs;
use std::io;
use std::path::Path;

use crate::coord::{sub_tile_index, METATILE_SIZE};

use super::{ENTRY_COUNT, ENTRY_LEN, HEADER_LEN, MAGIC, PREFIX_LEN};

/// Builds a metatile in memory.
///
/// # Example
///
/// ```
/// use tileserver::metatile::{MetatileHeader, MetatileWriter};
///
/// let mut writer = MetatileWriter::new(8, 0, 10);
/// writer.set_tile(13, 5, b"png".to_vec());
///
/// let bytes = writer.to_bytes();
/// let header = MetatileHeader::from_bytes(&bytes).unwrap();
/// let entry = header.lookup(13, 5);
/// assert_eq!(entry.length, 3);
/// ```
#[derive(Debug, Clone)]
pub struct MetatileWriter {
    x: u32,
    y: u32,
    zoom: u8,
    tiles: Vec<Vec<u8>>,
}

impl MetatileWriter {
    /// Creates an empty bundle for the bundle containing `(x, y)` at `zoom`.
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self {
            x: x - x % METATILE_SIZE,
            y: y - y % METATILE_SIZE,
            zoom,
            tiles: vec![Vec::new(); ENTRY_COUNT],
        }
    }

    /// Sets the image for tile `(x, y)`.
    pub fn set_tile(&mut self, x: u32, y: u32, data: impl Into<Vec<u8>>) -> &mut Self {
        self.tiles[sub_tile_index(x, y)] = data.into();
        self
    }

    /// Encodes the bundle: header, entry table, then payloads in table order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len: usize = self.tiles.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + payload_len);

        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(ENTRY_COUNT as i32).to_le_bytes());
        out.extend_from_slice(&(self.x as i32).to_le_bytes());
        out.extend_from_slice(&(self.y as i32).to_le_bytes());
        out.extend_from_slice(&i32::from(self.zoom).to_le_bytes());
        debug_assert_eq!(out.len(), PREFIX_LEN);

        let mut offset = HEADER_LEN as u32;
        for tile in &self.tiles {
            let len = tile.len() as u32;
            // Empty slots point nowhere
            let at = if len == 0 { 0 } else { offset };
            out.extend_from_slice(&at.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            offset += len;
        }
        debug_assert_eq!(out.len(), PREFIX_LEN + ENTRY_COUNT * ENTRY_LEN);

        for tile in &self.tiles {
            out.extend_from_slice(tile);
        }
        out
    }

    /// Writes the bundle to `path`, creating parent directories.
    ///
    /// Data goes to a temporary sibling first and is renamed into place, so
    /// readers never observe a partially written bundle.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("{}.tmp", std::process::id()));
        fs::write(&tmp, self.to_bytes())?;
        fs::rename(&tmp, path)
    }
}
