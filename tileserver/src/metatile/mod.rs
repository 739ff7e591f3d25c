//! Metatile bundle format.
//!
//! A metatile stores an 8×8 block of rendered tiles in one file. The file
//! starts with a fixed header followed by the tile payloads:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "META"
//! 4       4     entry count (i32 LE, always 64)
//! 8       12    bundle origin x, y and zoom (i32 LE each)
//! 20      512   64 × (payload offset u32 LE, payload length u32 LE)
//! 532     ...   payloads
//! ```
//!
//! Entry `i` describes the tile at `(i mod 8, i div 8)` relative to the
//! bundle origin. Readers never trust an entry blindly: a payload reaching
//! past the end of the file is reported as [`MetatileError::TruncatedBundle`].

mod reader;
mod writer;

pub use reader::{extract, read_header, MetatileReader};
pub use writer::MetatileWriter;

use std::io;

use thiserror::Error;

use crate::coord::sub_tile_index;

/// Magic bytes at the start of every metatile.
pub const MAGIC: &[u8; 4] = b"META";

/// Size of the fixed prefix before the entry table.
pub const PREFIX_LEN: usize = 20;

/// Number of entries in the table.
pub const ENTRY_COUNT: usize = 64;

/// Size of one table entry.
pub const ENTRY_LEN: usize = 8;

/// Total header size: prefix plus entry table.
pub const HEADER_LEN: usize = PREFIX_LEN + ENTRY_COUNT * ENTRY_LEN;

/// Errors reading a metatile.
#[derive(Debug, Error)]
pub enum MetatileError {
    /// I/O error while reading the bundle.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is shorter than its header or an entry claims.
    #[error("truncated bundle: need {needed} bytes, file has {available}")]
    TruncatedBundle { needed: u64, available: u64 },
}

/// Location of one tile payload within a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadEntry {
    pub offset: u32,
    pub length: u32,
}

impl PayloadEntry {
    /// First byte past the payload.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Parsed metatile header.
#[derive(Clone)]
pub struct MetatileHeader {
    bytes: Box<[u8; HEADER_LEN]>,
}

impl MetatileHeader {
    /// Parse the header from the first [`HEADER_LEN`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetatileError> {
        if bytes.len() < HEADER_LEN {
            return Err(MetatileError::TruncatedBundle {
                needed: HEADER_LEN as u64,
                available: bytes.len() as u64,
            });
        }
        let mut header = Box::new([0u8; HEADER_LEN]);
        header.copy_from_slice(&bytes[..HEADER_LEN]);
        Ok(Self { bytes: header })
    }

    /// Table entry at `index` (0..64).
    pub fn entry(&self, index: usize) -> PayloadEntry {
        let at = PREFIX_LEN + (index % ENTRY_COUNT) * ENTRY_LEN;
        PayloadEntry {
            offset: read_u32_le(&self.bytes[..], at),
            length: read_u32_le(&self.bytes[..], at + 4),
        }
    }

    /// Table entry for tile `(x, y)`; only the low three bits of each are used.
    ///
    /// No validation against the file size happens here.
    pub fn lookup(&self, x: u32, y: u32) -> PayloadEntry {
        self.entry(sub_tile_index(x, y))
    }

    pub fn has_magic(&self) -> bool {
        &self.bytes[..4] == MAGIC
    }

    /// Entry count as written by the renderer.
    pub fn count(&self) -> i32 {
        read_u32_le(&self.bytes[..], 4) as i32
    }

    /// Bundle origin `(x, y, zoom)` as written by the renderer.
    pub fn origin(&self) -> (i32, i32, i32) {
        (
            read_u32_le(&self.bytes[..], 8) as i32,
            read_u32_le(&self.bytes[..], 12) as i32,
            read_u32_le(&self.bytes[..], 16) as i32,
        )
    }
}

impl std::fmt::Debug for MetatileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetatileHeader")
            .field("magic", &self.has_magic())
            .field("count", &self.count())
            .field("origin", &self.origin())
            .finish()
    }
}

#[inline]
fn read_u32_le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
