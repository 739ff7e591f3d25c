//! Async metatile reading.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use super::{MetatileError, MetatileHeader, PayloadEntry, HEADER_LEN};

/// Reads the header from the start of a bundle.
///
/// # Arguments
///
/// * `reader` - Seekable bundle source
/// * `file_len` - Total size of the bundle in bytes
///
/// # Errors
///
/// [`MetatileError::TruncatedBundle`] if fewer than [`HEADER_LEN`] bytes are
/// available.
pub async fn read_header<R>(reader: &mut R, file_len: u64) -> Result<MetatileHeader, MetatileError>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let needed = HEADER_LEN as u64;
    if file_len < needed {
        return Err(MetatileError::TruncatedBundle {
            needed,
            available: file_len,
        });
    }

    let mut buf = vec![0u8; HEADER_LEN];
    reader.seek(SeekFrom::Start(0)).await?;
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| short_read(e, needed, file_len))?;

    MetatileHeader::from_bytes(&buf)
}

/// Reads exactly one payload.
///
/// # Errors
///
/// [`MetatileError::TruncatedBundle`] if the payload ends past `file_len` or
/// the read comes up short.
pub async fn extract<R>(
    reader: &mut R,
    file_len: u64,
    entry: PayloadEntry,
) -> Result<Bytes, MetatileError>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let needed = entry.end();
    if needed > file_len {
        return Err(MetatileError::TruncatedBundle {
            needed,
            available: file_len,
        });
    }

    let mut buf = vec![0u8; entry.length as usize];
    reader.seek(SeekFrom::Start(u64::from(entry.offset))).await?;
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| short_read(e, needed, file_len))?;

    Ok(Bytes::from(buf))
}

fn short_read(err: io::Error, needed: u64, available: u64) -> MetatileError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        MetatileError::TruncatedBundle { needed, available }
    } else {
        MetatileError::Io(err)
    }
}

/// An open bundle file.
///
/// The header is read on first use and reused for every later lookup, so one
/// reader can serve all tiles of a bundle. The file is closed when the reader
/// is dropped.
pub struct MetatileReader {
    path: PathBuf,
    file: File,
    len: u64,
    header: Option<MetatileHeader>,
}

impl MetatileReader {
    /// Opens a bundle read-only.
    ///
    /// A `NotFound` error here means the bundle has not been rendered yet.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            path,
            file,
            len,
            header: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the bundle file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Header entry for tile `(x, y)`.
    pub async fn lookup(&mut self, x: u32, y: u32) -> Result<PayloadEntry, MetatileError> {
        if let Some(header) = &self.header {
            return Ok(header.lookup(x, y));
        }

        let header = read_header(&mut self.file, self.len).await?;
        let entry = header.lookup(x, y);
        self.header = Some(header);
        Ok(entry)
    }

    /// Reads the image for tile `(x, y)`.
    pub async fn read_tile(&mut self, x: u32, y: u32) -> Result<Bytes, MetatileError> {
        let entry = self.lookup(x, y).await?;
        extract(&mut self.file, self.len, entry).await
    }
}
