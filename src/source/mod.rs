//! Byte sources feeding the container demuxer
//!
//! A [`DataSource`] is the capability set the demuxer's custom IO bridge pulls
//! bytes through: read, seek, size and seekability. Three implementations ship
//! with the crate:
//!
//! - [`FileSource`]: a seekable file on disk
//! - [`BufferSource`]: an in-memory buffer that can grow while it is consumed
//! - [`StreamingSource`]: a non-seekable buffer fed by a live network producer
//!
//! Reads never block. A source that has no bytes yet reports
//! [`SourceError::WouldBlock`], which is distinct from end of stream (`Ok(0)`).

mod buffer;
mod file;
mod stream_feed;

use std::io::SeekFrom;

pub use buffer::BufferSource;
pub use file::FileSource;
pub use stream_feed::{ConnectionState, FeedError, FeedEvent, StreamFeeder, StreamingSource};

/// Errors reported at the byte source boundary
#[derive(Debug)]
pub enum SourceError {
    /// The source could not be opened
    Open(String),
    /// Underlying I/O failure
    Io(std::io::Error),
    /// No data available yet; the caller should retry later
    WouldBlock,
    /// The source does not support seeking
    SeekUnsupported,
    /// Seek target outside the valid range
    InvalidSeek(i64),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Open(what) => write!(f, "Failed to open source: {}", what),
            SourceError::Io(e) => write!(f, "Source I/O error: {}", e),
            SourceError::WouldBlock => write!(f, "No data available yet"),
            SourceError::SeekUnsupported => write!(f, "Source is not seekable"),
            SourceError::InvalidSeek(pos) => write!(f, "Seek target out of range: {}", pos),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// Byte-level access used by the demuxer
///
/// Implementations are owned by a single demuxer for the lifetime of a
/// session, and the IO bridge is monomorphized per implementing type.
pub trait DataSource: Send {
    /// Read up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` at end of stream and `Err(SourceError::WouldBlock)` when
    /// a streaming source has nothing buffered yet.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError>;

    /// Move the read cursor, returning the new absolute position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, SourceError>;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Whether [`DataSource::seek`] can succeed at all.
    fn is_seekable(&self) -> bool;
}

/// Resolve a `SeekFrom` against a cursor and length, rejecting negative or
/// past-the-end targets.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> Result<u64, SourceError> {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i64,
        SeekFrom::Current(delta) => current as i64 + delta,
        SeekFrom::End(delta) => len as i64 + delta,
    };
    if target < 0 || target as u64 > len {
        return Err(SourceError::InvalidSeek(target));
    }
    Ok(target as u64)
}
