//! In-memory buffer source
//!
//! The buffer can be filled up front with [`BufferSource::set_data`] or grown
//! incrementally by a producer on another thread with
//! [`BufferSource::append_data`]. Every operation takes the same lock, and the
//! lock is only held for the buffer mutation itself.
//!
//! A non-seekable buffer never revisits consumed bytes, so it drops them once
//! enough have been read. Live feeds therefore hold only unread data.

use std::io::SeekFrom;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{resolve_seek, DataSource, SourceError};

/// Consumed bytes a non-seekable buffer keeps before compacting
const COMPACT_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    /// Read cursor into `data`
    position: usize,
    /// Bytes dropped from the front of `data` by compaction
    discarded: u64,
    eof: bool,
    seekable: bool,
}

/// Thread-safe append/consume byte buffer
///
/// Reading at the end of the buffer reports [`SourceError::WouldBlock`] until
/// [`BufferSource::set_eof`] has been called, after which it reports end of
/// stream. Share between a producer and the demuxer through `Arc<BufferSource>`.
#[derive(Debug)]
pub struct BufferSource {
    state: Mutex<BufferState>,
}

impl Default for BufferSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferSource {
    /// Create an empty, seekable buffer
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                seekable: true,
                ..Default::default()
            }),
        }
    }

    /// Create a buffer holding `data`, already marked complete
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let source = Self::new();
        source.set_data(data);
        source.set_eof(true);
        source
    }

    /// Create an empty buffer that rejects seeks, for live streams
    pub fn streaming() -> Self {
        let source = Self::new();
        source.set_seekable(false);
        source
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // A panic while holding the lock cannot leave the byte vector torn
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the contents and rewind
    pub fn set_data(&self, data: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        state.data = data.into();
        state.position = 0;
        state.discarded = 0;
    }

    /// Append bytes after the current end
    pub fn append_data(&self, bytes: &[u8]) {
        self.lock().data.extend_from_slice(bytes);
    }

    /// Drop all contents, rewind and clear the EOF flag
    pub fn clear(&self) {
        let mut state = self.lock();
        state.data.clear();
        state.position = 0;
        state.discarded = 0;
        state.eof = false;
    }

    pub fn set_seekable(&self, seekable: bool) {
        self.lock().seekable = seekable;
    }

    /// Mark whether the producer has finished
    pub fn set_eof(&self, eof: bool) {
        self.lock().eof = eof;
    }

    pub fn is_eof(&self) -> bool {
        self.lock().eof
    }

    /// Bytes between the read cursor and the end of the buffer
    pub fn bytes_available(&self) -> usize {
        let state = self.lock();
        state.data.len().saturating_sub(state.position)
    }

    /// Stream offset of the read cursor
    pub fn position(&self) -> u64 {
        let state = self.lock();
        state.discarded + state.position as u64
    }

    /// Bytes currently held, including consumed bytes not yet compacted
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    fn read_into(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut state = self.lock();
        let available = state.data.len().saturating_sub(state.position);
        if available == 0 {
            return if state.eof {
                Ok(0)
            } else {
                Err(SourceError::WouldBlock)
            };
        }

        let count = available.min(buf.len());
        let start = state.position;
        buf[..count].copy_from_slice(&state.data[start..start + count]);
        state.position += count;

        if !state.seekable && state.position >= COMPACT_THRESHOLD {
            let consumed = state.position;
            state.data.drain(..consumed);
            state.discarded += consumed as u64;
            state.position = 0;
        }
        Ok(count)
    }

    fn seek_to(&self, pos: SeekFrom) -> Result<u64, SourceError> {
        let mut state = self.lock();
        if !state.seekable {
            return Err(SourceError::SeekUnsupported);
        }
        let base = state.discarded;
        let target = resolve_seek(pos, base + state.position as u64, base + state.data.len() as u64)?;
        // Compacted bytes are gone
        if target < base {
            return Err(SourceError::InvalidSeek(target as i64));
        }
        state.position = (target - base) as usize;
        Ok(target)
    }

    fn known_size(&self) -> Option<u64> {
        let state = self.lock();
        // The final size is only known once the producer is done
        state.eof.then_some(state.discarded + state.data.len() as u64)
    }
}

impl DataSource for BufferSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.read_into(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, SourceError> {
        self.seek_to(pos)
    }

    fn size(&self) -> Option<u64> {
        self.known_size()
    }

    fn is_seekable(&self) -> bool {
        self.lock().seekable
    }
}

impl DataSource for Arc<BufferSource> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.read_into(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, SourceError> {
        self.seek_to(pos)
    }

    fn size(&self) -> Option<u64> {
        self.known_size()
    }

    fn is_seekable(&self) -> bool {
        self.lock().seekable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_empty_buffer_would_block_until_eof() {
        let mut source = BufferSource::new();
        let mut buf = [0u8; 8];

        assert!(matches!(source.read(&mut buf), Err(SourceError::WouldBlock)));
        assert_eq!(source.size(), None);

        source.set_eof(true);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.size(), Some(0));
    }

    #[test]
    fn test_read_past_end_after_eof() {
        let mut source = BufferSource::new();
        source.append_data(b"abc");
        let mut buf = [0u8; 8];

        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert!(matches!(source.read(&mut buf), Err(SourceError::WouldBlock)));

        source.set_eof(true);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_whence_and_bounds() {
        let mut source = BufferSource::from_bytes(b"0123456789".to_vec());

        assert_eq!(source.seek(SeekFrom::Start(3)).unwrap(), 3);
        assert_eq!(source.seek(SeekFrom::Current(2)).unwrap(), 5);
        assert_eq!(source.seek(SeekFrom::End(-1)).unwrap(), 9);
        assert!(matches!(
            source.seek(SeekFrom::Start(11)),
            Err(SourceError::InvalidSeek(11))
        ));
        // A rejected seek leaves the cursor untouched
        assert_eq!(source.position(), 9);

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'9');
    }

    #[test]
    fn test_streaming_buffer_rejects_seek() {
        let mut source = BufferSource::streaming();
        source.append_data(b"data");
        assert!(!source.is_seekable());
        assert!(matches!(
            source.seek(SeekFrom::Start(0)),
            Err(SourceError::SeekUnsupported)
        ));
    }

    #[test]
    fn test_clear_resets_eof_and_cursor() {
        let mut source = BufferSource::from_bytes(b"xyz".to_vec());
        let mut buf = [0u8; 2];
        source.read(&mut buf).unwrap();

        source.clear();
        assert!(!source.is_eof());
        assert_eq!(source.position(), 0);
        assert_eq!(source.bytes_available(), 0);
        assert!(matches!(source.read(&mut buf), Err(SourceError::WouldBlock)));
    }

    #[test]
    fn test_concurrent_append_and_read_preserves_order() {
        let source = Arc::new(BufferSource::streaming());
        let producer = Arc::clone(&source);

        let handle = thread::spawn(move || {
            for i in 0..2000u32 {
                producer.append_data(&i.to_le_bytes());
            }
            producer.set_eof(true);
        });

        let mut consumer = Arc::clone(&source);
        let mut received = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            match consumer.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(SourceError::WouldBlock) => thread::yield_now(),
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        handle.join().unwrap();

        assert_eq!(received.len(), 2000 * 4);
        for (i, chunk) in received.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            assert_eq!(value, i as u32);
        }
    }

    #[test]
    fn test_streaming_buffer_drops_consumed_bytes() {
        let mut source = BufferSource::streaming();
        let unit = vec![0xAB; 1500];
        let mut buf = [0u8; 4096];

        for _ in 0..2000 {
            source.append_data(&unit);
            while let Ok(n) = source.read(&mut buf) {
                assert!(n > 0);
            }
        }

        assert!(source.len() < COMPACT_THRESHOLD + unit.len());
        assert_eq!(source.position(), 2000 * 1500);

        source.set_eof(true);
        assert_eq!(source.size(), Some(2000 * 1500));
    }

    #[test]
    fn test_seekable_buffer_keeps_consumed_bytes() {
        let mut source = BufferSource::from_bytes(vec![1u8; COMPACT_THRESHOLD * 2]);
        let mut buf = vec![0u8; COMPACT_THRESHOLD * 2];
        assert_eq!(source.read(&mut buf).unwrap(), COMPACT_THRESHOLD * 2);

        assert_eq!(source.len(), COMPACT_THRESHOLD * 2);
        assert_eq!(source.seek(SeekFrom::Start(0)).unwrap(), 0);
    }
}
