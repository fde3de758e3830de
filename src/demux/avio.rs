//! Custom IO bridge between a [`DataSource`] and libavformat
//!
//! FFmpeg pulls bytes through a pair of C callbacks. The callbacks are
//! monomorphized per source type, so each session dispatches statically to
//! its concrete source.

use std::ffi::{c_int, c_void};
use std::io::SeekFrom;
use std::ptr;

use ffmpeg_next::ffi;

use super::DemuxError;
use crate::source::{DataSource, SourceError};

/// Libc `SEEK_*` whence values as passed by libavformat
const SEEK_SET: c_int = 0;
const SEEK_CUR: c_int = 1;
const SEEK_END: c_int = 2;

/// Owns the AVIOContext, its staging buffer and the boxed source
///
/// Must outlive the format context it is attached to.
pub(crate) struct CustomIo {
    context: *mut ffi::AVIOContext,
    opaque: *mut c_void,
    drop_opaque: unsafe fn(*mut c_void),
}

// The raw pointers are only touched from the thread that owns the demuxer
unsafe impl Send for CustomIo {}

impl CustomIo {
    /// Allocate a staging buffer of `buffer_size` bytes and an IO context
    /// reading from `source`
    pub(crate) fn new<S: DataSource + 'static>(
        source: S,
        buffer_size: usize,
    ) -> Result<Self, DemuxError> {
        let seekable = source.is_seekable();
        let opaque = Box::into_raw(Box::new(source)) as *mut c_void;

        unsafe {
            let buffer = ffi::av_malloc(buffer_size) as *mut u8;
            if buffer.is_null() {
                drop_source::<S>(opaque);
                return Err(DemuxError::IoSetup("staging buffer allocation failed".to_string()));
            }

            let context = ffi::avio_alloc_context(
                buffer,
                buffer_size as c_int,
                0,
                opaque,
                Some(read_packet::<S>),
                None,
                Some(seek::<S>),
            );
            if context.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop_source::<S>(opaque);
                return Err(DemuxError::IoSetup("avio_alloc_context failed".to_string()));
            }
            // Keeps libavformat from issuing backward seeks into a live feed
            if !seekable {
                (*context).seekable = 0;
            }

            Ok(Self {
                context,
                opaque,
                drop_opaque: drop_source::<S>,
            })
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut ffi::AVIOContext {
        self.context
    }

    /// Clear the end-of-file and error flags AVIO latches after a
    /// would-block read, so the next read calls the source again
    pub(crate) fn rearm(&mut self) {
        if self.context.is_null() {
            return;
        }
        unsafe {
            (*self.context).eof_reached = 0;
            (*self.context).error = 0;
        }
    }
}

impl Drop for CustomIo {
    fn drop(&mut self) {
        unsafe {
            if !self.context.is_null() {
                // libavformat may have swapped the buffer, so free whatever is current
                ffi::av_freep(&mut (*self.context).buffer as *mut *mut u8 as *mut c_void);
                ffi::avio_context_free(&mut self.context);
            }
            if !self.opaque.is_null() {
                (self.drop_opaque)(self.opaque);
                self.opaque = ptr::null_mut();
            }
        }
    }
}

unsafe fn drop_source<S>(opaque: *mut c_void) {
    drop(Box::from_raw(opaque as *mut S));
}

/// Map a source read onto libavformat's return convention
pub(crate) fn read_result_code(result: Result<usize, SourceError>) -> c_int {
    match result {
        Ok(0) => ffi::AVERROR_EOF,
        Ok(n) => n as c_int,
        Err(SourceError::WouldBlock) => ffi::AVERROR(ffmpeg_next::error::EAGAIN),
        Err(e) => {
            tracing::warn!("Data source read failed: {}", e);
            ffi::AVERROR(ffmpeg_next::error::EIO)
        }
    }
}

/// Translate a libavformat seek request into a `SeekFrom`
pub(crate) fn seek_from_whence(offset: i64, whence: c_int) -> Option<SeekFrom> {
    match whence & !(ffi::AVSEEK_FORCE as c_int) {
        SEEK_SET if offset >= 0 => Some(SeekFrom::Start(offset as u64)),
        SEEK_CUR => Some(SeekFrom::Current(offset)),
        SEEK_END => Some(SeekFrom::End(offset)),
        _ => None,
    }
}

unsafe extern "C" fn read_packet<S: DataSource>(
    opaque: *mut c_void,
    buf: *mut u8,
    buf_size: c_int,
) -> c_int {
    if opaque.is_null() || buf.is_null() || buf_size <= 0 {
        return ffi::AVERROR(ffmpeg_next::error::EINVAL);
    }
    let source = &mut *(opaque as *mut S);
    let out = std::slice::from_raw_parts_mut(buf, buf_size as usize);
    read_result_code(source.read(out))
}

unsafe extern "C" fn seek<S: DataSource>(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    if opaque.is_null() {
        return ffi::AVERROR(ffmpeg_next::error::EINVAL) as i64;
    }
    let source = &mut *(opaque as *mut S);

    if whence & ffi::AVSEEK_SIZE as c_int != 0 {
        return match source.size() {
            Some(size) => size as i64,
            None => ffi::AVERROR(ffmpeg_next::error::ENOSYS) as i64,
        };
    }

    if !source.is_seekable() {
        return ffi::AVERROR(ffmpeg_next::error::ENOSYS) as i64;
    }

    let Some(pos) = seek_from_whence(offset, whence) else {
        return ffi::AVERROR(ffmpeg_next::error::EINVAL) as i64;
    };

    match source.seek(pos) {
        Ok(position) => position as i64,
        Err(SourceError::SeekUnsupported) => ffi::AVERROR(ffmpeg_next::error::ENOSYS) as i64,
        Err(SourceError::InvalidSeek(_)) => ffi::AVERROR(ffmpeg_next::error::EINVAL) as i64,
        Err(e) => {
            tracing::warn!("Data source seek failed: {}", e);
            ffi::AVERROR(ffmpeg_next::error::EIO) as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BufferSource;

    #[test]
    fn test_read_result_codes() {
        assert_eq!(read_result_code(Ok(0)), ffi::AVERROR_EOF);
        assert_eq!(read_result_code(Ok(17)), 17);
        assert_eq!(
            read_result_code(Err(SourceError::WouldBlock)),
            ffi::AVERROR(ffmpeg_next::error::EAGAIN)
        );
        assert_eq!(
            read_result_code(Err(SourceError::SeekUnsupported)),
            ffi::AVERROR(ffmpeg_next::error::EIO)
        );
    }

    #[test]
    fn test_seek_whence_mapping() {
        assert_eq!(seek_from_whence(10, SEEK_SET), Some(SeekFrom::Start(10)));
        assert_eq!(seek_from_whence(-4, SEEK_CUR), Some(SeekFrom::Current(-4)));
        assert_eq!(seek_from_whence(0, SEEK_END), Some(SeekFrom::End(0)));
        assert_eq!(
            seek_from_whence(3, SEEK_SET | ffi::AVSEEK_FORCE as c_int),
            Some(SeekFrom::Start(3))
        );
        assert_eq!(seek_from_whence(-1, SEEK_SET), None);
    }

    #[test]
    fn test_callbacks_delegate_to_source() {
        let source = BufferSource::from_bytes(b"abcdef".to_vec());
        let mut io = CustomIo::new(source, 4096).unwrap();
        assert!(!io.as_mut_ptr().is_null());

        unsafe {
            let mut buf = [0u8; 4];
            let n = read_packet::<BufferSource>(io.opaque, buf.as_mut_ptr(), 4);
            assert_eq!(n, 4);
            assert_eq!(&buf, b"abcd");

            let size = seek::<BufferSource>(io.opaque, 0, ffi::AVSEEK_SIZE as c_int);
            assert_eq!(size, 6);

            assert_eq!(seek::<BufferSource>(io.opaque, 1, SEEK_SET), 1);
            assert_eq!(
                seek::<BufferSource>(io.opaque, 100, SEEK_SET),
                ffi::AVERROR(ffmpeg_next::error::EINVAL) as i64
            );
        }
    }

    #[test]
    fn test_streaming_source_marks_context_unseekable() {
        let mut live = CustomIo::new(BufferSource::streaming(), 4096).unwrap();
        assert_eq!(unsafe { (*live.as_mut_ptr()).seekable }, 0);

        let mut file_like = CustomIo::new(BufferSource::from_bytes(vec![0u8; 16]), 4096).unwrap();
        assert_ne!(unsafe { (*file_like.as_mut_ptr()).seekable }, 0);
    }
}
