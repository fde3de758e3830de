//! Owned reference to an FFmpeg hardware device context

use std::ptr;

use ffmpeg_next::ffi;

use super::BackendKind;

/// Reference-counted `AVHWDeviceContext` buffer
///
/// Each instance owns one reference; dropping it unrefs.
pub struct HwDeviceContext {
    buffer: *mut ffi::AVBufferRef,
    kind: BackendKind,
}

// AVBufferRef reference counting is atomic
unsafe impl Send for HwDeviceContext {}
unsafe impl Sync for HwDeviceContext {}

impl HwDeviceContext {
    /// Create a standalone device for `kind` on the default adapter
    pub fn create(kind: BackendKind) -> Result<Self, ffmpeg_next::Error> {
        let device_type = kind
            .device_type()
            .ok_or(ffmpeg_next::Error::Other { errno: ffmpeg_next::error::EINVAL })?;

        let mut buffer = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(&mut buffer, device_type, ptr::null(), ptr::null_mut(), 0)
        };
        if ret < 0 || buffer.is_null() {
            return Err(ffmpeg_next::Error::from(ret));
        }
        Ok(Self { buffer, kind })
    }

    /// Take ownership of an existing device context reference
    ///
    /// # Safety
    ///
    /// `buffer` must be a valid, initialized `AVHWDeviceContext` reference the
    /// caller no longer uses.
    pub unsafe fn from_raw(buffer: *mut ffi::AVBufferRef, kind: BackendKind) -> Self {
        Self { buffer, kind }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn as_ptr(&self) -> *mut ffi::AVBufferRef {
        self.buffer
    }

    /// New raw reference for handing to FFmpeg, which takes ownership
    pub fn new_ref(&self) -> Result<*mut ffi::AVBufferRef, ffmpeg_next::Error> {
        let reference = unsafe { ffi::av_buffer_ref(self.buffer) };
        if reference.is_null() {
            return Err(ffmpeg_next::Error::Other { errno: ffmpeg_next::error::ENOMEM });
        }
        Ok(reference)
    }

    pub fn try_clone(&self) -> Result<Self, ffmpeg_next::Error> {
        Ok(Self {
            buffer: self.new_ref()?,
            kind: self.kind,
        })
    }
}

impl Drop for HwDeviceContext {
    fn drop(&mut self) {
        if !self.buffer.is_null() {
            unsafe { ffi::av_buffer_unref(&mut self.buffer) };
        }
    }
}

impl std::fmt::Debug for HwDeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwDeviceContext")
            .field("kind", &self.kind)
            .field("buffer", &self.buffer)
            .finish()
    }
}
