//! FFmpeg-owned hardware device
//!
//! [`HwDevice`] lets FFmpeg create the device itself (CUDA, VA-API,
//! VideoToolbox, QSV, or a default-adapter D3D11VA device). Its textures are
//! [`HwSurface`] handles: references to the decoded hardware frame, which
//! keep the underlying surface alive until the last clone is dropped.

use ffmpeg_next::ffi;
use ffmpeg_next::frame;

use super::{DeviceError, NativeSurface, RenderDevice, SurfaceDesc, SurfaceFormat};
use crate::hwaccel::{BackendKind, HwDeviceContext};

/// Reference to a decoded hardware frame
pub struct HwSurface {
    frame: *mut ffi::AVFrame,
}

// The frame is only reachable through reference-counted buffers
unsafe impl Send for HwSurface {}
unsafe impl Sync for HwSurface {}

impl HwSurface {
    /// Take a new reference to `frame`'s buffers
    pub fn from_frame(frame: &frame::Video) -> Result<Self, DeviceError> {
        let cloned = unsafe { ffi::av_frame_clone(frame.as_ptr()) };
        if cloned.is_null() {
            return Err(DeviceError::Surface("av_frame_clone failed".to_string()));
        }
        Ok(Self { frame: cloned })
    }

    pub fn as_ptr(&self) -> *const ffi::AVFrame {
        self.frame
    }

    pub fn width(&self) -> u32 {
        unsafe { (*self.frame).width.max(0) as u32 }
    }

    pub fn height(&self) -> u32 {
        unsafe { (*self.frame).height.max(0) as u32 }
    }

    /// Hardware pixel format tag (e.g. `AV_PIX_FMT_CUDA`)
    pub fn hw_format(&self) -> i32 {
        unsafe { (*self.frame).format }
    }

    /// Backend-specific handle: `data[3]` for DXVA2/VA-API/VideoToolbox/QSV,
    /// `data[0]` for D3D11 and CUDA
    pub fn native_handle(&self) -> *mut u8 {
        unsafe {
            let format = (*self.frame).format;
            if format == D3D11_FORMAT || format == CUDA_FORMAT {
                (*self.frame).data[0]
            } else {
                (*self.frame).data[3]
            }
        }
    }

    /// Underlying software format of the frame pool
    pub fn sw_format(&self) -> Option<ffi::AVPixelFormat> {
        unsafe {
            let frames_ref = (*self.frame).hw_frames_ctx;
            if frames_ref.is_null() {
                return None;
            }
            let frames_ctx = (*frames_ref).data as *const ffi::AVHWFramesContext;
            Some((*frames_ctx).sw_format)
        }
    }
}

const D3D11_FORMAT: i32 = ffi::AVPixelFormat::AV_PIX_FMT_D3D11 as i32;
const CUDA_FORMAT: i32 = ffi::AVPixelFormat::AV_PIX_FMT_CUDA as i32;

impl Clone for HwSurface {
    fn clone(&self) -> Self {
        // av_frame_clone only fails on allocation failure
        let frame = unsafe { ffi::av_frame_clone(self.frame) };
        if frame.is_null() {
            std::alloc::handle_alloc_error(std::alloc::Layout::new::<ffi::AVFrame>());
        }
        Self { frame }
    }
}

impl Drop for HwSurface {
    fn drop(&mut self) {
        unsafe { ffi::av_frame_free(&mut self.frame) };
    }
}

impl std::fmt::Debug for HwSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwSurface")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.hw_format())
            .field("handle", &self.native_handle())
            .finish()
    }
}

/// Device created and owned by FFmpeg
#[derive(Debug)]
pub struct HwDevice {
    context: HwDeviceContext,
}

impl HwDevice {
    /// Create a device for `kind` on the default adapter
    pub fn open(kind: BackendKind) -> Result<Self, DeviceError> {
        crate::ensure_ffmpeg_initialized()?;
        let context = HwDeviceContext::create(kind)
            .map_err(|e| DeviceError::Creation(format!("{}: {}", kind, e)))?;
        tracing::info!(backend = %kind, "Created hardware device");
        Ok(Self { context })
    }

    /// Create the first device that succeeds, in `order`
    pub fn open_first(order: &[BackendKind]) -> Result<Self, DeviceError> {
        let mut last_error = DeviceError::Creation("no backend requested".to_string());
        for &kind in order {
            match Self::open(kind) {
                Ok(device) => return Ok(device),
                Err(e) => {
                    tracing::debug!(backend = %kind, "Hardware device unavailable: {}", e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

impl RenderDevice for HwDevice {
    type Texture = HwSurface;

    fn backend(&self) -> BackendKind {
        self.context.kind()
    }

    fn label(&self) -> String {
        format!("ffmpeg {} device", self.context.kind())
    }

    fn create_hw_device(&self) -> Result<HwDeviceContext, DeviceError> {
        Ok(self.context.try_clone()?)
    }

    fn surface_from_frame(&self, frame: &frame::Video) -> Result<NativeSurface<HwSurface>, DeviceError> {
        let raw = unsafe { frame.as_ptr() };
        if unsafe { (*raw).hw_frames_ctx.is_null() } {
            return Err(DeviceError::UnsupportedFrame("frame has no hardware frames context".to_string()));
        }
        // The frame reference pins its own slice, so no pool copy is needed
        Ok(NativeSurface::Single(HwSurface::from_frame(frame)?))
    }

    fn describe(&self, texture: &HwSurface) -> Result<SurfaceDesc, DeviceError> {
        let sw_format = texture
            .sw_format()
            .ok_or_else(|| DeviceError::Surface("surface has no frames context".to_string()))?;
        let (width, height) = unsafe {
            let frames_ctx = (*(*texture.as_ptr()).hw_frames_ctx).data as *const ffi::AVHWFramesContext;
            ((*frames_ctx).width.max(0) as u32, (*frames_ctx).height.max(0) as u32)
        };
        Ok(SurfaceDesc {
            width,
            height,
            format: SurfaceFormat::from_av_pixel_format(sw_format),
            array_size: 1,
        })
    }

    fn copy_slice(&self, pool: &HwSurface, _index: u32) -> Result<HwSurface, DeviceError> {
        Ok(pool.clone())
    }
}
