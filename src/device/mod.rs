//! Render devices that decoded surfaces live on
//!
//! The decoder is bound to a [`RenderDevice`] so decoded pictures stay
//! resident on the same GPU device that will later sample them. A device
//! knows how to:
//!
//! - hand FFmpeg a hardware device context wrapping itself
//! - turn a decoded hardware frame into a [`NativeSurface`]
//! - describe and copy its own textures
//!
//! Two devices ship with the crate: [`HwDevice`], an FFmpeg-owned device for
//! any backend, and on Windows [`D3d11Device`], which wraps an existing
//! `ID3D11Device`.

#[cfg(target_os = "windows")]
mod d3d11;
#[cfg(target_os = "windows")]
mod d3d11_ffi;
mod hw_frames;

#[cfg(target_os = "windows")]
pub use d3d11::{D3d11Device, D3d11Texture};
pub use hw_frames::{HwDevice, HwSurface};

use ffmpeg_next::ffi::AVPixelFormat;
use ffmpeg_next::frame;

use crate::hwaccel::{BackendKind, HwDeviceContext};

/// Errors raised by a render device
#[derive(Debug)]
pub enum DeviceError {
    /// Device or device context could not be created
    Creation(String),
    /// Frame does not carry a surface this device understands
    UnsupportedFrame(String),
    /// Surface query or copy failed
    Surface(String),
    /// FFmpeg error
    Ffmpeg(ffmpeg_next::Error),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Creation(msg) => write!(f, "Device creation failed: {}", msg),
            DeviceError::UnsupportedFrame(msg) => write!(f, "Unsupported frame: {}", msg),
            DeviceError::Surface(msg) => write!(f, "Surface operation failed: {}", msg),
            DeviceError::Ffmpeg(e) => write!(f, "FFmpeg error: {}", e),
        }
    }
}

impl std::error::Error for DeviceError {}

impl From<ffmpeg_next::Error> for DeviceError {
    fn from(e: ffmpeg_next::Error) -> Self {
        DeviceError::Ffmpeg(e)
    }
}

/// Pixel layout of a GPU surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormat {
    Bgra8,
    Rgba8,
    Bgrx8,
    /// 8-bit 4:2:0, interleaved chroma
    Nv12,
    /// 10-bit 4:2:0
    P010,
    /// 16-bit 4:2:0
    P016,
    /// Driver-opaque 4:2:0
    Opaque420,
    /// Any other native format code
    Other(u32),
}

impl SurfaceFormat {
    /// Whether the caller must convert YUV to RGB before display
    ///
    /// Only the packed RGB family is displayable as is.
    pub fn is_chroma(self) -> bool {
        !matches!(self, SurfaceFormat::Bgra8 | SurfaceFormat::Rgba8 | SurfaceFormat::Bgrx8)
    }

    /// Map FFmpeg's software pixel format of a hardware frame pool
    pub fn from_av_pixel_format(format: AVPixelFormat) -> Self {
        match format {
            AVPixelFormat::AV_PIX_FMT_BGRA => SurfaceFormat::Bgra8,
            AVPixelFormat::AV_PIX_FMT_RGBA => SurfaceFormat::Rgba8,
            AVPixelFormat::AV_PIX_FMT_BGR0 => SurfaceFormat::Bgrx8,
            AVPixelFormat::AV_PIX_FMT_NV12 => SurfaceFormat::Nv12,
            AVPixelFormat::AV_PIX_FMT_P010LE => SurfaceFormat::P010,
            AVPixelFormat::AV_PIX_FMT_P016LE => SurfaceFormat::P016,
            other => SurfaceFormat::Other(other as i32 as u32),
        }
    }
}

impl std::fmt::Display for SurfaceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceFormat::Bgra8 => write!(f, "bgra8"),
            SurfaceFormat::Rgba8 => write!(f, "rgba8"),
            SurfaceFormat::Bgrx8 => write!(f, "bgrx8"),
            SurfaceFormat::Nv12 => write!(f, "nv12"),
            SurfaceFormat::P010 => write!(f, "p010"),
            SurfaceFormat::P016 => write!(f, "p016"),
            SurfaceFormat::Opaque420 => write!(f, "420-opaque"),
            SurfaceFormat::Other(code) => write!(f, "native({})", code),
        }
    }
}

/// Dimensions and layout of a surface as allocated on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    /// Allocated width, possibly padded past the coded width
    pub width: u32,
    /// Allocated height, possibly padded past the coded height
    pub height: u32,
    pub format: SurfaceFormat,
    /// Number of slices; more than one means a decode pool
    pub array_size: u32,
}

/// Payload of a decoded hardware frame
#[derive(Debug, Clone, PartialEq)]
pub enum NativeSurface<T> {
    /// A standalone surface, usable directly
    Single(T),
    /// One slice of a shared surface pool
    ArraySlice { pool: T, index: u32 },
}

/// GPU device a decoder binds to
pub trait RenderDevice: Send + Sync + 'static {
    /// Device texture handle; cloning takes a new reference, not a copy
    type Texture: Clone + std::fmt::Debug + Send;

    /// Acceleration backend this device drives
    fn backend(&self) -> BackendKind;

    /// Short description for logs
    fn label(&self) -> String;

    /// FFmpeg device context bound to this device
    fn create_hw_device(&self) -> Result<HwDeviceContext, DeviceError>;

    /// Pull the native surface out of a decoded hardware frame
    fn surface_from_frame(
        &self,
        frame: &frame::Video,
    ) -> Result<NativeSurface<Self::Texture>, DeviceError>;

    /// Query a texture's allocated layout
    fn describe(&self, texture: &Self::Texture) -> Result<SurfaceDesc, DeviceError>;

    /// Copy slice `index` of `pool` into a new single, shader-readable texture
    fn copy_slice(&self, pool: &Self::Texture, index: u32) -> Result<Self::Texture, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroma_classification() {
        assert!(!SurfaceFormat::Bgra8.is_chroma());
        assert!(!SurfaceFormat::Rgba8.is_chroma());
        assert!(!SurfaceFormat::Bgrx8.is_chroma());
        assert!(SurfaceFormat::Nv12.is_chroma());
        assert!(SurfaceFormat::P010.is_chroma());
        assert!(SurfaceFormat::Opaque420.is_chroma());
        assert!(SurfaceFormat::Other(999).is_chroma());
    }

    #[test]
    fn test_av_pixel_format_mapping() {
        assert_eq!(
            SurfaceFormat::from_av_pixel_format(AVPixelFormat::AV_PIX_FMT_NV12),
            SurfaceFormat::Nv12
        );
        assert_eq!(
            SurfaceFormat::from_av_pixel_format(AVPixelFormat::AV_PIX_FMT_P010LE),
            SurfaceFormat::P010
        );
        assert_eq!(
            SurfaceFormat::from_av_pixel_format(AVPixelFormat::AV_PIX_FMT_BGRA),
            SurfaceFormat::Bgra8
        );
        assert!(matches!(
            SurfaceFormat::from_av_pixel_format(AVPixelFormat::AV_PIX_FMT_YUV420P),
            SurfaceFormat::Other(_)
        ));
    }

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::Surface("copy".to_string());
        assert_eq!(err.to_string(), "Surface operation failed: copy");
    }
}
