//! Hardware frame extraction
//!
//! Turns a decoded hardware frame into a [`DecodedFrame`]. Array-pool slices
//! are copied out into standalone textures here, so nothing downstream ever
//! sees a pool.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;

use super::{DecodeError, DecodedFrame};
use crate::device::{DeviceError, NativeSurface, RenderDevice};

/// Pixel formats that tag a frame as living in a hardware surface
pub fn is_hardware_format(format: Pixel) -> bool {
    matches!(
        format,
        Pixel::VIDEOTOOLBOX
            | Pixel::D3D11
            | Pixel::D3D11VA_VLD
            | Pixel::DXVA2_VLD
            | Pixel::CUDA
            | Pixel::QSV
            | Pixel::VAAPI
            | Pixel::VDPAU
    )
}

/// Collapse a native surface into a single texture
pub(crate) fn resolve_surface<D: RenderDevice>(
    device: &D,
    surface: NativeSurface<D::Texture>,
) -> Result<D::Texture, DeviceError> {
    match surface {
        NativeSurface::Single(texture) => Ok(texture),
        NativeSurface::ArraySlice { pool, index } => device.copy_slice(&pool, index),
    }
}

/// Build the frame value around a resolved texture
pub(crate) fn finish_frame<D: RenderDevice>(
    device: &D,
    texture: D::Texture,
    width: u32,
    height: u32,
    pts: f64,
    is_keyframe: bool,
) -> Result<DecodedFrame<D::Texture>, DeviceError> {
    let desc = device.describe(&texture)?;
    Ok(DecodedFrame::new(texture, desc.format, width, height, pts, is_keyframe))
}

/// Extract a decoded hardware frame
///
/// Software frames are rejected: they mean the decoder was not bound to the
/// hardware pixel format.
pub(crate) fn extract_frame<D: RenderDevice>(
    device: &D,
    frame: &frame::Video,
    time_base: f64,
) -> Result<DecodedFrame<D::Texture>, DecodeError> {
    let format = frame.format();
    if !is_hardware_format(format) {
        return Err(DecodeError::SoftwareFrame(format));
    }

    let surface = device.surface_from_frame(frame)?;
    let texture = resolve_surface(device, surface)?;

    let pts = frame
        .pts()
        .or_else(|| frame.timestamp())
        .map(|ts| ts as f64 * time_base)
        .unwrap_or(0.0);

    Ok(finish_frame(device, texture, frame.width(), frame.height(), pts, is_sync_point(frame))?)
}

/// Random-access point as flagged by the decoder; a non-IDR I picture is not one
pub(crate) fn is_sync_point(frame: &frame::Video) -> bool {
    frame.is_key()
}
