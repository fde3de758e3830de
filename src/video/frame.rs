//! Decoded video frame representation
//!
//! A frame holds a reference to a GPU-resident texture plus the metadata the
//! caller needs to display it. Pixels are never copied to system memory.

use crate::device::SurfaceFormat;

/// A decoded video frame living on the GPU
///
/// `T` is the render device's texture handle. The decoder may recycle the
/// underlying surface on a later read; clone the handle to keep it longer.
#[derive(Debug, Clone)]
pub struct DecodedFrame<T> {
    /// Texture holding the picture
    pub texture: T,
    /// Actual format of `texture`, as queried from the device
    pub format: SurfaceFormat,
    /// Coded frame width in pixels (not the padded surface width)
    pub width: u32,
    /// Coded frame height in pixels (not the padded surface height)
    pub height: u32,
    /// Presentation timestamp in seconds
    pub pts: f64,
    /// Whether the caller must convert YUV to RGB
    pub is_chroma_format: bool,
    /// Whether the frame is a sync point
    pub is_keyframe: bool,
}

impl<T> DecodedFrame<T> {
    /// Create a frame, deriving the chroma flag from `format`
    pub fn new(texture: T, format: SurfaceFormat, width: u32, height: u32, pts: f64, is_keyframe: bool) -> Self {
        Self {
            texture,
            format,
            width,
            height,
            pts,
            is_chroma_format: format.is_chroma(),
            is_keyframe,
        }
    }

    /// Frame position at `frame_rate`, rounded to the nearest index
    pub fn frame_index(&self, frame_rate: f64) -> i64 {
        (self.pts * frame_rate).round() as i64
    }

    /// Check the frame carries a usable picture
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pts.is_finite()
    }

    /// Swap the texture handle, keeping the metadata
    pub fn map_texture<U>(self, f: impl FnOnce(T) -> U) -> DecodedFrame<U> {
        DecodedFrame {
            texture: f(self.texture),
            format: self.format,
            width: self.width,
            height: self.height,
            pts: self.pts,
            is_chroma_format: self.is_chroma_format,
            is_keyframe: self.is_keyframe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = DecodedFrame::new(7u32, SurfaceFormat::Nv12, 1920, 1080, 0.04, true);

        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert!(frame.is_chroma_format);
        assert!(frame.is_keyframe);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_rgb_frame_is_not_chroma() {
        let frame = DecodedFrame::new((), SurfaceFormat::Bgra8, 64, 64, 0.0, false);
        assert!(!frame.is_chroma_format);
    }

    #[test]
    fn test_frame_index() {
        let frame = DecodedFrame::new((), SurfaceFormat::Nv12, 16, 16, 0.52, false);
        assert_eq!(frame.frame_index(25.0), 13);
        assert_eq!(frame.frame_index(0.0), 0);
    }

    #[test]
    fn test_zero_sized_frame_is_invalid() {
        let frame = DecodedFrame::new((), SurfaceFormat::Nv12, 0, 1080, 0.0, false);
        assert!(!frame.is_valid());
    }

    #[test]
    fn test_map_texture_keeps_metadata() {
        let frame = DecodedFrame::new(3u8, SurfaceFormat::P010, 8, 8, 1.5, true);
        let mapped = frame.map_texture(|t| t as u32 * 10);
        assert_eq!(mapped.texture, 30);
        assert_eq!(mapped.format, SurfaceFormat::P010);
        assert_eq!(mapped.pts, 1.5);
    }
}
