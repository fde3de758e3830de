//! Immersive Capture Library
//!
//! Hardware-only video decoding straight into GPU textures. Media comes from a
//! file, an in-memory buffer or a live access-unit feed, is demuxed by FFmpeg
//! through a custom IO bridge, decoded on a hardware backend bound to the
//! caller's render device and handed back as textures that never leave the GPU.
//!
//! ```no_run
//! use std::sync::Arc;
//! use immersive_capture::{CaptureRuntime, CaptureSettings, HwDevice, BackendKind};
//!
//! let device = HwDevice::open_first(BackendKind::platform_order()).expect("no hardware device");
//! let runtime = CaptureRuntime::initialize(Arc::new(device), CaptureSettings::load()).expect("init");
//! let mut capture = runtime.session();
//! capture.open("clip.mp4").expect("open");
//! while let Ok(Some(frame)) = capture.read() {
//!     println!("frame at {:.3}s", frame.pts);
//! }
//! ```

use std::sync::OnceLock;

pub mod capture;
pub mod demux;
pub mod device;
pub mod hwaccel;
pub mod settings;
pub mod source;
pub mod telemetry;
pub mod video;

pub use capture::{CaptureError, CaptureProperty, CaptureRuntime, CaptureSession};
pub use demux::{ContainerDemuxer, DemuxError, PacketRead, PacketSource, StreamInfo, VideoCodec};
pub use device::{DeviceError, HwDevice, NativeSurface, RenderDevice, SurfaceDesc, SurfaceFormat};
#[cfg(target_os = "windows")]
pub use device::{D3d11Device, D3d11Texture};
pub use hwaccel::{BackendKind, BackendRecord, CapabilityRegistry};
pub use settings::{CaptureSettings, SettingsError};
pub use source::{BufferSource, DataSource, FileSource, SourceError, StreamFeeder, StreamingSource};
pub use video::{DecodeError, DecodedFrame, FrameDecode, FrameDecoder, Received};

static FFMPEG_INIT: OnceLock<Result<(), ffmpeg_next::Error>> = OnceLock::new();

/// Initialize FFmpeg once per process
pub(crate) fn ensure_ffmpeg_initialized() -> Result<(), ffmpeg_next::Error> {
    *FFMPEG_INIT.get_or_init(|| {
        let result = ffmpeg_next::init();
        match &result {
            Ok(()) => tracing::debug!("FFmpeg initialized"),
            Err(e) => tracing::error!("FFmpeg initialization failed: {}", e),
        }
        result
    })
}
