//! Hardware acceleration backends and the capability registry
//!
//! The registry is probed once at startup and handed to every capture
//! session. A session asks it for a backend able to decode the stream's
//! codec; a `None` answer is a hard failure, as there is no software path.

mod device_context;
mod probe;

pub use device_context::HwDeviceContext;
pub use probe::{BackendProbe, FfmpegProbe};

use ffmpeg_next::ffi::{AVHWDeviceType, AVPixelFormat};

use crate::demux::VideoCodec;

/// Hardware acceleration backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// No backend; the "nothing qualifies" sentinel
    None,
    /// Windows Direct3D 11 video acceleration
    D3d11va,
    /// Windows DXVA2
    Dxva2,
    /// NVIDIA CUDA / NVDEC
    Cuda,
    /// Intel QuickSync
    Qsv,
    /// Linux VA-API
    Vaapi,
    /// macOS VideoToolbox
    VideoToolbox,
}

impl BackendKind {
    /// Default preference order for this platform
    pub fn platform_order() -> &'static [BackendKind] {
        #[cfg(target_os = "windows")]
        {
            &[BackendKind::D3d11va, BackendKind::Cuda, BackendKind::Qsv, BackendKind::Dxva2]
        }

        #[cfg(target_os = "macos")]
        {
            &[BackendKind::VideoToolbox]
        }

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            &[BackendKind::Cuda, BackendKind::Vaapi, BackendKind::Qsv]
        }
    }

    /// FFmpeg device type, `None` for the sentinel
    pub fn device_type(self) -> Option<AVHWDeviceType> {
        match self {
            BackendKind::None => None,
            BackendKind::D3d11va => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA),
            BackendKind::Dxva2 => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2),
            BackendKind::Cuda => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA),
            BackendKind::Qsv => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_QSV),
            BackendKind::Vaapi => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI),
            BackendKind::VideoToolbox => Some(AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX),
        }
    }

    /// Pixel format the decoder must negotiate for this backend
    pub fn hw_pixel_format(self) -> Option<AVPixelFormat> {
        match self {
            BackendKind::None => None,
            BackendKind::D3d11va => Some(AVPixelFormat::AV_PIX_FMT_D3D11),
            BackendKind::Dxva2 => Some(AVPixelFormat::AV_PIX_FMT_DXVA2_VLD),
            BackendKind::Cuda => Some(AVPixelFormat::AV_PIX_FMT_CUDA),
            BackendKind::Qsv => Some(AVPixelFormat::AV_PIX_FMT_QSV),
            BackendKind::Vaapi => Some(AVPixelFormat::AV_PIX_FMT_VAAPI),
            BackendKind::VideoToolbox => Some(AVPixelFormat::AV_PIX_FMT_VIDEOTOOLBOX),
        }
    }

    /// Human-readable backend name
    pub fn display_name(self) -> &'static str {
        match self {
            BackendKind::None => "None",
            BackendKind::D3d11va => "Direct3D 11 Video Acceleration",
            BackendKind::Dxva2 => "DirectX Video Acceleration 2",
            BackendKind::Cuda => "NVIDIA CUDA (NVDEC)",
            BackendKind::Qsv => "Intel Quick Sync Video",
            BackendKind::Vaapi => "Video Acceleration API",
            BackendKind::VideoToolbox => "Apple VideoToolbox",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::None => write!(f, "none"),
            BackendKind::D3d11va => write!(f, "d3d11va"),
            BackendKind::Dxva2 => write!(f, "dxva2"),
            BackendKind::Cuda => write!(f, "cuda"),
            BackendKind::Qsv => write!(f, "qsv"),
            BackendKind::Vaapi => write!(f, "vaapi"),
            BackendKind::VideoToolbox => write!(f, "videotoolbox"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(BackendKind::None),
            "d3d11va" | "d3d11" => Ok(BackendKind::D3d11va),
            "dxva2" => Ok(BackendKind::Dxva2),
            "cuda" | "nvdec" => Ok(BackendKind::Cuda),
            "qsv" => Ok(BackendKind::Qsv),
            "vaapi" => Ok(BackendKind::Vaapi),
            "videotoolbox" => Ok(BackendKind::VideoToolbox),
            other => Err(format!("unknown hardware backend: {}", other)),
        }
    }
}

/// One probed backend and the codecs it can decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRecord {
    pub kind: BackendKind,
    pub name: String,
    pub available: bool,
    codecs: Vec<VideoCodec>,
}

impl BackendRecord {
    pub fn new(kind: BackendKind, available: bool, codecs: Vec<VideoCodec>) -> Self {
        Self {
            kind,
            name: kind.display_name().to_string(),
            available,
            codecs,
        }
    }

    /// The "no backend qualifies" sentinel
    pub fn none() -> Self {
        Self::new(BackendKind::None, false, Vec::new())
    }

    pub fn is_none(&self) -> bool {
        self.kind == BackendKind::None
    }

    pub fn supports(&self, codec: VideoCodec) -> bool {
        self.available && self.codecs.contains(&codec)
    }

    pub fn codecs(&self) -> &[VideoCodec] {
        &self.codecs
    }
}

/// Probed hardware capabilities, in preference order
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    records: Vec<BackendRecord>,
}

impl CapabilityRegistry {
    /// Probe FFmpeg for each backend in `order`
    pub fn probe(order: &[BackendKind]) -> Self {
        Self::probe_with(&FfmpegProbe, order)
    }

    /// Probe through a custom [`BackendProbe`]
    pub fn probe_with<P: BackendProbe>(probe: &P, order: &[BackendKind]) -> Self {
        let mut records = Vec::with_capacity(order.len());

        for &kind in order {
            if kind == BackendKind::None || records.iter().any(|r: &BackendRecord| r.kind == kind) {
                continue;
            }

            let available = probe.device_available(kind);
            let codecs: Vec<VideoCodec> = if available {
                VideoCodec::ALL
                    .into_iter()
                    .filter(|&codec| probe.supports(kind, codec))
                    .collect()
            } else {
                Vec::new()
            };

            if available {
                tracing::info!(backend = %kind, ?codecs, "Hardware backend available");
            } else {
                tracing::debug!(backend = %kind, "Hardware backend not available");
            }
            records.push(BackendRecord::new(kind, available, codecs));
        }

        Self { records }
    }

    /// Build a registry from known records, keeping their order
    pub fn from_records(records: Vec<BackendRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[BackendRecord] {
        &self.records
    }

    /// Available backends only
    pub fn available(&self) -> impl Iterator<Item = &BackendRecord> {
        self.records.iter().filter(|r| r.available)
    }

    /// First available backend supporting `codec`, or the `None` sentinel
    pub fn best_for(&self, codec: VideoCodec) -> BackendRecord {
        self.records
            .iter()
            .find(|r| r.supports(codec))
            .cloned()
            .unwrap_or_else(BackendRecord::none)
    }

    /// The record for `kind` if it can decode `codec`
    pub fn find(&self, kind: BackendKind, codec: VideoCodec) -> Option<&BackendRecord> {
        self.records.iter().find(|r| r.kind == kind && r.supports(codec))
    }

    pub fn is_supported(&self, codec: VideoCodec) -> bool {
        self.records.iter().any(|r| r.supports(codec))
    }

    /// Drop every cached record
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse a comma-separated backend list, skipping unknown names
pub fn parse_backend_order(list: &str) -> Vec<BackendKind> {
    list.split(',')
        .filter(|name| !name.trim().is_empty())
        .filter_map(|name| match name.parse::<BackendKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe;

    impl BackendProbe for FakeProbe {
        fn device_available(&self, kind: BackendKind) -> bool {
            matches!(kind, BackendKind::Cuda | BackendKind::Vaapi)
        }

        fn supports(&self, kind: BackendKind, codec: VideoCodec) -> bool {
            match kind {
                BackendKind::Cuda => codec != VideoCodec::Av1,
                BackendKind::Vaapi => true,
                _ => false,
            }
        }
    }

    #[test]
    fn test_probe_respects_order_and_availability() {
        let order = [BackendKind::D3d11va, BackendKind::Cuda, BackendKind::Vaapi, BackendKind::Cuda];
        let registry = CapabilityRegistry::probe_with(&FakeProbe, &order);

        let kinds: Vec<_> = registry.records().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![BackendKind::D3d11va, BackendKind::Cuda, BackendKind::Vaapi]);
        assert!(!registry.records()[0].available);
        assert!(registry.records()[0].codecs().is_empty());
        assert_eq!(registry.available().count(), 2);
    }

    #[test]
    fn test_best_for_uses_preference_order() {
        let registry = CapabilityRegistry::probe_with(
            &FakeProbe,
            &[BackendKind::Cuda, BackendKind::Vaapi],
        );
        assert_eq!(registry.best_for(VideoCodec::H264).kind, BackendKind::Cuda);
        assert_eq!(registry.best_for(VideoCodec::Av1).kind, BackendKind::Vaapi);
        assert!(registry.find(BackendKind::Cuda, VideoCodec::Av1).is_none());
    }

    #[test]
    fn test_best_for_returns_none_sentinel() {
        let registry = CapabilityRegistry::probe_with(&FakeProbe, &[BackendKind::Qsv]);
        let best = registry.best_for(VideoCodec::Hevc);
        assert!(best.is_none());
        assert!(!best.available);
        assert!(!registry.is_supported(VideoCodec::Hevc));
    }

    #[test]
    fn test_clear_empties_registry() {
        let mut registry = CapabilityRegistry::probe_with(&FakeProbe, &[BackendKind::Cuda]);
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.best_for(VideoCodec::H264).is_none());
    }

    #[test]
    fn test_backend_names_round_trip() {
        for kind in [
            BackendKind::D3d11va,
            BackendKind::Dxva2,
            BackendKind::Cuda,
            BackendKind::Qsv,
            BackendKind::Vaapi,
            BackendKind::VideoToolbox,
        ] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("nvdec".parse::<BackendKind>().unwrap(), BackendKind::Cuda);
        assert!("glide".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_parse_backend_order() {
        assert_eq!(
            parse_backend_order("cuda, vaapi,bogus,,qsv"),
            vec![BackendKind::Cuda, BackendKind::Vaapi, BackendKind::Qsv]
        );
        assert!(parse_backend_order("").is_empty());
    }

    #[test]
    fn test_sentinel_has_no_device_type() {
        assert!(BackendKind::None.device_type().is_none());
        assert!(BackendKind::None.hw_pixel_format().is_none());
        assert_eq!(
            BackendKind::D3d11va.hw_pixel_format(),
            Some(AVPixelFormat::AV_PIX_FMT_D3D11)
        );
    }
}
