//! Capture sessions
//!
//! [`CaptureRuntime::initialize`] sets up FFmpeg, probes the hardware
//! backends once and returns the runtime value every [`CaptureSession`] is
//! built from. A session wires a demuxer to a hardware decoder and exposes a
//! pull-based `read()` plus OpenCV-compatible numeric properties.
//!
//! Everything runs on the caller's thread; a `read()` performs a bounded
//! number of decode-engine calls and returns.

use std::path::Path;
use std::sync::Arc;

use crate::demux::{ContainerDemuxer, DemuxError, PacketRead, PacketSource, StreamInfo, VideoCodec};
use crate::device::RenderDevice;
use crate::hwaccel::{BackendKind, BackendRecord, CapabilityRegistry};
use crate::settings::CaptureSettings;
use crate::source::{DataSource, StreamingSource};
use crate::video::{DecodeError, DecodedFrame, FrameDecode, FrameDecoder, Received};

/// Errors surfaced by capture sessions
#[derive(Debug)]
pub enum CaptureError {
    /// FFmpeg could not be initialized
    Init(ffmpeg_next::Error),
    /// No session is open
    NotOpened,
    /// The source has no data yet; retry later
    Stalled,
    /// The pump loop hit its iteration ceiling without producing a frame
    RetryCeilingExceeded(u32),
    /// No hardware backend can decode the stream's codec
    NoHardwareBackend(VideoCodec),
    /// Container failure
    Demux(DemuxError),
    /// Decoder failure
    Decode(DecodeError),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Init(e) => write!(f, "FFmpeg initialization failed: {}", e),
            CaptureError::NotOpened => write!(f, "Capture is not opened"),
            CaptureError::Stalled => write!(f, "Source has no data yet"),
            CaptureError::RetryCeilingExceeded(n) => {
                write!(f, "No frame after {} decode attempts", n)
            }
            CaptureError::NoHardwareBackend(codec) => {
                write!(f, "No hardware decoder available for {}", codec)
            }
            CaptureError::Demux(e) => write!(f, "{}", e),
            CaptureError::Decode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<ffmpeg_next::Error> for CaptureError {
    fn from(e: ffmpeg_next::Error) -> Self {
        CaptureError::Init(e)
    }
}

impl From<DemuxError> for CaptureError {
    fn from(e: DemuxError) -> Self {
        CaptureError::Demux(e)
    }
}

impl From<DecodeError> for CaptureError {
    fn from(e: DecodeError) -> Self {
        CaptureError::Decode(e)
    }
}

/// OpenCV-compatible capture property ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CaptureProperty {
    /// Position in milliseconds
    PosMsec = 0,
    /// Position in frames
    PosFrames = 1,
    /// Position as a 0..1 ratio of the duration
    PosAviRatio = 2,
    FrameWidth = 3,
    FrameHeight = 4,
    Fps = 5,
    Fourcc = 6,
    FrameCount = 7,
}

impl CaptureProperty {
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Whether `set` accepts this property
    pub fn is_position(self) -> bool {
        matches!(
            self,
            CaptureProperty::PosMsec | CaptureProperty::PosFrames | CaptureProperty::PosAviRatio
        )
    }
}

impl TryFrom<i32> for CaptureProperty {
    type Error = i32;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(CaptureProperty::PosMsec),
            1 => Ok(CaptureProperty::PosFrames),
            2 => Ok(CaptureProperty::PosAviRatio),
            3 => Ok(CaptureProperty::FrameWidth),
            4 => Ok(CaptureProperty::FrameHeight),
            5 => Ok(CaptureProperty::Fps),
            6 => Ok(CaptureProperty::Fourcc),
            7 => Ok(CaptureProperty::FrameCount),
            other => Err(other),
        }
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Initialized capture environment
///
/// Holds the render device, the probed capability registry and the
/// settings. Creating one is the only way to obtain a session.
pub struct CaptureRuntime<D: RenderDevice> {
    device: Arc<D>,
    registry: Arc<CapabilityRegistry>,
    settings: Arc<CaptureSettings>,
}

impl<D: RenderDevice> Clone for CaptureRuntime<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            registry: Arc::clone(&self.registry),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<D: RenderDevice> CaptureRuntime<D> {
    /// Initialize FFmpeg and probe hardware backends for `device`
    pub fn initialize(device: Arc<D>, mut settings: CaptureSettings) -> Result<Self, CaptureError> {
        crate::ensure_ffmpeg_initialized()?;
        settings.clamp();
        crate::telemetry::forward_ffmpeg_logs(settings.ffmpeg_log_level());

        let registry = CapabilityRegistry::probe(&settings.backend_order());
        if registry.available().next().is_none() {
            tracing::warn!("No hardware decode backend is available; every open will fail");
        }

        tracing::info!(
            device = %device.label(),
            backends = registry.available().count(),
            retry_ceiling = settings.retry_ceiling,
            "Capture runtime initialized"
        );

        Ok(Self::with_registry(device, registry, settings))
    }

    /// Build a runtime around an already probed registry
    pub fn with_registry(device: Arc<D>, registry: CapabilityRegistry, settings: CaptureSettings) -> Self {
        Self {
            device,
            registry: Arc::new(registry),
            settings: Arc::new(settings),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Drop the cached capabilities; sessions created afterwards cannot open
    /// until [`CaptureRuntime::reprobe`] runs
    pub fn cleanup(&mut self) {
        self.registry = Arc::new(CapabilityRegistry::default());
        tracing::debug!("Capability registry cleared");
    }

    /// Probe the hardware backends again
    pub fn reprobe(&mut self) {
        self.registry = Arc::new(CapabilityRegistry::probe(&self.settings.backend_order()));
    }

    /// Create a session bound to this runtime
    pub fn session(&self) -> CaptureSession<D> {
        CaptureSession::new(self)
    }
}

/// The registry record for the render device's backend, if it decodes `codec`
///
/// Decoded surfaces must live on the caller's device, so no other backend
/// qualifies.
pub fn select_backend(
    registry: &CapabilityRegistry,
    codec: VideoCodec,
    device_backend: BackendKind,
) -> Result<BackendRecord, CaptureError> {
    registry
        .find(device_backend, codec)
        .cloned()
        .ok_or(CaptureError::NoHardwareBackend(codec))
}

// ============================================================================
// Session
// ============================================================================

/// Pull-based capture over one source
pub struct CaptureSession<D: RenderDevice> {
    runtime: CaptureRuntime<D>,
    /// Released first, then `decoder`, then `demuxer`
    current: Option<DecodedFrame<D::Texture>>,
    decoder: Option<Box<dyn FrameDecode<D::Texture>>>,
    demuxer: Option<Box<dyn PacketSource>>,
    info: Option<StreamInfo>,
    backend: BackendKind,
    opened: bool,
    eof: bool,
    frame_count: i64,
}

impl<D: RenderDevice> CaptureSession<D> {
    pub fn new(runtime: &CaptureRuntime<D>) -> Self {
        Self {
            runtime: runtime.clone(),
            current: None,
            decoder: None,
            demuxer: None,
            info: None,
            backend: BackendKind::None,
            opened: false,
            eof: false,
            frame_count: 0,
        }
    }

    /// Open a media file by path
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CaptureError> {
        self.release();
        let demuxer = ContainerDemuxer::open_path(path).map_err(|e| open_failed(e.into()))?;
        self.open_demuxer(Box::new(demuxer))
    }

    /// Open over any data source; `format_hint` forces a demuxer
    pub fn open_source<S: DataSource + 'static>(
        &mut self,
        source: S,
        format_hint: Option<&str>,
    ) -> Result<(), CaptureError> {
        self.release();
        let demuxer = ContainerDemuxer::open_source(source, format_hint, self.runtime.settings.io_buffer_size)
            .map_err(|e| open_failed(e.into()))?;
        self.open_demuxer(Box::new(demuxer))
    }

    /// Open over a live stream, forcing the demuxer for its codec
    pub fn open_stream(&mut self, source: StreamingSource) -> Result<(), CaptureError> {
        let hint = source.format_hint();
        self.open_source(source, hint)
    }

    fn open_demuxer(&mut self, demuxer: Box<dyn PacketSource>) -> Result<(), CaptureError> {
        let info = *demuxer.info();
        let device = Arc::clone(&self.runtime.device);

        let backend = select_backend(&self.runtime.registry, info.codec, device.backend()).map_err(open_failed)?;
        let parameters = demuxer.parameters().ok_or_else(|| {
            open_failed(CaptureError::Decode(DecodeError::DecoderCreation(
                "demuxer exposes no codec parameters".to_string(),
            )))
        })?;

        let mut decoder = FrameDecoder::new();
        decoder
            .initialize(parameters, &backend, device, info.time_base)
            .map_err(|e| open_failed(e.into()))?;

        self.open_with(demuxer, Box::new(decoder))?;
        self.backend = backend.kind;
        Ok(())
    }

    /// Open over caller-supplied pipeline stages
    pub fn open_with(
        &mut self,
        demuxer: Box<dyn PacketSource>,
        decoder: Box<dyn FrameDecode<D::Texture>>,
    ) -> Result<(), CaptureError> {
        self.release();

        let info = *demuxer.info();
        self.frame_count = info.frame_count();
        self.info = Some(info);
        self.demuxer = Some(demuxer);
        self.decoder = Some(decoder);
        self.opened = true;
        self.eof = false;

        tracing::info!(
            codec = %info.codec,
            width = info.width,
            height = info.height,
            fps = info.frame_rate,
            frames = self.frame_count,
            "Capture opened"
        );
        Ok(())
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    /// Backend the decoder was bound to
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Most recently read frame
    pub fn current_frame(&self) -> Option<&DecodedFrame<D::Texture>> {
        self.current.as_ref()
    }

    /// Decode the next frame
    ///
    /// `Ok(None)` means end of stream. [`CaptureError::Stalled`] means a
    /// streaming source has no bytes yet and the call can be retried.
    pub fn read(&mut self) -> Result<Option<DecodedFrame<D::Texture>>, CaptureError> {
        if !self.opened {
            return Err(CaptureError::NotOpened);
        }
        if self.eof {
            return Ok(None);
        }

        match self.pump() {
            Ok(Some(frame)) => {
                self.current = Some(frame.clone());
                Ok(Some(frame))
            }
            Ok(None) => {
                self.eof = true;
                tracing::debug!("Capture reached end of stream");
                Ok(None)
            }
            Err(CaptureError::Stalled) => Err(CaptureError::Stalled),
            Err(e) => {
                tracing::error!("Capture read failed: {}", e);
                Err(e)
            }
        }
    }

    fn pump(&mut self) -> Result<Option<DecodedFrame<D::Texture>>, CaptureError> {
        let ceiling = self.runtime.settings.retry_ceiling.max(1);
        let (Some(demuxer), Some(decoder)) = (self.demuxer.as_mut(), self.decoder.as_mut()) else {
            return Err(CaptureError::NotOpened);
        };

        for _ in 0..ceiling {
            match decoder.receive_frame() {
                Ok(Received::Frame(frame)) => return Ok(Some(frame)),
                Ok(Received::NeedsInput) | Ok(Received::EndOfStream) => {}
                Err(e) => tracing::warn!("Frame reception failed, feeding next packet: {}", e),
            }

            match demuxer.read_packet() {
                Ok(PacketRead::Packet(packet)) => decoder.send_packet(Some(&packet))?,
                Ok(PacketRead::Pending) => return Err(CaptureError::Stalled),
                Ok(PacketRead::EndOfStream) => return Ok(drain(decoder.as_mut())),
                Err(e) => {
                    tracing::error!("Demuxer read failed, draining decoder: {}", e);
                    return Ok(drain(decoder.as_mut()));
                }
            }
        }

        tracing::error!(ceiling, "Decode pump exhausted without producing a frame");
        Err(CaptureError::RetryCeilingExceeded(ceiling))
    }

    /// Read a property by numeric id; unknown ids and closed sessions read 0.0
    pub fn get(&self, property_id: i32) -> f64 {
        match CaptureProperty::try_from(property_id) {
            Ok(property) => self.property(property),
            Err(id) => {
                tracing::warn!(id, "Unknown capture property");
                0.0
            }
        }
    }

    pub fn property(&self, property: CaptureProperty) -> f64 {
        let (true, Some(info)) = (self.opened, self.info.as_ref()) else {
            return 0.0;
        };
        let pts = self.current.as_ref().map(|f| f.pts).unwrap_or(0.0);

        match property {
            CaptureProperty::PosMsec => pts * 1000.0,
            CaptureProperty::PosFrames => pts * info.frame_rate,
            CaptureProperty::PosAviRatio => {
                if info.duration > 0.0 {
                    pts / info.duration
                } else {
                    0.0
                }
            }
            CaptureProperty::FrameWidth => info.width as f64,
            CaptureProperty::FrameHeight => info.height as f64,
            CaptureProperty::Fps => info.frame_rate,
            CaptureProperty::Fourcc => info.codec.fourcc() as f64,
            CaptureProperty::FrameCount => self.frame_count as f64,
        }
    }

    /// Write a property by numeric id; only position properties are writable
    pub fn set(&mut self, property_id: i32, value: f64) -> bool {
        match CaptureProperty::try_from(property_id) {
            Ok(property) => self.set_property(property, value),
            Err(id) => {
                tracing::warn!(id, "Unknown capture property");
                false
            }
        }
    }

    /// Seek via a position property, then flush the decoder and clear EOF
    pub fn set_property(&mut self, property: CaptureProperty, value: f64) -> bool {
        if !self.opened || !value.is_finite() {
            return false;
        }
        if !property.is_position() {
            tracing::warn!(?property, "Capture property is read-only");
            return false;
        }
        let (Some(demuxer), Some(decoder)) = (self.demuxer.as_mut(), self.decoder.as_mut()) else {
            return false;
        };

        let duration = demuxer.info().duration;
        let result = match property {
            CaptureProperty::PosMsec => demuxer.seek_to_time(value / 1000.0),
            CaptureProperty::PosFrames => demuxer.seek_to_frame(value.round() as i64),
            CaptureProperty::PosAviRatio if duration > 0.0 => {
                demuxer.seek_to_time(value.clamp(0.0, 1.0) * duration)
            }
            _ => Err(DemuxError::Seek("duration unknown".to_string())),
        };

        match result {
            Ok(()) => {
                decoder.flush();
                self.eof = false;
                tracing::debug!(?property, value, "Capture seeked");
                true
            }
            Err(e) => {
                tracing::warn!(?property, value, "Capture seek failed: {}", e);
                false
            }
        }
    }

    /// Drop the current frame, decoder and demuxer, in that order. Idempotent.
    pub fn release(&mut self) {
        let was_open = self.opened;
        self.current = None;
        self.decoder = None;
        self.demuxer = None;
        self.info = None;
        self.backend = BackendKind::None;
        self.opened = false;
        self.eof = false;
        self.frame_count = 0;
        if was_open {
            tracing::debug!("Capture released");
        }
    }
}

impl<D: RenderDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Signal end of stream and make one final receive attempt
fn drain<T>(decoder: &mut dyn FrameDecode<T>) -> Option<DecodedFrame<T>> {
    if let Err(e) = decoder.send_packet(None) {
        tracing::warn!("Drain request failed: {}", e);
    }
    match decoder.receive_frame() {
        Ok(Received::Frame(frame)) => Some(frame),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("Final frame reception failed: {}", e);
            None
        }
    }
}

fn open_failed(e: CaptureError) -> CaptureError {
    tracing::error!("Failed to open capture: {}", e);
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use ffmpeg_next::{codec, Packet, Rational};

    use crate::device::SurfaceFormat;
    use crate::source::BufferSource;
    use crate::video::extract::tests::{MockDevice, MockTexture};

    const FPS: f64 = 25.0;

    /// Demuxer over `total` synthetic packets, keyframes every `gop` packets
    struct MockDemuxer {
        info: StreamInfo,
        total: i64,
        gop: i64,
        next: i64,
        pending_at: Option<i64>,
        fail_seeks: bool,
    }

    impl MockDemuxer {
        fn new(total: i64, gop: i64) -> Self {
            Self {
                info: StreamInfo {
                    index: 0,
                    codec: VideoCodec::H264,
                    width: 64,
                    height: 48,
                    frame_rate: FPS,
                    time_base: Rational::new(1, 25),
                    duration: total as f64 / FPS,
                },
                total,
                gop,
                next: 0,
                pending_at: None,
                fail_seeks: false,
            }
        }
    }

    impl PacketSource for MockDemuxer {
        fn info(&self) -> &StreamInfo {
            &self.info
        }

        fn parameters(&self) -> Option<codec::Parameters> {
            None
        }

        fn read_packet(&mut self) -> Result<PacketRead, DemuxError> {
            if self.pending_at == Some(self.next) {
                self.pending_at = None;
                return Ok(PacketRead::Pending);
            }
            if self.next >= self.total {
                return Ok(PacketRead::EndOfStream);
            }
            let mut packet = Packet::copy(&[0, 0, 0, 1]);
            packet.set_pts(Some(self.next));
            self.next += 1;
            Ok(PacketRead::Packet(packet))
        }

        fn seek_to_time(&mut self, seconds: f64) -> Result<(), DemuxError> {
            if self.fail_seeks {
                return Err(DemuxError::Seek("mock failure".to_string()));
            }
            let frame = (seconds * FPS).floor() as i64;
            self.next = (frame / self.gop) * self.gop;
            Ok(())
        }
    }

    /// Decoder holding back `delay` frames until drained
    #[derive(Default)]
    struct MockDecoder {
        queue: VecDeque<i64>,
        delay: usize,
        draining: bool,
        swallow_everything: bool,
    }

    impl FrameDecode<MockTexture> for MockDecoder {
        fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), DecodeError> {
            match packet {
                Some(packet) => self.queue.push_back(packet.pts().unwrap_or(0)),
                None => self.draining = true,
            }
            Ok(())
        }

        fn receive_frame(&mut self) -> Result<Received<MockTexture>, DecodeError> {
            if self.swallow_everything {
                return Ok(Received::NeedsInput);
            }
            if self.queue.len() > self.delay || (self.draining && !self.queue.is_empty()) {
                let pts = self.queue.pop_front().unwrap_or(0);
                let texture = MockTexture {
                    id: pts as u32,
                    array_size: 1,
                    format: SurfaceFormat::Nv12,
                };
                return Ok(Received::Frame(DecodedFrame::new(
                    texture,
                    SurfaceFormat::Nv12,
                    64,
                    48,
                    pts as f64 / FPS,
                    true,
                )));
            }
            if self.draining {
                Ok(Received::EndOfStream)
            } else {
                Ok(Received::NeedsInput)
            }
        }

        fn flush(&mut self) {
            self.queue.clear();
            self.draining = false;
        }
    }

    fn runtime_with(settings: CaptureSettings) -> CaptureRuntime<MockDevice> {
        let registry = CapabilityRegistry::from_records(vec![BackendRecord::new(
            BackendKind::Cuda,
            true,
            vec![VideoCodec::H264],
        )]);
        CaptureRuntime::with_registry(Arc::new(MockDevice::default()), registry, settings)
    }

    fn open_session(demuxer: MockDemuxer, decoder: MockDecoder) -> CaptureSession<MockDevice> {
        let mut session = runtime_with(CaptureSettings::default()).session();
        session.open_with(Box::new(demuxer), Box::new(decoder)).unwrap();
        session
    }

    fn read_all(session: &mut CaptureSession<MockDevice>) -> Vec<f64> {
        let mut times = Vec::new();
        while let Some(frame) = session.read().unwrap() {
            times.push(frame.pts);
        }
        times
    }

    #[test]
    fn test_reads_every_frame_then_eof() {
        let mut session = open_session(MockDemuxer::new(10, 1), MockDecoder::default());
        assert_eq!(session.get(CaptureProperty::FrameCount.id()), 10.0);

        let mut last = -1.0;
        for _ in 0..10 {
            let frame = session.read().unwrap().expect("frame");
            assert!(frame.is_valid());
            assert!(frame.pts > last);
            last = frame.pts;
        }

        assert!(session.read().unwrap().is_none());
        assert!(session.is_eof());
        // Stays at EOF without touching the pipeline
        assert!(session.read().unwrap().is_none());

        assert!(session.set(CaptureProperty::PosFrames.id(), 0.0));
        assert!(!session.is_eof());
        let frame = session.read().unwrap().expect("frame after rewind");
        assert!(frame.pts.abs() < 1e-9);
    }

    #[test]
    fn test_buffered_frames_are_drained() {
        let decoder = MockDecoder {
            delay: 3,
            ..Default::default()
        };
        let mut session = open_session(MockDemuxer::new(10, 1), decoder);
        let times = read_all(&mut session);

        assert_eq!(times.len(), 10);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_retry_ceiling_is_a_failure_not_eof() {
        let decoder = MockDecoder {
            swallow_everything: true,
            ..Default::default()
        };
        let mut session = open_session(MockDemuxer::new(500, 1), decoder);

        assert!(matches!(session.read(), Err(CaptureError::RetryCeilingExceeded(100))));
        assert!(!session.is_eof());
    }

    #[test]
    fn test_retry_ceiling_is_configurable() {
        let settings = CaptureSettings {
            retry_ceiling: 5,
            ..Default::default()
        };
        let mut session = runtime_with(settings).session();
        let decoder = MockDecoder {
            swallow_everything: true,
            ..Default::default()
        };
        session
            .open_with(Box::new(MockDemuxer::new(50, 1)), Box::new(decoder))
            .unwrap();

        assert!(matches!(session.read(), Err(CaptureError::RetryCeilingExceeded(5))));
    }

    #[test]
    fn test_pending_source_stalls_then_resumes() {
        let mut demuxer = MockDemuxer::new(4, 1);
        demuxer.pending_at = Some(2);
        let mut session = open_session(demuxer, MockDecoder::default());

        assert!(session.read().unwrap().is_some());
        assert!(session.read().unwrap().is_some());
        assert!(matches!(session.read(), Err(CaptureError::Stalled)));
        assert!(!session.is_eof());

        assert_eq!(read_all(&mut session).len(), 2);
    }

    #[test]
    fn test_seek_snaps_to_keyframe_within_gop() {
        let mut session = open_session(MockDemuxer::new(20, 4), MockDecoder::default());
        assert!(session.set(CaptureProperty::PosFrames.id(), 6.0));

        session.read().unwrap().expect("frame");
        let position = session.get(CaptureProperty::PosFrames.id());
        assert_eq!(position, 4.0);
    }

    #[test]
    fn test_position_properties() {
        let mut session = open_session(MockDemuxer::new(10, 1), MockDecoder::default());
        assert_eq!(session.get(CaptureProperty::PosMsec.id()), 0.0);

        for _ in 0..6 {
            session.read().unwrap();
        }
        // Sixth frame has pts 5 / 25 s
        assert!((session.get(CaptureProperty::PosMsec.id()) - 200.0).abs() < 1e-9);
        assert!((session.get(CaptureProperty::PosFrames.id()) - 5.0).abs() < 1e-9);
        assert!((session.get(CaptureProperty::PosAviRatio.id()) - 0.5).abs() < 1e-9);
        assert_eq!(session.get(CaptureProperty::FrameWidth.id()), 64.0);
        assert_eq!(session.get(CaptureProperty::FrameHeight.id()), 48.0);
        assert_eq!(session.get(CaptureProperty::Fps.id()), 25.0);
        assert_eq!(
            session.get(CaptureProperty::Fourcc.id()),
            VideoCodec::H264.fourcc() as f64
        );
    }

    #[test]
    fn test_seek_by_time_and_ratio() {
        let mut session = open_session(MockDemuxer::new(10, 1), MockDecoder::default());
        assert!(session.set(CaptureProperty::PosMsec.id(), 120.0));
        assert_eq!(session.read().unwrap().unwrap().frame_index(FPS), 3);

        assert!(session.set(CaptureProperty::PosAviRatio.id(), 0.5));
        assert_eq!(session.read().unwrap().unwrap().frame_index(FPS), 5);
    }

    #[test]
    fn test_unknown_and_read_only_properties() {
        let mut session = open_session(MockDemuxer::new(10, 1), MockDecoder::default());
        assert_eq!(session.get(42), 0.0);
        assert!(!session.set(42, 1.0));
        assert!(!session.set(CaptureProperty::FrameWidth.id(), 100.0));
        assert!(!session.set(CaptureProperty::PosFrames.id(), f64::NAN));
    }

    #[test]
    fn test_failed_seek_leaves_state_unchanged() {
        let mut demuxer = MockDemuxer::new(2, 1);
        demuxer.fail_seeks = true;
        let mut session = open_session(demuxer, MockDecoder::default());
        read_all(&mut session);
        assert!(session.is_eof());

        assert!(!session.set(CaptureProperty::PosFrames.id(), 0.0));
        assert!(session.is_eof());
    }

    #[test]
    fn test_released_session_behaves_as_not_opened() {
        let mut session = open_session(MockDemuxer::new(10, 1), MockDecoder::default());
        session.read().unwrap();
        session.release();
        session.release();

        assert!(!session.is_opened());
        assert!(session.current_frame().is_none());
        assert!(matches!(session.read(), Err(CaptureError::NotOpened)));
        assert_eq!(session.get(CaptureProperty::FrameCount.id()), 0.0);
        assert_eq!(session.get(CaptureProperty::FrameWidth.id()), 0.0);
        assert!(!session.set(CaptureProperty::PosFrames.id(), 0.0));
    }

    #[test]
    fn test_select_backend_only_uses_device_backend() {
        let registry = CapabilityRegistry::from_records(vec![
            BackendRecord::new(BackendKind::Vaapi, true, vec![VideoCodec::H264, VideoCodec::Hevc]),
            BackendRecord::new(BackendKind::Cuda, true, vec![VideoCodec::H264]),
        ]);

        let record = select_backend(&registry, VideoCodec::H264, BackendKind::Cuda).unwrap();
        assert_eq!(record.kind, BackendKind::Cuda);

        // Vaapi decodes HEVC but cannot put surfaces on a CUDA device
        assert!(matches!(
            select_backend(&registry, VideoCodec::Hevc, BackendKind::Cuda),
            Err(CaptureError::NoHardwareBackend(VideoCodec::Hevc))
        ));
        assert!(matches!(
            select_backend(&registry, VideoCodec::Av1, BackendKind::Cuda),
            Err(CaptureError::NoHardwareBackend(VideoCodec::Av1))
        ));
    }

    /// Three 16x16 baseline IDR access units, each with SPS and PPS
    fn tiny_h264_stream() -> Vec<u8> {
        const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x0a, 0xda, 0x79];
        const PPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80];
        // One I_16x16 DC macroblock, no residual; idr_pic_id alternates
        const IDR: [&[u8]; 2] = [
            &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0xa2, 0x78],
            &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x82, 0x28, 0x9e],
        ];

        let mut stream = Vec::new();
        for i in 0..3 {
            stream.extend_from_slice(SPS);
            stream.extend_from_slice(PPS);
            stream.extend_from_slice(IDR[i % 2]);
        }
        stream
    }

    #[test]
    fn test_detected_codec_without_backend_fails_open() {
        let mut runtime = runtime_with(CaptureSettings::default());
        runtime.cleanup();
        assert!(runtime.registry().is_empty());

        let mut session = runtime.session();
        let result = session.open_source(BufferSource::from_bytes(tiny_h264_stream()), Some("h264"));

        assert!(matches!(result, Err(CaptureError::NoHardwareBackend(VideoCodec::H264))));
        assert!(!session.is_opened());
        assert!(session.stream_info().is_none());
        assert_eq!(session.get(CaptureProperty::Fps.id()), 0.0);
        assert!(matches!(session.read(), Err(CaptureError::NotOpened)));
    }

    #[test]
    fn test_detected_codec_on_other_backend_fails_open() {
        let registry = CapabilityRegistry::from_records(vec![BackendRecord::new(
            BackendKind::Vaapi,
            true,
            vec![VideoCodec::H264],
        )]);
        let runtime =
            CaptureRuntime::with_registry(Arc::new(MockDevice::default()), registry, CaptureSettings::default());

        let mut session = runtime.session();
        let result = session.open_source(BufferSource::from_bytes(tiny_h264_stream()), Some("h264"));

        assert!(matches!(result, Err(CaptureError::NoHardwareBackend(VideoCodec::H264))));
        assert!(!session.is_opened());
    }

    #[test]
    fn test_unreadable_source_fails_open() {
        let mut session = runtime_with(CaptureSettings::default()).session();
        let result = session.open_source(BufferSource::from_bytes(vec![0u8; 128]), None);

        assert!(matches!(result, Err(CaptureError::Demux(_))));
        assert!(!session.is_opened());
    }

    #[test]
    fn test_property_ids() {
        for id in 0..8 {
            assert_eq!(CaptureProperty::try_from(id).unwrap().id(), id);
        }
        assert_eq!(CaptureProperty::try_from(8), Err(8));
        assert_eq!(CaptureProperty::try_from(-1), Err(-1));
    }

    #[test]
    fn test_capture_error_display() {
        assert_eq!(
            CaptureError::RetryCeilingExceeded(100).to_string(),
            "No frame after 100 decode attempts"
        );
        assert_eq!(
            CaptureError::NoHardwareBackend(VideoCodec::Hevc).to_string(),
            "No hardware decoder available for hevc"
        );
    }
}
