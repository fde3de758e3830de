//! Container demuxing
//!
//! [`ContainerDemuxer`] turns a file path or a [`DataSource`] into an ordered
//! sequence of packets for a single video stream, plus the stream metadata
//! the decoder and session need. Parsing itself is delegated to libavformat.

mod avio;

use std::ffi::{c_int, CString};
use std::path::Path;
use std::ptr;

use ffmpeg_next::ffi;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::{codec, Packet, Rational};

use crate::source::DataSource;
use avio::CustomIo;

/// Staging buffer size for the custom IO bridge
pub const DEFAULT_IO_BUFFER_SIZE: usize = 32 * 1024;

/// Frame rate assumed when the container advertises none
pub const FALLBACK_FRAME_RATE: f64 = 25.0;

/// Errors that can occur while opening or reading a container
#[derive(Debug)]
pub enum DemuxError {
    /// The container could not be opened or its headers parsed
    OpenFailed(String),
    /// No video stream present
    NoVideoStream,
    /// The video stream uses a codec outside the allow-list
    UnsupportedCodec(codec::Id),
    /// Custom IO could not be set up
    IoSetup(String),
    /// Packet read failure
    Read(ffmpeg_next::Error),
    /// Seek failure
    Seek(String),
    /// Demuxer has been closed
    Closed,
    /// FFmpeg error
    Ffmpeg(ffmpeg_next::Error),
}

impl std::fmt::Display for DemuxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemuxError::OpenFailed(msg) => write!(f, "Failed to open container: {}", msg),
            DemuxError::NoVideoStream => write!(f, "No video stream found in container"),
            DemuxError::UnsupportedCodec(id) => write!(f, "Unsupported video codec: {:?}", id),
            DemuxError::IoSetup(msg) => write!(f, "Custom IO setup failed: {}", msg),
            DemuxError::Read(e) => write!(f, "Packet read failed: {}", e),
            DemuxError::Seek(msg) => write!(f, "Seek failed: {}", msg),
            DemuxError::Closed => write!(f, "Demuxer is closed"),
            DemuxError::Ffmpeg(e) => write!(f, "FFmpeg error: {}", e),
        }
    }
}

impl std::error::Error for DemuxError {}

impl From<ffmpeg_next::Error> for DemuxError {
    fn from(e: ffmpeg_next::Error) -> Self {
        DemuxError::Ffmpeg(e)
    }
}

/// Video codecs the capture pipeline accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Hevc,
    Av1,
}

impl VideoCodec {
    /// Every codec in the allow-list, in probe order
    pub const ALL: [VideoCodec; 3] = [VideoCodec::H264, VideoCodec::Hevc, VideoCodec::Av1];

    /// Map an FFmpeg codec id onto the allow-list
    pub fn from_codec_id(id: codec::Id) -> Option<Self> {
        match id {
            codec::Id::H264 => Some(VideoCodec::H264),
            codec::Id::HEVC => Some(VideoCodec::Hevc),
            codec::Id::AV1 => Some(VideoCodec::Av1),
            _ => None,
        }
    }

    pub fn codec_id(self) -> codec::Id {
        match self {
            VideoCodec::H264 => codec::Id::H264,
            VideoCodec::Hevc => codec::Id::HEVC,
            VideoCodec::Av1 => codec::Id::AV1,
        }
    }

    /// Raw elementary-stream demuxer name, for sources without a container
    pub fn format_hint(self) -> Option<&'static str> {
        match self {
            VideoCodec::H264 => Some("h264"),
            VideoCodec::Hevc => Some("hevc"),
            VideoCodec::Av1 => None,
        }
    }

    /// Four-character code packed little-endian, as OpenCV reports it
    pub fn fourcc(self) -> u32 {
        let tag = match self {
            VideoCodec::H264 => b"H264",
            VideoCodec::Hevc => b"HEVC",
            VideoCodec::Av1 => b"AV01",
        };
        u32::from_le_bytes(*tag)
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::Hevc => write!(f, "hevc"),
            VideoCodec::Av1 => write!(f, "av1"),
        }
    }
}

/// Cached metadata of the selected video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    /// Index of the stream within the container
    pub index: usize,
    pub codec: VideoCodec,
    /// Coded width in pixels
    pub width: u32,
    /// Coded height in pixels
    pub height: u32,
    /// Frames per second
    pub frame_rate: f64,
    /// Stream time base
    pub time_base: Rational,
    /// Duration in seconds, 0.0 when unknown
    pub duration: f64,
}

impl StreamInfo {
    /// Approximate number of frames, `floor(duration * frame_rate)`
    pub fn frame_count(&self) -> i64 {
        if self.duration <= 0.0 || self.frame_rate <= 0.0 {
            return 0;
        }
        (self.duration * self.frame_rate).floor() as i64
    }

    /// Convert a packet timestamp in stream time base units to seconds
    pub fn packet_time_to_seconds(&self, ts: i64) -> f64 {
        ts as f64 * rational_to_f64(self.time_base)
    }

    /// Convert seconds to a timestamp in stream time base units
    pub fn seconds_to_packet_time(&self, seconds: f64) -> i64 {
        let tb = rational_to_f64(self.time_base);
        if tb <= 0.0 {
            return 0;
        }
        (seconds / tb) as i64
    }
}

pub(crate) fn rational_to_f64(r: Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

/// Pick the stream's frame rate: average, then real base rate, then 25
pub(crate) fn choose_frame_rate(avg: Rational, real: Rational) -> f64 {
    let usable = |r: Rational| r.numerator() != 0 && r.denominator() != 0;
    if usable(avg) {
        rational_to_f64(avg)
    } else if usable(real) {
        rational_to_f64(real)
    } else {
        FALLBACK_FRAME_RATE
    }
}

/// Outcome of pulling one packet
pub enum PacketRead {
    /// A packet belonging to the selected video stream
    Packet(Packet),
    /// The source has no bytes yet; try again later
    Pending,
    /// The container is exhausted
    EndOfStream,
}

/// Packet supply for a capture session
pub trait PacketSource {
    /// Metadata of the selected video stream
    fn info(&self) -> &StreamInfo;

    /// Codec parameters for decoder construction
    fn parameters(&self) -> Option<codec::Parameters>;

    /// Next packet of the selected stream
    fn read_packet(&mut self) -> Result<PacketRead, DemuxError>;

    /// Seek to the keyframe at or before `seconds`
    fn seek_to_time(&mut self, seconds: f64) -> Result<(), DemuxError>;

    /// Seek to the keyframe at or before frame `frame`
    fn seek_to_frame(&mut self, frame: i64) -> Result<(), DemuxError> {
        let rate = self.info().frame_rate;
        if rate <= 0.0 {
            return Err(DemuxError::Seek("frame rate unknown".to_string()));
        }
        self.seek_to_time(frame as f64 / rate)
    }
}

/// Demuxer over a single video stream
pub struct ContainerDemuxer {
    /// Parse context; dropped before `io`
    input: Option<Input>,
    /// Custom IO bridge, present when opened over a data source
    io: Option<CustomIo>,
    info: StreamInfo,
    parameters: codec::Parameters,
}

impl ContainerDemuxer {
    /// Open a container by filesystem path
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, DemuxError> {
        crate::ensure_ffmpeg_initialized()?;

        let path = path.as_ref();
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| DemuxError::OpenFailed(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), "Opened container by path");
        Self::from_input(input, None)
    }

    /// Open a container over a data source through custom IO
    ///
    /// `format_hint` names a demuxer to force (e.g. `"h264"` for a raw
    /// Annex-B stream). An unknown name is logged and format sniffing is
    /// used instead.
    pub fn open_source<S: DataSource + 'static>(
        source: S,
        format_hint: Option<&str>,
        io_buffer_size: usize,
    ) -> Result<Self, DemuxError> {
        crate::ensure_ffmpeg_initialized()?;

        let mut io = CustomIo::new(source, io_buffer_size)?;
        let input_format = format_hint
            .filter(|hint| !hint.is_empty())
            .and_then(find_input_format)
            .unwrap_or(ptr::null());

        let input = unsafe {
            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(DemuxError::IoSetup("avformat_alloc_context failed".to_string()));
            }
            (*ctx).pb = io.as_mut_ptr();
            (*ctx).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

            // On failure libavformat frees ctx but leaves the custom IO to us
            let ret = ffi::avformat_open_input(&mut ctx, ptr::null(), input_format, ptr::null_mut());
            if ret < 0 {
                return Err(DemuxError::OpenFailed(ffmpeg_next::Error::from(ret).to_string()));
            }

            let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut ctx);
                return Err(DemuxError::OpenFailed(format!(
                    "stream info: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }

            Input::wrap(ctx)
        };

        Self::from_input(input, Some(io))
    }

    fn from_input(input: Input, io: Option<CustomIo>) -> Result<Self, DemuxError> {
        let (info, parameters) = {
            let stream = input
                .streams()
                .find(|s| s.parameters().medium() == ffmpeg_next::media::Type::Video)
                .ok_or(DemuxError::NoVideoStream)?;

            let parameters = stream.parameters();
            let codec_id = parameters.id();
            let codec = VideoCodec::from_codec_id(codec_id)
                .ok_or(DemuxError::UnsupportedCodec(codec_id))?;

            let (width, height) = unsafe {
                let raw = parameters.as_ptr();
                ((*raw).width.max(0) as u32, (*raw).height.max(0) as u32)
            };

            let time_base = stream.time_base();
            let frame_rate = choose_frame_rate(stream.avg_frame_rate(), stream.rate());

            let duration = if stream.duration() > 0 {
                stream.duration() as f64 * rational_to_f64(time_base)
            } else if input.duration() > 0 {
                input.duration() as f64 / ffi::AV_TIME_BASE as f64
            } else {
                0.0
            };

            let info = StreamInfo {
                index: stream.index(),
                codec,
                width,
                height,
                frame_rate,
                time_base,
                duration,
            };
            (info, parameters.clone())
        };

        tracing::info!(
            "Opened container: stream {} {} {}x{} @ {:.2}fps, duration: {:.2}s",
            info.index,
            info.codec,
            info.width,
            info.height,
            info.frame_rate,
            info.duration
        );

        Ok(Self {
            input: Some(input),
            io,
            info,
            parameters,
        })
    }

    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn frame_rate(&self) -> f64 {
        self.info.frame_rate
    }

    pub fn duration(&self) -> f64 {
        self.info.duration
    }

    pub fn time_base(&self) -> Rational {
        self.info.time_base
    }

    pub fn codec(&self) -> VideoCodec {
        self.info.codec
    }

    /// Release the parse context, then the custom IO bridge. Idempotent.
    pub fn close(&mut self) {
        if self.input.take().is_some() {
            tracing::debug!("Closed container");
        }
        self.io = None;
    }
}

impl PacketSource for ContainerDemuxer {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn parameters(&self) -> Option<codec::Parameters> {
        Some(self.parameters.clone())
    }

    fn read_packet(&mut self) -> Result<PacketRead, DemuxError> {
        let input = self.input.as_mut().ok_or(DemuxError::Closed)?;

        loop {
            let mut packet = Packet::empty();
            match packet.read(input) {
                Ok(()) => {
                    if packet.stream() == self.info.index {
                        return Ok(PacketRead::Packet(packet));
                    }
                    // Packets of other streams are dropped here
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(PacketRead::EndOfStream),
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::error::EAGAIN,
                }) => {
                    if let Some(io) = self.io.as_mut() {
                        io.rearm();
                    }
                    return Ok(PacketRead::Pending);
                }
                Err(e) => return Err(DemuxError::Read(e)),
            }
        }
    }

    fn seek_to_time(&mut self, seconds: f64) -> Result<(), DemuxError> {
        let ts = self.info.seconds_to_packet_time(seconds.max(0.0));
        let input = self.input.as_mut().ok_or(DemuxError::Closed)?;

        let ret = unsafe {
            ffi::av_seek_frame(
                input.as_mut_ptr(),
                self.info.index as c_int,
                ts,
                ffi::AVSEEK_FLAG_BACKWARD as c_int,
            )
        };
        if ret < 0 {
            let err = ffmpeg_next::Error::from(ret);
            tracing::warn!(seconds, code = ret, "Container seek failed: {}", err);
            return Err(DemuxError::Seek(err.to_string()));
        }

        tracing::debug!(seconds, ts, "Seeked container");
        Ok(())
    }
}

impl Drop for ContainerDemuxer {
    fn drop(&mut self) {
        self.close();
    }
}

fn find_input_format(name: &str) -> Option<*const ffi::AVInputFormat> {
    let Ok(c_name) = CString::new(name) else {
        tracing::warn!("Invalid format hint {:?}, sniffing instead", name);
        return None;
    };
    let format = unsafe { ffi::av_find_input_format(c_name.as_ptr()) };
    if format.is_null() {
        tracing::warn!("Unknown format hint {:?}, sniffing instead", name);
        None
    } else {
        Some(format as *const ffi::AVInputFormat)
    }
}
