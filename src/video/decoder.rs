//! Hardware video decoder
//!
//! [`FrameDecoder`] owns one FFmpeg decode context bound to a render device's
//! hardware context. Pixel format negotiation is forced to the backend's
//! hardware surface format; there is no software fallback.
//!
//! States: `Uninitialized -> Ready -> (Ready <-> Draining) -> Closed`.

use std::ffi::c_void;
use std::sync::Arc;

use ffmpeg_next::ffi::{self, AVPixelFormat};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{codec, frame, Packet, Rational};

use super::extract::extract_frame;
use super::DecodedFrame;
use crate::demux::rational_to_f64;
use crate::device::{DeviceError, RenderDevice};
use crate::hwaccel::{BackendKind, BackendRecord};

/// Errors that can occur during hardware decoding
#[derive(Debug)]
pub enum DecodeError {
    /// Operation requires an initialized decoder
    NotInitialized,
    /// The decoder was closed
    Closed,
    /// The backend record is unavailable or is the `None` sentinel
    BackendUnavailable(BackendKind),
    /// The backend does not match the render device's
    BackendMismatch {
        device: BackendKind,
        requested: BackendKind,
    },
    /// Failed to create or open the decode context
    DecoderCreation(String),
    /// The decoder offered no hardware pixel format
    NoHardwareFormat(BackendKind),
    /// A frame came back in a software pixel format
    SoftwareFrame(Pixel),
    /// Packet submission failed
    Submit(ffmpeg_next::Error),
    /// Frame reception failed
    Receive(ffmpeg_next::Error),
    /// Render device failure during extraction
    Device(DeviceError),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NotInitialized => write!(f, "Decoder is not initialized"),
            DecodeError::Closed => write!(f, "Decoder is closed"),
            DecodeError::BackendUnavailable(kind) => {
                write!(f, "Hardware backend unavailable: {}", kind)
            }
            DecodeError::BackendMismatch { device, requested } => write!(
                f,
                "Backend {} does not match render device backend {}",
                requested, device
            ),
            DecodeError::DecoderCreation(msg) => write!(f, "Failed to create decoder: {}", msg),
            DecodeError::NoHardwareFormat(kind) => {
                write!(f, "Decoder offered no {} hardware pixel format", kind)
            }
            DecodeError::SoftwareFrame(format) => {
                write!(f, "Decoder produced software frame ({:?})", format)
            }
            DecodeError::Submit(e) => write!(f, "Packet submission failed: {}", e),
            DecodeError::Receive(e) => write!(f, "Frame reception failed: {}", e),
            DecodeError::Device(e) => write!(f, "Render device error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DeviceError> for DecodeError {
    fn from(e: DeviceError) -> Self {
        DecodeError::Device(e)
    }
}

/// Decoder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Uninitialized,
    Ready,
    /// End of stream signalled; buffered frames are being emitted
    Draining,
    Closed,
}

/// Outcome of one receive attempt
#[derive(Debug)]
pub enum Received<T> {
    /// A frame is ready
    Frame(DecodedFrame<T>),
    /// The decoder needs more packets
    NeedsInput,
    /// All buffered frames have been emitted
    EndOfStream,
}

/// Packet-in, frame-out decoding contract used by a capture session
pub trait FrameDecode<T> {
    /// Submit a packet, or `None` to request a drain
    ///
    /// "Try again" and end-of-stream answers from the engine count as
    /// success; only genuine submission failures are errors.
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), DecodeError>;

    /// Pull one decoded frame if available
    fn receive_frame(&mut self) -> Result<Received<T>, DecodeError>;

    /// Discard buffered decode state, e.g. after a seek
    fn flush(&mut self);
}

struct Engine {
    decoder: ffmpeg_next::decoder::Video,
    /// Read by `negotiate_hw_format` through `AVCodecContext.opaque`; must
    /// outlive `decoder`, so it is declared after it
    #[allow(dead_code)]
    wanted_format: Box<AVPixelFormat>,
    scratch: frame::Video,
}

/// Hardware decoder bound to a render device
pub struct FrameDecoder<D: RenderDevice> {
    state: DecoderState,
    engine: Option<Engine>,
    device: Option<Arc<D>>,
    backend: BackendKind,
    /// Seconds per timestamp tick
    time_base: f64,
}

impl<D: RenderDevice> Default for FrameDecoder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RenderDevice> FrameDecoder<D> {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Uninitialized,
            engine: None,
            device: None,
            backend: BackendKind::None,
            time_base: 0.0,
        }
    }

    /// Build the decode context for `parameters` on `device`
    pub fn initialize(
        &mut self,
        parameters: codec::Parameters,
        backend: &BackendRecord,
        device: Arc<D>,
        stream_time_base: Rational,
    ) -> Result<(), DecodeError> {
        if self.engine.is_some() {
            self.close();
        }

        if backend.is_none() || !backend.available {
            return Err(DecodeError::BackendUnavailable(backend.kind));
        }
        if backend.kind != device.backend() {
            return Err(DecodeError::BackendMismatch {
                device: device.backend(),
                requested: backend.kind,
            });
        }
        let wanted = backend
            .kind
            .hw_pixel_format()
            .ok_or(DecodeError::NoHardwareFormat(backend.kind))?;

        let hw_device = device.create_hw_device()?;

        let mut wanted_format = Box::new(wanted);
        let mut context = codec::context::Context::from_parameters(parameters)
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).hw_device_ctx = hw_device
                .new_ref()
                .map_err(|e| DecodeError::DecoderCreation(format!("device reference: {}", e)))?;
            (*raw).opaque = &mut *wanted_format as *mut AVPixelFormat as *mut c_void;
            (*raw).get_format = Some(negotiate_hw_format);
            (*raw).pkt_timebase = stream_time_base.into();
        }

        let decoder = context.decoder().video().map_err(|e| {
            DecodeError::DecoderCreation(format!("{} decoder: {}", backend.kind, e))
        })?;

        // Prefer the stream's time base; the codec's is a fallback
        self.time_base = if stream_time_base.numerator() != 0 && stream_time_base.denominator() != 0 {
            rational_to_f64(stream_time_base)
        } else {
            let codec_tb = unsafe { Rational::from((*decoder.as_ptr()).time_base) };
            rational_to_f64(codec_tb)
        };

        tracing::info!(
            "Hardware decoder ready: {}x{}, backend: {}, device: {}",
            decoder.width(),
            decoder.height(),
            backend.kind,
            device.label()
        );

        self.engine = Some(Engine {
            decoder,
            wanted_format,
            scratch: frame::Video::empty(),
        });
        self.device = Some(device);
        self.backend = backend.kind;
        self.state = DecoderState::Ready;
        Ok(())
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Seconds per timestamp tick used for presentation times
    pub fn time_base(&self) -> f64 {
        self.time_base
    }

    /// Release the decode context
    pub fn close(&mut self) {
        if self.engine.take().is_some() {
            tracing::debug!(backend = %self.backend, "Closed hardware decoder");
        }
        self.device = None;
        self.state = DecoderState::Closed;
    }

    fn engine_mut(&mut self) -> Result<&mut Engine, DecodeError> {
        match self.state {
            DecoderState::Uninitialized => Err(DecodeError::NotInitialized),
            DecoderState::Closed => Err(DecodeError::Closed),
            DecoderState::Ready | DecoderState::Draining => {
                self.engine.as_mut().ok_or(DecodeError::NotInitialized)
            }
        }
    }
}

impl<D: RenderDevice> FrameDecode<D::Texture> for FrameDecoder<D> {
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), DecodeError> {
        let engine = self.engine_mut()?;

        let result = match packet {
            Some(packet) => engine.decoder.send_packet(packet),
            None => engine.decoder.send_eof(),
        };

        match result {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            }) => {
                tracing::debug!("Decoder input full, frames must be received first");
            }
            Err(ffmpeg_next::Error::Eof) => {}
            Err(e) => {
                tracing::warn!(code = i32::from(e), "Packet submission failed: {}", e);
                return Err(DecodeError::Submit(e));
            }
        }

        if packet.is_none() {
            self.state = DecoderState::Draining;
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Received<D::Texture>, DecodeError> {
        let time_base = self.time_base;
        let device = self.device.clone().ok_or(DecodeError::NotInitialized)?;
        let engine = self.engine_mut()?;

        match engine.decoder.receive_frame(&mut engine.scratch) {
            Ok(()) => {
                let frame = extract_frame(device.as_ref(), &engine.scratch, time_base)?;
                Ok(Received::Frame(frame))
            }
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            }) => Ok(Received::NeedsInput),
            Err(ffmpeg_next::Error::Eof) => Ok(Received::EndOfStream),
            Err(e) => {
                tracing::warn!(code = i32::from(e), "Frame reception failed: {}", e);
                Err(DecodeError::Receive(e))
            }
        }
    }

    fn flush(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.decoder.flush();
            self.state = DecoderState::Ready;
        }
    }
}

impl<D: RenderDevice> Drop for FrameDecoder<D> {
    fn drop(&mut self) {
        self.close();
    }
}

/// `get_format` callback pinning negotiation to the hardware surface format
unsafe extern "C" fn negotiate_hw_format(
    ctx: *mut ffi::AVCodecContext,
    formats: *const AVPixelFormat,
) -> AVPixelFormat {
    if ctx.is_null() || formats.is_null() || (*ctx).opaque.is_null() {
        return AVPixelFormat::AV_PIX_FMT_NONE;
    }
    let wanted = *((*ctx).opaque as *const AVPixelFormat);

    let mut cursor = formats;
    while *cursor != AVPixelFormat::AV_PIX_FMT_NONE {
        if *cursor == wanted {
            return wanted;
        }
        cursor = cursor.add(1);
    }

    tracing::error!("Decoder did not offer hardware pixel format {:?}", wanted);
    AVPixelFormat::AV_PIX_FMT_NONE
}
