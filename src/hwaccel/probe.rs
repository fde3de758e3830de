//! Backend probing against the linked FFmpeg build

use std::ffi::c_int;

use ffmpeg_next::ffi;

use super::{BackendKind, HwDeviceContext};
use crate::demux::VideoCodec;

/// Source of backend availability answers
pub trait BackendProbe {
    /// Whether a device context for `kind` can be created
    fn device_available(&self, kind: BackendKind) -> bool;

    /// Whether FFmpeg's decoder for `codec` lists `kind` among its hardware
    /// configurations with device-context setup
    fn supports(&self, kind: BackendKind, codec: VideoCodec) -> bool;
}

/// Probe backed by `av_hwdevice_ctx_create` and `avcodec_get_hw_config`
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegProbe;

impl BackendProbe for FfmpegProbe {
    fn device_available(&self, kind: BackendKind) -> bool {
        match HwDeviceContext::create(kind) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(backend = %kind, "Device context creation failed: {}", e);
                false
            }
        }
    }

    fn supports(&self, kind: BackendKind, codec: VideoCodec) -> bool {
        let Some(device_type) = kind.device_type() else {
            return false;
        };

        unsafe {
            let decoder = ffi::avcodec_find_decoder(ffi::AVCodecID::from(codec.codec_id()));
            if decoder.is_null() {
                return false;
            }

            let mut index: c_int = 0;
            loop {
                let config = ffi::avcodec_get_hw_config(decoder, index);
                if config.is_null() {
                    return false;
                }
                let by_device_ctx =
                    ((*config).methods & ffi::AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as c_int) != 0;
                if by_device_ctx && (*config).device_type == device_type {
                    return true;
                }
                index += 1;
            }
        }
    }
}
