//! FFmpeg log forwarding
//!
//! libav* libraries print to stderr by default. [`forward_ffmpeg_logs`]
//! replaces that with a callback that formats each line and re-emits it as a
//! `tracing` event under the `ffmpeg` target, so demuxer and hardware decoder
//! diagnostics end up in the same subscriber as the crate's own events.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::Once;

use ffmpeg_next::ffi;

const LINE_CAPACITY: usize = 1024;

static INSTALL: Once = Once::new();

/// Route FFmpeg's log output into `tracing`, dropping messages above `level`
///
/// The callback is installed once per process; later calls only change the
/// level.
pub fn forward_ffmpeg_logs(level: ffmpeg_next::log::Level) {
    ffmpeg_next::log::set_level(level);
    INSTALL.call_once(|| unsafe {
        ffi::av_log_set_callback(Some(log_callback));
    });
}

/// Map an `AV_LOG_*` level onto a tracing level; `None` for quiet
pub(crate) fn tracing_level(av_level: c_int) -> Option<tracing::Level> {
    match av_level {
        l if l <= ffi::AV_LOG_QUIET => None,
        l if l <= ffi::AV_LOG_ERROR => Some(tracing::Level::ERROR),
        l if l <= ffi::AV_LOG_WARNING => Some(tracing::Level::WARN),
        l if l <= ffi::AV_LOG_INFO => Some(tracing::Level::INFO),
        l if l <= ffi::AV_LOG_DEBUG => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

/// Strip the trailing newline FFmpeg puts on most lines
pub(crate) fn clean_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches(['\n', '\r']).trim_end();
    (!text.is_empty()).then(|| text.to_string())
}

unsafe extern "C" fn log_callback(avcl: *mut c_void, level: c_int, fmt: *const c_char, vl: ffi::va_list) {
    if level > ffi::av_log_get_level() {
        return;
    }
    let Some(tracing_level) = tracing_level(level) else {
        return;
    };

    let mut line = [0 as c_char; LINE_CAPACITY];
    let mut print_prefix: c_int = 1;
    let written = ffi::av_log_format_line2(
        avcl,
        level,
        fmt,
        vl,
        line.as_mut_ptr(),
        LINE_CAPACITY as c_int,
        &mut print_prefix,
    );
    if written < 0 {
        return;
    }

    let Some(message) = clean_line(CStr::from_ptr(line.as_ptr()).to_bytes()) else {
        return;
    };

    match tracing_level {
        tracing::Level::ERROR => tracing::error!(target: "ffmpeg", "{}", message),
        tracing::Level::WARN => tracing::warn!(target: "ffmpeg", "{}", message),
        tracing::Level::INFO => tracing::info!(target: "ffmpeg", "{}", message),
        tracing::Level::DEBUG => tracing::debug!(target: "ffmpeg", "{}", message),
        _ => tracing::trace!(target: "ffmpeg", "{}", message),
    }
}
