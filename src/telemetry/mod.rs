//! Telemetry and logging infrastructure
//!
//! Structured logging with tracing, including FFmpeg's own log output.

pub mod ffmpeg_log;
pub mod logging;

pub use ffmpeg_log::forward_ffmpeg_logs;
pub use logging::{init_logging, init_logging_default, LogConfig, LogGuard};
