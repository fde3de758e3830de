//! Subscriber setup
//!
//! Routes the crate's `tracing` events (and FFmpeg's, once
//! [`forward_ffmpeg_logs`](super::forward_ffmpeg_logs) is active) to the
//! console, a log file, or JSON lines for log aggregation.
//!
//! `CAPTURE_LOG` overrides the filter (falling back to `RUST_LOG`) and
//! `CAPTURE_LOG_FORMAT=json` switches console output to JSON.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

type InitResult = Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>>;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Write events to stderr
    pub console_enabled: bool,
    /// Also write events to a file
    pub file_enabled: bool,
    /// Log file; the per-user cache directory when unset
    pub file_path: Option<PathBuf>,
    /// Console output as JSON lines
    pub json_format: bool,
    /// Filter used when neither env variable is set
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: None,
            json_format: false,
            default_level: "info,ffmpeg=warn".to_string(),
        }
    }
}

/// How console events are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleStyle {
    Off,
    Compact,
    Json,
}

impl ConsoleStyle {
    fn resolve(config: &LogConfig, format_env: Option<&str>) -> Self {
        if !config.console_enabled {
            return Self::Off;
        }
        let json = format_env
            .map(|v| v.trim().eq_ignore_ascii_case("json"))
            .unwrap_or(config.json_format);
        if json {
            Self::Json
        } else {
            Self::Compact
        }
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// program's lifetime. Fails if a global subscriber is already set.
///
/// ```no_run
/// use immersive_capture::telemetry::{init_logging, LogConfig};
///
/// let _guard = init_logging(&LogConfig::default()).expect("logging");
/// ```
pub fn init_logging(config: &LogConfig) -> InitResult {
    let filter = EnvFilter::try_from_env("CAPTURE_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let format_env = std::env::var("CAPTURE_LOG_FORMAT").ok();
    let style = ConsoleStyle::resolve(config, format_env.as_deref());

    let compact = (style == ConsoleStyle::Compact).then(|| fmt::layer().with_target(true).compact());
    let json = (style == ConsoleStyle::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let (file, guard, log_path) = if config.file_enabled {
        let path = config.file_path.clone().unwrap_or_else(default_log_path);
        let (writer, guard) = tracing_appender::non_blocking(std::fs::File::create(&path)?);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true);
        (Some(layer), Some(guard), Some(path))
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(compact)
        .with(json)
        .with(file)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        console = ?style,
        log_file = ?log_path,
        "Logging initialized"
    );

    Ok(guard)
}

/// Initialize logging with the default [`LogConfig`]
pub fn init_logging_default() -> InitResult {
    init_logging(&LogConfig::default())
}

/// Per-user cache directory, else the working directory
fn default_log_path() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("ImmersiveCapture").join("capture.log"))
        .filter(|path| path.parent().map(|p| std::fs::create_dir_all(p).is_ok()).unwrap_or(false))
        .unwrap_or_else(|| PathBuf::from("capture.log"))
}
