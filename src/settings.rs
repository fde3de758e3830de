//! Settings management for capture sessions
//!
//! Capture tunables are stored as XML, either at an explicit path or in the
//! per-user config directory.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::demux::DEFAULT_IO_BUFFER_SIZE;
use crate::hwaccel::{parse_backend_order, BackendKind};

/// Default ceiling on decode pump iterations per read
pub const DEFAULT_RETRY_CEILING: u32 = 100;

/// Capture pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "CaptureSettings")]
pub struct CaptureSettings {
    /// Maximum receive/submit iterations per `read()` (1-10000)
    #[serde(rename = "retryCeiling", default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// Custom IO staging buffer size in bytes (4 KiB - 1 MiB)
    #[serde(rename = "ioBufferSize", default = "default_io_buffer_size")]
    pub io_buffer_size: usize,

    /// Comma-separated backend preference, e.g. "d3d11va,cuda".
    /// Empty means the platform default order.
    #[serde(rename = "backendOrder", default)]
    pub backend_order: String,

    /// Pending events allowed in a streaming feed before the producer blocks
    #[serde(rename = "feedCapacity", default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// FFmpeg's own log verbosity: quiet, error, warning, info, debug
    #[serde(rename = "ffmpegLogLevel", default = "default_ffmpeg_log_level")]
    pub ffmpeg_log_level: String,
}

fn default_retry_ceiling() -> u32 {
    DEFAULT_RETRY_CEILING
}

fn default_io_buffer_size() -> usize {
    DEFAULT_IO_BUFFER_SIZE
}

fn default_feed_capacity() -> usize {
    256
}

fn default_ffmpeg_log_level() -> String {
    "error".to_string()
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            retry_ceiling: default_retry_ceiling(),
            io_buffer_size: default_io_buffer_size(),
            backend_order: String::new(),
            feed_capacity: default_feed_capacity(),
            ffmpeg_log_level: default_ffmpeg_log_level(),
        }
    }
}

impl CaptureSettings {
    /// Clamp numeric settings into their valid ranges
    pub fn clamp(&mut self) {
        self.retry_ceiling = self.retry_ceiling.clamp(1, 10_000);
        self.io_buffer_size = self.io_buffer_size.clamp(4096, 1024 * 1024);
        self.feed_capacity = self.feed_capacity.clamp(1, 65_536);
    }

    /// Backend preference order, falling back to the platform default
    pub fn backend_order(&self) -> Vec<BackendKind> {
        let parsed = parse_backend_order(&self.backend_order);
        if parsed.is_empty() {
            BackendKind::platform_order().to_vec()
        } else {
            parsed
        }
    }

    /// FFmpeg log level for `ffmpeg_log_level`
    pub fn ffmpeg_log_level(&self) -> ffmpeg_next::log::Level {
        use ffmpeg_next::log::Level;
        match self.ffmpeg_log_level.trim().to_ascii_lowercase().as_str() {
            "quiet" => Level::Quiet,
            "fatal" => Level::Fatal,
            "warning" | "warn" => Level::Warning,
            "info" => Level::Info,
            "verbose" => Level::Verbose,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            _ => Level::Error,
        }
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        Self::from_xml(&contents)
    }

    /// Parse settings from an XML string
    pub fn from_xml(xml: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = from_str(xml).map_err(SettingsError::XmlParse)?;
        settings.clamp();
        Ok(settings)
    }

    /// Save settings to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let xml = to_string(self).map_err(SettingsError::XmlWrite)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        fs::write(path, formatted).map_err(SettingsError::Io)?;
        Ok(())
    }

    /// Path of the per-user settings file
    pub fn get_settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("ImmersiveCapture");
            p.push("capture.xml");
            p
        })
    }

    /// Load per-user settings, or defaults if missing or unreadable
    pub fn load() -> Self {
        let Some(path) = Self::get_settings_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load capture settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the per-user settings file
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = Self::get_settings_path() else {
            return Err(SettingsError::NoConfigDir);
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }
        self.save_to_file(&path)
    }
}

/// Error type for settings operations
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    XmlParse(quick_xml::DeError),
    XmlWrite(quick_xml::SeError),
    NoConfigDir,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::XmlParse(e) => write!(f, "XML parse error: {}", e),
            SettingsError::XmlWrite(e) => write!(f, "XML write error: {}", e),
            SettingsError::NoConfigDir => write!(f, "Could not find config directory"),
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.retry_ceiling, 100);
        assert_eq!(settings.io_buffer_size, 32 * 1024);
        assert_eq!(settings.feed_capacity, 256);
        assert_eq!(settings.backend_order(), BackendKind::platform_order().to_vec());
        assert_eq!(settings.ffmpeg_log_level(), ffmpeg_next::log::Level::Error);
    }

    #[test]
    fn test_clamp() {
        let mut settings = CaptureSettings {
            retry_ceiling: 0,
            io_buffer_size: 16,
            feed_capacity: 0,
            ..Default::default()
        };
        settings.clamp();
        assert_eq!(settings.retry_ceiling, 1);
        assert_eq!(settings.io_buffer_size, 4096);
        assert_eq!(settings.feed_capacity, 1);
    }

    #[test]
    fn test_partial_xml_uses_defaults() {
        let xml = r#"<CaptureSettings>
            <retryCeiling>250</retryCeiling>
            <backendOrder>vaapi,cuda</backendOrder>
        </CaptureSettings>"#;
        let settings = CaptureSettings::from_xml(xml).unwrap();

        assert_eq!(settings.retry_ceiling, 250);
        assert_eq!(settings.io_buffer_size, DEFAULT_IO_BUFFER_SIZE);
        assert_eq!(settings.backend_order(), vec![BackendKind::Vaapi, BackendKind::Cuda]);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = TempDir::new("capture_settings").unwrap();
        let path = dir.path().join("capture.xml");

        let settings = CaptureSettings {
            retry_ceiling: 42,
            ffmpeg_log_level: "debug".to_string(),
            ..Default::default()
        };
        settings.save_to_file(&path).unwrap();

        let loaded = CaptureSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.retry_ceiling, 42);
        assert_eq!(loaded.ffmpeg_log_level(), ffmpeg_next::log::Level::Debug);
    }
}
