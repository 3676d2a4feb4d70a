//! Configuration file support.
//!
//! Detection thresholds, autosave timing and canvas interaction constants,
//! stored as JSON next to the other user configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::DetectionSettings;

/// Log level setting for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Autosave timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    /// Quiet period after the last change before saving
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    2000
}

impl AutoSaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Annotation canvas interaction constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasConfig {
    /// Drawn boxes must exceed this size on both sides (image pixels)
    #[serde(default = "default_min_draw_size")]
    pub min_draw_size_px: f32,
    /// Scale multiplier per mouse-wheel tick
    #[serde(default = "default_wheel_zoom_factor")]
    pub wheel_zoom_factor: f32,
    /// Box size multiplier when focusing a detection
    #[serde(default = "default_focus_margin")]
    pub focus_margin: f32,
    /// Largest scale a focus may zoom to
    #[serde(default = "default_focus_max_zoom")]
    pub focus_max_zoom: f32,
    /// Duration of the focus animation
    #[serde(default = "default_focus_animation_ms")]
    pub focus_animation_ms: u64,
}

fn default_min_draw_size() -> f32 {
    5.0
}

fn default_wheel_zoom_factor() -> f32 {
    1.02
}

fn default_focus_margin() -> f32 {
    1.25
}

fn default_focus_max_zoom() -> f32 {
    3.0
}

fn default_focus_animation_ms() -> u64 {
    300
}

impl CanvasConfig {
    pub fn focus_duration(&self) -> Duration {
        Duration::from_millis(self.focus_animation_ms)
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            min_draw_size_px: default_min_draw_size(),
            wheel_zoom_factor: default_wheel_zoom_factor(),
            focus_margin: default_focus_margin(),
            focus_max_zoom: default_focus_max_zoom(),
            focus_animation_ms: default_focus_animation_ms(),
        }
    }
}

/// Tracker configuration that can be exported and imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Default inference thresholds for new detection runs
    #[serde(default)]
    pub detection: DetectionSettings,

    #[serde(default)]
    pub autosave: AutoSaveConfig,

    #[serde(default)]
    pub canvas: CanvasConfig,

    /// Log verbosity level
    #[serde(default)]
    pub log_level: LogLevel,
}

impl TrackerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            detection: DetectionSettings::default(),
            autosave: AutoSaveConfig::default(),
            canvas: CanvasConfig::default(),
            log_level: LogLevel::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Get the default filename for the config file.
    pub fn default_filename() -> &'static str {
        "part-tracker-config.json"
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<std::path::PathBuf> {
        // Try to use XDG config directory, fall back to home directory
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("part-tracker").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("part-tracker")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load configuration from a file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load from the default path, falling back to defaults.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!("Failed to load config file {:?}: {}", path, e);
            Self::default()
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
