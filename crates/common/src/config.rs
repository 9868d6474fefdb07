//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default export settings.
    pub export: ExportDefaults,

    /// Default motion analysis knobs.
    pub motion: MotionDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Default output frame rate.
    pub fps: u32,

    /// Default quality tier ("high", "medium", "low").
    pub quality: String,

    /// Default container ("mp4", "webm").
    pub format: String,

    /// Extra wall-clock time allowed past the resolved duration before
    /// sampling is forcibly stopped.
    pub safety_margin_secs: f64,

    /// Bytes-per-second used to estimate duration from payload size when
    /// no duration metadata is available.
    pub bytes_per_second_estimate: u64,
}

/// Default motion analysis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionDefaults {
    /// Block edge length in pixels for block matching.
    pub block_size: usize,

    /// Search radius in pixels around each block.
    pub search_radius: usize,

    /// Minimum shake intensity for a frame pair to be flagged as shake.
    pub shake_threshold: f64,

    /// Half-size of the Lucas-Kanade window.
    pub flow_window_radius: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "castkit=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            quality: "high".to_string(),
            format: "mp4".to_string(),
            safety_margin_secs: 5.0,
            bytes_per_second_estimate: 250_000,
        }
    }
}

impl Default for MotionDefaults {
    fn default() -> Self {
        Self {
            block_size: 16,
            search_radius: 8,
            shake_threshold: 0.3,
            flow_window_radius: 7,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("castkit").join("config.json")
}
