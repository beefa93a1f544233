//! Recorder settings
//!
//! Stored as camelCase JSON; every field has a default so partial files
//! load.

use crate::export::Visualization;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Top-level recorder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Where recordings and exports are written
    pub recordings_dir: PathBuf,
    /// File name prefix for recordings
    pub file_prefix: String,
    /// Frames per block the engine delivers to taps
    pub tap_buffer_size: usize,
    pub display: DisplayConfig,
    pub export: ExportSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("recordings"),
            file_prefix: "Scopecast".to_string(),
            tap_buffer_size: 1024,
            display: DisplayConfig::default(),
            export: ExportSettings::default(),
        }
    }
}

/// Live display settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisplayConfig {
    /// Values per channel per published window
    pub points: usize,
    pub gain: f32,
    pub refresh_hz: u32,
    pub width: f32,
    pub height: f32,
    pub visualization: Visualization,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            points: 64,
            gain: 0.85,
            refresh_hz: 60,
            width: 390.0,
            height: 200.0,
            visualization: Visualization::Waveform,
        }
    }
}

/// Video export settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    pub frame_rate_hz: u32,
    /// Audio frames read per video frame
    pub window_frames: usize,
    /// Audio frames averaged into one drawn point
    pub window_step: usize,
    /// Frames queued for the encoder at most
    pub max_frames_in_flight: usize,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// PNG drawn as the badge; a plain rounded square when unset
    pub badge_path: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            frame_rate_hz: 24,
            window_frames: 2048,
            window_step: 16,
            max_frames_in_flight: 4,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            badge_path: None,
        }
    }
}

impl RecorderConfig {
    /// Reject settings the recorder cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.tap_buffer_size > 0, "tapBufferSize must be positive"),
            (self.display.points > 0, "display.points must be positive"),
            (self.display.refresh_hz > 0, "display.refreshHz must be positive"),
            (self.display.gain.is_finite(), "display.gain must be finite"),
            (self.export.frame_rate_hz > 0, "export.frameRateHz must be positive"),
            (self.export.window_step > 0, "export.windowStep must be positive"),
            (
                self.export.window_frames >= self.export.window_step,
                "export.windowFrames must be at least export.windowStep",
            ),
            (
                self.export.max_frames_in_flight > 0,
                "export.maxFramesInFlight must be positive",
            ),
            (!self.file_prefix.is_empty(), "filePrefix must not be empty"),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }
}

/// Load settings from `path`; a missing file yields the defaults
pub fn load_config(path: &Path) -> Result<RecorderConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(RecorderConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: RecorderConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Write settings to `path` as pretty JSON
pub fn save_config(config: &RecorderConfig, path: &Path) -> Result<(), ConfigError> {
    config.validate()?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, RecorderConfig::default());
        assert_eq!(config.export.frame_rate_hz, 24);
        assert_eq!(config.display.points, 64);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("scopecast.json");

        let mut config = RecorderConfig::default();
        config.file_prefix = "Take".to_string();
        config.display.visualization = Visualization::Lissajous;
        config.export.badge_path = Some(PathBuf::from("badge.png"));
        save_config(&config, &path).unwrap();

        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{"filePrefix":"Demo","display":{"gain":0.5}}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.file_prefix, "Demo");
        assert_eq!(config.display.gain, 0.5);
        assert_eq!(config.display.points, 64);
        assert_eq!(config.tap_buffer_size, 1024);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"export":{"windowStep":0}}"#).unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Json(_))));
    }
}
