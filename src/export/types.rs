//! Export types and configuration
//!
//! This module defines the types used for export requests, jobs,
//! progress tracking, and error handling.

use super::canvas::Color;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// How audio is drawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visualization {
    /// Summed stereo magnitude over time
    #[default]
    Waveform,
    /// Left against right
    Lissajous,
}

/// Color scheme of rendered frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn background(&self) -> Color {
        match self {
            Theme::Dark => Color::rgb(0x12, 0x12, 0x14),
            Theme::Light => Color::rgb(0xF2, 0xF2, 0xF7),
        }
    }

    pub fn foreground(&self) -> Color {
        match self {
            Theme::Dark => Color::rgb(0xFF, 0xFF, 0xFF),
            Theme::Light => Color::rgb(0x1C, 0x1C, 0x1E),
        }
    }
}

/// Output frame shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    #[default]
    Square,
    Portrait,
}

impl Aspect {
    /// Width and height in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Aspect::Square => (1080, 1080),
            Aspect::Portrait => (1080, 1920),
        }
    }
}

/// What the caller asks for when a recording stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// Render a video; otherwise the audio file is delivered as is
    pub generate_video: bool,
    pub theme: Theme,
    pub visualization: Visualization,
    pub aspect: Aspect,
}

impl ExportRequest {
    pub fn audio_only() -> Self {
        Self::default()
    }

    pub fn video(theme: Theme, visualization: Visualization, aspect: Aspect) -> Self {
        Self {
            generate_video: true,
            theme,
            visualization,
            aspect,
        }
    }
}

/// One export of one recording. Fixed for the lifetime of the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: Uuid,
    pub audio_source_path: PathBuf,
    pub visualization: Visualization,
    pub width: u32,
    pub height: u32,
    pub theme: Theme,
    pub frame_rate_hz: u32,
}

impl ExportJob {
    pub fn new(audio_source_path: &Path, request: &ExportRequest, frame_rate_hz: u32) -> Self {
        let (width, height) = request.aspect.dimensions();
        Self {
            id: Uuid::new_v4(),
            audio_source_path: audio_source_path.to_path_buf(),
            visualization: request.visualization,
            width,
            height,
            theme: request.theme,
            frame_rate_hz: frame_rate_hz.max(1),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Files produced by one export.
///
/// `merged_path` is set only once the multiplexer succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedArtifact {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub merged_path: Option<PathBuf>,
}

/// Export progress stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExportStage {
    /// Opening the recording and the encoder
    Preparing,
    /// Rendering and encoding video frames
    Encoding,
    /// Finalizing the video file
    Finalizing,
    /// Merging video and audio
    Merging,
    /// Export completed successfully
    Complete,
    /// Export failed with error
    Error { message: String },
}

/// Export progress information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    /// Progress percentage (0.0 to 100.0)
    pub percent: f32,
    /// Current stage of export
    pub stage: ExportStage,
    /// Current frame being processed
    pub current_frame: u64,
    /// Total frames to process
    pub total_frames: u64,
}

impl ExportProgress {
    fn at(percent: f32, stage: ExportStage) -> Self {
        Self {
            percent,
            stage,
            current_frame: 0,
            total_frames: 0,
        }
    }

    pub fn preparing() -> Self {
        Self::at(0.0, ExportStage::Preparing)
    }

    pub fn encoding(current_frame: u64, total_frames: u64) -> Self {
        let percent = if total_frames > 0 {
            5.0 + (current_frame as f32 / total_frames as f32) * 80.0
        } else {
            5.0
        };
        Self {
            percent,
            stage: ExportStage::Encoding,
            current_frame,
            total_frames,
        }
    }

    pub fn finalizing() -> Self {
        Self::at(85.0, ExportStage::Finalizing)
    }

    pub fn merging() -> Self {
        Self::at(90.0, ExportStage::Merging)
    }

    pub fn complete() -> Self {
        Self::at(100.0, ExportStage::Complete)
    }

    pub fn error(message: String) -> Self {
        Self::at(0.0, ExportStage::Error { message })
    }
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Audio(#[from] hound::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Export cancelled")]
    Cancelled,

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Merge failed: {0}")]
    Merge(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_from_request() {
        let request = ExportRequest::video(Theme::Light, Visualization::Lissajous, Aspect::Portrait);
        let job = ExportJob::new(Path::new("/tmp/take.wav"), &request, 24);
        assert_eq!(job.dimensions(), (1080, 1920));
        assert_eq!(job.visualization, Visualization::Lissajous);
        assert_eq!(job.theme, Theme::Light);
        assert_eq!(job.frame_rate_hz, 24);
    }

    #[test]
    fn test_request_serialization() {
        let request = ExportRequest::video(Theme::Dark, Visualization::Waveform, Aspect::Square);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"generateVideo":true,"theme":"dark","visualization":"waveform","aspect":"square"}"#
        );
        let parsed: ExportRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(ExportProgress::encoding(0, 100).percent, 5.0);
        assert_eq!(ExportProgress::encoding(100, 100).percent, 85.0);
        assert_eq!(ExportProgress::complete().stage, ExportStage::Complete);
    }

    #[test]
    fn test_themes_differ() {
        assert_ne!(Theme::Dark.background(), Theme::Light.background());
        assert_ne!(Theme::Dark.foreground(), Theme::Light.foreground());
    }
}
