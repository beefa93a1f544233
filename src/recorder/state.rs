//! Recording state management
//!
//! Defines the recorder state machine, its events and what a finished
//! recording delivers.

use crate::export::ExportProgress;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
    /// Stopped; the export is running
    Exporting,
}

/// The artifact handed to the caller when a recording finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Delivery {
    /// Audio only, as requested
    Audio { path: PathBuf },
    /// Video merged with the audio
    Video { path: PathBuf },
    /// Video was requested but could not be produced; the audio stands in
    Degraded { path: PathBuf, reason: String },
}

impl Delivery {
    /// Path of the delivered file
    pub fn path(&self) -> &PathBuf {
        match self {
            Delivery::Audio { path } | Delivery::Video { path } | Delivery::Degraded { path, .. } => {
                path
            }
        }
    }
}

/// Events emitted by the recorder
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recording started writing to `path`
    Started { path: PathBuf },
    /// The tap was removed
    Stopped,
    /// Recording failed outside the normal stop path
    Failed(String),
    /// Export progress update
    Export(ExportProgress),
    /// The final artifact is ready
    Delivered(Delivery),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_path() {
        let delivery = Delivery::Degraded {
            path: PathBuf::from("take.wav"),
            reason: "merge failed".to_string(),
        };
        assert_eq!(delivery.path(), &PathBuf::from("take.wav"));
    }

    #[test]
    fn test_delivery_serialization() {
        let delivery = Delivery::Video {
            path: PathBuf::from("take.mp4"),
        };
        let json = serde_json::to_string(&delivery).unwrap();
        assert_eq!(json, r#"{"kind":"video","path":"take.mp4"}"#);
    }

    #[test]
    fn test_default_state() {
        assert_eq!(RecordingState::default(), RecordingState::Idle);
    }
}
