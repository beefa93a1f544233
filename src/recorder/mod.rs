//! Recording system module
//!
//! Ties capture and export together:
//! - [`MediaRecorder`] drives start, stop, export and delivery
//! - [`RecorderConfig`] holds the persisted settings
//! - [`RecordingEvent`] reports what happened to subscribers

pub mod config;
pub mod coordinator;
pub mod state;

pub use config::{
    load_config, save_config, ConfigError, DisplayConfig, ExportSettings, RecorderConfig,
};
pub use coordinator::{ExportCanceller, MediaRecorder, RecordingError, RecordingResult};
pub use state::{Delivery, RecordingEvent, RecordingState};
