//! Audio capture
//!
//! The engine tap capability, the engines implementing it, and the capture
//! that persists engine output to disk.

pub mod audio;
pub mod engine;
pub mod traits;

#[cfg(feature = "device")]
pub mod device;

pub use audio::{AudioCapture, AudioCaptureSession, BlockWriter, CapturedAudio, WavBlockWriter, WriterFactory};
pub use engine::PushEngine;
pub use traits::{
    AudioBlock, AudioDeviceInfo, AudioEngine, AudioFormat, CaptureError, CaptureResult,
    TapHandler, TapId,
};

#[cfg(feature = "device")]
pub use device::{get_audio_input_devices, CpalEngine};
