//! Capture trait definitions
//!
//! The audio engine is owned elsewhere; components only see it through the
//! tap capability defined here.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Sample rate and channel layout of the blocks an engine delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Samples per second per channel
    pub sample_rate: u32,

    /// Number of channels in each delivered block
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Channel count written to disk; stereo at most, mono at least
    pub fn persisted_channels(&self) -> u16 {
        self.channels.clamp(1, 2)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(48_000, 2)
    }
}

/// One block of PCM handed over by the audio engine
#[derive(Debug, Clone, Copy)]
pub enum AudioBlock<'a> {
    /// Frames laid out one after another, `channels` samples per frame
    Interleaved { samples: &'a [f32], channels: usize },
    /// One slice per channel
    Planar(&'a [&'a [f32]]),
}

impl<'a> AudioBlock<'a> {
    /// Number of channels carried by the block
    pub fn channels(&self) -> usize {
        match self {
            AudioBlock::Interleaved { channels, .. } => *channels,
            AudioBlock::Planar(planes) => planes.len(),
        }
    }

    /// Number of complete frames in the block
    pub fn frames(&self) -> usize {
        match self {
            AudioBlock::Interleaved { samples, channels } => {
                if *channels == 0 {
                    0
                } else {
                    samples.len() / channels
                }
            }
            // A ragged planar block is only as long as its shortest plane
            AudioBlock::Planar(planes) => planes.iter().map(|p| p.len()).min().unwrap_or(0),
        }
    }

    /// Sample at `frame` for `channel`.
    ///
    /// Channels past the last one read the last channel, so a mono block
    /// reads the same value for left and right. Out-of-range frames read 0.
    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        let count = self.channels();
        if count == 0 || frame >= self.frames() {
            return 0.0;
        }
        let channel = channel.min(count - 1);
        match self {
            AudioBlock::Interleaved { samples, channels } => samples[frame * channels + channel],
            AudioBlock::Planar(planes) => planes[channel][frame],
        }
    }
}

/// Callback invoked on the engine's audio thread for every delivered block
pub type TapHandler = Box<dyn FnMut(AudioBlock<'_>) + Send + 'static>;

/// Identifier of an installed tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapId(u64);

impl TapId {
    /// Allocate a process-unique tap id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TapId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Capability to observe the engine's output bus.
///
/// After `remove_tap` returns, the removed handler is never called again.
pub trait AudioEngine: Send + Sync {
    /// Format of the blocks delivered to taps
    fn format(&self) -> AudioFormat;

    /// Install a tap that receives every output block
    fn install_tap(&self, handler: TapHandler) -> Result<TapId, CaptureError>;

    /// Remove a previously installed tap
    fn remove_tap(&self, tap: TapId);
}

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Device name
    pub name: String,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    File(#[from] hound::Error),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Recording failed: {0}")]
    WriteFailed(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_block_layout() {
        let samples = [0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        let block = AudioBlock::Interleaved {
            samples: &samples,
            channels: 2,
        };
        assert_eq!(block.frames(), 3);
        assert_eq!(block.sample(0, 1), 0.2);
        assert_eq!(block.sample(1, 2), -0.3);
        assert_eq!(block.sample(0, 3), 0.0);
    }

    #[test]
    fn test_mono_block_mirrors_channel() {
        let left = [0.5f32, 0.25];
        let planes: [&[f32]; 1] = [&left];
        let block = AudioBlock::Planar(&planes);
        assert_eq!(block.sample(1, 0), 0.5);
        assert_eq!(block.sample(1, 1), 0.25);
    }

    #[test]
    fn test_ragged_planar_block_uses_shortest_plane() {
        let left = [0.1f32, 0.2, 0.3];
        let right = [0.4f32];
        let planes: [&[f32]; 2] = [&left, &right];
        let block = AudioBlock::Planar(&planes);
        assert_eq!(block.frames(), 1);
        assert_eq!(block.sample(0, 2), 0.0);
    }

    #[test]
    fn test_persisted_channels_clamped() {
        assert_eq!(AudioFormat::new(44_100, 1).persisted_channels(), 1);
        assert_eq!(AudioFormat::new(44_100, 6).persisted_channels(), 2);
        assert_eq!(AudioFormat::new(44_100, 0).persisted_channels(), 1);
    }

    #[test]
    fn test_tap_ids_are_unique() {
        assert_ne!(TapId::next(), TapId::next());
    }
}
