//! Frame timing for offline export
//!
//! Presentation times are rational (`value / timescale`) with the frame
//! rate as timescale, so frame `i` sits exactly at `i / fps` and no rounding
//! accumulates over long recordings.

use serde::{Deserialize, Serialize};

/// Rational media time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub value: i64,
    pub timescale: u32,
}

impl Timestamp {
    pub fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    pub fn zero(timescale: u32) -> Self {
        Self::new(0, timescale)
    }

    pub fn seconds(&self) -> f64 {
        self.value as f64 / f64::from(self.timescale)
    }

    /// The timestamp one tick later
    pub fn next(&self) -> Self {
        Self::new(self.value + 1, self.timescale)
    }
}

impl PartialOrd for Timestamp {
    /// Compares instants across timescales. Equal instants written with
    /// different timescales are unordered, keeping `==` structural.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        let lhs = i128::from(self.value) * i128::from(other.timescale);
        let rhs = i128::from(other.value) * i128::from(self.timescale);
        match lhs.cmp(&rhs) {
            std::cmp::Ordering::Equal if self != other => None,
            ordering => Some(ordering),
        }
    }
}

/// Everything needed to render and place one video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub frame_index: u64,
    pub presentation_timestamp: Timestamp,
    /// First audio frame of the window drawn into this video frame
    pub audio_window_offset: u64,
}

/// Frame count and per-frame offsets for one recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlan {
    frame_rate: u32,
    total_frames: u64,
    samples_per_frame: u64,
}

impl FramePlan {
    /// Plan for `audio_frames` samples per channel at `sample_rate`.
    ///
    /// `total_frames = ceil(duration * fps)` and
    /// `samples_per_frame = ceil(sample_rate / fps)`, both in integers.
    pub fn new(audio_frames: u64, sample_rate: u32, frame_rate: u32) -> Self {
        let frame_rate = frame_rate.max(1);
        let sample_rate = u64::from(sample_rate.max(1));
        let fps = u64::from(frame_rate);

        Self {
            frame_rate,
            total_frames: (audio_frames * fps).div_ceil(sample_rate),
            samples_per_frame: sample_rate.div_ceil(fps),
        }
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn samples_per_frame(&self) -> u64 {
        self.samples_per_frame
    }

    /// Duration of the planned video
    pub fn duration(&self) -> Timestamp {
        Timestamp::new(self.total_frames as i64, self.frame_rate)
    }

    /// Descriptor for frame `index`, or `None` past the end
    pub fn descriptor(&self, index: u64) -> Option<FrameDescriptor> {
        (index < self.total_frames).then(|| FrameDescriptor {
            frame_index: index,
            presentation_timestamp: Timestamp::new(index as i64, self.frame_rate),
            audio_window_offset: index * self.samples_per_frame,
        })
    }

    /// Descriptors in presentation order, generated lazily
    pub fn descriptors(&self) -> impl Iterator<Item = FrameDescriptor> + '_ {
        (0..self.total_frames).filter_map(move |i| self.descriptor(i))
    }
}
