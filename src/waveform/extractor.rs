//! Sample windows read back from a persisted recording
//!
//! Export reads the recording at an offset per video frame and reduces the
//! raw window to per-channel means, the same reduction the live display
//! uses but at a fixed, coarser step.

use super::double_buffer::SampleWindow;
use crate::export::types::ExportError;
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Seekable reader over a recorded WAV file
pub struct AudioSource {
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
}

impl AudioSource {
    /// Open a recording for reading
    pub fn open(path: &Path) -> Result<Self, ExportError> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        tracing::debug!(
            "Opened audio source {:?}: {} Hz, {} channel(s), {} frames",
            path,
            spec.sample_rate,
            spec.channels,
            reader.duration()
        );
        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.reader.spec().sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.reader.spec().channels
    }

    /// Length in frames (samples per channel)
    pub fn frames(&self) -> u64 {
        u64::from(self.reader.duration())
    }

    pub fn duration_secs(&self) -> f64 {
        let rate = self.sample_rate();
        if rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(rate)
    }

    /// Read up to `frames` interleaved frames starting at `offset` into
    /// `out`, replacing its contents. Returns the number of whole frames
    /// read; zero when `offset` is past the end.
    pub fn read_window(
        &mut self,
        offset: u64,
        frames: usize,
        out: &mut Vec<f32>,
    ) -> Result<usize, ExportError> {
        out.clear();
        if offset >= self.frames() {
            return Ok(0);
        }
        let Ok(position) = u32::try_from(offset) else {
            return Ok(0);
        };
        self.reader.seek(position)?;

        let spec = self.reader.spec();
        let channels = usize::from(spec.channels.max(1));
        let wanted = frames * channels;

        match spec.sample_format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    out.push(sample?);
                }
            }
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                for sample in self.reader.samples::<i32>().take(wanted) {
                    out.push(sample? as f32 * scale);
                }
            }
        }

        out.truncate(out.len() - out.len() % channels);
        Ok(out.len() / channels)
    }
}

/// Reduce an interleaved window to `window.points()` means per channel.
///
/// Each point averages `step` frames; frames missing from a short read
/// count as silence. A mono source feeds both output channels.
pub fn compute_window(
    interleaved: &[f32],
    channels: usize,
    step: usize,
    window: &mut SampleWindow,
) {
    let channels = channels.max(1);
    let step = step.max(1);
    let available = interleaved.len() / channels;

    for out_channel in 0..window.channels() {
        let source_channel = out_channel.min(channels - 1);
        for point in 0..window.points() {
            let start = point * step;
            let end = (start + step).min(available);
            let mut sum = 0.0f32;
            for frame in start..end {
                sum += interleaved[frame * channels + source_channel];
            }
            let mean = sum / step as f32;
            window.set(out_channel, point, if mean.is_finite() { mean } else { 0.0 });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, frames: usize, value: impl Fn(usize, u16) -> f32) {
        let spec = WavSpec {
            channels,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for frame in 0..frames {
            for channel in 0..channels {
                writer.write_sample(value(frame, channel)).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_source_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_wav(&path, 2, 4800, |_, _| 0.0);

        let source = AudioSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 48_000);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.frames(), 4800);
        assert!((source.duration_secs() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_read_window_seeks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_wav(&path, 2, 100, |frame, channel| {
            frame as f32 + if channel == 0 { 0.0 } else { 0.5 }
        });

        let mut source = AudioSource::open(&path).unwrap();
        let mut buf = Vec::new();
        let read = source.read_window(10, 4, &mut buf).unwrap();
        assert_eq!(read, 4);
        assert_eq!(buf[0], 10.0);
        assert_eq!(buf[1], 10.5);
        assert_eq!(buf[6], 13.0);

        // Short read near the end
        let read = source.read_window(98, 4, &mut buf).unwrap();
        assert_eq!(read, 2);

        // Past the end
        let read = source.read_window(100, 4, &mut buf).unwrap();
        assert_eq!(read, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_window_int_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(i16::MIN).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let mut source = AudioSource::open(&path).unwrap();
        let mut buf = Vec::new();
        source.read_window(0, 2, &mut buf).unwrap();
        assert_eq!(buf, vec![-1.0, 0.0]);
    }

    #[test]
    fn test_compute_window_means() {
        let mut window = SampleWindow::new(2, 2);
        let interleaved = [1.0, 0.0, 3.0, 0.0, 5.0, 1.0, 7.0, 1.0];
        compute_window(&interleaved, 2, 2, &mut window);
        assert_eq!(window.channel(0), &[2.0, 6.0]);
        assert_eq!(window.channel(1), &[0.0, 1.0]);
    }

    #[test]
    fn test_compute_window_short_read_is_padded() {
        let mut window = SampleWindow::new(2, 4);
        let interleaved = [1.0, 1.0, 1.0, 1.0];
        compute_window(&interleaved, 1, 2, &mut window);
        assert_eq!(window.channel(0), &[1.0, 1.0, 0.0, 0.0]);
        assert_eq!(window.channel(1), window.channel(0));
    }
}
