//! Real-time downsampling of engine output for the live display

use super::double_buffer::WriteHalf;
use crate::capture::{AudioBlock, TapHandler};

/// Reduces each audio block to `points` mean values per channel and
/// publishes them through the double buffer.
///
/// Runs inside the audio callback: no allocation, no locks, no logging.
pub struct RealtimeDownsampler {
    writer: WriteHalf,
    block_size: usize,
}

impl RealtimeDownsampler {
    /// `block_size` is the block length the engine is expected to deliver;
    /// longer blocks are clipped to it.
    pub fn new(writer: WriteHalf, block_size: usize) -> Self {
        Self { writer, block_size }
    }

    /// Samples averaged into each output point for a block of `frames`
    pub fn step_for(&self, frames: usize) -> usize {
        let points = self.writer.points().max(1);
        (frames.min(self.block_size) / points).max(1)
    }

    /// Downsample one block and publish it
    pub fn publish(&mut self, block: AudioBlock<'_>) {
        let frames = block.frames().min(self.block_size);
        let step = self.step_for(frames);
        let channels = self.writer.channels();
        let points = self.writer.points();

        self.writer.write(|slot| {
            for channel in 0..channels {
                for point in 0..points {
                    let start = point * step;
                    if start >= frames {
                        slot.set(channel, point, 0.0);
                        continue;
                    }
                    let end = (start + step).min(frames);
                    let mut sum = 0.0f32;
                    for frame in start..end {
                        sum += block.sample(channel, frame);
                    }
                    let mean = sum / (end - start) as f32;
                    slot.set(channel, point, if mean.is_finite() { mean } else { 0.0 });
                }
            }
        });
    }

    /// Turn the downsampler into an engine tap
    pub fn into_tap(mut self) -> TapHandler {
        Box::new(move |block| self.publish(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::double_buffer::double_buffer;

    #[test]
    fn test_means_per_sub_range() {
        let (writer, mut reader) = double_buffer(2, 4);
        let mut downsampler = RealtimeDownsampler::new(writer, 8);

        // Left ramps 0..8, right is constant -1
        let mut samples = Vec::new();
        for i in 0..8 {
            samples.push(i as f32);
            samples.push(-1.0);
        }
        downsampler.publish(AudioBlock::Interleaved {
            samples: &samples,
            channels: 2,
        });

        let window = reader.consume();
        assert_eq!(window.channel(0), &[0.5, 2.5, 4.5, 6.5]);
        assert_eq!(window.channel(1), &[-1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_short_block_clamps_step() {
        let (writer, mut reader) = double_buffer(2, 64);
        let mut downsampler = RealtimeDownsampler::new(writer, 1024);
        assert_eq!(downsampler.step_for(1024), 16);
        assert_eq!(downsampler.step_for(10), 1);

        let left = [0.5f32; 10];
        let right = [0.25f32; 10];
        let planes: [&[f32]; 2] = [&left, &right];
        downsampler.publish(AudioBlock::Planar(&planes));

        let window = reader.consume();
        assert!(window.channel(0)[..10].iter().all(|&v| v == 0.5));
        assert!(window.channel(0)[10..].iter().all(|&v| v == 0.0));
        assert!(window.channel(1)[..10].iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_long_block_is_clipped() {
        let (writer, mut reader) = double_buffer(1, 2);
        let mut downsampler = RealtimeDownsampler::new(writer, 4);

        let samples = [1.0, 1.0, 1.0, 1.0, 9.0, 9.0, 9.0, 9.0];
        downsampler.publish(AudioBlock::Interleaved {
            samples: &samples,
            channels: 1,
        });
        assert_eq!(reader.consume().channel(0), &[1.0, 1.0]);
    }

    #[test]
    fn test_empty_and_non_finite_blocks() {
        let (writer, mut reader) = double_buffer(2, 4);
        let mut downsampler = RealtimeDownsampler::new(writer, 8);

        downsampler.publish(AudioBlock::Interleaved {
            samples: &[],
            channels: 2,
        });
        assert!(reader.consume().is_silent());

        let samples = [f32::NAN; 16];
        downsampler.publish(AudioBlock::Interleaved {
            samples: &samples,
            channels: 2,
        });
        assert!(reader.consume().is_silent());
    }

    #[test]
    fn test_mono_block_feeds_both_channels() {
        let (writer, mut reader) = double_buffer(2, 2);
        let mut downsampler = RealtimeDownsampler::new(writer, 4);
        let samples = [0.2f32, 0.4, 0.6, 0.8];
        downsampler.publish(AudioBlock::Interleaved {
            samples: &samples,
            channels: 1,
        });

        let window = reader.consume();
        assert_eq!(window.channel(0), window.channel(1));
    }
}
