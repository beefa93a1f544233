//! Waveform module
//!
//! Live path: engine tap -> [`RealtimeDownsampler`] -> double buffer ->
//! [`DisplayRenderer`]. Export path: recorded file -> [`AudioSource`] ->
//! [`compute_window`].

pub mod display;
pub mod double_buffer;
pub mod downsampler;
pub mod extractor;

pub use display::{CurvePath, DisplayLoop, DisplayRenderer, Point};
pub use double_buffer::{double_buffer, ReadHalf, SampleWindow, SlotWriter, WriteHalf};
pub use downsampler::RealtimeDownsampler;
pub use extractor::{compute_window, AudioSource};

use crate::capture::{AudioEngine, CaptureResult, TapId};
use crate::recorder::config::DisplayConfig;

/// Install a downsampling tap on `engine` and return the renderer that
/// reads from it. Remove the tap with [`AudioEngine::remove_tap`].
pub fn attach_display(
    engine: &dyn AudioEngine,
    config: &DisplayConfig,
    block_size: usize,
) -> CaptureResult<(TapId, DisplayRenderer)> {
    let (writer, reader) = double_buffer(2, config.points);
    let downsampler = RealtimeDownsampler::new(writer, block_size);
    let tap = engine.install_tap(downsampler.into_tap())?;

    tracing::info!(
        "Display attached: {} points, gain {}, block size {}",
        config.points,
        config.gain,
        block_size
    );

    let mut renderer = DisplayRenderer::new(reader, config.width, config.height, config.gain);
    renderer.set_mode(config.visualization);
    Ok((tap, renderer))
}
