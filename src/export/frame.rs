//! Per-frame image synthesis
//!
//! A frame is a pure function of the recording, the frame descriptor and
//! the job: read the audio window at the descriptor's offset, reduce it,
//! and draw it over the themed backdrop.

use super::canvas::{Color, FrameImage};
use super::timing::FrameDescriptor;
use super::types::{ExportError, ExportJob, Theme, Visualization};
use crate::waveform::{compute_window, AudioSource, SampleWindow};

/// Audio frames read per video frame
pub const DEFAULT_WINDOW_FRAMES: usize = 2048;
/// Audio frames averaged into one drawn point
pub const DEFAULT_WINDOW_STEP: usize = 16;

const WAVEFORM_GAIN: f32 = 1.0;
const LISSAJOUS_GAIN: f32 = 3.0;
const CURVE_WIDTH: f32 = 2.0;
const GRID_DOTS: f32 = 18.0;
const GRID_DOT_RADIUS: f32 = 2.0;
const BADGE_SIZE: u32 = 70;
const BADGE_MARGIN: u32 = BADGE_SIZE / 2;

/// Draws export frames for one job
pub struct FrameRenderer {
    source: AudioSource,
    visualization: Visualization,
    theme: Theme,
    window_frames: usize,
    step: usize,
    badge: Option<FrameImage>,
    /// Background plus grid, drawn once
    backdrop: FrameImage,
    scratch: Vec<f32>,
    window: SampleWindow,
    points: Vec<(f32, f32)>,
}

impl FrameRenderer {
    pub fn new(source: AudioSource, job: &ExportJob) -> Self {
        Self::with_window(source, job, DEFAULT_WINDOW_FRAMES, DEFAULT_WINDOW_STEP)
    }

    /// Renderer reading `window_frames` frames and averaging every `step`
    pub fn with_window(
        source: AudioSource,
        job: &ExportJob,
        window_frames: usize,
        step: usize,
    ) -> Self {
        let window_frames = window_frames.max(1);
        let step = step.clamp(1, window_frames);
        let points = window_frames / step;

        let mut backdrop = FrameImage::new(job.width, job.height, job.theme.background());
        draw_grid(&mut backdrop, job.theme.foreground().with_alpha(0.25));

        Self {
            source,
            visualization: job.visualization,
            theme: job.theme,
            window_frames,
            step,
            badge: None,
            backdrop,
            scratch: Vec::with_capacity(window_frames * 2),
            window: SampleWindow::new(2, points),
            points: Vec::with_capacity(points),
        }
    }

    /// Composite this image as the badge instead of the drawn default
    pub fn with_badge(mut self, badge: FrameImage) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn width(&self) -> u32 {
        self.backdrop.width()
    }

    pub fn height(&self) -> u32 {
        self.backdrop.height()
    }

    /// Points drawn per frame
    pub fn points(&self) -> usize {
        self.window.points()
    }

    pub fn source(&self) -> &AudioSource {
        &self.source
    }

    /// Render one frame into a new image
    pub fn render(&mut self, descriptor: &FrameDescriptor) -> Result<FrameImage, ExportError> {
        let mut target = self.backdrop.clone();
        self.render_into(descriptor, &mut target)?;
        Ok(target)
    }

    /// Render one frame into `target`, which must match the job dimensions.
    ///
    /// A window past the end of the recording yields the plain themed
    /// background.
    pub fn render_into(
        &mut self,
        descriptor: &FrameDescriptor,
        target: &mut FrameImage,
    ) -> Result<(), ExportError> {
        if target.width() != self.width() || target.height() != self.height() {
            return Err(ExportError::InvalidConfig(format!(
                "Frame target is {}x{}, expected {}x{}",
                target.width(),
                target.height(),
                self.width(),
                self.height()
            )));
        }

        let read = self.source.read_window(
            descriptor.audio_window_offset,
            self.window_frames,
            &mut self.scratch,
        )?;
        if read == 0 {
            tracing::trace!("Frame {} is past the end of the audio", descriptor.frame_index);
            target.fill(self.theme.background());
            return Ok(());
        }

        let channels = usize::from(self.source.channels());
        compute_window(&self.scratch, channels, self.step, &mut self.window);

        target.clone_from(&self.backdrop);
        self.trace_curve();
        target.stroke_polyline(&self.points, CURVE_WIDTH, self.theme.foreground());
        self.draw_badge(target);
        Ok(())
    }

    fn trace_curve(&mut self) {
        let width = self.backdrop.width() as f32;
        let height = self.backdrop.height() as f32;
        let mid_x = width / 2.0;
        let mid_y = height / 2.0;
        let left = self.window.channel(0);
        let right = self.window.channel(1);

        self.points.clear();
        match self.visualization {
            Visualization::Waveform => {
                let span = width * 0.5;
                let delta = span / left.len().max(1) as f32;
                let start = mid_x - span / 2.0;
                for (i, (l, r)) in left.iter().zip(right).enumerate() {
                    let x = start + i as f32 * delta;
                    let y = mid_y + (l + r) * mid_y * WAVEFORM_GAIN;
                    self.points.push((x, y));
                }
            }
            Visualization::Lissajous => {
                for (l, r) in left.iter().zip(right) {
                    let x = mid_x + l * mid_y * LISSAJOUS_GAIN;
                    let y = mid_y + r * mid_y * LISSAJOUS_GAIN;
                    self.points.push((x, y));
                }
            }
        }
    }

    fn draw_badge(&self, target: &mut FrameImage) {
        let x = BADGE_MARGIN as i32;
        let y = target.height() as i32 - (BADGE_SIZE + BADGE_MARGIN) as i32;
        match &self.badge {
            Some(badge) => target.draw_image(badge, x, y, BADGE_SIZE, BADGE_SIZE),
            None => target.fill_rounded_rect(
                x,
                y,
                BADGE_SIZE as i32,
                BADGE_SIZE as i32,
                (BADGE_SIZE / 5) as i32,
                self.theme.foreground().with_alpha(0.9),
            ),
        }
    }
}

/// Square dot grid covering the middle 60% of the shorter side
fn draw_grid(image: &mut FrameImage, color: Color) {
    let width = image.width() as f32;
    let height = image.height() as f32;
    let side = width.min(height) * 0.6;
    let delta = (side / GRID_DOTS).ceil().max(1.0);
    let origin_x = (width - side) / 2.0;
    let origin_y = (height - side) / 2.0;

    let mut y = 0.0;
    while y <= side {
        let mut x = 0.0;
        while x <= side {
            image.fill_disc(origin_x + x, origin_y + y, GRID_DOT_RADIUS, color);
            x += delta;
        }
        y += delta;
    }
}
