//! Live display of the latest published window
//!
//! The renderer owns the read half of the double buffer and keeps one
//! persistent curve that is rewritten in place on every tick.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::double_buffer::ReadHalf;
use crate::export::types::Visualization;

/// A point in display coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Polyline with one point per display point
#[derive(Debug, Clone, PartialEq)]
pub struct CurvePath {
    points: Vec<Point>,
}

impl CurvePath {
    fn with_len(len: usize) -> Self {
        Self {
            points: vec![Point::default(); len],
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Maps the newest window onto the display surface
pub struct DisplayRenderer {
    reader: ReadHalf,
    path: CurvePath,
    width: f32,
    height: f32,
    gain: f32,
    mode: Visualization,
}

impl DisplayRenderer {
    pub fn new(reader: ReadHalf, width: f32, height: f32, gain: f32) -> Self {
        let points = reader.points();
        Self {
            reader,
            path: CurvePath::with_len(points),
            width,
            height,
            gain,
            mode: Visualization::Waveform,
        }
    }

    pub fn mode(&self) -> Visualization {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Visualization) {
        self.mode = mode;
    }

    /// Switch between waveform and Lissajous
    pub fn toggle_mode(&mut self) -> Visualization {
        self.mode = match self.mode {
            Visualization::Waveform => Visualization::Lissajous,
            Visualization::Lissajous => Visualization::Waveform,
        };
        self.mode
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    /// Resize the display surface; takes effect on the next tick
    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    /// Current curve without consuming new data
    pub fn path(&self) -> &CurvePath {
        &self.path
    }

    /// Consume the newest window and rewrite the curve
    pub fn tick(&mut self) -> &CurvePath {
        let window = self.reader.consume();
        let left = window.channel(0);
        let right = window.channel(1);

        let mid_x = self.width / 2.0;
        let mid_y = self.height / 2.0;
        let count = self.path.points.len();
        let dx = if count > 0 { self.width / count as f32 } else { 0.0 };

        for (i, point) in self.path.points.iter_mut().enumerate() {
            let l = left.get(i).copied().unwrap_or(0.0);
            let r = right.get(i).copied().unwrap_or(0.0);
            *point = match self.mode {
                Visualization::Waveform => Point {
                    x: i as f32 * dx,
                    y: mid_y + l * mid_y * self.gain,
                },
                Visualization::Lissajous => Point {
                    x: mid_x + l * mid_y * self.gain,
                    y: mid_y + r * mid_y * self.gain,
                },
            };
        }

        &self.path
    }

    /// Drive the renderer from a fixed-rate timer, handing each curve to
    /// `present`.
    pub fn spawn<F>(self, refresh_hz: u32, present: F) -> DisplayLoop
    where
        F: FnMut(&CurvePath) + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let period = Duration::from_secs_f64(1.0 / f64::from(refresh_hz.max(1)));
        let handle = tokio::spawn(run_display(self, period, present, stop_rx));
        DisplayLoop {
            stop: stop_tx,
            handle,
        }
    }
}

async fn run_display<F>(
    mut renderer: DisplayRenderer,
    period: Duration,
    mut present: F,
    mut stop: oneshot::Receiver<()>,
) -> DisplayRenderer
where
    F: FnMut(&CurvePath) + Send + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!("Display loop started ({:?} per tick)", period);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = interval.tick() => present(renderer.tick()),
        }
    }
    tracing::debug!("Display loop stopped");
    renderer
}

/// Handle to a running display loop
pub struct DisplayLoop {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<DisplayRenderer>,
}

impl DisplayLoop {
    /// Stop ticking and get the renderer back
    pub async fn stop(self) -> Option<DisplayRenderer> {
        let _ = self.stop.send(());
        match self.handle.await {
            Ok(renderer) => Some(renderer),
            Err(e) => {
                tracing::warn!("Display loop ended abnormally: {}", e);
                None
            }
        }
    }
}
