//! Video encoder state machine
//!
//! `Idle -> Writing -> Finishing -> Completed | Failed`. While writing, the
//! encoder waits on the sink's readiness signal and then renders exactly as
//! many frames as the sink said it would accept, so it never runs ahead of
//! the sink and the number of pixel buffers in flight stays bounded.

use super::canvas::FrameImage;
use super::frame::FrameRenderer;
use super::pixel::{PixelBuffer, PixelBufferPool, PixelFormat};
use super::timing::{FramePlan, Timestamp};
use super::types::{ExportError, ExportJob, ExportProgress};
use crate::utils::fs::remove_file_quietly;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A video track being written
#[async_trait]
pub trait VideoSink: Send {
    /// Pixel layout the sink expects
    fn pixel_format(&self) -> PixelFormat;

    /// Wait until the sink can take more frames, then return how many it
    /// will accept without waiting again. Zero means wait again.
    async fn ready(&mut self) -> Result<usize, ExportError>;

    /// Append one frame at its presentation time
    async fn append(&mut self, buffer: PixelBuffer, pts: Timestamp) -> Result<(), ExportError>;

    /// Close the track and finalize the container
    async fn finish(&mut self) -> Result<(), ExportError>;
}

/// Opens video sinks for export jobs
pub trait SinkFactory: Send + Sync {
    fn open_sink(&self, output: &Path, job: &ExportJob) -> Result<Box<dyn VideoSink>, ExportError>;
}

/// Encoder lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderState {
    Idle,
    Writing,
    Finishing,
    Completed,
    Failed(String),
}

/// Renders every planned frame and feeds it to a sink
pub struct VideoEncoder {
    state: EncoderState,
    plan: FramePlan,
    next_frame: u64,
    renderer: FrameRenderer,
    output_path: PathBuf,
    cancel_flag: Arc<AtomicBool>,
    sink: Option<Box<dyn VideoSink>>,
    pool: Option<PixelBufferPool>,
    canvas: FrameImage,
}

impl VideoEncoder {
    pub fn new(
        renderer: FrameRenderer,
        plan: FramePlan,
        output_path: PathBuf,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        let canvas = FrameImage::new(
            renderer.width(),
            renderer.height(),
            super::canvas::Color::rgb(0, 0, 0),
        );
        Self {
            state: EncoderState::Idle,
            plan,
            next_frame: 0,
            renderer,
            output_path,
            cancel_flag,
            sink: None,
            pool: None,
            canvas,
        }
    }

    pub fn state(&self) -> &EncoderState {
        &self.state
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Frames appended so far
    pub fn frames_written(&self) -> u64 {
        self.next_frame
    }

    /// Pool backing the pixel buffers, once writing has started
    pub fn pool(&self) -> Option<&PixelBufferPool> {
        self.pool.as_ref()
    }

    /// `Idle -> Writing`: open the output and declare the video track
    pub fn start(&mut self, factory: &dyn SinkFactory, job: &ExportJob) -> Result<(), ExportError> {
        if self.state != EncoderState::Idle {
            return Err(ExportError::Encoding(format!(
                "Encoder cannot start from {:?}",
                self.state
            )));
        }

        remove_file_quietly(&self.output_path)?;
        let sink = match factory.open_sink(&self.output_path, job) {
            Ok(sink) => sink,
            Err(e) => return Err(self.fail(e)),
        };

        self.pool = Some(PixelBufferPool::new(
            self.renderer.width(),
            self.renderer.height(),
            sink.pixel_format(),
        ));
        self.sink = Some(sink);
        self.state = EncoderState::Writing;

        tracing::info!(
            "Encoding {} frames at {} fps to {:?}",
            self.plan.total_frames(),
            self.plan.frame_rate(),
            self.output_path
        );
        Ok(())
    }

    /// Drive `Writing -> Finishing -> Completed | Failed` to the end.
    ///
    /// On failure or cancellation the partial video is deleted.
    pub async fn run<F>(&mut self, progress: F) -> Result<PathBuf, ExportError>
    where
        F: Fn(ExportProgress),
    {
        match self.write_all(&progress).await {
            Ok(()) => {
                self.state = EncoderState::Completed;
                tracing::info!(
                    "Video complete: {} frames written to {:?}",
                    self.next_frame,
                    self.output_path
                );
                Ok(self.output_path.clone())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn write_all<F>(&mut self, progress: &F) -> Result<(), ExportError>
    where
        F: Fn(ExportProgress),
    {
        if self.state != EncoderState::Writing {
            return Err(ExportError::Encoding(format!(
                "Encoder cannot write from {:?}",
                self.state
            )));
        }
        let total = self.plan.total_frames();
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| ExportError::Encoding("No open video sink".to_string()))?;
        let pool = self
            .pool
            .clone()
            .ok_or_else(|| ExportError::Encoding("No pixel buffer pool".to_string()))?;

        while self.next_frame < total {
            let accepted = sink.ready().await?;
            if self.cancel_flag.load(Ordering::Relaxed) {
                return Err(ExportError::Cancelled);
            }

            if accepted == 0 {
                tracing::trace!("Sink not ready yet at frame {}", self.next_frame);
                continue;
            }

            for _ in 0..accepted {
                let Some(descriptor) = self.plan.descriptor(self.next_frame) else {
                    break;
                };
                self.renderer.render_into(&descriptor, &mut self.canvas)?;
                let mut buffer = pool.acquire();
                buffer.fill_from(&self.canvas);
                sink.append(buffer, descriptor.presentation_timestamp).await?;
                self.next_frame += 1;

                if self.next_frame % 10 == 0 || self.next_frame == total {
                    progress(ExportProgress::encoding(self.next_frame, total));
                }
            }
        }

        self.state = EncoderState::Finishing;
        progress(ExportProgress::finalizing());
        sink.finish().await
    }

    fn fail(&mut self, error: ExportError) -> ExportError {
        tracing::error!("Video encoding failed: {}", error);
        self.sink = None;
        self.state = EncoderState::Failed(error.to_string());
        if let Err(e) = remove_file_quietly(&self.output_path) {
            tracing::warn!("Could not delete partial video {:?}: {}", self.output_path, e);
        }
        error
    }
}
