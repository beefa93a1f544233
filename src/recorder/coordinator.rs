//! Media recorder
//!
//! Owns the capture session and drives stop -> export -> deliver. The
//! export never runs on the audio thread or on the caller's runtime; it
//! gets its own thread via [`ExportPipeline::spawn`].

use super::config::{ConfigError, RecorderConfig};
use super::state::{Delivery, RecordingEvent, RecordingState};
use crate::capture::{AudioCapture, AudioCaptureSession, AudioEngine, CaptureError};
use crate::export::{
    ExportError, ExportJob, ExportPipeline, ExportRequest, ExportTools, FfmpegTools,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;

/// Recorder errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// Cancels the export of the recording currently being stopped
#[derive(Clone)]
pub struct ExportCanceller {
    flag: Arc<AtomicBool>,
}

impl ExportCanceller {
    pub fn cancel(&self) {
        tracing::info!("Export cancellation requested");
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Records the engine output and turns it into the requested artifact
pub struct MediaRecorder<T: ExportTools + Send + Sync = FfmpegTools> {
    config: RecorderConfig,
    capture: AudioCapture,
    tools: Arc<T>,
    state: Arc<RwLock<RecordingState>>,
    request: ExportRequest,
    cancel_flag: Arc<AtomicBool>,
    start_time: Option<Instant>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl MediaRecorder<FfmpegTools> {
    /// Recorder exporting through the ffmpeg binaries named in the config
    pub fn with_ffmpeg(
        engine: Arc<dyn AudioEngine>,
        config: RecorderConfig,
    ) -> RecordingResult<Self> {
        let tools = FfmpegTools::new(
            config.export.ffmpeg_path.clone(),
            config.export.ffprobe_path.clone(),
            config.export.max_frames_in_flight,
        );
        Self::new(engine, config, Arc::new(tools))
    }
}

impl<T: ExportTools + Send + Sync> MediaRecorder<T> {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        config: RecorderConfig,
        tools: Arc<T>,
    ) -> RecordingResult<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(100);
        let capture = AudioCapture::new(
            engine,
            config.recordings_dir.clone(),
            config.file_prefix.clone(),
            event_tx.clone(),
        );

        Ok(Self {
            config,
            capture,
            tools,
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            request: ExportRequest::audio_only(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            start_time: None,
            event_tx,
        })
    }

    /// Replace the capture, e.g. to use a different file writer
    pub fn with_capture(mut self, capture: AudioCapture) -> Self {
        self.capture = capture;
        self
    }

    /// Get the current recorder state
    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Subscribe to recorder events.
    ///
    /// After [`RecordingEvent::Failed`] the recording file is already gone,
    /// but the recorder stays in [`RecordingState::Recording`] with its tap
    /// installed (discarding every block) until [`MediaRecorder::stop`] is
    /// called. `stop` then removes the tap and returns the write error.
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Sender the recorder publishes on; hand it to an [`AudioCapture`]
    /// passed to [`MediaRecorder::with_capture`]
    pub fn events(&self) -> broadcast::Sender<RecordingEvent> {
        self.event_tx.clone()
    }

    /// Active capture session, if recording
    pub fn session(&self) -> Option<&AudioCaptureSession> {
        self.capture.session()
    }

    /// Whether the active recording hit a write failure; call `stop` to
    /// release the tap
    pub fn has_failed(&self) -> bool {
        self.capture.has_failed()
    }

    /// Handle for cancelling the export while `stop` is running
    pub fn canceller(&self) -> ExportCanceller {
        ExportCanceller {
            flag: self.cancel_flag.clone(),
        }
    }

    /// Milliseconds since recording started
    pub fn duration_ms(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    /// Start recording; `request` decides what `stop` delivers
    pub fn start(&mut self, request: ExportRequest) -> RecordingResult<PathBuf> {
        if self.state() != RecordingState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }

        let path = self.capture.start()?.file_path.clone();
        self.request = request;
        self.cancel_flag.store(false, Ordering::Relaxed);
        self.start_time = Some(Instant::now());
        *self.state.write() = RecordingState::Recording;

        let _ = self.event_tx.send(RecordingEvent::Started { path: path.clone() });
        tracing::info!(
            "Recording started (video: {}, {:?}, {:?}, {:?})",
            request.generate_video,
            request.visualization,
            request.theme,
            request.aspect
        );
        Ok(path)
    }

    /// Stop recording and deliver the requested artifact.
    ///
    /// The tap is removed before anything else. A failed video export
    /// delivers the recorded audio instead.
    pub async fn stop(&mut self) -> RecordingResult<Delivery> {
        if self.state() != RecordingState::Recording {
            return Err(RecordingError::NotRecording);
        }

        tracing::info!("Stopping recording after {:.0}ms", self.duration_ms());
        let captured = self.capture.stop();
        self.start_time = None;
        let _ = self.event_tx.send(RecordingEvent::Stopped);

        let captured = match captured {
            Ok(captured) => captured,
            Err(e) => {
                *self.state.write() = RecordingState::Idle;
                return Err(e.into());
            }
        };

        let delivery = if self.request.generate_video {
            *self.state.write() = RecordingState::Exporting;
            self.export(captured.path).await
        } else {
            Delivery::Audio {
                path: captured.path,
            }
        };

        *self.state.write() = RecordingState::Idle;
        tracing::info!("Delivering {:?}", delivery);
        let _ = self.event_tx.send(RecordingEvent::Delivered(delivery.clone()));
        Ok(delivery)
    }

    async fn export(&self, audio: PathBuf) -> Delivery {
        let job = ExportJob::new(&audio, &self.request, self.config.export.frame_rate_hz);
        let pipeline = ExportPipeline::new(job, self.tools.clone(), self.cancel_flag.clone())
            .with_window(self.config.export.window_frames, self.config.export.window_step)
            .with_badge(self.config.export.badge_path.clone());

        let events = self.event_tx.clone();
        let result = match pipeline.spawn(move |progress| {
            let _ = events.send(RecordingEvent::Export(progress));
        }) {
            Ok(handle) => handle.join().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(artifact) => match artifact.merged_path {
                Some(path) => Delivery::Video { path },
                None => Delivery::Degraded {
                    path: artifact.audio_path,
                    reason: "Merged video missing".to_string(),
                },
            },
            Err(e) => {
                tracing::warn!("Video export failed, delivering audio: {}", e);
                Delivery::Degraded {
                    path: audio,
                    reason: e.to_string(),
                }
            }
        }
    }
}
