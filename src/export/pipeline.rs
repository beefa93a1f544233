//! Export pipeline orchestration
//!
//! One owned job flows through open -> encode -> merge -> deliver. The
//! pipeline runs on its own thread with a single-threaded runtime, so the
//! audio thread and the caller's runtime never do export work.

use super::canvas::FrameImage;
use super::encoder::{SinkFactory, VideoEncoder};
use super::frame::{FrameRenderer, DEFAULT_WINDOW_FRAMES, DEFAULT_WINDOW_STEP};
use super::mux::{MuxBackend, MuxOutcome, MuxRequest, Multiplexer};
use super::timing::FramePlan;
use super::types::{EncodedArtifact, ExportError, ExportJob, ExportProgress};
use crate::utils::fs::fresh_file_path;
use crate::waveform::AudioSource;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Everything the pipeline needs from the outside world
pub trait ExportTools: SinkFactory + MuxBackend + 'static {}

impl<T: SinkFactory + MuxBackend + 'static> ExportTools for T {}

/// Export pipeline for rendering, encoding and merging one recording
pub struct ExportPipeline<T: ExportTools> {
    job: ExportJob,
    tools: Arc<T>,
    cancel_flag: Arc<AtomicBool>,
    window_frames: usize,
    window_step: usize,
    badge_path: Option<PathBuf>,
}

impl<T: ExportTools> ExportPipeline<T> {
    /// Create a new export pipeline
    pub fn new(job: ExportJob, tools: Arc<T>, cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            job,
            tools,
            cancel_flag,
            window_frames: DEFAULT_WINDOW_FRAMES,
            window_step: DEFAULT_WINDOW_STEP,
            badge_path: None,
        }
    }

    /// Audio frames read per video frame and frames averaged per point
    pub fn with_window(mut self, window_frames: usize, window_step: usize) -> Self {
        self.window_frames = window_frames;
        self.window_step = window_step;
        self
    }

    /// PNG composited as the badge
    pub fn with_badge(mut self, badge_path: Option<PathBuf>) -> Self {
        self.badge_path = badge_path;
        self
    }

    pub fn job(&self) -> &ExportJob {
        &self.job
    }

    /// Run the export pipeline
    pub async fn run<F>(&self, progress_callback: F) -> Result<EncodedArtifact, ExportError>
    where
        F: Fn(ExportProgress),
    {
        let result = self.run_stages(&progress_callback).await;
        if let Err(e) = &result {
            progress_callback(ExportProgress::error(e.to_string()));
        }
        result
    }

    async fn run_stages<F>(&self, progress_callback: &F) -> Result<EncodedArtifact, ExportError>
    where
        F: Fn(ExportProgress),
    {
        let audio_path = self.job.audio_source_path.clone();
        tracing::info!("Starting export {} for {:?}", self.job.id, audio_path);

        // 1. Open the recording
        progress_callback(ExportProgress::preparing());
        let source = AudioSource::open(&audio_path)?;
        if source.frames() == 0 {
            return Err(ExportError::InvalidConfig(format!(
                "Recording {:?} contains no audio",
                audio_path
            )));
        }
        let plan = FramePlan::new(source.frames(), source.sample_rate(), self.job.frame_rate_hz);

        if self.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        // 2. Frame renderer
        let mut renderer =
            FrameRenderer::with_window(source, &self.job, self.window_frames, self.window_step);
        if let Some(badge) = self.load_badge() {
            renderer = renderer.with_badge(badge);
        }

        // 3. Encode the video track
        let (video_path, merged_path) = output_paths(&audio_path);
        let mut encoder = VideoEncoder::new(renderer, plan, video_path.clone(), self.cancel_flag.clone());
        encoder.start(self.tools.as_ref(), &self.job)?;
        encoder.run(progress_callback).await?;

        if self.is_cancelled() {
            let _ = crate::utils::fs::remove_file_quietly(&video_path);
            return Err(ExportError::Cancelled);
        }

        // 4. Merge with the full-length audio
        progress_callback(ExportProgress::merging());
        let request = MuxRequest {
            video: video_path.clone(),
            audio: audio_path.clone(),
            output: merged_path,
        };
        match Multiplexer::new(self.tools.as_ref()).merge(&request).await {
            MuxOutcome::Merged(path) => {
                progress_callback(ExportProgress::complete());
                tracing::info!("Export {} complete: {:?}", self.job.id, path);
                Ok(EncodedArtifact {
                    video_path,
                    audio_path,
                    merged_path: Some(path),
                })
            }
            MuxOutcome::Degraded { reason, .. } => Err(ExportError::Merge(reason)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    fn load_badge(&self) -> Option<FrameImage> {
        let path = self.badge_path.as_ref()?;
        match FrameImage::load_png(path) {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!("Failed to load badge image {:?}: {}", path, e);
                None
            }
        }
    }
}

impl<T: ExportTools + Send + Sync> ExportPipeline<T> {
    /// Run on a dedicated export thread
    pub fn spawn<F>(self, progress_callback: F) -> Result<ExportHandle, ExportError>
    where
        F: Fn(ExportProgress) + Send + 'static,
    {
        let cancel_flag = self.cancel_flag.clone();
        let (tx, rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("scopecast-export".to_string())
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.run(progress_callback)),
                    Err(e) => Err(ExportError::Io(e)),
                };
                let _ = tx.send(result);
            })?;

        Ok(ExportHandle {
            cancel_flag,
            result: rx,
            thread: Some(thread),
        })
    }
}

/// A running export
pub struct ExportHandle {
    cancel_flag: Arc<AtomicBool>,
    result: oneshot::Receiver<Result<EncodedArtifact, ExportError>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ExportHandle {
    /// Ask the export to stop; it fails with [`ExportError::Cancelled`]
    /// and leaves no files behind
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    /// Wait for the export to finish
    pub async fn join(mut self) -> Result<EncodedArtifact, ExportError> {
        let result = (&mut self.result).await.unwrap_or_else(|_| {
            Err(ExportError::Encoding(
                "Export thread exited without a result".to_string(),
            ))
        });
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }
}

/// `<stem>_video.mp4` and `<stem>.mp4` next to the recording
fn output_paths(audio: &Path) -> (PathBuf, PathBuf) {
    let dir = audio.parent().unwrap_or_else(|| Path::new("."));
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "export".to_string());
    (
        fresh_file_path(dir, &format!("{}_video", stem), "mp4"),
        fresh_file_path(dir, &stem, "mp4"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::encoder::tests::{write_wav, FakeFactory};
    use crate::export::encoder::VideoSink;
    use crate::export::mux::tests::FakeMux;
    use crate::export::mux::MuxStrategy;
    use crate::export::types::{Aspect, ExportRequest, ExportStage, Theme, Visualization};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct FakeTools {
        sinks: FakeFactory,
        mux: FakeMux,
    }

    impl SinkFactory for FakeTools {
        fn open_sink(&self, output: &Path, job: &ExportJob) -> Result<Box<dyn VideoSink>, ExportError> {
            self.sinks.open_sink(output, job)
        }
    }

    #[async_trait]
    impl MuxBackend for FakeTools {
        async fn mux(&self, request: &MuxRequest, strategy: MuxStrategy) -> Result<(), ExportError> {
            self.mux.mux(request, strategy).await
        }
    }

    fn small_job(audio: &Path) -> ExportJob {
        let request = ExportRequest::video(Theme::Dark, Visualization::Waveform, Aspect::Square);
        let mut job = ExportJob::new(audio, &request, 24);
        job.width = 48;
        job.height = 48;
        job
    }

    #[tokio::test]
    async fn test_pipeline_merges_and_cleans_up() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("Scopecast_1.wav");
        write_wav(&audio, 1.0, 8000);

        let tools = Arc::new(FakeTools {
            sinks: FakeFactory::new(4),
            mux: FakeMux::new(vec![MuxStrategy::CopyVideo]),
        });
        let pipeline = ExportPipeline::new(small_job(&audio), tools.clone(), Arc::new(AtomicBool::new(false)));

        let stages = Mutex::new(Vec::new());
        let artifact = pipeline.run(|p| stages.lock().push(p.stage)).await.unwrap();

        assert_eq!(artifact.audio_path, audio);
        assert_eq!(artifact.video_path, dir.path().join("Scopecast_1_video.mp4"));
        assert_eq!(artifact.merged_path, Some(dir.path().join("Scopecast_1.mp4")));
        assert!(!artifact.video_path.exists());
        assert!(audio.exists());
        assert_eq!(tools.sinks.log.lock().pts.len(), 24);

        let stages = stages.into_inner();
        assert_eq!(stages.first(), Some(&ExportStage::Preparing));
        assert!(stages.contains(&ExportStage::Merging));
        assert_eq!(stages.last(), Some(&ExportStage::Complete));
    }

    #[tokio::test]
    async fn test_merge_gets_full_recording_and_every_planned_frame() {
        use crate::export::timing::{FramePlan, Timestamp};

        let dir = tempdir().unwrap();
        let audio = dir.path().join("odd.wav");
        // Not a whole number of video frames long
        write_wav(&audio, 1.03, 8000);
        let recorded = AudioSource::open(&audio).unwrap().frames();
        let plan = FramePlan::new(recorded, 8000, 24);
        assert_eq!(plan.total_frames(), 25);

        let tools = Arc::new(FakeTools {
            sinks: FakeFactory::new(4),
            mux: FakeMux::new(vec![MuxStrategy::CopyVideo]),
        });
        let pipeline = ExportPipeline::new(small_job(&audio), tools.clone(), Arc::new(AtomicBool::new(false)));
        pipeline.run(|_| {}).await.unwrap();

        let pts = tools.sinks.log.lock().pts.clone();
        assert_eq!(pts.len() as u64, plan.total_frames());
        assert_eq!(pts.last(), Some(&Timestamp::new(24, 24)));

        let requests = tools.mux.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].audio, audio);
        assert_eq!(requests[0].video, dir.path().join("odd_video.mp4"));
        // The merge sees the untouched recording, not a trimmed copy
        assert_eq!(AudioSource::open(&requests[0].audio).unwrap().frames(), recorded);
    }

    #[tokio::test]
    async fn test_mux_failure_reports_merge_error() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("take.wav");
        write_wav(&audio, 0.5, 8000);

        let tools = Arc::new(FakeTools {
            sinks: FakeFactory::new(4),
            mux: FakeMux::new(vec![]),
        });
        let pipeline = ExportPipeline::new(small_job(&audio), tools, Arc::new(AtomicBool::new(false)));

        let result = pipeline.run(|_| {}).await;
        assert!(matches!(result, Err(ExportError::Merge(_))));
        assert!(audio.exists());
        assert!(!dir.path().join("take_video.mp4").exists());
        assert!(!dir.path().join("take.mp4").exists());
    }

    #[tokio::test]
    async fn test_encode_failure_skips_merge() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("take.wav");
        write_wav(&audio, 0.5, 8000);

        let mut sinks = FakeFactory::new(4);
        sinks.fail_finish = true;
        let tools = Arc::new(FakeTools {
            sinks,
            mux: FakeMux::new(vec![MuxStrategy::CopyVideo]),
        });
        let pipeline = ExportPipeline::new(small_job(&audio), tools.clone(), Arc::new(AtomicBool::new(false)));

        let last = Mutex::new(None);
        let result = pipeline.run(|p| *last.lock() = Some(p.stage)).await;
        assert!(result.is_err());
        assert!(tools.mux.attempts.lock().is_empty());
        assert!(!dir.path().join("take_video.mp4").exists());
        assert!(matches!(last.into_inner(), Some(ExportStage::Error { .. })));
    }

    #[tokio::test]
    async fn test_empty_recording_is_rejected() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("empty.wav");
        write_wav(&audio, 0.0, 8000);

        let tools = Arc::new(FakeTools {
            sinks: FakeFactory::new(4),
            mux: FakeMux::new(vec![MuxStrategy::CopyVideo]),
        });
        let pipeline = ExportPipeline::new(small_job(&audio), tools, Arc::new(AtomicBool::new(false)));
        assert!(matches!(
            pipeline.run(|_| {}).await,
            Err(ExportError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_spawned_export_runs_off_thread() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("take.wav");
        write_wav(&audio, 0.5, 8000);

        let tools = Arc::new(FakeTools {
            sinks: FakeFactory::new(4),
            mux: FakeMux::new(vec![MuxStrategy::CopyVideo]),
        });
        let pipeline = ExportPipeline::new(small_job(&audio), tools, Arc::new(AtomicBool::new(false)));

        let caller = std::thread::current().id();
        let handle = pipeline
            .spawn(move |_| assert_ne!(std::thread::current().id(), caller))
            .unwrap();
        let artifact = handle.join().await.unwrap();
        assert!(artifact.merged_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("take.wav");
        write_wav(&audio, 0.5, 8000);

        let tools = Arc::new(FakeTools {
            sinks: FakeFactory::new(4),
            mux: FakeMux::new(vec![MuxStrategy::CopyVideo]),
        });
        let pipeline = ExportPipeline::new(small_job(&audio), tools, Arc::new(AtomicBool::new(false)));
        let handle = pipeline.spawn(|_| {}).unwrap();
        handle.cancel();
        // Either the cancel landed or the short export finished first
        match handle.join().await {
            Err(ExportError::Cancelled) => {
                assert!(!dir.path().join("take_video.mp4").exists());
                assert!(!dir.path().join("take.mp4").exists());
            }
            Ok(artifact) => assert!(artifact.merged_path.is_some()),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}
