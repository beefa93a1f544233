//! Audio capture to disk
//!
//! A tap on the engine output appends every block to a WAV file. Writes run
//! synchronously on the audio thread; a failed write tears the session down
//! on the spot instead of retrying, since the stream cannot be replayed.

use super::traits::{
    AudioBlock, AudioEngine, AudioFormat, CaptureError, CaptureResult, TapId,
};
use crate::recorder::state::RecordingEvent;
use crate::utils::fs::{fresh_file_path, remove_file_quietly, timestamped_stem};
use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Destination for captured blocks
pub trait BlockWriter: Send {
    /// Append one block
    fn write_block(&mut self, block: AudioBlock<'_>) -> CaptureResult<()>;

    /// Flush and close the container
    fn finalize(self: Box<Self>) -> CaptureResult<()>;
}

/// Opens a writer for a new recording file
pub type WriterFactory =
    Arc<dyn Fn(&Path, AudioFormat) -> CaptureResult<Box<dyn BlockWriter>> + Send + Sync>;

/// 32-bit float WAV writer, at most two channels
pub struct WavBlockWriter {
    writer: WavWriter<BufWriter<File>>,
    channels: usize,
}

impl WavBlockWriter {
    pub fn create(path: &Path, format: AudioFormat) -> CaptureResult<Self> {
        let spec = WavSpec {
            channels: format.persisted_channels(),
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self {
            writer,
            channels: spec.channels as usize,
        })
    }

    /// Factory producing WAV writers
    pub fn factory() -> WriterFactory {
        Arc::new(|path: &Path, format: AudioFormat| -> CaptureResult<Box<dyn BlockWriter>> {
            let writer = WavBlockWriter::create(path, format)?;
            Ok(Box::new(writer) as Box<dyn BlockWriter>)
        })
    }
}

impl BlockWriter for WavBlockWriter {
    fn write_block(&mut self, block: AudioBlock<'_>) -> CaptureResult<()> {
        for frame in 0..block.frames() {
            for channel in 0..self.channels {
                self.writer.write_sample(block.sample(channel, frame))?;
            }
        }
        Ok(())
    }

    fn finalize(self: Box<Self>) -> CaptureResult<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

/// State of one recording, alive from start until stop or failure
#[derive(Debug, Clone)]
pub struct AudioCaptureSession {
    pub recording: bool,
    pub file_path: PathBuf,
    pub format: AudioFormat,
    pub started_at: DateTime<Utc>,
}

/// A recording that was stopped cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub frames: u64,
}

/// State shared between the tap callback and the owning capture
struct TapTarget {
    writer: Mutex<Option<Box<dyn BlockWriter>>>,
    failed: AtomicBool,
    failure: Mutex<Option<String>>,
    frames: AtomicU64,
    path: PathBuf,
    events: broadcast::Sender<RecordingEvent>,
}

impl TapTarget {
    fn append(&self, block: AudioBlock<'_>) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }

        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return;
        };

        match writer.write_block(block) {
            Ok(()) => {
                self.frames.fetch_add(block.frames() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                // Drop the handle before deleting the file under it
                guard.take();
                drop(guard);
                self.fail(format!("Audio file could not be written to: {}", e));
            }
        }
    }

    fn fail(&self, reason: String) {
        if self.failed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::error!("Recording failed: {}", reason);
        let _ = remove_file_quietly(&self.path);
        *self.failure.lock() = Some(reason.clone());
        let _ = self.events.send(RecordingEvent::Failed(reason));
    }
}

struct ActiveCapture {
    session: AudioCaptureSession,
    tap: TapId,
    target: Arc<TapTarget>,
}

/// Records the engine output to timestamped files
pub struct AudioCapture {
    engine: Arc<dyn AudioEngine>,
    recordings_dir: PathBuf,
    file_prefix: String,
    writer_factory: WriterFactory,
    events: broadcast::Sender<RecordingEvent>,
    active: Option<ActiveCapture>,
}

impl AudioCapture {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        recordings_dir: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
        events: broadcast::Sender<RecordingEvent>,
    ) -> Self {
        Self {
            engine,
            recordings_dir: recordings_dir.into(),
            file_prefix: file_prefix.into(),
            writer_factory: WavBlockWriter::factory(),
            events,
            active: None,
        }
    }

    /// Replace the writer used for new recordings
    pub fn with_writer_factory(mut self, factory: WriterFactory) -> Self {
        self.writer_factory = factory;
        self
    }

    /// Current session, if recording
    pub fn session(&self) -> Option<&AudioCaptureSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn is_recording(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.session.recording && !a.target.failed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Whether the active session hit a write failure
    pub fn has_failed(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| a.target.failed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Open a fresh file and start forwarding engine output into it
    pub fn start(&mut self) -> CaptureResult<&AudioCaptureSession> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        std::fs::create_dir_all(&self.recordings_dir)?;
        let format = self.engine.format();
        let stem = timestamped_stem(&self.file_prefix);
        let path = fresh_file_path(&self.recordings_dir, &stem, "wav");

        let writer = (self.writer_factory)(&path, format)?;
        let target = Arc::new(TapTarget {
            writer: Mutex::new(Some(writer)),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            frames: AtomicU64::new(0),
            path: path.clone(),
            events: self.events.clone(),
        });

        let tap_target = target.clone();
        let tap = match self
            .engine
            .install_tap(Box::new(move |block| tap_target.append(block)))
        {
            Ok(tap) => tap,
            Err(e) => {
                target.writer.lock().take();
                let _ = remove_file_quietly(&path);
                return Err(e);
            }
        };

        tracing::info!("Recording started: {:?}", path);
        let session = AudioCaptureSession {
            recording: true,
            file_path: path,
            format,
            started_at: Utc::now(),
        };
        let active = self.active.insert(ActiveCapture {
            session,
            tap,
            target,
        });
        Ok(&active.session)
    }

    /// Stop recording. The tap is removed before anything else happens, so
    /// nothing is written after this call begins tearing down.
    pub fn stop(&mut self) -> CaptureResult<CapturedAudio> {
        let active = self.active.take().ok_or(CaptureError::NotRecording)?;
        self.engine.remove_tap(active.tap);
        tracing::info!("Recording stopped");

        let target = active.target;
        let writer = target.writer.lock().take();

        if target.failed.load(Ordering::Acquire) {
            let reason = target
                .failure
                .lock()
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(CaptureError::WriteFailed(reason));
        }

        let Some(writer) = writer else {
            return Err(CaptureError::WriteFailed(
                "Audio file was closed before stop".to_string(),
            ));
        };

        if let Err(e) = writer.finalize() {
            tracing::error!("Failed to finalize {:?}: {}", target.path, e);
            let _ = remove_file_quietly(&target.path);
            return Err(e);
        }

        let format = AudioFormat::new(
            active.session.format.sample_rate,
            active.session.format.persisted_channels(),
        );
        Ok(CapturedAudio {
            path: target.path.clone(),
            format,
            frames: target.frames.load(Ordering::Relaxed),
        })
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.engine.remove_tap(active.tap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PushEngine;
    use std::io;
    use tempfile::tempdir;

    /// Writes raw bytes to the file, failing once `fail_after` blocks went through
    struct FlakyWriter {
        file: File,
        written: usize,
        fail_after: usize,
    }

    impl BlockWriter for FlakyWriter {
        fn write_block(&mut self, block: AudioBlock<'_>) -> CaptureResult<()> {
            use std::io::Write;
            if self.written >= self.fail_after {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full").into());
            }
            for frame in 0..block.frames() {
                self.file.write_all(&block.sample(0, frame).to_le_bytes())?;
            }
            self.written += 1;
            Ok(())
        }

        fn finalize(self: Box<Self>) -> CaptureResult<()> {
            Ok(())
        }
    }

    fn stereo_block(samples: &[f32]) -> AudioBlock<'_> {
        AudioBlock::Interleaved {
            samples,
            channels: 2,
        }
    }

    #[test]
    fn test_records_wav_file() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(PushEngine::new(AudioFormat::new(48_000, 2)));
        let (tx, _rx) = broadcast::channel(16);
        let mut capture = AudioCapture::new(engine.clone(), dir.path(), "Take", tx);

        let path = capture.start().unwrap().file_path.clone();
        assert!(capture.is_recording());

        let samples: Vec<f32> = (0..512).map(|i| (i as f32 / 512.0) - 0.5).collect();
        for _ in 0..4 {
            engine.deliver(stereo_block(&samples));
        }

        let captured = capture.stop().unwrap();
        assert_eq!(captured.path, path);
        assert_eq!(captured.frames, 4 * 256);
        assert_eq!(engine.tap_count(), 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 4 * 256);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(PushEngine::default());
        let (tx, _rx) = broadcast::channel(16);
        let mut capture = AudioCapture::new(engine, dir.path(), "Take", tx);

        capture.start().unwrap();
        assert!(matches!(capture.start(), Err(CaptureError::AlreadyRecording)));
    }

    #[test]
    fn test_stop_without_start() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(PushEngine::default());
        let (tx, _rx) = broadcast::channel(16);
        let mut capture = AudioCapture::new(engine, dir.path(), "Take", tx);
        assert!(matches!(capture.stop(), Err(CaptureError::NotRecording)));
    }

    #[test]
    fn test_no_writes_after_stop() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(PushEngine::default());
        let (tx, _rx) = broadcast::channel(16);
        let mut capture = AudioCapture::new(engine.clone(), dir.path(), "Take", tx);

        capture.start().unwrap();
        let samples = [0.25f32; 64];
        engine.deliver(stereo_block(&samples));
        let captured = capture.stop().unwrap();

        engine.deliver(stereo_block(&samples));
        let reader = hound::WavReader::open(&captured.path).unwrap();
        assert_eq!(reader.duration(), 32);
    }

    #[test]
    fn test_write_failure_deletes_file_and_notifies_once() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(PushEngine::default());
        let (tx, mut rx) = broadcast::channel(16);
        let factory: WriterFactory = Arc::new(|path: &Path, _format: AudioFormat| -> CaptureResult<Box<dyn BlockWriter>> {
            let file = File::create(path)?;
            Ok(Box::new(FlakyWriter {
                file,
                written: 0,
                fail_after: 2,
            }) as Box<dyn BlockWriter>)
        });
        let mut capture =
            AudioCapture::new(engine.clone(), dir.path(), "Take", tx).with_writer_factory(factory);

        let path = capture.start().unwrap().file_path.clone();
        assert!(path.exists());

        let samples = [0.5f32; 128];
        for _ in 0..5 {
            engine.deliver(stereo_block(&samples));
        }

        assert!(capture.has_failed());
        assert!(!capture.is_recording());
        assert!(!path.exists());

        let stopped = capture.stop();
        assert!(matches!(stopped, Err(CaptureError::WriteFailed(_))));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(matches!(rx.try_recv(), Ok(RecordingEvent::Failed(_))));
        assert!(rx.try_recv().is_err());
    }
}
