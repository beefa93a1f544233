//! FFmpeg-backed video sink, multiplexer and probe
//!
//! Frames are piped to an `ffmpeg` child as raw video on stdin. A bounded
//! channel sits between the encoder and the blocking writer thread; its
//! free capacity is the sink's readiness signal.

use super::encoder::{SinkFactory, VideoSink};
use super::mux::{MuxBackend, MuxRequest, MuxStrategy};
use super::pixel::{PixelBuffer, PixelFormat};
use super::timing::Timestamp;
use super::types::{ExportError, ExportJob};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Locations of the ffmpeg binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    queue_depth: usize,
}

impl FfmpegTools {
    /// `queue_depth` bounds the frames waiting to be piped to ffmpeg
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, queue_depth: usize) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// Duration of a media file in seconds
    pub async fn probe_duration(&self, path: &Path) -> Result<f64, ExportError> {
        let text = self
            .probe(path, "format=duration", "default=noprint_wrappers=1:nokey=1")
            .await?;
        parse_seconds(text.trim())
    }

    /// `(codec_type, duration)` of every stream in a media file
    pub async fn probe_stream_durations(&self, path: &Path) -> Result<Vec<(String, f64)>, ExportError> {
        let text = self
            .probe(path, "stream=codec_type,duration", "csv=p=0")
            .await?;
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once(',') {
                Some((kind, seconds)) => Ok((kind.to_string(), parse_seconds(seconds)?)),
                None => Err(ExportError::Decoding(format!(
                    "Unexpected ffprobe stream line {:?}",
                    line
                ))),
            })
            .collect()
    }

    async fn probe(&self, path: &Path, entries: &str, format: &str) -> Result<String, ExportError> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", entries, "-of", format])
            .arg(path)
            .output()
            .await
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(ExportError::Ffmpeg(format!(
                "ffprobe failed on {:?}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn parse_seconds(text: &str) -> Result<f64, ExportError> {
    text.trim()
        .parse::<f64>()
        .map_err(|e| ExportError::Decoding(format!("Unexpected ffprobe output {:?}: {}", text, e)))
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe", 4)
    }
}

/// Arguments encoding raw frames from stdin to H.264
pub fn video_args(job: &ExportJob, format: PixelFormat, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        format.ffmpeg_name().to_string(),
        "-s".to_string(),
        format!("{}x{}", job.width, job.height),
        "-r".to_string(),
        job.frame_rate_hz.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-crf".to_string(),
        "18".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Arguments merging the first video and first audio stream, each from
/// time zero for its full length
pub fn mux_args(request: &MuxRequest, strategy: MuxStrategy) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        request.video.to_string_lossy().to_string(),
        "-i".to_string(),
        request.audio.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
    ];

    match strategy {
        MuxStrategy::CopyVideo => {
            args.extend(["-c:v".to_string(), "copy".to_string()]);
        }
        MuxStrategy::Reencode => {
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "slow".to_string(),
                "-crf".to_string(),
                "16".to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
            ]);
        }
    }

    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "320k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        request.output.to_string_lossy().to_string(),
    ]);
    args
}

impl SinkFactory for FfmpegTools {
    fn open_sink(&self, output: &Path, job: &ExportJob) -> Result<Box<dyn VideoSink>, ExportError> {
        let format = PixelFormat::Argb;
        let args = video_args(job, format, output);
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let mut stdin = process
            .stdin
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<PixelBuffer>(self.queue_depth);
        let writer = tokio::task::spawn_blocking(move || -> Result<u64, ExportError> {
            let mut written = 0u64;
            while let Some(buffer) = rx.blocking_recv() {
                stdin
                    .write_all(buffer.data())
                    .map_err(|e| ExportError::Encoding(format!("Failed to write frame: {}", e)))?;
                written += 1;
            }
            // Closing stdin signals EOF to FFmpeg
            drop(stdin);
            Ok(written)
        });

        Ok(Box::new(FfmpegVideoSink {
            format,
            tx: Some(tx),
            writer: Some(writer),
            process: Some(process),
            next_pts: Timestamp::zero(job.frame_rate_hz),
        }))
    }
}

/// Video track written by an ffmpeg child process
pub struct FfmpegVideoSink {
    format: PixelFormat,
    tx: Option<mpsc::Sender<PixelBuffer>>,
    writer: Option<JoinHandle<Result<u64, ExportError>>>,
    process: Option<Child>,
    next_pts: Timestamp,
}

impl FfmpegVideoSink {
    fn sender(&self) -> Result<&mpsc::Sender<PixelBuffer>, ExportError> {
        self.tx
            .as_ref()
            .ok_or_else(|| ExportError::Encoding("Video track already finished".to_string()))
    }

    /// The writer thread only hangs up early when writing failed
    async fn writer_error(&mut self) -> ExportError {
        match self.writer.take() {
            Some(handle) => match handle.await {
                Ok(Err(e)) => e,
                Ok(Ok(_)) => ExportError::Encoding("FFmpeg stopped accepting frames".to_string()),
                Err(e) => ExportError::Encoding(format!("Frame writer panicked: {}", e)),
            },
            None => ExportError::Encoding("FFmpeg stopped accepting frames".to_string()),
        }
    }
}

#[async_trait]
impl VideoSink for FfmpegVideoSink {
    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    async fn ready(&mut self) -> Result<usize, ExportError> {
        let tx = self.sender()?.clone();
        match tx.reserve().await {
            Ok(permit) => drop(permit),
            Err(_) => return Err(self.writer_error().await),
        }
        Ok(tx.capacity().max(1))
    }

    async fn append(&mut self, buffer: PixelBuffer, pts: Timestamp) -> Result<(), ExportError> {
        // Raw video carries no timestamps; frames must arrive gap-free
        if pts != self.next_pts {
            return Err(ExportError::Encoding(format!(
                "Frame at {:?} out of sequence, expected {:?}",
                pts, self.next_pts
            )));
        }
        let tx = self.sender()?.clone();
        if tx.send(buffer).await.is_err() {
            return Err(self.writer_error().await);
        }
        self.next_pts = self.next_pts.next();
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), ExportError> {
        self.tx = None;
        let written = match self.writer.take() {
            Some(handle) => handle
                .await
                .map_err(|e| ExportError::Encoding(format!("Frame writer panicked: {}", e)))??,
            None => 0,
        };

        let process = self
            .process
            .take()
            .ok_or_else(|| ExportError::Ffmpeg("FFmpeg process already reaped".to_string()))?;
        let output = tokio::task::spawn_blocking(move || process.wait_with_output())
            .await
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExportError::Ffmpeg(format!(
                "FFmpeg exited with error: {}",
                stderr.trim()
            )));
        }

        tracing::info!("FFmpeg encoder finished: {} frames written", written);
        Ok(())
    }
}

impl Drop for FfmpegVideoSink {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

#[async_trait]
impl MuxBackend for FfmpegTools {
    async fn mux(&self, request: &MuxRequest, strategy: MuxStrategy) -> Result<(), ExportError> {
        let args = mux_args(request, strategy);
        tracing::info!("Starting FFmpeg merge ({:?}): {:?}", strategy, args);

        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg merge: {}", e)))?;

        if !output.status.success() {
            return Err(ExportError::Merge(format!(
                "FFmpeg exited with error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::types::{Aspect, ExportRequest, Theme, Visualization};

    fn job() -> ExportJob {
        let request = ExportRequest::video(Theme::Dark, Visualization::Waveform, Aspect::Portrait);
        ExportJob::new(Path::new("/tmp/take.wav"), &request, 24)
    }

    #[test]
    fn test_video_args() {
        let args = video_args(&job(), PixelFormat::Argb, Path::new("/tmp/out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt argb -s 1080x1920 -r 24 -i -"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_mux_args_copy_video() {
        let request = MuxRequest {
            video: PathBuf::from("/tmp/v.mp4"),
            audio: PathBuf::from("/tmp/a.wav"),
            output: PathBuf::from("/tmp/o.mp4"),
        };
        let joined = mux_args(&request, MuxStrategy::CopyVideo).join(" ");
        assert!(joined.contains("-i /tmp/v.mp4 -i /tmp/a.wav"));
        assert!(joined.contains("-map 0:v:0 -map 1:a:0"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a aac"));
        assert!(!joined.contains("-shortest"));
    }

    #[test]
    fn test_mux_args_reencode() {
        let request = MuxRequest {
            video: PathBuf::from("v.mp4"),
            audio: PathBuf::from("a.wav"),
            output: PathBuf::from("o.mp4"),
        };
        let joined = mux_args(&request, MuxStrategy::Reencode).join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(!joined.contains("-c:v copy"));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg on PATH"]
    async fn test_ffmpeg_export_end_to_end() {
        use crate::export::encoder::tests::write_wav;
        use crate::export::pipeline::ExportPipeline;
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("take.wav");
        // 95.5 video frames of audio: the video ends on frame 96
        write_wav(&audio, 3.98, 48_000);

        let tools = Arc::new(FfmpegTools::default());
        let request = ExportRequest::video(Theme::Dark, Visualization::Lissajous, Aspect::Square);
        let job = ExportJob::new(&audio, &request, 24);
        let pipeline = ExportPipeline::new(job, tools.clone(), Arc::new(AtomicBool::new(false)));

        let artifact = pipeline.run(|_| {}).await.unwrap();
        let merged = artifact.merged_path.unwrap();
        assert!(merged.exists());
        assert!(!artifact.video_path.exists());

        let streams = tools.probe_stream_durations(&merged).await.unwrap();
        let duration_of = |kind: &str| {
            streams
                .iter()
                .find(|(k, _)| k == kind)
                .map(|(_, d)| *d)
                .unwrap_or_else(|| panic!("no {} stream in {:?}", kind, streams))
        };
        let video = duration_of("video");
        let audio_track = duration_of("audio");
        assert!((video - 96.0 / 24.0).abs() < 0.02, "video {}", video);
        assert!((audio_track - 3.98).abs() < 0.05, "audio {}", audio_track);

        let duration = tools.probe_duration(&merged).await.unwrap();
        assert!(duration >= video.max(audio_track) - 0.05, "duration {}", duration);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds(" 2.500000\n").unwrap(), 2.5);
        assert!(matches!(parse_seconds("N/A"), Err(ExportError::Decoding(_))));
    }
}
