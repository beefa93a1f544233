//! Merging the finished video with the full-length audio

use super::types::ExportError;
use crate::utils::fs::remove_file_quietly;
use async_trait::async_trait;
use std::path::PathBuf;

/// Inputs and output of one merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxRequest {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
}

/// How the video stream is carried into the merged file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxStrategy {
    /// Stream copy; no quality loss
    CopyVideo,
    /// Re-encode the video, for inputs the container rejects as-is
    Reencode,
}

/// Does the actual merge
#[async_trait]
pub trait MuxBackend: Send + Sync {
    async fn mux(&self, request: &MuxRequest, strategy: MuxStrategy) -> Result<(), ExportError>;
}

/// Result of a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxOutcome {
    /// The merged file; the standalone video is gone
    Merged(PathBuf),
    /// Merging failed; the recorded audio is the deliverable
    Degraded { audio: PathBuf, reason: String },
}

/// Merges with stream copy first and falls back to re-encoding
pub struct Multiplexer<'a, B: MuxBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: MuxBackend + ?Sized> Multiplexer<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Merge `request.video` and `request.audio` into `request.output`.
    ///
    /// Either way the standalone video is deleted afterwards and no
    /// partial merged file is left behind.
    pub async fn merge(&self, request: &MuxRequest) -> MuxOutcome {
        let _ = remove_file_quietly(&request.output);

        let mut reason = String::new();
        for strategy in [MuxStrategy::CopyVideo, MuxStrategy::Reencode] {
            match self.backend.mux(request, strategy).await {
                Ok(()) => {
                    if let Err(e) = remove_file_quietly(&request.video) {
                        tracing::warn!("Could not delete {:?}: {}", request.video, e);
                    }
                    tracing::info!("Merged video and audio into {:?}", request.output);
                    return MuxOutcome::Merged(request.output.clone());
                }
                Err(e) => {
                    tracing::warn!("Merge with {:?} failed: {}", strategy, e);
                    let _ = remove_file_quietly(&request.output);
                    reason = e.to_string();
                }
            }
        }

        tracing::error!("Merge failed, delivering audio only: {}", reason);
        let _ = remove_file_quietly(&request.video);
        MuxOutcome::Degraded {
            audio: request.audio.clone(),
            reason,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    /// Writes the output for strategies in `succeed_with`, fails otherwise
    pub(crate) struct FakeMux {
        pub succeed_with: Vec<MuxStrategy>,
        pub attempts: Mutex<Vec<MuxStrategy>>,
        pub requests: Mutex<Vec<MuxRequest>>,
    }

    impl FakeMux {
        pub fn new(succeed_with: Vec<MuxStrategy>) -> Self {
            Self {
                succeed_with,
                attempts: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MuxBackend for FakeMux {
        async fn mux(&self, request: &MuxRequest, strategy: MuxStrategy) -> Result<(), ExportError> {
            self.attempts.lock().push(strategy);
            self.requests.lock().push(request.clone());
            // Leave a partial file behind either way
            std::fs::write(&request.output, b"merged")?;
            if self.succeed_with.contains(&strategy) {
                Ok(())
            } else {
                Err(ExportError::Merge(format!("{:?} rejected", strategy)))
            }
        }
    }

    fn request(dir: &std::path::Path) -> MuxRequest {
        let request = MuxRequest {
            video: dir.join("take_video.mp4"),
            audio: dir.join("take.wav"),
            output: dir.join("take.mp4"),
        };
        std::fs::write(&request.video, b"video").unwrap();
        std::fs::write(&request.audio, b"audio").unwrap();
        request
    }

    #[tokio::test]
    async fn test_merge_success_removes_video() {
        let dir = tempdir().unwrap();
        let request = request(dir.path());
        let backend = FakeMux::new(vec![MuxStrategy::CopyVideo]);

        let outcome = Multiplexer::new(&backend).merge(&request).await;
        assert_eq!(outcome, MuxOutcome::Merged(request.output.clone()));
        assert!(request.output.exists());
        assert!(!request.video.exists());
        assert!(request.audio.exists());
        assert_eq!(*backend.attempts.lock(), vec![MuxStrategy::CopyVideo]);
    }

    #[tokio::test]
    async fn test_merge_falls_back_to_reencode() {
        let dir = tempdir().unwrap();
        let request = request(dir.path());
        let backend = FakeMux::new(vec![MuxStrategy::Reencode]);

        let outcome = Multiplexer::new(&backend).merge(&request).await;
        assert_eq!(outcome, MuxOutcome::Merged(request.output.clone()));
        assert_eq!(
            *backend.attempts.lock(),
            vec![MuxStrategy::CopyVideo, MuxStrategy::Reencode]
        );
    }

    #[tokio::test]
    async fn test_merge_failure_returns_audio() {
        let dir = tempdir().unwrap();
        let request = request(dir.path());
        let backend = FakeMux::new(vec![]);

        let outcome = Multiplexer::new(&backend).merge(&request).await;
        match outcome {
            MuxOutcome::Degraded { audio, reason } => {
                assert_eq!(audio, request.audio);
                assert!(reason.contains("Reencode"));
            }
            other => panic!("expected degraded outcome, got {:?}", other),
        }
        assert!(request.audio.exists());
        assert!(!request.output.exists());
        assert!(!request.video.exists());
    }
}
