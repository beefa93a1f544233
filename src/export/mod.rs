//! Export module
//!
//! Offline rendering of a finished recording into a video with the audio
//! visualization drawn over it, merged with the full-length audio.

pub mod canvas;
pub mod encoder;
pub mod ffmpeg;
pub mod frame;
pub mod mux;
pub mod pipeline;
pub mod pixel;
pub mod timing;
pub mod types;

pub use canvas::{Color, FrameImage};
pub use encoder::{EncoderState, SinkFactory, VideoEncoder, VideoSink};
pub use ffmpeg::FfmpegTools;
pub use frame::FrameRenderer;
pub use mux::{MuxBackend, MuxOutcome, MuxRequest, MuxStrategy, Multiplexer};
pub use pipeline::{ExportHandle, ExportPipeline, ExportTools};
pub use pixel::{PixelBuffer, PixelBufferPool, PixelFormat};
pub use timing::{FrameDescriptor, FramePlan, Timestamp};
pub use types::{
    Aspect, EncodedArtifact, ExportError, ExportJob, ExportProgress, ExportRequest, ExportStage,
    Theme, Visualization,
};
