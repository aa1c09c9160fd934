//! E-Challan Stream: frame sources and the stream orchestrator
//!
//! Sources (still image, frame directory, video file, live camera, network
//! stream) feed
//! the [`StreamOrchestrator`], which samples frames by stride, runs them
//! through the frame processor and hands the candidates to the challan
//! manager. The `echallan` binary wires all of it from a YAML config.

pub mod capture;
pub mod config;
pub mod grabber;
pub mod metrics;
pub mod orchestrator;
pub mod source;

pub use capture::CaptureSession;
pub use config::{ChallanConfig, LocationConfig, PipelineConfig, StoreConfig, StreamConfig};
pub use grabber::{
    DirectoryGrabber, FfmpegGrabber, FfmpegInput, FfmpegVideoReader, FrameGrabber, MemoryGrabber,
};
pub use metrics::StreamMetrics;
pub use orchestrator::{EndReason, StopHandle, StreamOrchestrator, StreamReport, StreamStats};
pub use source::{
    FrameSource, ImageSource, LiveSource, NetworkSource, SequenceSource, SourceKind, VideoSource,
};
