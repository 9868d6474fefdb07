//! Castkit Render Engine
//!
//! Turns a primary recording and an optional webcam recording into one
//! composited, encoded video.
//!
//! # Pipeline Architecture
//!
//! ```text
//! primary source ──┐
//!                  ├── FrameCompositor (background, padding, shadow,
//! webcam source ───┘         │          rounded clip, overlay)
//!                            ▼
//!                   FrameEncoder (VP9/WebM)
//!                            │
//!                            ▼
//!             ContainerTranscoder (optional, falls back)
//!                            │
//!                            ▼
//!                      EncodedOutput
//! ```
//!
//! [`CaptureEncoder`] owns the loop that drives sampling at a fixed frame
//! rate.

pub mod capture;
pub mod compositor;
pub mod encoder;
pub mod ffmpeg;
pub mod source;
pub mod transcode;

pub use capture::*;
pub use compositor::{compose_frame, FrameCompositor};
pub use encoder::{EncodeError, EncoderParams, FfmpegEncoder, FrameEncoder, FrameTimeline};
pub use source::{FfmpegSource, MediaError, MediaSource, SourceInfo, SourceSample, StillImageSource};
pub use transcode::{
    transcode_with_fallback, ContainerTranscoder, FfmpegTranscoder, TranscodeError,
    TranscodeOutcome,
};
