//! Capture sources for the roadcam stream pipeline.
//!
//! Every source runs its capture loop on a background thread and hands
//! frames downstream over a small bounded channel, so a stalled consumer
//! backpressures the decoder instead of growing a queue.

pub use ffmpeg::spawn_ffmpeg_reader;
pub use synthetic::{render_pattern, spawn_synthetic_reader};
pub use types::{CaptureError, Frame, FrameFormat};

mod ffmpeg;
mod synthetic;
mod types;
