use serde::Serialize;

use video_ingest::FrameFormat;

/// Annotated frame as published into the shared slot. Immutable once
/// published; sessions share it behind an `Arc`.
pub(crate) struct StreamFrame {
    pub(crate) seq: u64,
    pub(crate) pixels: Vec<u8>,
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) format: FrameFormat,
    pub(crate) timestamp_ms: i64,
    pub(crate) fps: f32,
}

/// Snapshot served by `GET /status`.
#[derive(Serialize)]
pub(crate) struct StatusResponse {
    pub(crate) latest_seq: Option<u64>,
    pub(crate) timestamp_ms: Option<i64>,
    pub(crate) fps: f32,
    pub(crate) live_sessions: usize,
    pub(crate) max_sessions: usize,
}
