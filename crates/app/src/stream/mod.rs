//! Live video feed pipeline: capture frames, annotate them, and expose the
//! result as an MJPEG stream over HTTP.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `producer`: Capture → annotate → publish loop and its supervisor.
//! - `slot`: Single-slot holder for the most recently published frame.
//! - `annotate`: Annotator seam and overlay drawing primitives.
//! - `encode`: Per-session JPEG encoding and multipart framing.
//! - `server`: Actix Web stream endpoints.
//! - `watchdog`: Health monitoring for pipeline stages.
//! - `telemetry`: Tracing and metrics plumbing.
//! - `data`: Shared structs passed between stages.

/// Re-export settings so `main` can configure runs without reaching into
/// submodules.
pub use config::{SourceKind, StreamConfig};
/// Launch the stream pipeline with a ready-made configuration.
pub use producer::run;

mod annotate;
mod config;
mod data;
mod encode;
mod producer;
mod server;
mod slot;
mod telemetry;
mod watchdog;
