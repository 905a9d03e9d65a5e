//! Pipeline supervisor and the single frame producer loop.
//!
//! The supervisor wires the capture source, annotator, shared slot, and
//! stream server together, and restarts the capture/publish attempt when the
//! watchdog reports a stall. The slot and the HTTP server are created once
//! and survive restarts, so connected clients only ever drop on their own
//! disconnect.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, warn};

use video_ingest::{CaptureError, Frame};

use crate::stream::{
    annotate::{self, Annotate},
    config::{SourceKind, StreamConfig},
    data::StreamFrame,
    server::spawn_stream_server,
    slot::FrameSlot,
    telemetry,
    watchdog::{HealthComponent, PipelineHealth, WatchdogState, spawn_watchdog},
};

/// Upper bound on one blocking wait for a captured frame. Keeps the loop
/// responsive to shutdown while the watchdog tracks real capture stalls.
const CAPTURE_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Run the stream pipeline, automatically restarting on recoverable faults.
pub fn run(config: StreamConfig) -> Result<()> {
    telemetry::init_tracing(config.verbose);
    let _ = telemetry::init_metrics_recorder();

    static CTRL_HANDLER: Once = Once::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_shutdown = handler_shutdown.clone();
            move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let slot = FrameSlot::new();
    let sessions = Arc::new(AtomicUsize::new(0));
    let server = spawn_stream_server(&config, slot.clone(), sessions.clone())
        .context("Failed to start stream server")?;

    debug!(
        "Live feed available at http://{}/video_feed",
        config.listen_addr
    );
    println!(
        "Live feed available at http://{}/video_feed",
        config.listen_addr
    );
    if config.verbose {
        debug!("Running stream pipeline (press Ctrl+C to stop)");
    }

    let annotator = annotate::build(config.annotator);
    let mut seq: u64 = 0;

    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match run_pipeline_once(&config, &slot, annotator.as_ref(), &mut seq, &shutdown) {
            Ok(PipelineOutcome::Graceful) => break,
            Ok(PipelineOutcome::Restart(reason)) => {
                attempt = attempt.saturating_add(1);
                warn!("Pipeline watchdog requested restart (reason: {reason}), attempt #{attempt}");
                thread::sleep(Duration::from_secs(1));
            }
            Err(err) => {
                error!("Stream pipeline error: {err:?}");
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                attempt = attempt.saturating_add(1);
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    debug!("Stopping stream pipeline");
    server.stop();
    Ok(())
}

/// Result of a single pipeline run attempt.
enum PipelineOutcome {
    Graceful,
    Restart(&'static str),
}

/// Execute one capture/publish attempt, returning whether to exit or restart.
fn run_pipeline_once(
    config: &StreamConfig,
    slot: &Arc<FrameSlot>,
    annotator: &dyn Annotate,
    seq: &mut u64,
    shutdown: &Arc<AtomicBool>,
) -> Result<PipelineOutcome> {
    if shutdown.load(Ordering::SeqCst) {
        return Ok(PipelineOutcome::Graceful);
    }

    debug!(
        "Capture source: {} ({:?}), {}x{}, annotator: {}",
        config.source_uri,
        config.source_kind,
        config.width,
        config.height,
        annotator.name()
    );

    let receiver = match config.source_kind {
        SourceKind::Synthetic => {
            video_ingest::spawn_synthetic_reader((config.width, config.height), config.capture_fps)
                .with_context(|| "Failed to start synthetic capture".to_string())?
        }
        SourceKind::Device | SourceKind::Network => {
            video_ingest::spawn_ffmpeg_reader(&config.source_uri, (config.width, config.height))
                .with_context(|| format!("Failed to start capture from {}", config.source_uri))?
        }
    };

    let health = Arc::new(PipelineHealth::new());
    let running = Arc::new(AtomicBool::new(true));
    let watchdog_state = Arc::new(WatchdogState::new());
    let watchdog_handle = spawn_watchdog(
        health.clone(),
        running.clone(),
        shutdown.clone(),
        watchdog_state.clone(),
    );

    let restart_reason = produce_loop(&receiver, slot, annotator, seq, &health, &running, shutdown);

    running.store(false, Ordering::SeqCst);
    drop(receiver);
    let _ = watchdog_handle.join();

    if watchdog_state.is_triggered() {
        let reason = watchdog_state
            .reason()
            .map(|component| component.label())
            .unwrap_or("watchdog");
        return Ok(PipelineOutcome::Restart(reason));
    }
    if let Some(reason) = restart_reason {
        return Ok(PipelineOutcome::Restart(reason));
    }
    Ok(PipelineOutcome::Graceful)
}

/// The producer loop proper. Once per cycle: receive a raw frame, annotate
/// it (falling back to the raw frame when the annotator fails), and publish
/// into the shared slot. Capture errors skip the cycle; only a closed
/// capture channel ends the attempt.
fn produce_loop(
    receiver: &Receiver<std::result::Result<Frame, CaptureError>>,
    slot: &Arc<FrameSlot>,
    annotator: &dyn Annotate,
    seq: &mut u64,
    health: &PipelineHealth,
    running: &AtomicBool,
    shutdown: &AtomicBool,
) -> Option<&'static str> {
    let mut smoothed_fps: f32 = 0.0;
    let mut last_instant = Instant::now();
    let mut restart_reason: Option<&'static str> = None;

    while running.load(Ordering::Relaxed) {
        if shutdown.load(Ordering::Relaxed) {
            running.store(false, Ordering::SeqCst);
            break;
        }

        match receiver.recv_timeout(CAPTURE_RECV_TIMEOUT) {
            Ok(Ok(frame)) => {
                health.beat(HealthComponent::Capture);

                let now = Instant::now();
                let elapsed = now.duration_since(last_instant).as_secs_f32();
                last_instant = now;
                if elapsed > 0.0 {
                    let instant = 1.0 / elapsed;
                    smoothed_fps = if smoothed_fps == 0.0 {
                        instant
                    } else {
                        0.9 * smoothed_fps + 0.1 * instant
                    };
                }
                metrics::gauge!("stream_pipeline_fps").set(smoothed_fps as f64);

                let next_seq = seq.wrapping_add(1);
                let annotate_start = Instant::now();
                let annotated = match annotator.annotate(&frame) {
                    Ok(annotated) => annotated,
                    Err(err) => {
                        warn!(
                            "Annotator {} failed on frame #{next_seq}: {err}; publishing raw frame",
                            annotator.name()
                        );
                        metrics::counter!("stream_annotation_fallbacks_total").increment(1);
                        frame
                    }
                };
                metrics::histogram!("stream_annotate_seconds")
                    .record(annotate_start.elapsed().as_secs_f64());

                *seq = next_seq;
                slot.publish(StreamFrame {
                    seq: next_seq,
                    pixels: annotated.data,
                    width: annotated.width,
                    height: annotated.height,
                    format: annotated.format,
                    timestamp_ms: annotated.timestamp_ms,
                    fps: smoothed_fps,
                });
                health.beat(HealthComponent::Publish);
                metrics::counter!("stream_frames_published_total").increment(1);

                if next_seq % 30 == 0 {
                    debug!("Publish heartbeat: frame #{next_seq}, {smoothed_fps:.1} fps");
                }
            }
            Ok(Err(err)) => {
                // Recoverable: skip this cycle, the source may come back.
                error!("Capture error: {err}");
                metrics::counter!("stream_capture_errors_total").increment(1);
            }
            Err(RecvTimeoutError::Timeout) => {
                // No frame within the bound; loop to re-check shutdown. A
                // persistent stall surfaces through the capture heartbeat.
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!(
                    "Capture channel closed (last published seq {:?})",
                    slot.latest_seq()
                );
                restart_reason = Some("capture channel closed");
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    restart_reason
}
