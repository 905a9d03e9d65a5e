//! Actix Web server exposing the landing page, the MJPEG feed, and small
//! status endpoints.
//!
//! The server runs on a dedicated thread so the producer hot path never
//! competes with HTTP runtime concerns. Each `/video_feed` connection gets
//! its own emission loop over the shared slot; sessions share nothing but
//! the slot itself, so a stalled client cannot hold anything another
//! session or the producer needs.

use std::{
    sync::{Arc, atomic::{AtomicUsize, Ordering}},
    thread,
    time::Duration,
};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, anyhow};
use async_stream::stream;
use futures_core::Stream;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::stream::{
    config::StreamConfig,
    data::StatusResponse,
    encode::{BOUNDARY, encode_jpeg, mjpeg_part},
    slot::FrameSlot,
    telemetry,
};

/// Retry pause while the slot has never been published to.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

const LANDING_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>roadcam</title></head>\n\
<body>\n<h1>roadcam live feed</h1>\n\
<p><a href=\"/video_feed\">/video_feed</a> &middot; \
<a href=\"/frame.jpg\">/frame.jpg</a> &middot; \
<a href=\"/status\">/status</a></p>\n\
<img src=\"/video_feed\" alt=\"live feed\" />\n</body>\n</html>\n";

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) slot: Arc<FrameSlot>,
    pub(crate) sessions: Arc<AtomicUsize>,
    pub(crate) max_clients: usize,
    pub(crate) jpeg_quality: u8,
    pub(crate) stream_interval: Duration,
}

/// Handle for the stream server thread.
pub(crate) struct StreamServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StreamServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the stream server thread and return a handle that can stop it.
///
/// Binding the listen address happens on the server thread; the outcome is
/// reported back before this function returns, so a bind failure aborts
/// startup instead of surfacing as a log line later.
pub(crate) fn spawn_stream_server(
    config: &StreamConfig,
    slot: Arc<FrameSlot>,
    sessions: Arc<AtomicUsize>,
) -> Result<StreamServer> {
    let listen_addr = config.listen_addr.clone();
    let state = web::Data::new(ServerState {
        slot,
        sessions,
        max_clients: config.max_clients,
        jpeg_quality: config.jpeg_quality,
        stream_interval: Duration::from_millis(config.stream_interval_ms),
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (bind_tx, bind_rx) = std::sync::mpsc::channel::<Result<()>>();

    let handle = thread::Builder::new()
        .name("roadcam-stream-server".into())
        .spawn(move || {
            let outcome = actix_web::rt::System::new().block_on(async move {
                let bound = HttpServer::new(move || {
                    App::new()
                        .app_data(state.clone())
                        .route("/", web::get().to(index_route))
                        .route("/video_feed", web::get().to(video_feed_handler))
                        .route("/frame.jpg", web::get().to(frame_handler))
                        .route("/status", web::get().to(status_handler))
                        .route("/metrics", web::get().to(metrics_handler))
                })
                .disable_signals()
                .bind(listen_addr.as_str());

                let server = match bound {
                    Ok(bound) => bound.run(),
                    Err(err) => {
                        let _ = bind_tx
                            .send(Err(anyhow!(err).context(format!("failed to bind {listen_addr}"))));
                        return Ok(());
                    }
                };
                let _ = bind_tx.send(Ok(()));

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            });
            if let Err(err) = outcome {
                error!("HTTP server error: {err}");
            }
        })
        .context("Failed to spawn stream server thread")?;

    bind_rx
        .recv()
        .context("stream server thread exited before reporting bind status")??;

    Ok(StreamServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Releases a session slot when the emission loop (or a rejected
/// connection attempt) is dropped.
struct SessionGuard {
    sessions: Arc<AtomicUsize>,
}

impl SessionGuard {
    /// Claim a session slot unless the cap is already reached.
    fn claim(sessions: &Arc<AtomicUsize>, max_clients: usize) -> Option<Self> {
        sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < max_clients).then_some(live + 1)
            })
            .ok()?;
        metrics::gauge!("stream_live_sessions").increment(1.0);
        Some(Self {
            sessions: sessions.clone(),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!("stream_live_sessions").decrement(1.0);
    }
}

/// One client's emission loop: read the latest frame, encode into the
/// session's own buffer, yield one multipart part, repeat at a fixed
/// interval. Ends only when the client side drops the response stream.
fn mjpeg_stream(
    slot: Arc<FrameSlot>,
    guard: SessionGuard,
    jpeg_quality: u8,
    interval: Duration,
    startup_poll: Duration,
) -> impl Stream<Item = std::result::Result<Bytes, actix_web::Error>> {
    stream! {
        let _guard = guard;
        let mut encode_buf = Vec::new();
        let mut last_seq: Option<u64> = None;
        let mut ticker = actix_web::rt::time::interval(interval);
        loop {
            ticker.tick().await;
            let frame = match slot.latest() {
                Some(frame) => frame,
                None => {
                    // Nothing published yet: bounded non-busy retry. Never
                    // emit a malformed part.
                    actix_web::rt::time::sleep(startup_poll).await;
                    continue;
                }
            };
            match encode_jpeg(&frame, jpeg_quality, &mut encode_buf) {
                Ok(()) => {
                    if last_seq.is_none() {
                        debug!("session streaming from frame #{}", frame.seq);
                    }
                    last_seq = Some(frame.seq);
                    metrics::counter!("stream_parts_emitted_total").increment(1);
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(mjpeg_part(&encode_buf)));
                }
                Err(err) => {
                    // Skip this emission cycle for this client only.
                    warn!("Encode error, skipping emission cycle: {err}");
                    metrics::counter!("stream_encode_errors_total").increment(1);
                }
            }
        }
    }
}

/// Stream the MJPEG feed over a multipart response.
async fn video_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
    let guard = match SessionGuard::claim(&state.sessions, state.max_clients) {
        Some(guard) => guard,
        None => {
            metrics::counter!("stream_clients_rejected_total").increment(1);
            warn!(
                "Rejecting stream client: {} sessions at cap",
                state.max_clients
            );
            return HttpResponse::ServiceUnavailable()
                .body("stream at client capacity; retry later");
        }
    };

    let stream = mjpeg_stream(
        state.slot.clone(),
        guard,
        state.jpeg_quality,
        state.stream_interval,
        STARTUP_POLL_INTERVAL,
    );

    HttpResponse::Ok()
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        ))
        .streaming(stream)
}

/// Return the latest frame as a single JPEG.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    let Some(frame) = state.slot.latest() else {
        return HttpResponse::NoContent().finish();
    };
    let mut buf = Vec::new();
    match encode_jpeg(&frame, state.jpeg_quality, &mut buf) {
        Ok(()) => HttpResponse::Ok().content_type("image/jpeg").body(buf),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

/// Serve the landing page linking to the stream endpoints.
async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(LANDING_HTML)
}

/// Return a JSON snapshot of the pipeline state.
async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    let latest = state.slot.latest();
    HttpResponse::Ok().json(StatusResponse {
        latest_seq: latest.as_ref().map(|frame| frame.seq),
        timestamp_ms: latest.as_ref().map(|frame| frame.timestamp_ms),
        fps: latest.as_ref().map(|frame| frame.fps).unwrap_or(0.0),
        live_sessions: state.sessions.load(Ordering::SeqCst),
        max_sessions: state.max_clients,
    })
}

/// Prometheus text exposition.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not initialised"),
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use futures_util::StreamExt;
    use tokio::time::timeout;

    use video_ingest::FrameFormat;

    use super::*;
    use crate::stream::data::StreamFrame;

    fn test_frame(seq: u64) -> StreamFrame {
        StreamFrame {
            seq,
            pixels: vec![seq as u8; 16 * 16 * 3],
            width: 16,
            height: 16,
            format: FrameFormat::Bgr8,
            timestamp_ms: seq as i64,
            fps: 30.0,
        }
    }

    fn test_state(max_clients: usize) -> web::Data<ServerState> {
        web::Data::new(ServerState {
            slot: FrameSlot::new(),
            sessions: Arc::new(AtomicUsize::new(0)),
            max_clients,
            jpeg_quality: 85,
            stream_interval: Duration::from_millis(5),
        })
    }

    fn open_session(state: &web::Data<ServerState>) -> SessionGuard {
        SessionGuard::claim(&state.sessions, state.max_clients).expect("session slot free")
    }

    fn session_stream(
        state: &web::Data<ServerState>,
        guard: SessionGuard,
    ) -> impl Stream<Item = std::result::Result<Bytes, actix_web::Error>> {
        mjpeg_stream(
            state.slot.clone(),
            guard,
            state.jpeg_quality,
            state.stream_interval,
            Duration::from_millis(5),
        )
    }

    #[actix_web::test]
    async fn no_chunk_before_first_publish() {
        let state = test_state(4);
        let guard = open_session(&state);
        let mut stream = Box::pin(session_stream(&state, guard));

        let early = timeout(Duration::from_millis(100), stream.next()).await;
        assert!(early.is_err(), "no part may be emitted before a publish");

        state.slot.publish(test_frame(1));
        let part = timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("part after first publish")
            .expect("stream stays open")
            .expect("no error");
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(b"\r\n"));
    }

    #[actix_web::test]
    async fn session_cap_rejects_and_releases() {
        let state = test_state(2);
        let first = SessionGuard::claim(&state.sessions, 2).expect("first");
        let _second = SessionGuard::claim(&state.sessions, 2).expect("second");
        assert!(SessionGuard::claim(&state.sessions, 2).is_none());

        drop(first);
        assert!(SessionGuard::claim(&state.sessions, 2).is_some());
    }

    #[actix_web::test]
    async fn stalled_session_does_not_slow_a_healthy_one() {
        let state = test_state(4);

        // publisher task feeding the slot continuously
        let slot = state.slot.clone();
        let publisher = actix_web::rt::spawn(async move {
            for seq in 1..=200u64 {
                slot.publish(test_frame(seq));
                actix_web::rt::time::sleep(Duration::from_millis(2)).await;
            }
        });

        // stalled client: session opened but never polled
        let stalled_guard = open_session(&state);
        let _stalled = Box::pin(session_stream(&state, stalled_guard));

        let healthy_guard = open_session(&state);
        let mut healthy = Box::pin(session_stream(&state, healthy_guard));

        let mut received = 0;
        let deadline = Duration::from_secs(2);
        let outcome = timeout(deadline, async {
            while received < 10 {
                let part = healthy.next().await.expect("stream open").expect("no error");
                assert!(part.starts_with(b"--frame"));
                received += 1;
            }
        })
        .await;
        assert!(outcome.is_ok(), "healthy session starved by stalled one");

        publisher.abort();
    }

    #[actix_web::test]
    async fn duplicate_frames_may_repeat_but_seq_never_regresses() {
        let state = test_state(4);
        state.slot.publish(test_frame(3));

        let guard = open_session(&state);
        let mut stream = Box::pin(session_stream(&state, guard));

        // Producer is idle; the same frame is re-sent each interval.
        for _ in 0..3 {
            let part = timeout(Duration::from_millis(500), stream.next())
                .await
                .expect("part within deadline")
                .expect("stream open")
                .expect("no error");
            assert!(part.starts_with(b"--frame"));
        }
    }

    #[actix_web::test]
    async fn frame_endpoint_serves_latest_or_no_content() {
        let state = test_state(4);
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/frame.jpg", web::get().to(frame_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/frame.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        state.slot.publish(test_frame(7));
        let req = test::TestRequest::get().uri("/frame.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }

    #[actix_web::test]
    async fn landing_page_links_to_the_stream() {
        let app = test::init_service(App::new().route("/", web::get().to(index_route))).await;
        let req = test::TestRequest::get().uri("/").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let html = std::str::from_utf8(&body).expect("utf-8 page");
        assert!(html.contains("/video_feed"));
    }

    #[actix_web::test]
    async fn status_reports_sessions_and_seq() {
        let state = test_state(4);
        state.slot.publish(test_frame(9));
        let _live = open_session(&state);

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/status", web::get().to(status_handler)),
        )
        .await;
        let req = test::TestRequest::get().uri("/status").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let status: serde_json::Value = serde_json::from_slice(&body).expect("json status");
        assert_eq!(status["latest_seq"], 9);
        assert_eq!(status["live_sessions"], 1);
        assert_eq!(status["max_sessions"], 4);
    }

    #[actix_web::test]
    async fn video_feed_rejects_clients_beyond_cap() {
        let state = test_state(1);
        let _occupied = open_session(&state);

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/video_feed", web::get().to(video_feed_handler)),
        )
        .await;
        let req = test::TestRequest::get().uri("/video_feed").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
