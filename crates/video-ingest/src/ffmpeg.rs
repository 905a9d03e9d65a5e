//! FFmpeg-subprocess capture path.
//!
//! A spawned `ffmpeg` decodes the source and writes raw BGR24 frames to its
//! stdout; a background thread slices that byte stream into frame-sized
//! chunks and forwards them over a bounded channel. Works for V4L2 devices,
//! files, and network URIs without linking any decoder into the process.

use std::{
    io::Read,
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::types::{CaptureError, Frame, FrameFormat};

/// Spawns an FFmpeg process decoding `uri` and yields BGR8 frames scaled to
/// `target_size` via a background thread.
///
/// The channel buffer is intentionally small so the decoder backpressures
/// when the consumer falls behind instead of ballooning memory.
pub fn spawn_ffmpeg_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);

    let (is_v4l, ffmpeg_uri) = if let Some(index) = parse_device_index(uri) {
        (true, format!("/dev/video{index}"))
    } else if uri.starts_with("/dev/video") {
        (true, uri.to_string())
    } else {
        (false, uri.to_string())
    };

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    if is_v4l {
        cmd.arg("-f").arg("video4linux2");
    }

    cmd.arg("-i")
        .arg(&ffmpeg_uri)
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");

    spawn_reader_thread(cmd, ffmpeg_uri, target_size, 2)
}

/// Interpret a bare numeric URI ("0") as a V4L2 device index.
pub(crate) fn parse_device_index(uri: &str) -> Option<u32> {
    uri.parse::<u32>().ok()
}

fn spawn_reader_thread(
    mut cmd: Command,
    uri: String,
    target_size: (i32, i32),
    queue_size: usize,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(queue_size);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|_| CaptureError::Open { uri: uri.clone() })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    thread::Builder::new()
        .name("ffmpeg-reader".into())
        .spawn(move || {
            let tx_clone = tx.clone();
            if let Err(err) = ffmpeg_loop(stdout, child, uri, target_size, tx_clone) {
                let _ = tx.send(Err(err));
            }
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(rx)
}

fn ffmpeg_loop(
    mut stdout: impl Read,
    mut child: Child,
    uri: String,
    target_size: (i32, i32),
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let frame_bytes = (target_size.0 as usize) * (target_size.1 as usize) * 3;
    let mut buffer = vec![0u8; frame_bytes];
    let mut result = Ok(());

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let timestamp_ms = Utc::now().timestamp_millis();
                if tx
                    .send(Ok(Frame {
                        data: buffer.clone(),
                        width: target_size.0,
                        height: target_size.1,
                        timestamp_ms,
                        format: FrameFormat::Bgr8,
                    }))
                    .is_err()
                {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                result = Err(CaptureError::Eof { uri });
                break;
            }
            Err(err) => {
                result = Err(CaptureError::Other(err.into()));
                break;
            }
        }
    }

    let _ = child.kill();
    result
}

#[cfg(test)]
mod tests {
    use super::parse_device_index;

    #[test]
    fn numeric_uri_maps_to_device_index() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("12"), Some(12));
    }

    #[test]
    fn non_numeric_uri_is_not_a_device() {
        assert_eq!(parse_device_index("/dev/video0"), None);
        assert_eq!(parse_device_index("rtsp://camera"), None);
        assert_eq!(parse_device_index("synthetic:"), None);
    }
}
