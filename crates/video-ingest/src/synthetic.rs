//! Synthetic moving test-pattern source.
//!
//! Produces BGR8 frames at a fixed rate without touching any camera
//! hardware. Used by tests and for camera-less demos via the `synthetic:`
//! URI scheme.

use std::{thread, time::Duration};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Receiver, bounded};

use crate::types::{CaptureError, Frame, FrameFormat};

/// Spawns a background thread emitting gradient frames of `target_size` at
/// roughly `fps` frames per second.
pub fn spawn_synthetic_reader(
    target_size: (i32, i32),
    fps: u32,
) -> Result<Receiver<Result<Frame, CaptureError>>> {
    let (tx, rx) = bounded(2);
    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));

    thread::Builder::new()
        .name("synthetic-reader".into())
        .spawn(move || {
            let mut tick: u64 = 0;
            loop {
                let frame = render_pattern(target_size, tick);
                if tx.send(Ok(frame)).is_err() {
                    break;
                }
                tick = tick.wrapping_add(1);
                thread::sleep(interval);
            }
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(rx)
}

/// Render one gradient frame. The pattern shifts with `tick` so consecutive
/// frames are visibly distinct in a browser.
pub fn render_pattern(target_size: (i32, i32), tick: u64) -> Frame {
    let (width, height) = (target_size.0.max(1), target_size.1.max(1));
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    let shift = (tick % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let b = ((x * 255) / width) as u8;
            let g = ((y * 255) / height) as u8;
            data.push(b.wrapping_add(shift));
            data.push(g);
            data.push(shift);
        }
    }
    Frame {
        data,
        width,
        height,
        timestamp_ms: Utc::now().timestamp_millis(),
        format: FrameFormat::Bgr8,
    }
}
