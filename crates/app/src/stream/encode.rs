//! JPEG encoding and multipart framing for the per-session emission loops.
//!
//! Every session encodes out of its own buffer; nothing here is shared, so a
//! slow encode in one session cannot be observed by another.

use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};
use thiserror::Error;

use crate::stream::data::StreamFrame;

/// Boundary token fixed by the wire contract:
/// `multipart/x-mixed-replace; boundary=frame`.
pub(crate) const BOUNDARY: &str = "frame";

#[derive(Debug, Error)]
pub(crate) enum EncodeError {
    #[error("frame {seq} has a {actual}-byte buffer, expected {expected}")]
    BufferSize {
        seq: u64,
        expected: usize,
        actual: usize,
    },
    #[error("JPEG encode failed for frame {seq}: {source}")]
    Jpeg {
        seq: u64,
        source: image::ImageError,
    },
}

/// Encode `frame` as JPEG into `buf` (cleared first).
pub(crate) fn encode_jpeg(
    frame: &StreamFrame,
    quality: u8,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let expected = width as usize * height as usize * frame.format.bytes_per_pixel();
    if frame.pixels.len() != expected {
        return Err(EncodeError::BufferSize {
            seq: frame.seq,
            expected,
            actual: frame.pixels.len(),
        });
    }

    let rgb = bgr_to_rgb(&frame.pixels);
    let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(width, height, rgb)
        .ok_or(EncodeError::BufferSize {
            seq: frame.seq,
            expected,
            actual: frame.pixels.len(),
        })?;

    buf.clear();
    JpegEncoder::new_with_quality(&mut *buf, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|source| EncodeError::Jpeg {
            seq: frame.seq,
            source,
        })?;
    Ok(())
}

/// Frame one encoded JPEG as a multipart part:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<bytes>\r\n`.
pub(crate) fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(jpeg.len() + 64);
    payload.extend_from_slice(b"--");
    payload.extend_from_slice(BOUNDARY.as_bytes());
    payload.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    payload
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    fn frame(seq: u64, width: i32, height: i32) -> StreamFrame {
        StreamFrame {
            seq,
            pixels: vec![128; (width * height * 3) as usize],
            width,
            height,
            format: FrameFormat::Bgr8,
            timestamp_ms: 0,
            fps: 0.0,
        }
    }

    #[test]
    fn encodes_a_jpeg_payload() {
        let mut buf = Vec::new();
        encode_jpeg(&frame(1, 32, 24), 85, &mut buf).expect("encode");
        // JPEG SOI and EOI markers
        assert_eq!(&buf[..2], &[0xFF, 0xD8]);
        assert_eq!(&buf[buf.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn buffer_is_reused_across_encodes() {
        let mut buf = vec![0xAA; 4096];
        encode_jpeg(&frame(2, 16, 16), 60, &mut buf).expect("encode");
        assert_eq!(&buf[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn wrong_buffer_length_is_an_encode_error() {
        let mut bad = frame(3, 32, 24);
        bad.pixels.pop();
        let mut buf = Vec::new();
        assert!(matches!(
            encode_jpeg(&bad, 85, &mut buf),
            Err(EncodeError::BufferSize { seq: 3, .. })
        ));
    }

    #[test]
    fn part_framing_matches_wire_contract() {
        let part = mjpeg_part(b"JPEGBYTES");
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(b"JPEGBYTES\r\n"));
    }
}
