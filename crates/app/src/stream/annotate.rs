//! Annotator seam between capture and publishing.
//!
//! Annotators are pure per-call and hold no shared state, so the producer
//! can treat them as an opaque collaborator: on failure it publishes the raw
//! frame instead and the pipeline keeps moving.

use thiserror::Error;

use video_ingest::Frame;

use crate::stream::config::AnnotatorKind;

#[derive(Debug, Error)]
pub(crate) enum AnnotationError {
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Overlay detection results onto a raw frame, returning the annotated copy.
pub(crate) trait Annotate: Send + Sync {
    fn name(&self) -> &'static str;
    fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotationError>;
}

pub(crate) fn build(kind: AnnotatorKind) -> Box<dyn Annotate> {
    match kind {
        AnnotatorKind::None => Box::new(Passthrough),
        AnnotatorKind::Shapes => Box::new(ShapeOverlay::default()),
    }
}

/// No-op annotator: the published frame is the raw frame.
pub(crate) struct Passthrough;

impl Annotate for Passthrough {
    fn name(&self) -> &'static str {
        "none"
    }

    fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotationError> {
        check_buffer(frame)?;
        Ok(copy_frame(frame))
    }
}

/// Geometric overlay marking the strongest high-contrast region with a box
/// and label. A coarse edge-density grid stands in for the contour/corner
/// heuristics of classical shape detectors; it carries no accuracy contract.
pub(crate) struct ShapeOverlay {
    cell: i32,
    min_cells: usize,
}

impl Default for ShapeOverlay {
    fn default() -> Self {
        Self {
            cell: 16,
            min_cells: 4,
        }
    }
}

impl Annotate for ShapeOverlay {
    fn name(&self) -> &'static str {
        "shapes"
    }

    fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotationError> {
        check_buffer(frame)?;
        let mut annotated = copy_frame(frame);

        if let Some((left, top, right, bottom)) = self.strongest_region(frame) {
            let mut canvas = Canvas::new(
                &mut annotated.data,
                annotated.width,
                annotated.height,
            );
            canvas.draw_rectangle(left, top, right, bottom, GREEN);
            let label_y = (top - 12).max(0);
            canvas.fill_rect(left, label_y, left + 5 * 6, label_y + 8, BLACK);
            canvas.draw_label(left + 1, label_y, "SHAPE", GREEN);
        }

        Ok(annotated)
    }
}

impl ShapeOverlay {
    /// Bounding box (pixel coordinates) of the grid cells whose edge energy
    /// clears twice the frame-wide mean, or `None` when too few cells do.
    fn strongest_region(&self, frame: &Frame) -> Option<(i32, i32, i32, i32)> {
        let width = frame.width;
        let height = frame.height;
        let cols = (width / self.cell).max(1);
        let rows = (height / self.cell).max(1);
        let mut energy = vec![0u64; (cols * rows) as usize];

        for y in 0..height {
            for x in 0..width - 1 {
                let here = luma(&frame.data, x, y, width);
                let right = luma(&frame.data, x + 1, y, width);
                let diff = here.abs_diff(right) as u64;
                let cx = (x / self.cell).min(cols - 1);
                let cy = (y / self.cell).min(rows - 1);
                energy[(cy * cols + cx) as usize] += diff;
            }
        }

        let total: u64 = energy.iter().sum();
        let mean = total / energy.len() as u64;
        let threshold = mean.saturating_mul(2).max(1);

        let mut bounds: Option<(i32, i32, i32, i32)> = None;
        let mut hot_cells = 0usize;
        for cy in 0..rows {
            for cx in 0..cols {
                if energy[(cy * cols + cx) as usize] < threshold {
                    continue;
                }
                hot_cells += 1;
                let left = cx * self.cell;
                let top = cy * self.cell;
                let right = ((cx + 1) * self.cell).min(width - 1);
                let bottom = ((cy + 1) * self.cell).min(height - 1);
                bounds = Some(match bounds {
                    None => (left, top, right, bottom),
                    Some((l, t, r, b)) => {
                        (l.min(left), t.min(top), r.max(right), b.max(bottom))
                    }
                });
            }
        }

        if hot_cells < self.min_cells {
            return None;
        }
        bounds
    }
}

fn check_buffer(frame: &Frame) -> Result<(), AnnotationError> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(AnnotationError::BufferSize {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(())
}

fn copy_frame(frame: &Frame) -> Frame {
    Frame {
        data: frame.data.clone(),
        width: frame.width,
        height: frame.height,
        timestamp_ms: frame.timestamp_ms,
        format: frame.format,
    }
}

/// Integer luminance approximation for one BGR pixel.
fn luma(data: &[u8], x: i32, y: i32, width: i32) -> u16 {
    let idx = ((y * width + x) * 3) as usize;
    let b = data[idx] as u16;
    let g = data[idx + 1] as u16;
    let r = data[idx + 2] as u16;
    (r * 3 + g * 6 + b) / 10
}

const GREEN: [u8; 3] = [0, 255, 0];
const BLACK: [u8; 3] = [0, 0, 0];

/// Mutable view over a raw BGR8 buffer with clamped drawing primitives.
struct Canvas<'a> {
    data: &'a mut [u8],
    width: i32,
    height: i32,
}

impl<'a> Canvas<'a> {
    fn new(data: &'a mut [u8], width: i32, height: i32) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            data,
            width,
            height,
        }
    }

    fn put(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        // color is RGB order; buffer is BGR.
        self.data[idx] = color[2];
        self.data[idx + 1] = color[1];
        self.data[idx + 2] = color[0];
    }

    fn draw_rectangle(&mut self, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
        let left = left.clamp(0, self.width.saturating_sub(1));
        let right = right.clamp(0, self.width.saturating_sub(1));
        let top = top.clamp(0, self.height.saturating_sub(1));
        let bottom = bottom.clamp(0, self.height.saturating_sub(1));

        for x in left..=right {
            self.put(x, top, color);
            self.put(x, bottom, color);
        }
        for y in top..=bottom {
            self.put(left, y, color);
            self.put(right, y, color);
        }
    }

    fn fill_rect(&mut self, left: i32, top: i32, right: i32, bottom: i32, color: [u8; 3]) {
        let left = left.clamp(0, self.width.saturating_sub(1));
        let right = right.clamp(0, self.width.saturating_sub(1));
        let top = top.clamp(0, self.height.saturating_sub(1));
        let bottom = bottom.clamp(0, self.height.saturating_sub(1));

        for y in top..=bottom {
            for x in left..=right {
                self.put(x, y, color);
            }
        }
    }

    fn draw_label(&mut self, mut x: i32, y: i32, text: &str, color: [u8; 3]) {
        for ch in text.chars().flat_map(|c| c.to_uppercase()) {
            if let Some(glyph) = glyph_bits(ch) {
                for (row, pattern) in glyph.iter().enumerate() {
                    for col in 0..5 {
                        if (pattern >> (4 - col)) & 1 == 1 {
                            self.put(x + col, y + row as i32, color);
                        }
                    }
                }
            }
            x += 6;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use video_ingest::{Frame, FrameFormat};

    use super::*;

    fn flat_frame(width: i32, height: i32, value: u8) -> Frame {
        Frame {
            data: vec![value; (width * height * 3) as usize],
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    #[test]
    fn passthrough_preserves_pixels() {
        let frame = flat_frame(32, 24, 17);
        let out = Passthrough.annotate(&frame).expect("annotate");
        assert_eq!(out.data, frame.data);
        assert_eq!(out.width, frame.width);
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let mut frame = flat_frame(32, 24, 0);
        frame.data.truncate(10);
        assert!(matches!(
            Passthrough.annotate(&frame),
            Err(AnnotationError::BufferSize { .. })
        ));
        assert!(ShapeOverlay::default().annotate(&frame).is_err());
    }

    #[test]
    fn flat_frame_gets_no_overlay() {
        let frame = flat_frame(64, 64, 90);
        let out = ShapeOverlay::default().annotate(&frame).expect("annotate");
        assert_eq!(out.data, frame.data);
    }

    #[test]
    fn high_contrast_square_gets_boxed() {
        let mut frame = flat_frame(128, 128, 0);
        // white square in the middle on black background
        for y in 40..88 {
            for x in 40..88 {
                let idx = ((y * 128 + x) * 3) as usize;
                frame.data[idx] = 255;
                frame.data[idx + 1] = 255;
                frame.data[idx + 2] = 255;
            }
        }
        let out = ShapeOverlay::default().annotate(&frame).expect("annotate");
        assert_ne!(out.data, frame.data, "overlay should change pixels");
        assert_eq!(out.data.len(), frame.data.len());
    }
}
