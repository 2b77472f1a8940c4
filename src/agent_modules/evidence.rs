use ab_glyph::{FontArc, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

use super::detection::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: i32 = 3;
const LABEL_SCALE: f32 = 18.0;
const LABEL_PADDING: u32 = 2;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Frame has no pixels")]
    EmptyFrame,
    #[error("Failed to encode evidence image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Failed to load font: {0}")]
    Font(String),
}

/// Renders an annotated JPEG snapshot from a frame and its qualifying detections.
pub struct EvidenceEncoder {
    jpeg_quality: u8,
    font: Option<FontArc>,
}

impl EvidenceEncoder {
    pub fn new(jpeg_quality: u8, font: Option<FontArc>) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
            font,
        }
    }

    pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, EncodingError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| EncodingError::Font(format!("{}: {e}", path.display())))?;
        FontArc::try_from_vec(bytes).map_err(|e| EncodingError::Font(format!("{}: {e}", path.display())))
    }

    /// Draws every detection onto a copy of `frame` and returns it JPEG encoded.
    pub fn annotate(&self, frame: &RgbImage, detections: &[Detection]) -> Result<Vec<u8>, EncodingError> {
        let canvas = self.render(frame, detections)?;
        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality);
        encoder.encode_image(&canvas)?;
        Ok(bytes)
    }

    /// The annotated copy of `frame`, before encoding.
    pub fn render(&self, frame: &RgbImage, detections: &[Detection]) -> Result<RgbImage, EncodingError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(EncodingError::EmptyFrame);
        }
        let mut canvas = frame.clone();
        for detection in detections {
            let rect = clamp_to_frame(detection, canvas.width(), canvas.height());
            draw_box(&mut canvas, rect);
            self.draw_label(&mut canvas, rect, &label_text(detection));
        }
        Ok(canvas)
    }

    fn draw_label(&self, canvas: &mut RgbImage, rect: Rect, text: &str) {
        let scale = PxScale::from(LABEL_SCALE);
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font, text),
            None => (
                (text.chars().count() as f32 * LABEL_SCALE * 0.55).ceil() as u32,
                LABEL_SCALE as u32,
            ),
        };
        let banner_h = text_h + LABEL_PADDING * 2;
        let banner_w = text_w + LABEL_PADDING * 2;

        // above the box when there is room, otherwise inside its top edge
        let y = if rect.top() >= banner_h as i32 {
            rect.top() - banner_h as i32
        } else {
            rect.top()
        };
        let x = rect.left();
        let max_w = canvas.width().saturating_sub(x as u32);
        let max_h = canvas.height().saturating_sub(y as u32);
        if max_w == 0 || max_h == 0 {
            return;
        }
        let banner = Rect::at(x, y).of_size(banner_w.min(max_w), banner_h.min(max_h));
        draw_filled_rect_mut(canvas, banner, BOX_COLOR);

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x + LABEL_PADDING as i32,
                y + LABEL_PADDING as i32,
                scale,
                font,
                text,
            );
        }
    }
}

/// `"<label> <confidence>"` with two decimals, as shown on the banner.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

fn clamp_to_frame(detection: &Detection, width: u32, height: u32) -> Rect {
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let b = detection.bbox;
    let (left, right) = (b.x1.min(b.x2), b.x1.max(b.x2));
    let (top, bottom) = (b.y1.min(b.y2), b.y1.max(b.y2));

    let x1 = left.round().clamp(0.0, max_x) as i32;
    let y1 = top.round().clamp(0.0, max_y) as i32;
    let x2 = right.round().clamp(0.0, max_x) as i32;
    let y2 = bottom.round().clamp(0.0, max_y) as i32;

    Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32)
}

fn draw_box(canvas: &mut RgbImage, rect: Rect) {
    for inset in 0..BOX_THICKNESS {
        let w = rect.width() as i32 - inset * 2;
        let h = rect.height() as i32 - inset * 2;
        if w <= 0 || h <= 0 {
            break;
        }
        let ring = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, ring, BOX_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))
    }

    #[test]
    fn annotate_produces_decodable_jpeg_and_leaves_frame_untouched() {
        let frame = gray_frame(64, 48);
        let original = frame.clone();
        let encoder = EvidenceEncoder::new(90, None);
        let detections = vec![Detection::new("fire", 0.87, [10.0, 20.0, 40.0, 40.0])];

        let bytes = encoder.annotate(&frame, &detections).unwrap();

        assert_eq!(frame, original);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn render_draws_box_edges_in_red() {
        let frame = gray_frame(100, 100);
        let encoder = EvidenceEncoder::new(90, None);
        let detections = vec![Detection::new("smoke", 0.6, [30.0, 40.0, 70.0, 90.0])];

        let canvas = encoder.render(&frame, &detections).unwrap();

        assert_eq!(*canvas.get_pixel(30, 60), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(32, 60), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(70, 60), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(50, 90), BOX_COLOR);
        // interior stays untouched
        assert_eq!(*canvas.get_pixel(50, 65), Rgb([40, 40, 40]));
        // banner sits above the box
        assert_eq!(*canvas.get_pixel(32, 40 - 5), BOX_COLOR);
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let frame = gray_frame(32, 32);
        let encoder = EvidenceEncoder::new(90, None);
        let detections = vec![
            Detection::new("fire", 0.9, [-50.0, -50.0, 500.0, 500.0]),
            Detection::new("flame", 0.9, [40.0, 40.0, 20.0, 20.0]),
        ];
        let canvas = encoder.render(&frame, &detections).unwrap();
        assert_eq!(*canvas.get_pixel(31, 16), BOX_COLOR);
        assert!(encoder.annotate(&frame, &detections).is_ok());
    }

    #[test]
    fn no_detections_still_encodes() {
        let frame = gray_frame(16, 16);
        let encoder = EvidenceEncoder::new(75, None);
        let bytes = encoder.annotate(&frame, &[]).unwrap();
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    #[test]
    fn empty_frame_is_an_encoding_error() {
        let encoder = EvidenceEncoder::new(90, None);
        let err = encoder
            .annotate(&RgbImage::new(0, 0), &[Detection::new("fire", 0.9, [0.0, 0.0, 1.0, 1.0])])
            .unwrap_err();
        assert!(matches!(err, EncodingError::EmptyFrame));
    }

    #[test]
    fn label_text_uses_two_decimals() {
        let detection = Detection::new("fire", 0.876, [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(label_text(&detection), "fire 0.88");
    }

    #[test]
    fn missing_font_file_is_reported() {
        let err = EvidenceEncoder::load_font("/nonexistent/font.ttf").unwrap_err();
        assert!(matches!(err, EncodingError::Font(_)));
    }
}
