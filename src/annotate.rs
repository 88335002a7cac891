//! Snapshot rendering: detection boxes and label tags drawn on the frame,
//! encoded as JPEG.

use std::io::Cursor;

use ab_glyph::{FontRef, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([255, 127, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_PADDING: i32 = 15;
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 14.0;

static LABEL_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Tag text for a detection, e.g. `person: 87.5%`.
pub fn label_text(detection: &Detection) -> String {
    format!("{}: {:.1}%", detection.label, detection.confidence * 100.0)
}

/// Draw a padded box and a label tag for every detection.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let mut image = frame.to_rgb_image().context("annotate snapshot")?;
    if detections.is_empty() {
        return Ok(image);
    }
    let font = FontRef::try_from_slice(LABEL_FONT).map_err(|e| anyhow!("label font: {e}"))?;
    let scale = PxScale::from(LABEL_SCALE);

    for detection in detections {
        let Some(outer) = padded_rect(&detection.bbox, frame.width, frame.height, 0) else {
            continue;
        };
        draw_hollow_rect_mut(&mut image, outer, BOX_COLOR);
        for inset in 1..BOX_THICKNESS {
            if let Some(rect) = padded_rect(&detection.bbox, frame.width, frame.height, inset) {
                draw_hollow_rect_mut(&mut image, rect, BOX_COLOR);
            }
        }

        // Tag sits on top of the box, or just inside it when the box touches
        // the top edge of the frame.
        let text = label_text(detection);
        let (text_w, text_h) = text_size(scale, &font, &text);
        let tag_top = (outer.top() - text_h as i32).max(0);
        let tag = Rect::at(outer.left(), tag_top).of_size(text_w.max(1), text_h.max(1));
        draw_filled_rect_mut(&mut image, tag, BOX_COLOR);
        draw_text_mut(
            &mut image,
            TEXT_COLOR,
            outer.left(),
            tag_top,
            scale,
            &font,
            &text,
        );
    }
    Ok(image)
}

pub fn encode_jpeg(image: RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .context("encode snapshot as JPEG")?;
    Ok(bytes)
}

/// Annotated JPEG of `frame`.
pub fn render_snapshot(frame: &Frame, detections: &[Detection]) -> Result<Vec<u8>> {
    encode_jpeg(annotate(frame, detections)?)
}

fn padded_rect(bbox: &BoundingBox, frame_w: u32, frame_h: u32, inset: i32) -> Option<Rect> {
    let max_x = (frame_w as i32 - 1).max(0);
    let max_y = (frame_h as i32 - 1).max(0);
    let left = (bbox.x - BOX_PADDING + inset).clamp(0, max_x);
    let top = (bbox.y - BOX_PADDING + inset).clamp(0, max_y);
    let right = (bbox.x + bbox.width + BOX_PADDING - inset).clamp(0, max_x);
    let bottom = (bbox.y + bbox.height + BOX_PADDING - inset).clamp(0, max_y);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb8(vec![40; (width * height * 3) as usize], width, height).unwrap()
    }

    fn pixels_in(image: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> Vec<Rgb<u8>> {
        let mut pixels = Vec::new();
        for py in y..(y + h).min(image.height()) {
            for px in x..(x + w).min(image.width()) {
                pixels.push(*image.get_pixel(px, py));
            }
        }
        pixels
    }

    #[test]
    fn label_shows_class_and_confidence() {
        let detection = Detection::new("cell phone", 0.875, BoundingBox::new(0, 0, 1, 1));
        assert_eq!(label_text(&detection), "cell phone: 87.5%");
    }

    #[test]
    fn box_is_padded_and_drawn() -> Result<()> {
        let frame = gray_frame(100, 100);
        let detection = Detection::new("person", 0.9, BoundingBox::new(40, 40, 20, 20));

        let image = annotate(&frame, &[detection])?;

        assert_eq!(image.get_pixel(25, 50), &BOX_COLOR);
        assert_eq!(image.get_pixel(75, 50), &BOX_COLOR);
        assert_eq!(image.get_pixel(50, 50), &Rgb([40, 40, 40]));
        Ok(())
    }

    #[test]
    fn label_tag_sits_above_the_box() -> Result<()> {
        let frame = gray_frame(200, 100);
        let detection = Detection::new("person", 0.9, BoundingBox::new(60, 50, 30, 30));

        let image = annotate(&frame, &[detection])?;

        // Padded box top-left is (45, 35); the tag occupies the rows above it.
        let tag = pixels_in(&image, 45, 22, 40, 12);
        assert!(tag.iter().any(|p| *p == BOX_COLOR));
        assert!(tag.iter().any(|p| p.0[2] >= 150), "no label text drawn");
        assert_eq!(image.get_pixel(195, 98), &Rgb([40, 40, 40]));
        Ok(())
    }

    #[test]
    fn boxes_at_the_edge_are_clamped() -> Result<()> {
        let frame = gray_frame(80, 50);
        let detection = Detection::new("knife", 0.6, BoundingBox::new(-5, -5, 30, 30));

        let image = annotate(&frame, &[detection])?;
        assert_eq!(image.get_pixel(0, 30), &BOX_COLOR);
        assert_eq!(image.get_pixel(40, 30), &BOX_COLOR);
        // Tag moves inside the frame instead of above it.
        let tag = pixels_in(&image, 0, 0, 60, 12);
        assert!(tag.iter().any(|p| p.0[2] >= 150));
        Ok(())
    }

    #[test]
    fn snapshot_is_a_jpeg() -> Result<()> {
        let bytes = render_snapshot(&gray_frame(32, 32), &[])?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}
