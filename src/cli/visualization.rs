use crate::core::detector::FaceBox;
use crate::storage::IdentityRecord;
use chrono::Local;
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Draws every candidate box on a copy of `frame`. The selected candidate is
/// outlined twice, green when admitted and red when the gate refused it.
pub fn annotate_detections(
    frame: &DynamicImage,
    candidates: &[FaceBox],
    selected: Option<&FaceBox>,
    admitted: bool,
) -> DynamicImage {
    let mut img = frame.to_rgb8();

    let candidate_color = Rgb([255u8, 255u8, 0u8]);
    let admitted_color = Rgb([0u8, 255u8, 0u8]);
    let rejected_color = Rgb([255u8, 0u8, 0u8]);

    for face in candidates {
        if let Some(rect) = clipped_rect(face, img.width(), img.height(), 0.0) {
            draw_hollow_rect_mut(&mut img, rect, candidate_color);
        }
    }

    if let Some(face) = selected {
        let color = if admitted { admitted_color } else { rejected_color };
        for pad in [2.0, 3.0] {
            if let Some(rect) = clipped_rect(face, img.width(), img.height(), pad) {
                draw_hollow_rect_mut(&mut img, rect, color);
            }
        }
    }

    DynamicImage::ImageRgb8(img)
}

fn clipped_rect(face: &FaceBox, width: u32, height: u32, pad: f32) -> Option<Rect> {
    if face.width() <= 0.0 || face.height() <= 0.0 {
        return None;
    }

    let x1 = (face.x1 - pad).max(0.0) as i32;
    let y1 = (face.y1 - pad).max(0.0) as i32;
    let x2 = (face.x2 + pad).min(width as f32) as i32;
    let y2 = (face.y2 + pad).min(height as f32) as i32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32))
}

pub fn describe_identity(record: &IdentityRecord) -> String {
    let last_seen = record
        .last_seen
        .map(|t| t.with_timezone(&Local).format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "{}  enrolled {}  visits {}  last seen {}  confidence {:.2}  quality {:.2}",
        record.identity_id,
        record.enrolled_at.with_timezone(&Local).format("%d-%m-%Y %H:%M:%S"),
        record.total_visits,
        last_seen,
        record.confidence,
        record.quality_score,
    )
}
