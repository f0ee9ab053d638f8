use crate::common::{Config, Result};
use crate::core::onnx::{load_session, resolve_model_path};
use crate::core::traits::FaceDetector;
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self { x1, y1, x2, y2, confidence }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Crop of `image` under this box, clipped to the image bounds.
    /// `None` when nothing of the box lies inside the image.
    pub fn crop(&self, image: &DynamicImage) -> Option<DynamicImage> {
        if !(self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()) {
            return None;
        }

        let x1 = self.x1.max(0.0).floor() as u32;
        let y1 = self.y1.max(0.0).floor() as u32;
        let x2 = self.x2.min(image.width() as f32).max(0.0) as u32;
        let y2 = self.y2.min(image.height() as f32).max(0.0) as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(image.crop_imm(x1, y1, x2 - x1, y2 - y1))
    }

    fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Detector output for one frame: at most one face.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Observation {
    pub face: Option<FaceBox>,
}

impl Observation {
    pub fn absent() -> Self {
        Self { face: None }
    }

    pub fn face(bbox: FaceBox) -> Self {
        Self { face: Some(bbox) }
    }
}

/// Picks the single candidate to hand to the engine: highest
/// `confidence * (area / min_face_area)`, so a near, confident face beats a
/// distant one. Earlier candidates win ties.
pub fn select_candidate(candidates: &[FaceBox], min_face_area: f32) -> Option<FaceBox> {
    let norm = if min_face_area > 0.0 { min_face_area } else { 1.0 };
    let mut best: Option<(FaceBox, f32)> = None;

    for candidate in candidates {
        let score = candidate.confidence * (candidate.area() / norm);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((*candidate, score));
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Converts one `[cx, cy, w, h]` prediction into a box in input pixel space,
/// clipped to the input. Normalized predictions (every field within `[0, 1]`)
/// are scaled per axis. `None` when nothing of the box remains.
fn decode_box(raw: [f32; 4], confidence: f32, input_width: f32, input_height: f32) -> Option<FaceBox> {
    let [cx, cy, w, h] = raw;
    let (cx, cy, w, h) = if raw.iter().all(|v| *v <= 1.0) {
        (cx * input_width, cy * input_height, w * input_width, h * input_height)
    } else {
        (cx, cy, w, h)
    };

    let x1 = (cx - w / 2.0).max(0.0);
    let y1 = (cy - h / 2.0).max(0.0);
    let x2 = (cx + w / 2.0).min(input_width);
    let y2 = (cy + h / 2.0).min(input_height);

    if x2 > x1 && y2 > y1 {
        Some(FaceBox::new(x1, y1, x2, y2, confidence))
    } else {
        None
    }
}

/// YOLO-style face detector running on ONNX Runtime.
pub struct OnnxFaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: Config,
}

impl OnnxFaceDetector {
    pub fn new_with_model_path(config: &Config, models_base: Option<&Path>) -> Result<Self> {
        let model_path = resolve_model_path(&config.models.detector_path, models_base);
        let (environment, session) =
            load_session("face_detector", &model_path, config.performance.optimization_level)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    /// Every box that survives NMS, in original frame coordinates.
    pub fn detect_all(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;
        let input_width = self.config.detector.input_width;
        let input_height = self.config.detector.input_height;

        let img_array = if image.width() == input_width && image.height() == input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(input_width, input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut faces = self.parse_detections(&outputs)?;

        let scale_x = orig_width / input_width as f32;
        let scale_y = orig_height / input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = img.to_rgb8();
        let width = rgb.width() as usize;
        let height = rgb.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
            array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
            array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
        }

        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<FaceBox>> {
        let mut faces = Vec::new();

        let output = match outputs.first() {
            Some(output) => output.try_extract::<f32>()?.view().to_owned(),
            None => return Ok(faces),
        };
        let shape = output.shape().to_vec();
        let values: Vec<f32> = output.iter().copied().collect();

        // [1, N, 5+] standard or [1, 5+, N] transposed
        let (num_predictions, prediction_length, is_transposed) = if shape.len() >= 3 {
            if shape[2] > shape[1] && shape[1] <= 10 {
                (shape[2], shape[1], true)
            } else {
                (shape[1], shape[2], false)
            }
        } else if shape.len() == 2 {
            (shape[0], shape[1], false)
        } else {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Ok(faces);
        };

        if prediction_length < 5 {
            tracing::warn!("Detector output has no score column: {:?}", shape);
            return Ok(faces);
        }

        let input_width = self.config.detector.input_width as f32;
        let input_height = self.config.detector.input_height as f32;

        for i in 0..num_predictions {
            let at = |field: usize| {
                if is_transposed {
                    values[field * num_predictions + i]
                } else {
                    values[i * prediction_length + field]
                }
            };
            let (cx, cy, w, h, confidence) = (at(0), at(1), at(2), at(3), at(4));

            if confidence < self.config.detector.raw_confidence_floor {
                continue;
            }

            if let Some(face) = decode_box([cx, cy, w, h], confidence, input_width, input_height) {
                faces.push(face);
            }
        }

        Ok(apply_nms(faces, self.config.detector.nms_iou_threshold))
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, frame: &DynamicImage) -> Result<Observation> {
        let faces = self.detect_all(frame)?;
        let selected = select_candidate(&faces, self.config.admission.min_face_area);
        if let Some(face) = &selected {
            tracing::debug!(
                "Selected face {:.0}x{:.0} conf {:.2} of {} candidates",
                face.width(), face.height(), face.confidence, faces.len()
            );
        }
        Ok(Observation { face: selected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_iou() {
        let a = FaceBox::new(10.0, 10.0, 60.0, 60.0, 0.9);
        let b = FaceBox::new(30.0, 30.0, 80.0, 80.0, 0.8);
        let iou = a.iou(&b);
        assert!(iou > 0.0 && iou < 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let far = FaceBox::new(100.0, 100.0, 150.0, 150.0, 0.8);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlap() {
        let boxes = vec![
            FaceBox::new(10.0, 10.0, 60.0, 60.0, 0.7),
            FaceBox::new(12.0, 12.0, 62.0, 62.0, 0.9),
            FaceBox::new(200.0, 200.0, 260.0, 260.0, 0.6),
        ];
        let kept = apply_nms(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn test_selection_weighs_area() {
        let small_confident = FaceBox::new(0.0, 0.0, 100.0, 100.0, 0.95);
        let large = FaceBox::new(0.0, 0.0, 200.0, 200.0, 0.6);
        let chosen = select_candidate(&[small_confident, large], 25_000.0).unwrap();
        assert_eq!(chosen, large);

        assert_eq!(select_candidate(&[], 25_000.0), None);
    }

    #[test]
    fn test_decode_normalized_box_on_wide_input() {
        // 640x384 input: a centered half-size box spans half of each axis
        let face = decode_box([0.5, 0.5, 0.5, 0.5], 0.8, 640.0, 384.0).unwrap();
        assert_eq!((face.x1, face.x2), (160.0, 480.0));
        assert_eq!((face.y1, face.y2), (96.0, 288.0));
        assert_eq!(face.confidence, 0.8);
    }

    #[test]
    fn test_decode_pixel_box_clips_to_input() {
        let face = decode_box([600.0, 40.0, 100.0, 100.0], 0.9, 640.0, 384.0).unwrap();
        assert_eq!((face.x1, face.y1, face.x2, face.y2), (550.0, 0.0, 640.0, 90.0));

        assert!(decode_box([700.0, 40.0, 20.0, 20.0], 0.9, 640.0, 384.0).is_none());
    }

    #[test]
    fn test_crop_clips_to_frame() {
        let frame = DynamicImage::ImageRgb8(RgbImage::new(100, 80));

        let inside = FaceBox::new(10.0, 10.0, 50.0, 40.0, 0.9).crop(&frame).unwrap();
        assert_eq!((inside.width(), inside.height()), (40, 30));

        let overhanging = FaceBox::new(-20.0, 60.0, 30.0, 120.0, 0.9).crop(&frame).unwrap();
        assert_eq!((overhanging.width(), overhanging.height()), (30, 20));

        assert!(FaceBox::new(120.0, 10.0, 150.0, 40.0, 0.9).crop(&frame).is_none());
        assert!(FaceBox::new(50.0, 10.0, 50.0, 40.0, 0.9).crop(&frame).is_none());
    }
}
