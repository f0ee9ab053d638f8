use crate::common::config::AdmissionConfig;
use crate::core::detector::FaceBox;
use std::fmt;

/// Reason a detection was not admitted into the stability pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Box clipped to the frame has no pixels.
    EmptyCrop,
    AreaTooSmall { area: f32 },
    LowConfidence { confidence: f32 },
    TooNarrow { width: f32 },
    TooShort { height: f32 },
    AspectRatio { ratio: f32 },
    OffCenter { center_x: f32, center_y: f32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::EmptyCrop => write!(f, "empty face crop"),
            Rejection::AreaTooSmall { area } => write!(f, "face area {:.0} too small", area),
            Rejection::LowConfidence { confidence } => write!(f, "confidence {:.2} too low", confidence),
            Rejection::TooNarrow { width } => write!(f, "face width {:.0} too narrow", width),
            Rejection::TooShort { height } => write!(f, "face height {:.0} too short", height),
            Rejection::AspectRatio { ratio } => write!(f, "aspect ratio {:.2} out of range", ratio),
            Rejection::OffCenter { center_x, center_y } => {
                write!(f, "face center ({:.2}, {:.2}) too close to the edge", center_x, center_y)
            }
        }
    }
}

/// Geometric pre-filter for detections. Stateless.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    config: AdmissionConfig,
}

impl AdmissionGate {
    pub fn new(config: AdmissionConfig) -> Self {
        Self { config }
    }

    pub fn admit(&self, frame_dims: (u32, u32), bbox: &FaceBox, confidence: f32) -> bool {
        self.evaluate(frame_dims, bbox, confidence).is_ok()
    }

    /// Runs every check in order and reports the first one that fails.
    /// Values exactly on a limit pass.
    pub fn evaluate(&self, frame_dims: (u32, u32), bbox: &FaceBox, confidence: f32) -> Result<(), Rejection> {
        let (frame_w, frame_h) = (frame_dims.0 as f32, frame_dims.1 as f32);
        let cfg = &self.config;

        let clipped_w = bbox.x2.min(frame_w) - bbox.x1.max(0.0);
        let clipped_h = bbox.y2.min(frame_h) - bbox.y1.max(0.0);
        if frame_w <= 0.0 || frame_h <= 0.0 || clipped_w < 1.0 || clipped_h < 1.0
            || !bbox.x1.is_finite() || !bbox.y1.is_finite()
            || !bbox.x2.is_finite() || !bbox.y2.is_finite()
        {
            return Err(Rejection::EmptyCrop);
        }

        let width = bbox.width();
        let height = bbox.height();

        let area = width * height;
        if area < cfg.min_face_area {
            return Err(Rejection::AreaTooSmall { area });
        }

        if confidence < cfg.min_confidence {
            return Err(Rejection::LowConfidence { confidence });
        }

        if width < cfg.min_face_width {
            return Err(Rejection::TooNarrow { width });
        }
        if height < cfg.min_face_height {
            return Err(Rejection::TooShort { height });
        }

        let ratio = width / height;
        if ratio < cfg.min_aspect_ratio || ratio > cfg.max_aspect_ratio {
            return Err(Rejection::AspectRatio { ratio });
        }

        let center_x = (bbox.x1 + bbox.x2) / 2.0 / frame_w;
        let center_y = (bbox.y1 + bbox.y2) / 2.0 / frame_h;
        let margin = cfg.min_center_margin;
        if center_x < margin || center_x > 1.0 - margin
            || center_y < margin || center_y > 1.0 - margin
        {
            return Err(Rejection::OffCenter { center_x, center_y });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: (u32, u32) = (1280, 720);

    fn gate() -> AdmissionGate {
        AdmissionGate::new(AdmissionConfig::default())
    }

    /// Box of the given size centered in `FRAME`.
    fn centered(width: f32, height: f32) -> FaceBox {
        let cx = FRAME.0 as f32 / 2.0;
        let cy = FRAME.1 as f32 / 2.0;
        FaceBox::new(cx - width / 2.0, cy - height / 2.0, cx + width / 2.0, cy + height / 2.0, 0.9)
    }

    #[test]
    fn test_typical_face_admitted() {
        assert!(gate().admit(FRAME, &centered(200.0, 220.0), 0.9));
    }

    #[test]
    fn test_min_width_boundary() {
        // 150 x 170 clears the 25000 area floor
        assert!(gate().admit(FRAME, &centered(150.0, 170.0), 0.9));
        assert_eq!(
            gate().evaluate(FRAME, &centered(149.0, 170.0), 0.9),
            Err(Rejection::TooNarrow { width: 149.0 })
        );
    }

    #[test]
    fn test_min_height_boundary() {
        assert!(gate().admit(FRAME, &centered(170.0, 150.0), 0.9));
        assert_eq!(
            gate().evaluate(FRAME, &centered(170.0, 149.0), 0.9),
            Err(Rejection::TooShort { height: 149.0 })
        );
    }

    #[test]
    fn test_aspect_ratio_boundary() {
        assert!(gate().admit(FRAME, &centered(160.0, 320.0), 0.9));
        assert!(!gate().admit(FRAME, &centered(160.0, 320.5), 0.9));

        assert!(gate().admit(FRAME, &centered(300.0, 200.0), 0.9));
        assert!(!gate().admit(FRAME, &centered(301.0, 200.0), 0.9));
    }

    #[test]
    fn test_area_and_confidence() {
        assert!(matches!(
            gate().evaluate(FRAME, &centered(150.0, 150.0), 0.9),
            Err(Rejection::AreaTooSmall { .. })
        ));
        assert!(gate().admit(FRAME, &centered(200.0, 200.0), 0.5));
        assert_eq!(
            gate().evaluate(FRAME, &centered(200.0, 200.0), 0.49),
            Err(Rejection::LowConfidence { confidence: 0.49 })
        );
    }

    #[test]
    fn test_center_margin() {
        // Center at exactly 15% of the width is still admitted
        let x_center = 0.15 * FRAME.0 as f32;
        let on_margin = FaceBox::new(x_center - 100.0, 260.0, x_center + 100.0, 460.0, 0.9);
        assert!(gate().admit(FRAME, &on_margin, 0.9));

        let near_edge = FaceBox::new(0.0, 260.0, 200.0, 460.0, 0.9);
        assert!(matches!(
            gate().evaluate(FRAME, &near_edge, 0.9),
            Err(Rejection::OffCenter { .. })
        ));

        let near_bottom = FaceBox::new(540.0, 520.0, 740.0, 720.0, 0.9);
        assert!(!gate().admit(FRAME, &near_bottom, 0.9));
    }

    #[test]
    fn test_empty_crop_rejected() {
        let outside = FaceBox::new(1400.0, 100.0, 1600.0, 300.0, 0.9);
        assert_eq!(gate().evaluate(FRAME, &outside, 0.9), Err(Rejection::EmptyCrop));

        let inverted = FaceBox::new(700.0, 400.0, 500.0, 200.0, 0.9);
        assert_eq!(gate().evaluate(FRAME, &inverted, 0.9), Err(Rejection::EmptyCrop));

        let nan = FaceBox::new(f32::NAN, 200.0, 800.0, 500.0, 0.9);
        assert_eq!(gate().evaluate(FRAME, &nan, 0.9), Err(Rejection::EmptyCrop));
    }
}
