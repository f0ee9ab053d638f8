use crate::common::{Config, KioskError, Result};
use crate::core::detector::FaceBox;
use crate::core::embedding::{l2_normalize, Embedding};
use crate::core::onnx::{load_session, resolve_model_path};
use crate::core::traits::FaceEmbedder;
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

/// ArcFace-style embedder: 112x112 RGB in, unit-length embedding out.
pub struct OnnxFaceEmbedder {
    session: Session,
    _environment: Arc<Environment>,
    config: Config,
}

impl OnnxFaceEmbedder {
    pub fn new_with_model_path(config: &Config, models_base: Option<&Path>) -> Result<Self> {
        let model_path = resolve_model_path(&config.models.embedder_path, models_base);
        let (environment, session) =
            load_session("face_embedder", &model_path, config.performance.optimization_level)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = img.to_rgb8();
        let size = self.config.embedder.input_size as usize;
        let mut array = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                array[[0, c, y, x]] = normalize_pixel(pixel[c]);
            }
        }

        array
    }
}

/// Maps a channel value into `[-1, 1]`.
fn normalize_pixel(value: u8) -> f32 {
    (value as f32 / 255.0 - 0.5) / 0.5
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn embed(&self, frame: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let face_img = face.crop(frame).ok_or_else(|| {
            KioskError::Embedding(format!(
                "Face box ({:.0},{:.0})-({:.0},{:.0}) lies outside the frame",
                face.x1, face.y1, face.x2, face.y2
            ))
        })?;

        let size = self.config.embedder.input_size;
        let resized = face_img.resize_exact(size, size, FilterType::Triangle);

        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        let output = outputs
            .first()
            .ok_or_else(|| KioskError::Embedding("Embedder produced no output".to_string()))?;
        let mut embedding = output.try_extract::<f32>()?.view().to_owned().into_raw_vec();

        if embedding.len() != self.config.embedder.embedding_dim {
            return Err(KioskError::Embedding(format!(
                "Expected {}-dimensional embedding, model produced {}",
                self.config.embedder.embedding_dim,
                embedding.len()
            )));
        }

        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_normalization_range() {
        assert_eq!(normalize_pixel(0), -1.0);
        assert_eq!(normalize_pixel(255), 1.0);
        assert!(normalize_pixel(128).abs() < 0.01);
    }
}
