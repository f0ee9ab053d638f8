use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{KioskError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub stability: StabilityConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_embedder_path")]
    pub embedder_path: PathBuf,
}

fn default_detector_path() -> PathBuf { PathBuf::from("models/yolov8n-face.onnx") }
fn default_embedder_path() -> PathBuf { PathBuf::from("models/arcface-r100.onnx") }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            embedder_path: default_embedder_path(),
        }
    }
}

/// Geometric limits a detection must satisfy before it is embedded.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default = "default_min_face_area")]
    pub min_face_area: f32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_min_face_side")]
    pub min_face_width: f32,
    #[serde(default = "default_min_face_side")]
    pub min_face_height: f32,
    #[serde(default = "default_min_aspect_ratio")]
    pub min_aspect_ratio: f32,
    #[serde(default = "default_max_aspect_ratio")]
    pub max_aspect_ratio: f32,
    /// Fraction of the frame the face center must keep away from every edge.
    #[serde(default = "default_min_center_margin")]
    pub min_center_margin: f32,
}

fn default_min_face_area() -> f32 { 25_000.0 }
fn default_min_confidence() -> f32 { 0.5 }
fn default_min_face_side() -> f32 { 150.0 }
fn default_min_aspect_ratio() -> f32 { 0.5 }
fn default_max_aspect_ratio() -> f32 { 1.5 }
fn default_min_center_margin() -> f32 { 0.15 }

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            min_face_area: default_min_face_area(),
            min_confidence: default_min_confidence(),
            min_face_width: default_min_face_side(),
            min_face_height: default_min_face_side(),
            min_aspect_ratio: default_min_aspect_ratio(),
            max_aspect_ratio: default_max_aspect_ratio(),
            min_center_margin: default_min_center_margin(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StabilityConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Consecutive ticks without an admitted face before the buffer is cleared.
    #[serde(default = "default_absence_timeout")]
    pub absence_timeout: u32,
    /// Consecutive drifting ticks before the tracked face counts as changed.
    #[serde(default = "default_max_drift")]
    pub max_drift: u32,
}

// 15 fps capture, so one second of frames
fn default_buffer_size() -> usize { 15 }
fn default_absence_timeout() -> u32 { 15 }
fn default_max_drift() -> u32 { 5 }

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            absence_timeout: default_absence_timeout(),
            max_drift: default_max_drift(),
        }
    }
}

/// Which embedding is looked up (and enrolled) on a stable edge.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeSource {
    #[default]
    Current,
    Reference,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Cosine distance under which two embeddings are the same face.
    /// Shared by the matcher and by drift detection.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub probe: ProbeSource,
}

fn default_similarity_threshold() -> f32 { 0.4 }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            probe: ProbeSource::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou_threshold: f32,
    /// Raw score floor applied before NMS; admission applies the real limit.
    #[serde(default = "default_raw_confidence")]
    pub raw_confidence_floor: f32,
}

fn default_detector_input() -> u32 { 640 }
fn default_nms_iou() -> f32 { 0.45 }
fn default_raw_confidence() -> f32 { 0.25 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            nms_iou_threshold: default_nms_iou(),
            raw_confidence_floor: default_raw_confidence(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbedderConfig {
    #[serde(default = "default_embedder_input")]
    pub input_size: u32,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

fn default_embedder_input() -> u32 { 112 }
fn default_embedding_dim() -> usize { 512 }

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            input_size: default_embedder_input(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_lines() -> usize { 20 }

impl Default for StatusConfig {
    fn default() -> Self {
        Self { max_lines: default_max_lines() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KioskError::Config(format!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| KioskError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let admission = &self.admission;
        if admission.min_confidence < 0.0 || admission.min_confidence > 1.0 {
            return Err(KioskError::Config(format!(
                "Minimum confidence must be between 0.0 and 1.0, got {}",
                admission.min_confidence
            )));
        }
        if admission.min_face_width <= 0.0 || admission.min_face_height <= 0.0 {
            return Err(KioskError::Config(format!(
                "Minimum face size must be positive, got {}x{}",
                admission.min_face_width, admission.min_face_height
            )));
        }
        if admission.min_aspect_ratio <= 0.0 || admission.min_aspect_ratio > admission.max_aspect_ratio {
            return Err(KioskError::Config(format!(
                "Aspect ratio band is invalid: [{}, {}]",
                admission.min_aspect_ratio, admission.max_aspect_ratio
            )));
        }
        if admission.min_center_margin < 0.0 || admission.min_center_margin >= 0.5 {
            return Err(KioskError::Config(format!(
                "Center margin must be in [0.0, 0.5), got {}", admission.min_center_margin
            )));
        }

        if self.stability.buffer_size == 0 || self.stability.buffer_size > 300 {
            return Err(KioskError::Config(format!(
                "Buffer size must be between 1 and 300, got {}", self.stability.buffer_size
            )));
        }
        if self.stability.absence_timeout == 0 {
            return Err(KioskError::Config("Absence timeout must be at least 1 tick".into()));
        }
        if self.stability.max_drift == 0 {
            return Err(KioskError::Config("Drift limit must be at least 1 tick".into()));
        }

        if self.matching.similarity_threshold <= 0.0 || self.matching.similarity_threshold > 2.0 {
            return Err(KioskError::Config(format!(
                "Similarity threshold must be in (0.0, 2.0], got {}",
                self.matching.similarity_threshold
            )));
        }

        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(KioskError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(KioskError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }

        if self.embedder.input_size == 0 || self.embedder.input_size > 1024 {
            return Err(KioskError::Config(format!(
                "Embedder input size must be between 1 and 1024, got {}",
                self.embedder.input_size
            )));
        }
        if self.embedder.embedding_dim == 0 {
            return Err(KioskError::Config("Embedding dimension must be positive".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stability.buffer_size, 15);
        assert_eq!(config.stability.max_drift, 5);
        assert_eq!(config.matching.similarity_threshold, 0.4);
        assert_eq!(config.admission.min_face_area, 25_000.0);
        assert_eq!(config.matching.probe, ProbeSource::Current);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [stability]
            buffer_size = 5
            absence_timeout = 5

            [matching]
            probe = "reference"
            "#,
        ).unwrap();

        assert_eq!(config.stability.buffer_size, 5);
        assert_eq!(config.stability.absence_timeout, 5);
        assert_eq!(config.stability.max_drift, 5);
        assert_eq!(config.matching.probe, ProbeSource::Reference);
        assert_eq!(config.admission.min_face_width, 150.0);
    }

    #[test]
    fn test_rejects_inverted_aspect_band() {
        let mut config = Config::default();
        config.admission.min_aspect_ratio = 2.0;
        assert!(matches!(config.validate(), Err(KioskError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let result = Config::from_toml_str("[stability]\nbuffer_size = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = Config::from_toml_str(include_str!("../../configs/kiosk.toml")).unwrap();
        assert_eq!(config.stability.buffer_size, default_buffer_size());
        assert_eq!(config.detector.nms_iou_threshold, 0.45);
        assert_eq!(config.embedder.embedding_dim, 512);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load_from_path(Path::new("/nonexistent/kiosk.toml"));
        assert!(matches!(result, Err(KioskError::Config(_))));
    }
}
