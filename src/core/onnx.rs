use crate::common::{KioskError, Result};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolves a configured model path against `models_base` when relative.
pub fn resolve_model_path(path: &Path, models_base: Option<&Path>) -> PathBuf {
    match models_base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

pub fn load_session(name: &str, model_path: &Path, optimization_level: u32) -> Result<(Arc<Environment>, Session)> {
    let environment = Arc::new(
        Environment::builder()
            .with_name(name)
            .build()
            .map_err(|e| KioskError::Model(format!("Failed to create environment: {}", e)))?
    );

    if !model_path.exists() {
        return Err(KioskError::Model(
            format!("{} model not found at: {:?}", name, model_path)
        ));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let session = SessionBuilder::new(&environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;

    tracing::debug!("Loaded {} model from {:?}", name, model_path);
    Ok((environment, session))
}
