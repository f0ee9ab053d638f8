use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Enrollment failed: {0}")]
    Enrollment(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KioskError>;
