// Core modules
pub mod core;
pub mod storage;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, KioskError, Result};
pub use core::{
    AdmissionGate, Embedding, FaceBox, FaceDetector, FaceEmbedder, IdentityMatcher,
    IdentityStore, KioskEngine, MatchResult, Observation, OnnxFaceDetector,
    OnnxFaceEmbedder, Phase, Session, SessionStatus, StabilityBuffer, TickReport,
};
pub use storage::{FileIdentityStore, IdentityId, IdentityRecord, MemoryIdentityStore};
