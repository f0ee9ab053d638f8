pub mod admission;
pub mod detector;
pub mod embedding;
pub mod engine;
pub mod matcher;
pub mod onnx;
pub mod quality;
pub mod recognizer;
pub mod session;
pub mod stability;
pub mod status;
pub mod traits;

pub use admission::{AdmissionGate, Rejection};
pub use detector::{FaceBox, Observation, OnnxFaceDetector};
pub use embedding::{cosine_distance, cosine_similarity, Embedding};
pub use engine::{KioskEngine, TickReport};
pub use matcher::{IdentityMatcher, MatchResult};
pub use quality::FaceQuality;
pub use recognizer::OnnxFaceEmbedder;
pub use session::{Phase, Session, SessionMachine, SessionStatus};
pub use stability::{BufferSignal, StabilityBuffer};
pub use status::{StatusLine, StatusLog};
pub use traits::{FaceDetector, FaceEmbedder, IdentityStore};
