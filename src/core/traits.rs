//! Collaborators the engine consumes. The engine never knows which model or
//! storage backend sits behind them.

use image::DynamicImage;
use crate::common::Result;
use crate::core::detector::{FaceBox, Observation};
use crate::core::embedding::Embedding;
use crate::storage::{Enrollment, IdentityId, IdentityRecord};

pub trait FaceDetector {
    /// At most one candidate per frame.
    fn detect(&self, frame: &DynamicImage) -> Result<Observation>;
}

pub trait FaceEmbedder {
    fn embed(&self, frame: &DynamicImage, face: &FaceBox) -> Result<Embedding>;
}

pub trait IdentityStore {
    /// Owned snapshot of every primary embedding, in enrollment order.
    fn lookup_all_primary(&self) -> Result<Vec<(IdentityId, Embedding)>>;

    fn get(&self, identity_id: &IdentityId) -> Result<Option<IdentityRecord>>;

    /// Persists a new identity and returns it with its assigned id.
    /// Nothing is visible to `lookup_all_primary` unless this returns `Ok`.
    fn enroll(&mut self, enrollment: Enrollment) -> Result<IdentityRecord>;

    fn record_visit(&mut self, identity_id: &IdentityId) -> Result<()>;
}
