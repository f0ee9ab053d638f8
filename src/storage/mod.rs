pub mod identity_store;
pub mod memory_store;

pub use identity_store::FileIdentityStore;
pub use memory_store::MemoryIdentityStore;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use crate::core::embedding::Embedding;

/// Store-assigned identifier, monotonic within one store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("P{:06}", sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number encoded in a `P000123`-style id.
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix('P')?.parse().ok()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub version: u32,
    pub identity_id: IdentityId,
    pub sequence: u64,
    pub primary_embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
    #[serde(default)]
    pub face_image_path: Option<PathBuf>,
    pub confidence: f32,
    #[serde(default)]
    pub quality_score: f32,
    #[serde(default)]
    pub total_visits: u32,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Everything needed to persist a first-time patron.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub embedding: Embedding,
    pub face_image: DynamicImage,
    pub confidence: f32,
    pub quality_score: f32,
}

pub(crate) fn new_record(sequence: u64, enrollment: &Enrollment, face_image_path: Option<PathBuf>) -> IdentityRecord {
    let now = Utc::now();
    IdentityRecord {
        version: identity_store::STORAGE_VERSION,
        identity_id: IdentityId::from_sequence(sequence),
        sequence,
        primary_embedding: enrollment.embedding.clone(),
        enrolled_at: now,
        face_image_path,
        confidence: enrollment.confidence,
        quality_score: enrollment.quality_score,
        total_visits: 1,
        last_seen: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ids_sort_by_sequence() {
        let a = IdentityId::from_sequence(9);
        let b = IdentityId::from_sequence(10);
        assert_eq!(a.as_str(), "P000009");
        assert_eq!(b.to_string(), "P000010");
        assert!(a < b);
    }
}
