use serde::{Deserialize, Serialize};
use crate::core::embedding::{cosine_distance, Embedding};
use crate::storage::IdentityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub found: bool,
    pub identity_id: Option<IdentityId>,
    /// Distance to the winner, or to the nearest candidate on a miss.
    pub distance: f32,
}

impl MatchResult {
    fn miss(distance: f32) -> Self {
        Self { found: false, identity_id: None, distance }
    }
}

/// Nearest-neighbour lookup over enrolled primary embeddings.
#[derive(Debug, Clone, Copy)]
pub struct IdentityMatcher {
    threshold: f32,
}

impl IdentityMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Linear scan in `enrolled` order. A candidate wins only if it is under
    /// the threshold and strictly closer than the current best, so on equal
    /// distances the earlier enrollment keeps the match.
    pub fn find(&self, probe: &[f32], enrolled: &[(IdentityId, Embedding)]) -> MatchResult {
        let mut best: Option<(&IdentityId, f32)> = None;
        let mut nearest = 1.0f32;

        for (identity_id, embedding) in enrolled {
            let distance = cosine_distance(probe, embedding);
            nearest = nearest.min(distance);

            let closer = best.map_or(true, |(_, best_distance)| distance < best_distance);
            if distance < self.threshold && closer {
                best = Some((identity_id, distance));
            }
        }

        match best {
            Some((identity_id, distance)) => {
                tracing::debug!("Matched {} at distance {:.3}", identity_id, distance);
                MatchResult {
                    found: true,
                    identity_id: Some(identity_id.clone()),
                    distance,
                }
            }
            None => {
                tracing::debug!(
                    "No identity under {:.3} ({} candidates, nearest {:.3})",
                    self.threshold, enrolled.len(), nearest
                );
                MatchResult::miss(nearest)
            }
        }
    }
}
