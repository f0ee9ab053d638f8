use std::collections::VecDeque;
use crate::common::config::StabilityConfig;
use crate::core::embedding::{cosine_distance, l2_normalize, mean_embedding, Embedding};

/// Outcome of feeding one tick into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSignal {
    /// Nothing actionable this tick.
    NotStable,
    /// The window filled with a consistent face and a reference was just set.
    /// Reported once per uninterrupted run.
    Stable,
    /// Drift limit reached; the window now holds only the current embedding.
    FaceChanged,
    /// Absence timeout reached; everything was cleared.
    Reset,
}

/// Sliding window of recent embeddings for the face currently in view.
#[derive(Debug, Clone)]
pub struct StabilityBuffer {
    window: VecDeque<Embedding>,
    capacity: usize,
    reference: Option<Embedding>,
    drift_count: u32,
    absence_count: u32,
    face_changed: bool,
    absence_timeout: u32,
    max_drift: u32,
    threshold: f32,
}

impl StabilityBuffer {
    pub fn new(config: &StabilityConfig, similarity_threshold: f32) -> Self {
        let capacity = config.buffer_size.max(1);
        Self {
            window: VecDeque::with_capacity(capacity + 1),
            capacity,
            reference: None,
            drift_count: 0,
            absence_count: 0,
            face_changed: false,
            absence_timeout: config.absence_timeout,
            max_drift: config.max_drift,
            threshold: similarity_threshold,
        }
    }

    /// Feed one tick: `Some` for an admitted, embedded face, `None` otherwise.
    pub fn update(&mut self, current: Option<Embedding>) -> BufferSignal {
        let current = match current {
            Some(current) => current,
            None => return self.on_absent(),
        };

        self.absence_count = 0;

        if self.window.is_empty() {
            self.window.push_back(current);
            return BufferSignal::NotStable;
        }

        if let Some(reference) = &self.reference {
            let distance = cosine_distance(&current, reference);
            if distance > self.threshold {
                self.drift_count += 1;
                tracing::debug!(
                    "Drift {:.3} from reference ({}/{})",
                    distance, self.drift_count, self.max_drift
                );
                if self.drift_count >= self.max_drift {
                    self.reseed(current);
                    return BufferSignal::FaceChanged;
                }
            } else {
                self.drift_count = 0;
            }
        }

        self.window.push_back(current);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        if self.window.len() == self.capacity && self.reference.is_none() && self.drift_count == 0 {
            let mut reference = mean_embedding(self.window.iter());
            l2_normalize(&mut reference);
            self.reference = Some(reference);
            return BufferSignal::Stable;
        }

        BufferSignal::NotStable
    }

    fn on_absent(&mut self) -> BufferSignal {
        self.absence_count += 1;
        if self.absence_count >= self.absence_timeout {
            self.reset();
            return BufferSignal::Reset;
        }
        BufferSignal::NotStable
    }

    fn reseed(&mut self, seed: Embedding) {
        self.window.clear();
        self.window.push_back(seed);
        self.reference = None;
        self.drift_count = 0;
        self.face_changed = true;
    }

    /// Clears the window, reference and both counters.
    pub fn reset(&mut self) {
        self.window.clear();
        self.reference = None;
        self.drift_count = 0;
        self.absence_count = 0;
        self.face_changed = false;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reference(&self) -> Option<&Embedding> {
        self.reference.as_ref()
    }

    pub fn drift_count(&self) -> u32 {
        self.drift_count
    }

    pub fn absence_count(&self) -> u32 {
        self.absence_count
    }

    /// Set by a drift reseed, cleared by a full reset.
    pub fn face_changed(&self) -> bool {
        self.face_changed
    }

    pub fn window(&self) -> impl Iterator<Item = &Embedding> {
        self.window.iter()
    }
}
