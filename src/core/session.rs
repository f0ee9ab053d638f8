//! Kiosk session state machine.
//!
//! The machine never calls out. Each [`Event`] returns the [`Effect`]s the
//! caller has to carry out, and the results of those calls come back in as
//! further events (`Matched`, `Enrolled`, `EnrollmentFailed`, ...). This keeps
//! every transition deterministic and testable without models or storage.

use serde::Serialize;
use crate::common::config::{Config, ProbeSource};
use crate::core::embedding::Embedding;
use crate::core::matcher::MatchResult;
use crate::core::stability::{BufferSignal, StabilityBuffer};
use crate::storage::IdentityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Recognized,
    NewIdentity,
}

/// What the presentation layer sees after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub identity_id: Option<IdentityId>,
    pub status: SessionStatus,
}

impl Session {
    pub fn waiting() -> Self {
        Self { identity_id: None, status: SessionStatus::Waiting }
    }

    fn clear(&mut self) {
        *self = Self::waiting();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::waiting()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No face tracked.
    Idle,
    /// Buffer accumulating.
    Tracking,
    /// First stable edge seen; waiting for the lookup result.
    Stabilized,
    /// Lookup missed; waiting for the store write.
    Enrolling,
    /// Session holds an identity until timeout or transaction completion.
    Active,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// No detection, or one the admission gate refused.
    Absent,
    Face(Embedding),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Tick(Tick),
    Matched(MatchResult),
    LookupFailed(String),
    Enrolled(IdentityId),
    EnrollmentFailed(String),
    TransactionComplete(IdentityId),
    Reset,
}

/// Transitions worth a status line.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    FaceDetected,
    FaceLost,
    FaceChanged,
    SessionTimeout,
    Recognized(IdentityId),
    Enrolled(IdentityId),
    IdentificationFailed(String),
    ThankYou,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run the matcher for `probe` and feed back `Matched` or `LookupFailed`.
    Identify { probe: Embedding },
    /// Persist `probe` as a new identity and feed back `Enrolled` or `EnrollmentFailed`.
    Enroll { probe: Embedding },
    Notice(Notice),
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    phase: Phase,
    session: Session,
    buffer: StabilityBuffer,
    probe_source: ProbeSource,
    pending_probe: Option<Embedding>,
    face_in_view: bool,
}

impl SessionMachine {
    pub fn new(config: &Config) -> Self {
        Self {
            phase: Phase::Idle,
            session: Session::waiting(),
            buffer: StabilityBuffer::new(&config.stability, config.matching.similarity_threshold),
            probe_source: config.matching.probe,
            pending_probe: None,
            face_in_view: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn buffer(&self) -> &StabilityBuffer {
        &self.buffer
    }

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let from = self.phase;
        let effects = match event {
            Event::Tick(Tick::Face(embedding)) => self.on_face(embedding),
            Event::Tick(Tick::Absent) => self.on_absent(),
            Event::Matched(result) => self.on_matched(result),
            Event::LookupFailed(reason) => self.on_failed(Phase::Stabilized, reason),
            Event::Enrolled(identity_id) => self.on_enrolled(identity_id),
            Event::EnrollmentFailed(reason) => self.on_failed(Phase::Enrolling, reason),
            Event::TransactionComplete(identity_id) => self.on_transaction_complete(identity_id),
            Event::Reset => {
                self.reset();
                vec![]
            }
        };

        if from != self.phase {
            tracing::debug!("Session phase {:?} -> {:?}", from, self.phase);
        }
        effects
    }

    fn on_face(&mut self, embedding: Embedding) -> Vec<Effect> {
        self.face_in_view = true;

        match self.buffer.update(Some(embedding.clone())) {
            BufferSignal::Stable => {
                let probe = match self.probe_source {
                    ProbeSource::Current => embedding,
                    ProbeSource::Reference => self.buffer.reference().cloned().unwrap_or(embedding),
                };
                self.phase = Phase::Stabilized;
                self.pending_probe = Some(probe.clone());
                vec![Effect::Identify { probe }]
            }
            BufferSignal::FaceChanged => {
                // The identity belonged to the previous face; the next stable
                // edge re-runs matching for whoever is in view now.
                if let Some(previous) = &self.session.identity_id {
                    tracing::info!("Face changed, dropping identity {}", previous);
                }
                self.session.clear();
                self.pending_probe = None;
                self.phase = Phase::Tracking;
                vec![Effect::Notice(Notice::FaceChanged)]
            }
            BufferSignal::NotStable | BufferSignal::Reset => {
                if self.phase == Phase::Idle {
                    self.phase = Phase::Tracking;
                    vec![Effect::Notice(Notice::FaceDetected)]
                } else {
                    vec![]
                }
            }
        }
    }

    fn on_absent(&mut self) -> Vec<Effect> {
        let was_in_view = std::mem::replace(&mut self.face_in_view, false);

        match self.buffer.update(None) {
            BufferSignal::Reset => {
                if self.phase == Phase::Idle {
                    return vec![];
                }
                let had_identity = self.session.identity_id.is_some();
                self.session.clear();
                self.pending_probe = None;
                self.phase = Phase::Idle;
                if had_identity {
                    vec![Effect::Notice(Notice::SessionTimeout)]
                } else {
                    vec![]
                }
            }
            _ => {
                if was_in_view && self.phase != Phase::Idle {
                    vec![Effect::Notice(Notice::FaceLost)]
                } else {
                    vec![]
                }
            }
        }
    }

    fn on_matched(&mut self, result: MatchResult) -> Vec<Effect> {
        if self.phase != Phase::Stabilized {
            tracing::warn!("Ignoring match result in phase {:?}", self.phase);
            return vec![];
        }

        let found = result.found;
        match result.identity_id.filter(|_| found) {
            Some(identity_id) => {
                self.pending_probe = None;
                self.session = Session {
                    identity_id: Some(identity_id.clone()),
                    status: SessionStatus::Recognized,
                };
                self.phase = Phase::Active;
                vec![Effect::Notice(Notice::Recognized(identity_id))]
            }
            None => match self.pending_probe.take() {
                Some(probe) => {
                    self.phase = Phase::Enrolling;
                    vec![Effect::Enroll { probe }]
                }
                None => {
                    tracing::warn!("Stabilized without a probe, returning to idle");
                    self.phase = Phase::Idle;
                    vec![]
                }
            },
        }
    }

    fn on_enrolled(&mut self, identity_id: IdentityId) -> Vec<Effect> {
        if self.phase != Phase::Enrolling {
            tracing::warn!("Ignoring enrollment of {} in phase {:?}", identity_id, self.phase);
            return vec![];
        }

        self.session = Session {
            identity_id: Some(identity_id.clone()),
            status: SessionStatus::NewIdentity,
        };
        self.phase = Phase::Active;
        vec![Effect::Notice(Notice::Enrolled(identity_id))]
    }

    /// A failed lookup or store write never reaches `Active`. The buffer is
    /// cleared so a fresh stable run retries.
    fn on_failed(&mut self, expected: Phase, reason: String) -> Vec<Effect> {
        if self.phase != expected {
            tracing::warn!("Ignoring failure in phase {:?}: {}", self.phase, reason);
            return vec![];
        }

        self.buffer.reset();
        self.session.clear();
        self.pending_probe = None;
        self.phase = Phase::Idle;
        vec![Effect::Notice(Notice::IdentificationFailed(reason))]
    }

    /// Fed by the caller once the visit has been persisted.
    fn on_transaction_complete(&mut self, identity_id: IdentityId) -> Vec<Effect> {
        if self.phase != Phase::Active || self.session.identity_id.as_ref() != Some(&identity_id) {
            tracing::warn!(
                "Transaction for {} does not match the active session ({:?})",
                identity_id, self.session.identity_id
            );
            return vec![];
        }

        // The buffer keeps its reference: the patron who just paid is not
        // re-identified while still in front of the kiosk.
        self.session.clear();
        self.phase = Phase::Idle;
        tracing::debug!("Transaction complete for {}", identity_id);
        vec![Effect::Notice(Notice::ThankYou)]
    }

    fn reset(&mut self) {
        self.buffer.reset();
        self.session.clear();
        self.pending_probe = None;
        self.face_in_view = false;
        self.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(buffer_size: usize, absence_timeout: u32, max_drift: u32) -> SessionMachine {
        let mut config = Config::default();
        config.stability.buffer_size = buffer_size;
        config.stability.absence_timeout = absence_timeout;
        config.stability.max_drift = max_drift;
        config.matching.similarity_threshold = 0.4;
        SessionMachine::new(&config)
    }

    fn unit(angle: f32) -> Embedding {
        vec![angle.cos(), angle.sin(), 0.0, 0.0]
    }

    fn face(angle: f32) -> Event {
        Event::Tick(Tick::Face(unit(angle)))
    }

    fn absent() -> Event {
        Event::Tick(Tick::Absent)
    }

    fn hit(seq: u64) -> Event {
        Event::Matched(MatchResult {
            found: true,
            identity_id: Some(IdentityId::from_sequence(seq)),
            distance: 0.1,
        })
    }

    fn miss() -> Event {
        Event::Matched(MatchResult { found: false, identity_id: None, distance: 0.9 })
    }

    fn identify_count(effects: &[Effect]) -> usize {
        effects.iter().filter(|e| matches!(e, Effect::Identify { .. })).count()
    }

    /// Drives `m` to a stable edge with `ticks` identical faces.
    fn stabilize(m: &mut SessionMachine, ticks: usize, angle: f32) -> Vec<Effect> {
        let mut all = Vec::new();
        for _ in 0..ticks {
            all.extend(m.handle(face(angle)));
        }
        all
    }

    #[test]
    fn test_idle_to_tracking() {
        let mut m = machine(5, 5, 5);
        let effects = m.handle(face(0.0));
        assert_eq!(m.phase(), Phase::Tracking);
        assert_eq!(effects, vec![Effect::Notice(Notice::FaceDetected)]);
        assert_eq!(m.handle(face(0.0)), vec![]);
    }

    #[test]
    fn test_stable_edge_identifies_once() {
        let mut m = machine(5, 5, 5);
        let effects = stabilize(&mut m, 5, 0.0);
        assert_eq!(identify_count(&effects), 1);
        assert_eq!(m.phase(), Phase::Stabilized);

        m.handle(hit(1));
        let more = stabilize(&mut m, 10, 0.0);
        assert_eq!(identify_count(&more), 0);
        assert_eq!(m.phase(), Phase::Active);
    }

    #[test]
    fn test_probe_is_current_embedding() {
        let mut m = machine(3, 5, 5);
        m.handle(face(0.0));
        m.handle(face(0.1));
        let effects = m.handle(face(0.2));
        assert_eq!(effects, vec![Effect::Identify { probe: unit(0.2) }]);
    }

    #[test]
    fn test_probe_from_reference() {
        let mut config = Config::default();
        config.stability.buffer_size = 2;
        config.matching.probe = ProbeSource::Reference;
        let mut m = SessionMachine::new(&config);

        m.handle(Event::Tick(Tick::Face(vec![2.0, 0.0])));
        let effects = m.handle(Event::Tick(Tick::Face(vec![0.0, 2.0])));
        match &effects[..] {
            [Effect::Identify { probe }] => {
                assert!((probe[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
            }
            other => panic!("unexpected effects {:?}", other),
        }
    }

    #[test]
    fn test_match_found_recognizes() {
        let mut m = machine(5, 5, 5);
        stabilize(&mut m, 5, 0.0);

        let effects = m.handle(hit(4));
        let id = IdentityId::from_sequence(4);
        assert_eq!(effects, vec![Effect::Notice(Notice::Recognized(id.clone()))]);
        assert_eq!(m.phase(), Phase::Active);
        assert_eq!(m.session().identity_id, Some(id));
        assert_eq!(m.session().status, SessionStatus::Recognized);
    }

    #[test]
    fn test_match_miss_enrolls() {
        let mut m = machine(5, 5, 5);
        stabilize(&mut m, 5, 0.3);

        let effects = m.handle(miss());
        assert_eq!(effects, vec![Effect::Enroll { probe: unit(0.3) }]);
        assert_eq!(m.phase(), Phase::Enrolling);
        assert_eq!(m.session().identity_id, None);

        let id = IdentityId::from_sequence(1);
        m.handle(Event::Enrolled(id.clone()));
        assert_eq!(m.phase(), Phase::Active);
        assert_eq!(m.session().identity_id, Some(id));
        assert_eq!(m.session().status, SessionStatus::NewIdentity);
    }

    #[test]
    fn test_enrollment_failure_never_activates() {
        let mut m = machine(5, 5, 5);
        stabilize(&mut m, 5, 0.0);
        m.handle(miss());

        let effects = m.handle(Event::EnrollmentFailed("disk full".into()));
        assert_eq!(
            effects,
            vec![Effect::Notice(Notice::IdentificationFailed("disk full".into()))]
        );
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.session(), &Session::waiting());
        assert!(m.buffer().is_empty());

        // A late success report cannot sneak the session into Active
        assert_eq!(m.handle(Event::Enrolled(IdentityId::from_sequence(1))), vec![]);
        assert_eq!(m.phase(), Phase::Idle);

        // A fresh stable run retries
        let retry = stabilize(&mut m, 5, 0.0);
        assert_eq!(identify_count(&retry), 1);
    }

    #[test]
    fn test_lookup_failure_returns_to_idle() {
        let mut m = machine(5, 5, 5);
        stabilize(&mut m, 5, 0.0);
        m.handle(Event::LookupFailed("store offline".into()));
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.session().identity_id, None);
    }

    #[test]
    fn test_drift_invalidates_active_identity() {
        let mut m = machine(5, 5, 2);
        stabilize(&mut m, 5, 0.0);
        m.handle(hit(1));
        assert_eq!(m.phase(), Phase::Active);

        m.handle(face(1.5));
        let effects = m.handle(face(1.5));
        assert_eq!(effects, vec![Effect::Notice(Notice::FaceChanged)]);
        assert_eq!(m.phase(), Phase::Tracking);
        assert_eq!(m.session(), &Session::waiting());

        // Four more ticks of the new face complete a fresh stable run
        let effects = stabilize(&mut m, 4, 1.5);
        assert_eq!(identify_count(&effects), 1);
        assert_eq!(m.phase(), Phase::Stabilized);
    }

    #[test]
    fn test_absence_timeout_ends_active_session() {
        let mut m = machine(5, 5, 5);
        stabilize(&mut m, 5, 0.0);
        m.handle(hit(2));

        let mut effects = Vec::new();
        for _ in 0..5 {
            effects.extend(m.handle(absent()));
        }
        assert_eq!(
            effects,
            vec![
                Effect::Notice(Notice::FaceLost),
                Effect::Notice(Notice::SessionTimeout),
            ]
        );
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.session(), &Session::waiting());
        assert!(m.buffer().is_empty());
    }

    #[test]
    fn test_tracking_times_out_quietly() {
        let mut m = machine(5, 3, 5);
        m.handle(face(0.0));
        m.handle(face(0.0));
        let mut effects = Vec::new();
        for _ in 0..3 {
            effects.extend(m.handle(absent()));
        }
        assert_eq!(effects, vec![Effect::Notice(Notice::FaceLost)]);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn test_absence_from_idle_is_noop() {
        let mut m = machine(5, 5, 5);
        for _ in 0..12 {
            assert_eq!(m.handle(absent()), vec![]);
            assert_eq!(m.phase(), Phase::Idle);
        }
        assert_eq!(m.session(), &Session::waiting());
    }

    #[test]
    fn test_transaction_complete() {
        let mut m = machine(5, 5, 5);
        stabilize(&mut m, 5, 0.0);
        m.handle(hit(3));
        let id = IdentityId::from_sequence(3);

        assert_eq!(m.handle(Event::TransactionComplete(IdentityId::from_sequence(8))), vec![]);
        assert_eq!(m.phase(), Phase::Active);

        let effects = m.handle(Event::TransactionComplete(id.clone()));
        assert_eq!(effects, vec![Effect::Notice(Notice::ThankYou)]);
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.session(), &Session::waiting());

        // Same patron still in view: tracked, not re-identified
        let effects = stabilize(&mut m, 10, 0.0);
        assert_eq!(identify_count(&effects), 0);
        assert_eq!(m.phase(), Phase::Tracking);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut m = machine(5, 5, 5);
        stabilize(&mut m, 5, 0.0);
        m.handle(hit(1));

        m.handle(Event::Reset);
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.session(), &Session::waiting());
        assert!(m.buffer().is_empty());
        assert!(m.buffer().reference().is_none());
    }

    #[test]
    fn test_stray_match_ignored() {
        let mut m = machine(5, 5, 5);
        assert_eq!(m.handle(hit(1)), vec![]);
        assert_eq!(m.phase(), Phase::Idle);
    }
}
