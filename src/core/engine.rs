use chrono::Local;
use image::DynamicImage;
use serde::Serialize;
use std::collections::VecDeque;

use crate::common::{Config, KioskError, Result};
use crate::core::admission::AdmissionGate;
use crate::core::detector::{FaceBox, Observation};
use crate::core::embedding::Embedding;
use crate::core::matcher::{IdentityMatcher, MatchResult};
use crate::core::quality::FaceQuality;
use crate::core::session::{Effect, Event, Notice, Phase, Session, SessionMachine, Tick};
use crate::core::status::StatusLog;
use crate::core::traits::{FaceEmbedder, IdentityStore};
use crate::storage::{Enrollment, IdentityId, IdentityRecord};

/// What happened during one tick, for operators and the replay tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub phase: Phase,
    pub session: Session,
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_result: Option<MatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolled: Option<IdentityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
}

/// Face in view for the current tick; needed to crop the enrollment image.
struct Capture<'a> {
    frame: &'a DynamicImage,
    face: FaceBox,
}

/// Drives one kiosk: admission, embedding, the session machine and the
/// store, one tick at a time.
pub struct KioskEngine<E: FaceEmbedder, S: IdentityStore> {
    gate: AdmissionGate,
    embedder: E,
    store: S,
    matcher: IdentityMatcher,
    machine: SessionMachine,
    status: StatusLog,
}

impl<E: FaceEmbedder, S: IdentityStore> KioskEngine<E, S> {
    pub fn new(config: &Config, embedder: E, store: S) -> Self {
        Self {
            gate: AdmissionGate::new(config.admission.clone()),
            embedder,
            store,
            matcher: IdentityMatcher::new(config.matching.similarity_threshold),
            machine: SessionMachine::new(config),
            status: StatusLog::new(config.status.max_lines),
        }
    }

    /// Processes one frame and its detection.
    ///
    /// An embedder error aborts the tick before any state changes. Lookup and
    /// enrollment errors are returned after the machine has settled in `Idle`.
    pub fn tick(&mut self, frame: &DynamicImage, observation: &Observation) -> Result<TickReport> {
        let mut report = TickReport {
            phase: self.machine.phase(),
            session: self.machine.session().clone(),
            admitted: false,
            rejection: None,
            match_result: None,
            enrolled: None,
            status_line: None,
        };

        let (tick, capture) = match observation.face {
            Some(face) => match self.gate.evaluate((frame.width(), frame.height()), &face, face.confidence) {
                Ok(()) => {
                    let embedding = self.embedder.embed(frame, &face)?;
                    report.admitted = true;
                    (Tick::Face(embedding), Some(Capture { frame, face }))
                }
                Err(rejection) => {
                    tracing::debug!("Observation rejected: {}", rejection);
                    report.rejection = Some(rejection.to_string());
                    (Tick::Absent, None)
                }
            },
            None => (Tick::Absent, None),
        };

        let outcome = self.drive(Event::Tick(tick), capture.as_ref(), &mut report);

        report.phase = self.machine.phase();
        report.session = self.machine.session().clone();
        outcome.map(|()| report)
    }

    /// Counts the visit, then ends the active session for `identity_id`.
    /// Returns `false` when that identity holds no active session. If the
    /// visit cannot be stored the session stays active and the error is
    /// returned.
    pub fn complete_transaction(&mut self, identity_id: &IdentityId) -> Result<bool> {
        if self.machine.phase() != Phase::Active
            || self.machine.session().identity_id.as_ref() != Some(identity_id)
        {
            tracing::warn!("No active session for {}", identity_id);
            return Ok(false);
        }

        if let Err(e) = self.store.record_visit(identity_id) {
            tracing::error!("Failed to record visit for {}: {}", identity_id, e);
            self.status.report(format!("Could not record visit: {}", e));
            return Err(e);
        }

        let mut report = TickReport {
            phase: self.machine.phase(),
            session: self.machine.session().clone(),
            admitted: false,
            rejection: None,
            match_result: None,
            enrolled: None,
            status_line: None,
        };
        self.drive(Event::TransactionComplete(identity_id.clone()), None, &mut report)?;
        Ok(true)
    }

    /// Drops the session and the buffer without touching the store.
    pub fn reset_session(&mut self) {
        tracing::info!("Session reset");
        self.machine.handle(Event::Reset);
    }

    pub fn session(&self) -> &Session {
        self.machine.session()
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn status_log(&self) -> &StatusLog {
        &self.status
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs `event` and every effect it cascades into. The first collaborator
    /// error is returned once the machine has processed its failure event.
    fn drive(&mut self, event: Event, capture: Option<&Capture<'_>>, report: &mut TickReport) -> Result<()> {
        let mut pending: VecDeque<Effect> = self.machine.handle(event).into();
        let mut first_error: Option<KioskError> = None;

        while let Some(effect) = pending.pop_front() {
            let follow_up = match effect {
                Effect::Identify { probe } => match self.identify(&probe) {
                    Ok(result) => {
                        report.match_result = Some(result.clone());
                        Event::Matched(result)
                    }
                    Err(e) => {
                        tracing::error!("Identity lookup failed: {}", e);
                        let reason = e.to_string();
                        first_error.get_or_insert(e);
                        Event::LookupFailed(reason)
                    }
                },
                Effect::Enroll { probe } => match self.enroll(probe, capture) {
                    Ok(record) => {
                        report.enrolled = Some(record.identity_id.clone());
                        Event::Enrolled(record.identity_id)
                    }
                    Err(e) => {
                        tracing::error!("Enrollment failed: {}", e);
                        let reason = e.to_string();
                        first_error.get_or_insert(KioskError::Enrollment(reason.clone()));
                        Event::EnrollmentFailed(reason)
                    }
                },
                Effect::Notice(notice) => {
                    let message = self.render_notice(&notice);
                    if let Some(line) = self.status.report(message) {
                        report.status_line = Some(line.to_string());
                    }
                    continue;
                }
            };

            pending.extend(self.machine.handle(follow_up));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn identify(&self, probe: &Embedding) -> Result<MatchResult> {
        let enrolled = self.store.lookup_all_primary()?;
        let result = self.matcher.find(probe, &enrolled);

        if result.found {
            tracing::info!(
                "Matched {:?} at distance {:.3} among {} identities",
                result.identity_id, result.distance, enrolled.len()
            );
        } else {
            tracing::info!(
                "No match among {} identities (nearest {:.3})",
                enrolled.len(), result.distance
            );
        }
        Ok(result)
    }

    fn enroll(&mut self, probe: Embedding, capture: Option<&Capture<'_>>) -> Result<IdentityRecord> {
        let capture = capture
            .ok_or_else(|| KioskError::Enrollment("No face in view to enroll".to_string()))?;
        let face_image = capture
            .face
            .crop(capture.frame)
            .ok_or_else(|| KioskError::Enrollment("Face crop is empty".to_string()))?;

        let quality = FaceQuality::calculate(&face_image);
        tracing::debug!("Enrollment crop {}", quality.get_quality_assessment());

        let record = self.store.enroll(Enrollment {
            embedding: probe,
            face_image,
            confidence: capture.face.confidence,
            quality_score: quality.overall_score,
        })?;

        tracing::info!("Enrolled new identity {}", record.identity_id);
        Ok(record)
    }

    fn render_notice(&self, notice: &Notice) -> String {
        match notice {
            Notice::FaceDetected => "Face detected, hold still".to_string(),
            Notice::FaceLost => "Face not detected".to_string(),
            Notice::FaceChanged => "Different face detected, re-identifying".to_string(),
            Notice::SessionTimeout => "Session timed out".to_string(),
            Notice::Recognized(identity_id) => match self.store.get(identity_id) {
                Ok(Some(record)) => format!(
                    "Welcome back! Member since {}",
                    record.enrolled_at.with_timezone(&Local).format("%d-%m-%Y %H:%M:%S")
                ),
                Ok(None) => "Welcome back!".to_string(),
                Err(e) => {
                    tracing::warn!("Could not load {} for greeting: {}", identity_id, e);
                    "Welcome back!".to_string()
                }
            },
            Notice::Enrolled(_) => {
                "Welcome! You are a new patron. Please choose your favourite item!".to_string()
            }
            Notice::IdentificationFailed(reason) => format!("Identification failed: {}", reason),
            Notice::ThankYou => "Thank you for your visit!".to_string(),
        }
    }
}
