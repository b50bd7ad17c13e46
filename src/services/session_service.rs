use std::sync::Arc;

use serde_json::json;

use crate::dto::attempt_dto::{
    BeginResponse, CheckOutcome, DeviceCheckResponse, HeartbeatResponse, StartResponse, ViolationKind,
    ViolationResponse,
};
use crate::error::{Error, Result};
use crate::models::assessment::Assessment;
use crate::models::attempt::{Attempt, AttemptStatus, NewAttempt};
use crate::models::proctoring_event::{NewProctoringEvent, ProctoringEventKind};
use crate::models::session::{CheckState, CheckStatus, Device, Session};
use crate::storage::Store;
use crate::utils::time::{now, seconds_until};
use crate::utils::token::generate_session_token;

/// Pre-exam gate: consent, device checks and start. Owns the single live
/// session of an attempt.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn begin(&self, student_id: i64, assessment_id: i64) -> Result<BeginResponse> {
        let now = now();
        let assessment = self.load_assessment(assessment_id).await?;
        if !assessment.is_open_at(now) {
            return Err(Error::NotEligible(format!(
                "Assessment {} is not open at this time",
                assessment_id
            )));
        }
        if !self.store.is_audience_member(student_id, assessment_id).await? {
            return Err(Error::NotEligible(format!(
                "Student {} is not assigned to assessment {}",
                student_id, assessment_id
            )));
        }

        let (attempt, resumed) = match self.store.find_open_attempt(student_id, assessment_id).await? {
            Some(existing) => (existing, true),
            None => {
                if let Some(max) = assessment.max_attempts {
                    let used = self.store.count_attempts(student_id, assessment_id).await?;
                    if used >= max as i64 {
                        return Err(Error::NotEligible(format!(
                            "All {} attempts for assessment {} have been used",
                            max, assessment_id
                        )));
                    }
                }
                let questions = self.store.list_assessment_questions(assessment_id).await?;
                let attempt = self
                    .store
                    .open_attempt(NewAttempt {
                        assessment_id,
                        student_id,
                        total_questions: questions.len() as i32,
                        total_score: questions.iter().map(|q| q.points).sum(),
                        created_at: now,
                    })
                    .await?;
                (attempt, false)
            }
        };

        let token = generate_session_token();
        let session = self.store.open_session(attempt.id, &token, now).await?;
        tracing::info!(
            attempt_id = attempt.id,
            session_id = session.id,
            student_id,
            assessment_id,
            resumed,
            "session opened"
        );

        Ok(BeginResponse {
            attempt_id: attempt.id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            session_token: token,
            requires_camera: assessment.requires_camera,
            requires_microphone: assessment.requires_microphone,
            device_checks: session.device_checks.0,
            resumed,
        })
    }

    pub async fn record_device_check(
        &self,
        token: &str,
        student_id: i64,
        device: Device,
        outcome: CheckOutcome,
    ) -> Result<DeviceCheckResponse> {
        let (session, attempt) = self.resolve(token, student_id).await?;
        let now = now();
        let status = CheckStatus::from(outcome);
        let session = self
            .store
            .update_device_check(session.id, device, CheckState { status, at: Some(now) })
            .await?;

        let failed = status == CheckStatus::Failed;
        if failed {
            tracing::warn!(attempt_id = attempt.id, session_id = session.id, device = device.as_str(), "device check failed");
            self.store
                .record_proctoring_event(NewProctoringEvent {
                    attempt_id: attempt.id,
                    session_id: session.id,
                    kind: ProctoringEventKind::device_check_failed(device),
                    details: Some(json!({ "device": device.as_str() })),
                    created_at: now,
                })
                .await?;
        }

        let message = if failed {
            format!("The {} check failed. Fix the device and try again.", device.as_str())
        } else {
            format!("The {} check passed.", device.as_str())
        };
        Ok(DeviceCheckResponse {
            device,
            status,
            device_checks: session.device_checks.0,
            retry_allowed: failed,
            message,
        })
    }

    pub async fn start(&self, token: &str, student_id: i64) -> Result<StartResponse> {
        let (session, attempt) = self.resolve(token, student_id).await?;
        let now = now();
        let assessment = self.load_assessment(attempt.assessment_id).await?;
        if !assessment.is_open_at(now) {
            return Err(Error::WindowClosed(format!(
                "Assessment {} is outside its scheduled window",
                assessment.id
            )));
        }

        let checks = session.device_checks.0;
        let required = [
            (assessment.requires_microphone, Device::Microphone),
            (assessment.requires_camera, Device::Camera),
        ];
        for (needed, device) in required {
            if needed && !checks.passed(device) {
                return Err(Error::DeviceCheckIncomplete(format!(
                    "The {} check must succeed before starting",
                    device.as_str()
                )));
            }
        }

        let first_start = attempt.status == AttemptStatus::NotStarted;
        let attempt = self.store.mark_attempt_started(attempt.id, now).await?;
        if first_start {
            tracing::info!(attempt_id = attempt.id, session_id = session.id, "attempt started");
        }

        let deadline = attempt.started_at.map(|started| assessment.deadline_for(started));
        Ok(StartResponse {
            attempt_id: attempt.id,
            status: attempt.status,
            started_at: attempt.started_at,
            deadline,
            remaining_seconds: deadline.map(|d| seconds_until(d, now)).unwrap_or(0),
            total_questions: attempt.total_questions,
        })
    }

    pub async fn heartbeat(&self, token: &str, student_id: i64) -> Result<HeartbeatResponse> {
        let (_, attempt) = self.resolve(token, student_id).await?;
        let remaining = match (attempt.status, attempt.started_at) {
            (AttemptStatus::InProgress, Some(started)) => {
                let assessment = self.load_assessment(attempt.assessment_id).await?;
                Some(seconds_until(assessment.deadline_for(started), now()))
            }
            _ => None,
        };
        Ok(HeartbeatResponse { attempt_id: attempt.id, status: attempt.status, remaining_seconds: remaining })
    }

    pub async fn report_violation(
        &self,
        token: &str,
        student_id: i64,
        kind: ViolationKind,
        details: Option<serde_json::Value>,
    ) -> Result<ViolationResponse> {
        let (session, attempt) = self.resolve(token, student_id).await?;
        let event = self
            .store
            .record_proctoring_event(NewProctoringEvent {
                attempt_id: attempt.id,
                session_id: session.id,
                kind: kind.into(),
                details,
                created_at: now(),
            })
            .await?;
        tracing::info!(attempt_id = attempt.id, session_id = session.id, kind = ?kind, "proctoring violation recorded");
        Ok(ViolationResponse { recorded: true, event_id: event.id })
    }

    /// Active session for `token` together with its attempt, provided the
    /// attempt belongs to `student_id`. Refreshes the heartbeat.
    ///
    /// A token whose session was closed by finalize or expiry reports the
    /// attempt as no longer active. A token superseded by a newer session of
    /// a still-open attempt is `SessionNotFound`.
    pub async fn resolve(&self, token: &str, student_id: i64) -> Result<(Session, Attempt)> {
        let session = self
            .store
            .find_session_by_token(token)
            .await?
            .ok_or(Error::SessionNotFound)?;
        let attempt = self
            .store
            .get_attempt(session.attempt_id)
            .await?
            .filter(|a| a.student_id == student_id)
            .ok_or(Error::SessionNotFound)?;
        if !session.is_active {
            if attempt.status.is_open() {
                return Err(Error::SessionNotFound);
            }
            return Err(Error::AttemptNotActive(format!("Attempt {} is {}", attempt.id, attempt.status)));
        }
        self.store.touch_session(session.id, now(), None).await?;
        Ok((session, attempt))
    }

    async fn load_assessment(&self, assessment_id: i64) -> Result<Assessment> {
        self.store
            .get_assessment(assessment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Assessment {} not found", assessment_id)))
    }
}
