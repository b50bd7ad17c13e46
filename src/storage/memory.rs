use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use tokio::sync::Mutex;

use super::{Finalized, Store};
use crate::error::{Error, Result};
use crate::models::{
    answer::{AnswerUpsert, AttemptAnswer},
    assessment::{Assessment, AssessmentQuestion},
    attempt::{Attempt, AttemptStatus, NewAttempt},
    coding_submission::{CodingSubmission, NewCodingSubmission},
    proctoring_event::{NewProctoringEvent, ProctoringEvent},
    session::{CheckState, Device, DeviceChecks, Session},
};
use crate::services::grading_service::GradingService;

#[derive(Default)]
struct Tables {
    next_id: i64,
    assessments: HashMap<i64, Assessment>,
    questions: Vec<AssessmentQuestion>,
    audience: HashSet<(i64, i64)>,
    attempts: BTreeMap<i64, Attempt>,
    sessions: Vec<Session>,
    answers: Vec<AttemptAnswer>,
    submissions: Vec<CodingSubmission>,
    events: Vec<ProctoringEvent>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn attempt(&self, attempt_id: i64) -> Result<&Attempt> {
        self.attempts
            .get(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    fn attempt_mut(&mut self, attempt_id: i64) -> Result<&mut Attempt> {
        self.attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    fn require_in_progress(&self, attempt_id: i64) -> Result<()> {
        let attempt = self.attempt(attempt_id)?;
        if !attempt.status.accepts_answers() {
            return Err(Error::AttemptNotActive(format!(
                "Attempt {} is {}",
                attempt_id, attempt.status
            )));
        }
        Ok(())
    }

    fn questions_of(&self, assessment_id: i64) -> Vec<AssessmentQuestion> {
        let mut qs: Vec<AssessmentQuestion> = self
            .questions
            .iter()
            .filter(|q| q.assessment_id == assessment_id)
            .cloned()
            .collect();
        qs.sort_by_key(|q| (q.display_order, q.id));
        qs
    }

    fn close_sessions(&mut self, attempt_id: i64, now: DateTime<Utc>) {
        for s in self.sessions.iter_mut().filter(|s| s.attempt_id == attempt_id && s.is_active) {
            s.is_active = false;
            s.ended_at = Some(now);
        }
    }
}

/// In-process store behind a single lock. Every operation is one critical
/// section, which gives the same per-attempt serialization the Postgres
/// store gets from row locks.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_assessment(&self, assessment: Assessment) {
        let mut t = self.tables.lock().await;
        t.next_id = t.next_id.max(assessment.id);
        t.assessments.insert(assessment.id, assessment);
    }

    pub async fn insert_question(&self, question: AssessmentQuestion) {
        let mut t = self.tables.lock().await;
        t.next_id = t.next_id.max(question.id);
        t.questions.push(question);
    }

    pub async fn add_audience_member(&self, student_id: i64, assessment_id: i64) {
        self.tables.lock().await.audience.insert((student_id, assessment_id));
    }

    pub async fn list_coding_submissions(&self, attempt_id: i64) -> Vec<CodingSubmission> {
        let t = self.tables.lock().await;
        t.submissions.iter().filter(|s| s.attempt_id == attempt_id).cloned().collect()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_assessment(&self, assessment_id: i64) -> Result<Option<Assessment>> {
        Ok(self.tables.lock().await.assessments.get(&assessment_id).cloned())
    }

    async fn list_assessment_questions(&self, assessment_id: i64) -> Result<Vec<AssessmentQuestion>> {
        Ok(self.tables.lock().await.questions_of(assessment_id))
    }

    async fn get_assessment_question(
        &self,
        assessment_id: i64,
        assessment_question_id: i64,
    ) -> Result<Option<AssessmentQuestion>> {
        let t = self.tables.lock().await;
        Ok(t.questions
            .iter()
            .find(|q| q.assessment_id == assessment_id && q.id == assessment_question_id)
            .cloned())
    }

    async fn is_audience_member(&self, student_id: i64, assessment_id: i64) -> Result<bool> {
        Ok(self.tables.lock().await.audience.contains(&(student_id, assessment_id)))
    }

    async fn find_open_attempt(&self, student_id: i64, assessment_id: i64) -> Result<Option<Attempt>> {
        let t = self.tables.lock().await;
        Ok(t.attempts
            .values()
            .find(|a| a.student_id == student_id && a.assessment_id == assessment_id && a.status.is_open())
            .cloned())
    }

    async fn count_attempts(&self, student_id: i64, assessment_id: i64) -> Result<i64> {
        let t = self.tables.lock().await;
        Ok(t.attempts
            .values()
            .filter(|a| a.student_id == student_id && a.assessment_id == assessment_id)
            .count() as i64)
    }

    async fn open_attempt(&self, new: NewAttempt) -> Result<Attempt> {
        let mut t = self.tables.lock().await;
        let mut previous = 0;
        for a in t.attempts.values().filter(|a| a.student_id == new.student_id && a.assessment_id == new.assessment_id) {
            if a.status.is_open() {
                return Ok(a.clone());
            }
            previous = previous.max(a.attempt_number);
        }

        let attempt = Attempt {
            id: t.next_id(),
            assessment_id: new.assessment_id,
            student_id: new.student_id,
            attempt_number: previous + 1,
            status: AttemptStatus::NotStarted,
            started_at: None,
            submitted_at: None,
            total_questions: new.total_questions,
            answered_questions: 0,
            correct_answers: 0,
            wrong_answers: 0,
            skipped_questions: 0,
            score_obtained: Decimal::ZERO,
            total_score: new.total_score,
            percentage: Decimal::ZERO,
            time_taken_seconds: None,
            created_at: new.created_at,
        };
        t.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>> {
        Ok(self.tables.lock().await.attempts.get(&attempt_id).cloned())
    }

    async fn mark_attempt_started(&self, attempt_id: i64, now: DateTime<Utc>) -> Result<Attempt> {
        let mut t = self.tables.lock().await;
        let attempt = t.attempt_mut(attempt_id)?;
        match attempt.status {
            s if s.can_transition_to(AttemptStatus::InProgress) => {
                attempt.status = AttemptStatus::InProgress;
                attempt.started_at = Some(now);
            }
            AttemptStatus::InProgress => {}
            other => {
                return Err(Error::AttemptNotActive(format!("Attempt {} is {}", attempt_id, other)));
            }
        }
        Ok(attempt.clone())
    }

    async fn open_session(&self, attempt_id: i64, token: &str, now: DateTime<Utc>) -> Result<Session> {
        let mut t = self.tables.lock().await;
        let round = t
            .sessions
            .iter()
            .filter(|s| s.attempt_id == attempt_id)
            .map(|s| s.current_round)
            .max()
            .unwrap_or(0);
        t.close_sessions(attempt_id, now);
        let session = Session {
            id: t.next_id(),
            attempt_id,
            token: token.to_string(),
            current_round: round,
            device_checks: Json(DeviceChecks::default()),
            heartbeat_at: Some(now),
            is_active: true,
            created_at: now,
            ended_at: None,
        };
        t.sessions.push(session.clone());
        Ok(session)
    }

    async fn find_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        let t = self.tables.lock().await;
        Ok(t.sessions.iter().find(|s| s.token == token).cloned())
    }

    async fn list_sessions(&self, attempt_id: i64) -> Result<Vec<Session>> {
        let t = self.tables.lock().await;
        Ok(t.sessions.iter().filter(|s| s.attempt_id == attempt_id).cloned().collect())
    }

    async fn update_device_check(&self, session_id: i64, device: Device, state: CheckState) -> Result<Session> {
        let mut t = self.tables.lock().await;
        let session = t
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.is_active)
            .ok_or(Error::SessionNotFound)?;
        session.device_checks.0.set(device, state);
        Ok(session.clone())
    }

    async fn touch_session(&self, session_id: i64, now: DateTime<Utc>, round: Option<i32>) -> Result<()> {
        let mut t = self.tables.lock().await;
        let session = t
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.is_active)
            .ok_or(Error::SessionNotFound)?;
        session.heartbeat_at = Some(now);
        if let Some(round) = round {
            session.current_round = session.current_round.max(round);
        }
        Ok(())
    }

    async fn record_proctoring_event(&self, event: NewProctoringEvent) -> Result<ProctoringEvent> {
        let mut t = self.tables.lock().await;
        let row = ProctoringEvent {
            id: t.next_id(),
            attempt_id: event.attempt_id,
            session_id: event.session_id,
            kind: event.kind,
            details: event.details.map(Json),
            created_at: event.created_at,
        };
        t.events.push(row.clone());
        Ok(row)
    }

    async fn list_proctoring_events(&self, attempt_id: i64) -> Result<Vec<ProctoringEvent>> {
        let t = self.tables.lock().await;
        Ok(t.events.iter().filter(|e| e.attempt_id == attempt_id).cloned().collect())
    }

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<AttemptAnswer>> {
        let t = self.tables.lock().await;
        Ok(t.answers.iter().filter(|a| a.attempt_id == attempt_id).cloned().collect())
    }

    async fn record_answer(&self, answer: AnswerUpsert) -> Result<AttemptAnswer> {
        let mut t = self.tables.lock().await;
        t.require_in_progress(answer.attempt_id)?;

        let position = t.answers.iter().position(|a| {
            a.attempt_id == answer.attempt_id && a.assessment_question_id == answer.assessment_question_id
        });
        let previous = position.map(|i| t.answers[i].clone());
        let answered = !answer.selected_option_ids.is_empty();
        let row = AttemptAnswer {
            id: match &previous {
                Some(p) => p.id,
                None => t.next_id(),
            },
            attempt_id: answer.attempt_id,
            assessment_question_id: answer.assessment_question_id,
            selected_option_ids: answer.selected_option_ids,
            is_correct: answer.is_correct,
            points_earned: answer.points_earned,
            is_flagged: previous.as_ref().map(|p| p.is_flagged).unwrap_or(false),
            time_taken_seconds: answer.time_taken_seconds,
            answered_at: answered.then_some(answer.answered_at),
        };

        let delta = GradingService::answer_contribution(Some(&row))
            .delta_from(GradingService::answer_contribution(previous.as_ref()));
        delta.apply_to(t.attempt_mut(answer.attempt_id)?);

        match position {
            Some(i) => t.answers[i] = row.clone(),
            None => t.answers.push(row.clone()),
        }
        Ok(row)
    }

    async fn set_answer_flag(
        &self,
        attempt_id: i64,
        assessment_question_id: i64,
        flagged: bool,
    ) -> Result<AttemptAnswer> {
        let mut t = self.tables.lock().await;
        t.attempt(attempt_id)?;
        if let Some(existing) = t
            .answers
            .iter_mut()
            .find(|a| a.attempt_id == attempt_id && a.assessment_question_id == assessment_question_id)
        {
            existing.is_flagged = flagged;
            return Ok(existing.clone());
        }

        let row = AttemptAnswer {
            id: t.next_id(),
            attempt_id,
            assessment_question_id,
            selected_option_ids: Vec::new(),
            is_correct: false,
            points_earned: Decimal::ZERO,
            is_flagged: flagged,
            time_taken_seconds: 0,
            answered_at: None,
        };
        t.answers.push(row.clone());
        Ok(row)
    }

    async fn record_coding_run(&self, run: NewCodingSubmission) -> Result<CodingSubmission> {
        let mut t = self.tables.lock().await;
        t.attempt(run.attempt_id)?;
        let row = to_submission(t.next_id(), run, false);
        t.submissions.push(row.clone());
        Ok(row)
    }

    async fn record_final_submission(&self, submission: NewCodingSubmission) -> Result<CodingSubmission> {
        let mut t = self.tables.lock().await;
        t.require_in_progress(submission.attempt_id)?;

        let attempt_id = submission.attempt_id;
        let question_id = submission.assessment_question_id;
        let mut previous = None;
        for s in t.submissions.iter_mut().filter(|s| {
            s.attempt_id == attempt_id && s.assessment_question_id == question_id && s.is_final_submission
        }) {
            previous = Some(s.clone());
            s.is_final_submission = false;
        }

        let row = to_submission(t.next_id(), submission, true);
        let delta = GradingService::submission_contribution(Some(&row))
            .delta_from(GradingService::submission_contribution(previous.as_ref()));
        delta.apply_to(t.attempt_mut(attempt_id)?);
        t.submissions.push(row.clone());
        Ok(row)
    }

    async fn list_final_submissions(&self, attempt_id: i64) -> Result<Vec<CodingSubmission>> {
        let t = self.tables.lock().await;
        Ok(t.submissions
            .iter()
            .filter(|s| s.attempt_id == attempt_id && s.is_final_submission)
            .cloned()
            .collect())
    }

    async fn finalize_attempt(&self, attempt_id: i64, now: DateTime<Utc>) -> Result<Finalized> {
        let mut t = self.tables.lock().await;
        let attempt = t.attempt(attempt_id)?.clone();
        match attempt.status {
            AttemptStatus::Evaluated => {
                return Ok(Finalized { attempt, already_finalized: true });
            }
            s if s.can_transition_to(AttemptStatus::Evaluated) => {}
            other => {
                return Err(Error::AttemptNotActive(format!("Attempt {} is {}", attempt_id, other)));
            }
        }

        let assessment = t
            .assessments
            .get(&attempt.assessment_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Assessment {} not found", attempt.assessment_id)))?;
        let questions = t.questions_of(attempt.assessment_id);
        let answers: Vec<AttemptAnswer> =
            t.answers.iter().filter(|a| a.attempt_id == attempt_id).cloned().collect();
        let finals: Vec<CodingSubmission> = t
            .submissions
            .iter()
            .filter(|s| s.attempt_id == attempt_id && s.is_final_submission)
            .cloned()
            .collect();
        let tally = GradingService::tally(&assessment, &questions, &answers, &finals, attempt.started_at, now);

        let row = t.attempt_mut(attempt_id)?;
        row.status = AttemptStatus::Evaluated;
        row.submitted_at = Some(now);
        row.total_questions = questions.len() as i32;
        row.answered_questions = tally.answered;
        row.correct_answers = tally.correct;
        row.wrong_answers = tally.wrong;
        row.skipped_questions = tally.skipped;
        row.score_obtained = tally.score_obtained;
        row.total_score = tally.total_score;
        row.percentage = tally.percentage;
        row.time_taken_seconds = Some(tally.time_taken_seconds);
        let attempt = row.clone();

        t.close_sessions(attempt_id, now);
        Ok(Finalized { attempt, already_finalized: false })
    }

    async fn list_overdue_attempts(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let t = self.tables.lock().await;
        Ok(t.attempts
            .values()
            .filter(|a| a.status == AttemptStatus::InProgress)
            .filter_map(|a| {
                let assessment = t.assessments.get(&a.assessment_id)?;
                let started = a.started_at?;
                (assessment.end_time > now && assessment.deadline_for(started) <= now).then_some(a.id)
            })
            .collect())
    }

    async fn expire_attempts(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let closed: HashSet<i64> = t
            .assessments
            .values()
            .filter(|a| a.end_time <= now)
            .map(|a| a.id)
            .collect();
        let expired: Vec<i64> = t
            .attempts
            .values_mut()
            .filter(|a| a.status.can_transition_to(AttemptStatus::Expired) && closed.contains(&a.assessment_id))
            .map(|a| {
                a.status = AttemptStatus::Expired;
                a.id
            })
            .collect();
        for id in &expired {
            t.close_sessions(*id, now);
        }
        Ok(expired.len() as u64)
    }
}

fn to_submission(id: i64, new: NewCodingSubmission, is_final: bool) -> CodingSubmission {
    CodingSubmission {
        id,
        attempt_id: new.attempt_id,
        assessment_question_id: new.assessment_question_id,
        language: new.language,
        source_code: new.source_code,
        judge_status: new.judge_status,
        judge_run_id: new.judge_run_id,
        tests_passed: new.tests_passed,
        tests_total: new.tests_total,
        points_earned: if is_final { new.points_earned } else { Decimal::ZERO },
        max_points: new.max_points,
        outputs: Json(new.outputs),
        is_final_submission: is_final,
        submitted_at: new.submitted_at,
    }
}
