use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    answer::{AnswerUpsert, AttemptAnswer},
    assessment::{Assessment, AssessmentQuestion},
    attempt::{Attempt, NewAttempt},
    coding_submission::{CodingSubmission, NewCodingSubmission},
    proctoring_event::{NewProctoringEvent, ProctoringEvent},
    session::{CheckState, Device, Session},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of finalizing an attempt.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub attempt: Attempt,
    /// The attempt was already evaluated; nothing was recomputed.
    pub already_finalized: bool,
}

/// Persistence interface for the attempt engine.
///
/// Operations that touch attempt counters are atomic: the answer or
/// submission row and the counter delta commit together, and writes for the
/// same attempt are serialized. Implementations must hold no state that
/// outlives the underlying store.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // Assessment definitions
    async fn get_assessment(&self, assessment_id: i64) -> Result<Option<Assessment>>;
    /// Questions in display order.
    async fn list_assessment_questions(&self, assessment_id: i64) -> Result<Vec<AssessmentQuestion>>;
    async fn get_assessment_question(
        &self,
        assessment_id: i64,
        assessment_question_id: i64,
    ) -> Result<Option<AssessmentQuestion>>;
    async fn is_audience_member(&self, student_id: i64, assessment_id: i64) -> Result<bool>;

    // Attempts
    async fn find_open_attempt(&self, student_id: i64, assessment_id: i64) -> Result<Option<Attempt>>;
    async fn count_attempts(&self, student_id: i64, assessment_id: i64) -> Result<i64>;
    /// Creates a `not_started` attempt numbered after the previous ones, or
    /// returns the open attempt if a concurrent call already created it.
    async fn open_attempt(&self, new: NewAttempt) -> Result<Attempt>;
    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>>;
    /// `not_started -> in_progress`, stamping `started_at`. No-op when
    /// already in progress; `AttemptNotActive` otherwise.
    async fn mark_attempt_started(&self, attempt_id: i64, now: DateTime<Utc>) -> Result<Attempt>;

    // Sessions
    /// Deactivates any active session of the attempt, then inserts a new one.
    async fn open_session(&self, attempt_id: i64, token: &str, now: DateTime<Utc>) -> Result<Session>;
    /// Session for `token`, active or closed.
    async fn find_session_by_token(&self, token: &str) -> Result<Option<Session>>;
    async fn list_sessions(&self, attempt_id: i64) -> Result<Vec<Session>>;
    async fn update_device_check(&self, session_id: i64, device: Device, state: CheckState) -> Result<Session>;
    /// Stamps the heartbeat and raises the round indicator to at least `round`.
    async fn touch_session(&self, session_id: i64, now: DateTime<Utc>, round: Option<i32>) -> Result<()>;

    // Proctoring audit
    async fn record_proctoring_event(&self, event: NewProctoringEvent) -> Result<ProctoringEvent>;
    async fn list_proctoring_events(&self, attempt_id: i64) -> Result<Vec<ProctoringEvent>>;

    // MCQ answers
    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<AttemptAnswer>>;
    /// Upserts the answer and moves the attempt counters by the difference
    /// between the old and new row. Fails `AttemptNotActive` unless the
    /// attempt is in progress.
    async fn record_answer(&self, answer: AnswerUpsert) -> Result<AttemptAnswer>;
    /// Metadata only; allowed in any attempt status.
    async fn set_answer_flag(
        &self,
        attempt_id: i64,
        assessment_question_id: i64,
        flagged: bool,
    ) -> Result<AttemptAnswer>;

    // Coding submissions
    /// Stores a trial run. Never final, never scored.
    async fn record_coding_run(&self, run: NewCodingSubmission) -> Result<CodingSubmission>;
    /// Stores the final submission for a question, demoting any previous
    /// final one, and moves the attempt counters by the difference.
    async fn record_final_submission(&self, submission: NewCodingSubmission) -> Result<CodingSubmission>;
    async fn list_final_submissions(&self, attempt_id: i64) -> Result<Vec<CodingSubmission>>;

    // Finalization and deadlines
    /// Recomputes and freezes the score, moves the attempt to `evaluated` and
    /// closes its sessions. Returns the stored attempt untouched if it is
    /// already evaluated.
    async fn finalize_attempt(&self, attempt_id: i64, now: DateTime<Utc>) -> Result<Finalized>;
    /// In-progress attempts whose personal time ran out while the window is open.
    async fn list_overdue_attempts(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;
    /// Moves open attempts of closed assessments to `expired`; returns how many.
    async fn expire_attempts(&self, now: DateTime<Utc>) -> Result<u64>;
}
