use std::sync::Arc;

use crate::dto::attempt_dto::{SubmitPreview, SubmitSummary};
use crate::error::Result;
use crate::models::attempt::AttemptStatus;
use crate::services::attempt_service::{load_assessment, load_owned_attempt};
use crate::services::grading_service::GradingService;
use crate::storage::Store;
use crate::utils::time::{now, seconds_until, whole_minutes};

#[derive(Clone)]
pub struct FinalizeService {
    store: Arc<dyn Store>,
}

impl FinalizeService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Freezes the attempt's score. Safe to repeat: an evaluated attempt is
    /// returned as stored with `already_finalized` set. Ownership is checked
    /// on every call.
    pub async fn submit(&self, attempt_id: i64, student_id: i64) -> Result<SubmitSummary> {
        let attempt = load_owned_attempt(self.store.as_ref(), attempt_id, student_id).await?;
        let done = self.store.finalize_attempt(attempt.id, now()).await?;
        let attempt = done.attempt;

        if done.already_finalized {
            tracing::debug!(attempt_id, "submit repeated on evaluated attempt");
        } else {
            tracing::info!(
                attempt_id,
                student_id,
                score = %attempt.score_obtained,
                total = %attempt.total_score,
                percentage = %attempt.percentage,
                time_taken_seconds = attempt.time_taken_seconds.unwrap_or(0),
                "attempt finalized"
            );
        }

        let time_taken = attempt.time_taken_seconds.unwrap_or(0);
        Ok(SubmitSummary {
            attempt_id: attempt.id,
            status: attempt.status,
            score_obtained: attempt.score_obtained,
            total_score: attempt.total_score,
            percentage: attempt.percentage,
            time_taken_seconds: time_taken,
            attended: attempt.answered_questions,
            unanswered: attempt.unanswered(),
            elapsed_minutes: whole_minutes(time_taken),
            submitted_at: attempt.submitted_at,
            already_finalized: done.already_finalized,
        })
    }

    /// Read-only summary shown before submitting. Counts come from the stored
    /// rows and elapsed time is live while the attempt is in progress.
    pub async fn submit_preview(&self, attempt_id: i64, student_id: i64) -> Result<SubmitPreview> {
        let attempt = load_owned_attempt(self.store.as_ref(), attempt_id, student_id).await?;
        let assessment = load_assessment(self.store.as_ref(), attempt.assessment_id).await?;
        let answers = self.store.list_answers(attempt.id).await?;
        let finals = self.store.list_final_submissions(attempt.id).await?;

        let attended = answers.iter().filter(|a| a.is_answered()).count() + finals.len();
        let flagged = answers.iter().filter(|a| a.is_flagged).count();

        let now = now();
        let (elapsed, remaining) = match attempt.status {
            AttemptStatus::InProgress => (
                GradingService::elapsed_seconds(&assessment, attempt.started_at, now),
                attempt.started_at.map(|s| seconds_until(assessment.deadline_for(s), now)),
            ),
            _ => (attempt.time_taken_seconds.unwrap_or(0), None),
        };

        let attended = attended as i32;
        Ok(SubmitPreview {
            attempt_id: attempt.id,
            status: attempt.status,
            total_questions: attempt.total_questions,
            attended,
            unanswered: (attempt.total_questions - attended).max(0),
            flagged: flagged as i32,
            elapsed_seconds: elapsed,
            elapsed_minutes: whole_minutes(elapsed),
            remaining_seconds: remaining,
        })
    }
}
