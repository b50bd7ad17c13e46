use std::sync::Arc;

use crate::dto::attempt_dto::{FlagResponse, SaveAnswerResponse};
use crate::error::{Error, Result};
use crate::models::answer::AnswerUpsert;
use crate::models::assessment::AssessmentQuestion;
use crate::services::attempt_service::{ensure_writable, load_assessment};
use crate::services::grading_service::GradingService;
use crate::storage::Store;
use crate::utils::time::now;

/// MCQ answer path. Correctness is always derived from the stored question.
#[derive(Clone)]
pub struct AnswerService {
    store: Arc<dyn Store>,
}

impl AnswerService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn save_mcq_answer(
        &self,
        attempt_id: i64,
        assessment_question_id: i64,
        selected_option_ids: Vec<i64>,
        time_taken_seconds: i32,
    ) -> Result<SaveAnswerResponse> {
        let now = now();
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        let assessment = load_assessment(self.store.as_ref(), attempt.assessment_id).await?;
        ensure_writable(&attempt, &assessment, now)?;

        let question = self.load_question(attempt.assessment_id, assessment_question_id).await?;
        let grade = GradingService::grade_mcq(&question, &selected_option_ids)?;

        let mut selected = selected_option_ids;
        selected.sort_unstable();
        selected.dedup();

        let row = self
            .store
            .record_answer(AnswerUpsert {
                attempt_id,
                assessment_question_id,
                selected_option_ids: selected,
                is_correct: grade.is_correct,
                points_earned: grade.points_earned,
                time_taken_seconds: time_taken_seconds.max(0),
                answered_at: now,
            })
            .await?;

        tracing::debug!(
            attempt_id,
            assessment_question_id,
            is_correct = row.is_correct,
            points = %row.points_earned,
            "answer saved"
        );

        Ok(SaveAnswerResponse {
            assessment_question_id,
            is_correct: row.is_correct,
            points_earned: row.points_earned,
            max_points: grade.max_points,
            correct_option_ids: assessment.show_correct_answers.then_some(grade.correct_option_ids),
            answered_at: row.answered_at,
        })
    }

    /// Flags are review markers only and may change in any attempt status.
    pub async fn flag_question(
        &self,
        attempt_id: i64,
        assessment_question_id: i64,
        flagged: bool,
    ) -> Result<FlagResponse> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        self.load_question(attempt.assessment_id, assessment_question_id).await?;

        let row = self.store.set_answer_flag(attempt_id, assessment_question_id, flagged).await?;
        Ok(FlagResponse { assessment_question_id, is_flagged: row.is_flagged })
    }

    async fn load_question(&self, assessment_id: i64, assessment_question_id: i64) -> Result<AssessmentQuestion> {
        self.store
            .get_assessment_question(assessment_id, assessment_question_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Question {} is not part of assessment {}",
                    assessment_question_id, assessment_id
                ))
            })
    }
}
