use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::dto::attempt_dto::{OptionView, QuestionBody, QuestionView, SampleCaseView};
use crate::error::{Error, Result};
use crate::models::assessment::{Assessment, AssessmentQuestion, QuestionContent};
use crate::models::attempt::Attempt;
use crate::models::session::Session;
use crate::storage::Store;
use crate::utils::time::{now, seconds_until};

/// Sample cases shown with a coding question and used by trial runs.
pub const SAMPLE_CASE_LIMIT: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadlineSweep {
    pub auto_submitted: usize,
    pub expired: u64,
}

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn Store>,
}

impl AttemptService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Question at `index` in this attempt's delivery order.
    pub async fn get_question(&self, session: &Session, attempt: &Attempt, index: usize) -> Result<QuestionView> {
        let now = now();
        let assessment = load_assessment(self.store.as_ref(), attempt.assessment_id).await?;
        ensure_writable(attempt, &assessment, now)?;

        let questions = self.store.list_assessment_questions(assessment.id).await?;
        if index >= questions.len() {
            return Err(Error::NotFound(format!(
                "Question {} does not exist; the assessment has {}",
                index,
                questions.len()
            )));
        }
        if !assessment.allow_backtrack && (index as i32) < session.current_round {
            return Err(Error::BadRequest(
                "This assessment does not allow returning to earlier questions".to_string(),
            ));
        }
        self.store.touch_session(session.id, now, Some(index as i32)).await?;

        let order = question_order(assessment.shuffle_questions, attempt.id, questions.len());
        let question = &questions[order[index]];
        let saved = self
            .store
            .list_answers(attempt.id)
            .await?
            .into_iter()
            .find(|a| a.assessment_question_id == question.id);

        let remaining = attempt
            .started_at
            .map(|started| seconds_until(assessment.deadline_for(started), now))
            .unwrap_or(0);

        Ok(QuestionView {
            index,
            total: questions.len(),
            assessment_question_id: question.id,
            prompt: question.prompt.clone(),
            points: question.points,
            negative_points: question.negative_points,
            is_mandatory: question.is_mandatory,
            section: question.section.clone(),
            body: question_body(question, assessment.shuffle_options, attempt.id),
            selected_option_ids: saved.as_ref().map(|a| a.selected_option_ids.clone()).unwrap_or_default(),
            is_flagged: saved.map(|a| a.is_flagged).unwrap_or(false),
            remaining_seconds: remaining,
        })
    }

    /// Auto-submits attempts whose personal time ran out and expires open
    /// attempts of assessments whose window has closed.
    pub async fn check_deadlines(&self) -> Result<DeadlineSweep> {
        let now = now();
        let mut sweep = DeadlineSweep::default();

        for attempt_id in self.store.list_overdue_attempts(now).await? {
            match self.store.finalize_attempt(attempt_id, now).await {
                Ok(done) if !done.already_finalized => {
                    sweep.auto_submitted += 1;
                    tracing::info!(
                        attempt_id,
                        score = %done.attempt.score_obtained,
                        percentage = %done.attempt.percentage,
                        "attempt auto-submitted at deadline"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(attempt_id, error = ?e, "auto-submit failed"),
            }
        }

        sweep.expired = self.store.expire_attempts(now).await?;
        if sweep.expired > 0 {
            tracing::info!(count = sweep.expired, "expired attempts of closed assessments");
        }
        Ok(sweep)
    }
}

pub(crate) async fn load_assessment(store: &dyn Store, assessment_id: i64) -> Result<Assessment> {
    store
        .get_assessment(assessment_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Assessment {} not found", assessment_id)))
}

/// Loads an attempt on behalf of `student_id`. Someone else's attempt is
/// reported as missing.
pub(crate) async fn load_owned_attempt(store: &dyn Store, attempt_id: i64, student_id: i64) -> Result<Attempt> {
    store
        .get_attempt(attempt_id)
        .await?
        .filter(|a| a.student_id == student_id)
        .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
}

/// Answers and code may only be written while the attempt is in progress and
/// before its personal deadline.
pub(crate) fn ensure_writable(attempt: &Attempt, assessment: &Assessment, at: DateTime<Utc>) -> Result<()> {
    if !attempt.status.accepts_answers() {
        return Err(Error::AttemptNotActive(format!("Attempt {} is {}", attempt.id, attempt.status)));
    }
    if let Some(started) = attempt.started_at {
        if at >= assessment.deadline_for(started) {
            return Err(Error::AttemptNotActive(format!("Time is up for attempt {}", attempt.id)));
        }
    }
    Ok(())
}

/// Positions into the display-ordered question list. Shuffling is seeded by
/// the attempt id so every request of an attempt sees the same order.
pub fn question_order(shuffle: bool, attempt_id: i64, len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(&mut StdRng::seed_from_u64(attempt_id as u64));
    }
    order
}

fn question_body(question: &AssessmentQuestion, shuffle_options: bool, attempt_id: i64) -> QuestionBody {
    match &question.content.0 {
        QuestionContent::Mcq { options } => {
            let mut views: Vec<OptionView> =
                options.iter().map(|o| OptionView { id: o.id, label: o.label.clone() }).collect();
            if shuffle_options {
                let seed = (attempt_id as u64).rotate_left(32) ^ question.id as u64;
                views.shuffle(&mut StdRng::seed_from_u64(seed));
            }
            QuestionBody::Mcq {
                options: views,
                multiple_answers: options.iter().filter(|o| o.is_correct).count() > 1,
            }
        }
        QuestionContent::Coding(spec) => QuestionBody::Coding {
            problem_statement: spec.problem_statement.clone(),
            supported_languages: spec.supported_languages.clone(),
            entry_point: spec.entry_point.clone(),
            sample_cases: spec
                .sample_cases(SAMPLE_CASE_LIMIT)
                .into_iter()
                .map(|c| SampleCaseView { input: c.input.clone(), expected_output: c.expected_output.clone() })
                .collect(),
        },
    }
}
