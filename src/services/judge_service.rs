use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::dto::attempt_dto::{CodeSubmissionResponse, RunResponse};
use crate::error::{Error, Result};
use crate::judge::{Executor, JudgeReport, Language, Program, TestCase};
use crate::models::assessment::{AssessmentQuestion, CodingSpec};
use crate::models::attempt::Attempt;
use crate::models::coding_submission::NewCodingSubmission;
use crate::services::attempt_service::{ensure_writable, load_assessment, SAMPLE_CASE_LIMIT};
use crate::services::grading_service::GradingService;
use crate::storage::Store;
use crate::utils::time::now;

/// Coding path: trial runs against sample cases and scored final submissions
/// against the full case set.
#[derive(Clone)]
pub struct JudgeService {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    timeout: Duration,
}

impl JudgeService {
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn Executor>, timeout: Duration) -> Self {
        Self { store, executor, timeout }
    }

    /// Runs the sample cases. Not scored; the run is kept for audit when it
    /// can be stored. Refused once the attempt is no longer writable, so no
    /// judge time is spent after the personal deadline.
    pub async fn try_run(
        &self,
        attempt: &Attempt,
        assessment_question_id: i64,
        language: Language,
        source_code: String,
    ) -> Result<RunResponse> {
        let assessment = load_assessment(self.store.as_ref(), attempt.assessment_id).await?;
        ensure_writable(attempt, &assessment, now())?;
        let question = self.load_question(attempt.assessment_id, assessment_question_id).await?;
        let spec = coding_spec(&question, language)?;
        let tests: Vec<TestCase> = spec
            .sample_cases(SAMPLE_CASE_LIMIT)
            .into_iter()
            .map(|c| TestCase { input: c.input.clone(), expected_output: c.expected_output.clone() })
            .collect();

        let program = Program { language, source: source_code, entry_point: spec.entry_point.clone() };
        let report = self.executor.run(&program, &tests, self.timeout).await?;

        let run = new_submission(attempt.id, &question, program, &report, Decimal::ZERO);
        if let Err(e) = self.store.record_coding_run(run).await {
            tracing::warn!(attempt_id = attempt.id, run_id = %report.run_id, error = ?e, "could not store trial run");
        }

        Ok(RunResponse {
            run_id: report.run_id,
            status: report.status,
            passed: report.passed,
            total: report.total,
            outputs: report.outputs,
            stderr: report.stderr,
            timed_out: report.timed_out,
        })
    }

    /// Judges against every case of the question and stores the result as
    /// the question's final submission.
    pub async fn final_submit(
        &self,
        attempt_id: i64,
        assessment_question_id: i64,
        language: Language,
        source_code: String,
    ) -> Result<CodeSubmissionResponse> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        let assessment = load_assessment(self.store.as_ref(), attempt.assessment_id).await?;
        // Checked before spending judge time; the store re-checks atomically.
        ensure_writable(&attempt, &assessment, now())?;

        let question = self.load_question(attempt.assessment_id, assessment_question_id).await?;
        let spec = coding_spec(&question, language)?;
        let tests: Vec<TestCase> = spec
            .test_cases
            .iter()
            .map(|c| TestCase { input: c.input.clone(), expected_output: c.expected_output.clone() })
            .collect();

        let program = Program { language, source: source_code, entry_point: spec.entry_point.clone() };
        let report = self.executor.run(&program, &tests, self.timeout).await?;
        let points = GradingService::coding_points(question.points, report.passed, report.total);

        let row = self
            .store
            .record_final_submission(new_submission(attempt_id, &question, program, &report, points))
            .await?;

        tracing::info!(
            attempt_id,
            assessment_question_id,
            run_id = %report.run_id,
            status = ?report.status,
            passed = report.passed,
            total = report.total,
            points = %row.points_earned,
            "final coding submission stored"
        );

        Ok(CodeSubmissionResponse {
            submission_id: row.id,
            assessment_question_id,
            status: row.judge_status,
            passed: row.tests_passed,
            total: row.tests_total,
            points_earned: row.points_earned,
            max_points: row.max_points,
        })
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

fn coding_spec(question: &AssessmentQuestion, language: Language) -> Result<&CodingSpec> {
    let spec = question
        .as_coding()
        .ok_or_else(|| Error::BadRequest(format!("Question {} is not a coding question", question.id)))?;
    if !spec.supported_languages.contains(&language) {
        return Err(Error::BadRequest(format!(
            "{} is not accepted for question {}",
            language.as_str(),
            question.id
        )));
    }
    Ok(spec)
}

fn new_submission(
    attempt_id: i64,
    question: &AssessmentQuestion,
    program: Program,
    report: &JudgeReport,
    points: Decimal,
) -> NewCodingSubmission {
    NewCodingSubmission {
        attempt_id,
        assessment_question_id: question.id,
        language: program.language,
        source_code: program.source,
        judge_status: report.status,
        judge_run_id: report.run_id,
        tests_passed: report.passed,
        tests_total: report.total,
        points_earned: points,
        max_points: question.points,
        outputs: report.outputs.clone(),
        submitted_at: now(),
    }
}
