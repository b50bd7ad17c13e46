#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use assessment_engine::error::Result;
use assessment_engine::judge::{CaseOutcome, Executor, JudgeReport, JudgeStatus, Language, Program, TestCase};
use assessment_engine::models::assessment::{
    Assessment, AssessmentQuestion, CodingSpec, CodingTestCase, McqOption, QuestionContent,
};
use assessment_engine::storage::{MemoryStore, Store};
use assessment_engine::AppState;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

pub const STUDENT: i64 = 100;
pub const OUTSIDER: i64 = 200;
pub const ASSESSMENT: i64 = 1;
pub const Q1: i64 = 11;
pub const Q2: i64 = 12;
pub const CODING: i64 = 13;
/// Correct option of both MCQ questions.
pub const RIGHT: i64 = 2;
pub const WRONG: i64 = 3;

mockall::mock! {
    pub Judge {}

    #[async_trait::async_trait]
    impl Executor for Judge {
        async fn run(&self, program: &Program, tests: &[TestCase], timeout: Duration) -> Result<JudgeReport>;
    }
}

pub fn report(passed: i32, tests: &[TestCase]) -> JudgeReport {
    let total = tests.len() as i32;
    JudgeReport {
        run_id: Uuid::new_v4(),
        status: if passed == total { JudgeStatus::Accepted } else { JudgeStatus::WrongAnswer },
        passed,
        total,
        outputs: tests
            .iter()
            .enumerate()
            .map(|(index, t)| CaseOutcome {
                index,
                input: t.input.clone(),
                expected_output: t.expected_output.clone(),
                actual_output: Some(if (index as i32) < passed { t.expected_output.clone() } else { "0".into() }),
                passed: (index as i32) < passed,
            })
            .collect(),
        stderr: String::new(),
        timed_out: false,
        duration_ms: 3,
    }
}

/// Executor that passes the first `passed` cases of every batch.
pub fn judge_passing(passed: i32) -> MockJudge {
    let mut mock = MockJudge::new();
    mock.expect_run()
        .returning(move |_, tests, _| Ok(report(passed.min(tests.len() as i32), tests)));
    mock
}

pub fn assessment() -> Assessment {
    let now = Utc::now();
    Assessment {
        id: ASSESSMENT,
        title: "Midterm".into(),
        duration_minutes: 30,
        start_time: now - ChronoDuration::hours(1),
        end_time: now + ChronoDuration::hours(2),
        shuffle_questions: false,
        shuffle_options: false,
        allow_backtrack: true,
        max_attempts: None,
        requires_camera: false,
        requires_microphone: false,
        show_correct_answers: false,
        is_active: true,
    }
}

pub fn mcq(id: i64, order: i32, points: i64, penalty: i64) -> AssessmentQuestion {
    AssessmentQuestion {
        id,
        assessment_id: ASSESSMENT,
        question_id: id,
        points: Decimal::from(points),
        negative_points: Decimal::from(penalty),
        is_mandatory: true,
        display_order: order,
        section: Some("theory".into()),
        prompt: format!("Question {}", id),
        content: Json(QuestionContent::Mcq {
            options: (1..=4)
                .map(|o| McqOption { id: o, label: format!("option {}", o), is_correct: o == RIGHT })
                .collect(),
        }),
    }
}

pub fn coding(id: i64, order: i32, points: i64) -> AssessmentQuestion {
    AssessmentQuestion {
        id,
        assessment_id: ASSESSMENT,
        question_id: id,
        points: Decimal::from(points),
        negative_points: Decimal::ZERO,
        is_mandatory: false,
        display_order: order,
        section: Some("practice".into()),
        prompt: "Add two numbers".into(),
        content: Json(QuestionContent::Coding(CodingSpec {
            problem_statement: "Return a + b".into(),
            supported_languages: vec![Language::Python, Language::Javascript],
            entry_point: "solve".into(),
            test_cases: vec![
                CodingTestCase { input: "1, 2".into(), expected_output: "3".into(), is_sample: true },
                CodingTestCase { input: "2, 2".into(), expected_output: "4".into(), is_sample: false },
            ],
        })),
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

/// Two MCQs worth 4 points (with `penalty`) and one coding question worth 10
/// points with two test cases. `STUDENT` is in the audience.
pub async fn fixture_with(executor: MockJudge, penalty: i64, tweak: impl FnOnce(&mut Assessment)) -> Fixture {
    let mut a = assessment();
    tweak(&mut a);

    let store = Arc::new(MemoryStore::new());
    store.insert_assessment(a).await;
    store.insert_question(mcq(Q1, 1, 4, penalty)).await;
    store.insert_question(mcq(Q2, 2, 4, penalty)).await;
    store.insert_question(coding(CODING, 3, 10)).await;
    store.add_audience_member(STUDENT, ASSESSMENT).await;

    let dyn_store: Arc<dyn Store> = store.clone();
    let state = AppState::new(dyn_store, Arc::new(executor), Duration::from_secs(2));
    Fixture { store, state }
}

pub async fn fixture(executor: MockJudge) -> Fixture {
    fixture_with(executor, 0, |_| {}).await
}

impl Fixture {
    /// Begins and starts an attempt; returns `(attempt_id, session_token)`.
    pub async fn started(&self) -> (i64, String) {
        let begun = self.state.session_service.begin(STUDENT, ASSESSMENT).await.expect("begin");
        self.state
            .session_service
            .start(&begun.session_token, STUDENT)
            .await
            .expect("start");
        (begun.attempt_id, begun.session_token)
    }
}
