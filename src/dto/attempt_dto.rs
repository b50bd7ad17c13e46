use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::judge::{CaseOutcome, JudgeStatus, Language};
use crate::models::attempt::AttemptStatus;
use crate::models::proctoring_event::ProctoringEventKind;
use crate::models::session::{CheckStatus, Device, DeviceChecks};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginResponse {
    pub attempt_id: i64,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub session_token: String,
    pub requires_camera: bool,
    pub requires_microphone: bool,
    pub device_checks: DeviceChecks,
    /// An open attempt already existed and was reused.
    pub resumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Success,
    Failed,
}

impl From<CheckOutcome> for CheckStatus {
    fn from(outcome: CheckOutcome) -> Self {
        match outcome {
            CheckOutcome::Success => CheckStatus::Success,
            CheckOutcome::Failed => CheckStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceCheckRequest {
    pub device: Device,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCheckResponse {
    pub device: Device,
    pub status: CheckStatus,
    pub device_checks: DeviceChecks,
    pub retry_allowed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub attempt_id: i64,
    pub status: AttemptStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub remaining_seconds: i64,
    pub total_questions: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub attempt_id: i64,
    pub status: AttemptStatus,
    pub remaining_seconds: Option<i64>,
}

/// Client-side proctoring signals. Device check failures are recorded by the
/// device-check endpoint, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    WindowBlur,
    FullscreenExit,
}

impl From<ViolationKind> for ProctoringEventKind {
    fn from(kind: ViolationKind) -> Self {
        match kind {
            ViolationKind::TabSwitch => ProctoringEventKind::TabSwitch,
            ViolationKind::WindowBlur => ProctoringEventKind::WindowBlur,
            ViolationKind::FullscreenExit => ProctoringEventKind::FullscreenExit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ViolationRequest {
    pub kind: ViolationKind,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationResponse {
    pub recorded: bool,
    pub event_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionView {
    pub id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleCaseView {
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionBody {
    Mcq {
        options: Vec<OptionView>,
        multiple_answers: bool,
    },
    Coding {
        problem_statement: String,
        supported_languages: Vec<Language>,
        entry_point: String,
        sample_cases: Vec<SampleCaseView>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub index: usize,
    pub total: usize,
    pub assessment_question_id: i64,
    pub prompt: String,
    pub points: Decimal,
    pub negative_points: Decimal,
    pub is_mandatory: bool,
    pub section: Option<String>,
    pub body: QuestionBody,
    pub selected_option_ids: Vec<i64>,
    pub is_flagged: bool,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    #[validate(range(min = 1))]
    pub assessment_question_id: i64,
    #[validate(length(max = 64))]
    pub selected_option_ids: Vec<i64>,
    #[validate(range(min = 0, max = 86400))]
    #[serde(default)]
    pub time_taken_seconds: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub assessment_question_id: i64,
    pub is_correct: bool,
    pub points_earned: Decimal,
    pub max_points: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option_ids: Option<Vec<i64>>,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FlagRequest {
    #[validate(range(min = 1))]
    pub assessment_question_id: i64,
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagResponse {
    pub assessment_question_id: i64,
    pub is_flagged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CodeRequest {
    #[validate(range(min = 1))]
    pub assessment_question_id: i64,
    pub language: Language,
    #[validate(length(min = 1, max = 100000))]
    pub source_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: uuid::Uuid,
    pub status: JudgeStatus,
    pub passed: i32,
    pub total: i32,
    pub outputs: Vec<CaseOutcome>,
    pub stderr: String,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSubmissionResponse {
    pub submission_id: i64,
    pub assessment_question_id: i64,
    pub status: JudgeStatus,
    pub passed: i32,
    pub total: i32,
    pub points_earned: Decimal,
    pub max_points: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPreview {
    pub attempt_id: i64,
    pub status: AttemptStatus,
    pub total_questions: i32,
    pub attended: i32,
    pub unanswered: i32,
    pub flagged: i32,
    pub elapsed_seconds: i32,
    pub elapsed_minutes: i32,
    pub remaining_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitSummary {
    pub attempt_id: i64,
    pub status: AttemptStatus,
    pub score_obtained: Decimal,
    pub total_score: Decimal,
    pub percentage: Decimal,
    pub time_taken_seconds: i32,
    pub attended: i32,
    pub unanswered: i32,
    pub elapsed_minutes: i32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub already_finalized: bool,
}
