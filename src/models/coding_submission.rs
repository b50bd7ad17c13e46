use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::judge::{CaseOutcome, JudgeStatus, Language};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CodingSubmission {
    pub id: i64,
    pub attempt_id: i64,
    pub assessment_question_id: i64,
    pub language: Language,
    pub source_code: String,
    pub judge_status: JudgeStatus,
    pub judge_run_id: Uuid,
    pub tests_passed: i32,
    pub tests_total: i32,
    pub points_earned: Decimal,
    pub max_points: Decimal,
    pub outputs: Json<Vec<CaseOutcome>>,
    pub is_final_submission: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCodingSubmission {
    pub attempt_id: i64,
    pub assessment_question_id: i64,
    pub language: Language,
    pub source_code: String,
    pub judge_status: JudgeStatus,
    pub judge_run_id: Uuid,
    pub tests_passed: i32,
    pub tests_total: i32,
    pub points_earned: Decimal,
    pub max_points: Decimal,
    pub outputs: Vec<CaseOutcome>,
    pub submitted_at: DateTime<Utc>,
}
