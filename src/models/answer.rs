use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One MCQ answer per (attempt, assessment question). Overwritten in place.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttemptAnswer {
    pub id: i64,
    pub attempt_id: i64,
    pub assessment_question_id: i64,
    pub selected_option_ids: Vec<i64>,
    pub is_correct: bool,
    pub points_earned: Decimal,
    pub is_flagged: bool,
    pub time_taken_seconds: i32,
    pub answered_at: Option<DateTime<Utc>>,
}

impl AttemptAnswer {
    pub fn is_answered(&self) -> bool {
        !self.selected_option_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AnswerUpsert {
    pub attempt_id: i64,
    pub assessment_question_id: i64,
    pub selected_option_ids: Vec<i64>,
    pub is_correct: bool,
    pub points_earned: Decimal,
    pub time_taken_seconds: i32,
    pub answered_at: DateTime<Utc>,
}
