use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::judge::Language;

/// Assessment definition. Owned by the CRUD layer; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assessment {
    pub id: i64,
    pub title: String,
    pub duration_minutes: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub allow_backtrack: bool,
    pub max_attempts: Option<i32>,
    pub requires_camera: bool,
    pub requires_microphone: bool,
    pub show_correct_answers: bool,
    pub is_active: bool,
}

impl Assessment {
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes as i64)
    }

    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active && self.start_time <= at && at < self.end_time
    }

    /// Personal deadline for an attempt started at `started_at`.
    pub fn deadline_for(&self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        (started_at + self.duration()).min(self.end_time)
    }
}

/// A question placed inside an assessment, joined with its question body.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssessmentQuestion {
    pub id: i64,
    pub assessment_id: i64,
    pub question_id: i64,
    pub points: Decimal,
    pub negative_points: Decimal,
    pub is_mandatory: bool,
    pub display_order: i32,
    pub section: Option<String>,
    pub prompt: String,
    pub content: Json<QuestionContent>,
}

impl AssessmentQuestion {
    pub fn as_mcq(&self) -> Option<&[McqOption]> {
        match &self.content.0 {
            QuestionContent::Mcq { options } => Some(options),
            QuestionContent::Coding(_) => None,
        }
    }

    pub fn as_coding(&self) -> Option<&CodingSpec> {
        match &self.content.0 {
            QuestionContent::Coding(spec) => Some(spec),
            QuestionContent::Mcq { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionContent {
    Mcq { options: Vec<McqOption> },
    Coding(CodingSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McqOption {
    pub id: i64,
    pub label: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodingSpec {
    pub problem_statement: String,
    pub supported_languages: Vec<Language>,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    pub test_cases: Vec<CodingTestCase>,
}

fn default_entry_point() -> String {
    "solve".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodingTestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_sample: bool,
}

impl CodingSpec {
    /// Cases shown to the student and used by trial runs. Falls back to the
    /// leading cases when none are marked as samples.
    pub fn sample_cases(&self, limit: usize) -> Vec<&CodingTestCase> {
        let marked: Vec<&CodingTestCase> =
            self.test_cases.iter().filter(|c| c.is_sample).take(limit).collect();
        if marked.is_empty() {
            self.test_cases.iter().take(limit).collect()
        } else {
            marked
        }
    }
}
