use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of an attempt.
///
/// `not_started -> in_progress -> evaluated`, with `expired` reachable from
/// the two open states. `submitted -> evaluated` is also accepted, so an
/// attempt parked in `submitted` can still be finalized. Transitions never
/// go back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Submitted,
    Evaluated,
    Expired,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::NotStarted => "not_started",
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Evaluated => "evaluated",
            AttemptStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Evaluated | AttemptStatus::Expired)
    }

    /// Open attempts are the ones a student may resume.
    pub fn is_open(&self) -> bool {
        matches!(self, AttemptStatus::NotStarted | AttemptStatus::InProgress)
    }

    pub fn accepts_answers(&self) -> bool {
        matches!(self, AttemptStatus::InProgress)
    }

    pub fn can_transition_to(&self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (NotStarted, Expired)
                | (InProgress, Submitted)
                | (InProgress, Evaluated)
                | (InProgress, Expired)
                | (Submitted, Evaluated)
        )
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: i64,
    pub assessment_id: i64,
    pub student_id: i64,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub total_questions: i32,
    pub answered_questions: i32,
    pub correct_answers: i32,
    pub wrong_answers: i32,
    pub skipped_questions: i32,
    pub score_obtained: Decimal,
    pub total_score: Decimal,
    pub percentage: Decimal,
    pub time_taken_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    pub fn unanswered(&self) -> i32 {
        (self.total_questions - self.answered_questions).max(0)
    }
}

/// Input for creating (or reusing) the open attempt of a student.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub assessment_id: i64,
    pub student_id: i64,
    pub total_questions: i32,
    pub total_score: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Running counters carried on the attempt row. Used as a display cache;
/// finalization recomputes them from the answer and submission rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contribution {
    pub answered: i32,
    pub correct: i32,
    pub wrong: i32,
    pub score: Decimal,
}

impl Contribution {
    pub fn delta_from(self, previous: Contribution) -> Contribution {
        Contribution {
            answered: self.answered - previous.answered,
            correct: self.correct - previous.correct,
            wrong: self.wrong - previous.wrong,
            score: self.score - previous.score,
        }
    }

    pub fn apply_to(self, attempt: &mut Attempt) {
        attempt.answered_questions += self.answered;
        attempt.correct_answers += self.correct;
        attempt.wrong_answers += self.wrong;
        attempt.score_obtained += self.score;
    }
}

impl std::ops::Add for Contribution {
    type Output = Contribution;

    fn add(self, rhs: Contribution) -> Contribution {
        Contribution {
            answered: self.answered + rhs.answered,
            correct: self.correct + rhs.correct,
            wrong: self.wrong + rhs.wrong,
            score: self.score + rhs.score,
        }
    }
}
