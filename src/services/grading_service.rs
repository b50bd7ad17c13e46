use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Error, Result};
use crate::models::answer::AttemptAnswer;
use crate::models::assessment::{Assessment, AssessmentQuestion};
use crate::models::attempt::Contribution;
use crate::models::coding_submission::CodingSubmission;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McqGrade {
    pub is_correct: bool,
    pub points_earned: Decimal,
    pub max_points: Decimal,
    pub correct_option_ids: Vec<i64>,
}

/// Authoritative figures written by finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalTally {
    pub answered: i32,
    pub correct: i32,
    pub wrong: i32,
    pub skipped: i32,
    pub score_obtained: Decimal,
    pub total_score: Decimal,
    pub percentage: Decimal,
    pub time_taken_seconds: i32,
}

pub struct GradingService;

impl GradingService {
    /// Grades a selection against the question's own option flags. The
    /// comparison is set equality, so order and duplicates do not matter.
    /// An empty selection clears the answer and scores nothing.
    pub fn grade_mcq(question: &AssessmentQuestion, selected: &[i64]) -> Result<McqGrade> {
        let options = question.as_mcq().ok_or_else(|| {
            Error::BadRequest(format!("Question {} is not a multiple-choice question", question.id))
        })?;

        let known: BTreeSet<i64> = options.iter().map(|o| o.id).collect();
        let chosen: BTreeSet<i64> = selected.iter().copied().collect();
        if let Some(unknown) = chosen.iter().find(|id| !known.contains(id)) {
            return Err(Error::BadRequest(format!(
                "Option {} does not belong to question {}",
                unknown, question.id
            )));
        }

        let correct: BTreeSet<i64> = options.iter().filter(|o| o.is_correct).map(|o| o.id).collect();
        let (is_correct, points_earned) = if chosen.is_empty() {
            (false, Decimal::ZERO)
        } else if chosen == correct {
            (true, question.points)
        } else {
            (false, -question.negative_points)
        };

        Ok(McqGrade {
            is_correct,
            points_earned,
            max_points: question.points,
            correct_option_ids: correct.into_iter().collect(),
        })
    }

    /// `points * passed / total`, rounded to cents. Zero cases score zero.
    pub fn coding_points(points: Decimal, passed: i32, total: i32) -> Decimal {
        if total <= 0 || passed <= 0 {
            return Decimal::ZERO;
        }
        let passed = passed.min(total);
        (points * Decimal::from(passed) / Decimal::from(total))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn answer_contribution(answer: Option<&AttemptAnswer>) -> Contribution {
        match answer {
            Some(a) if a.is_answered() => Contribution {
                answered: 1,
                correct: a.is_correct as i32,
                wrong: (!a.is_correct) as i32,
                score: a.points_earned,
            },
            _ => Contribution::default(),
        }
    }

    pub fn submission_contribution(submission: Option<&CodingSubmission>) -> Contribution {
        match submission {
            Some(s) if s.is_final_submission => {
                let full = s.tests_total > 0 && s.tests_passed >= s.tests_total;
                Contribution {
                    answered: 1,
                    correct: full as i32,
                    wrong: (!full) as i32,
                    score: s.points_earned,
                }
            }
            _ => Contribution::default(),
        }
    }

    pub fn percentage(score: Decimal, total: Decimal) -> Decimal {
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (score / total * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Seconds between start and `now`, never negative and never beyond the
    /// assessment duration (an auto-submit may fire after time ran out).
    pub fn elapsed_seconds(
        assessment: &Assessment,
        started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> i32 {
        let Some(started) = started_at else { return 0 };
        let elapsed = (now - started).num_seconds().max(0);
        elapsed.min(assessment.duration().num_seconds()) as i32
    }

    /// Recomputes every score figure from persisted rows.
    pub fn tally(
        assessment: &Assessment,
        questions: &[AssessmentQuestion],
        answers: &[AttemptAnswer],
        final_submissions: &[CodingSubmission],
        started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> FinalTally {
        let from_answers = answers
            .iter()
            .map(|a| Self::answer_contribution(Some(a)))
            .fold(Contribution::default(), |acc, c| acc + c);
        let total = final_submissions
            .iter()
            .map(|s| Self::submission_contribution(Some(s)))
            .fold(from_answers, |acc, c| acc + c);

        let total_score: Decimal = questions.iter().map(|q| q.points).sum();
        let question_count = questions.len() as i32;

        FinalTally {
            answered: total.answered,
            correct: total.correct,
            wrong: total.wrong,
            skipped: (question_count - total.answered).max(0),
            score_obtained: total.score,
            total_score,
            percentage: Self::percentage(total.score, total_score),
            time_taken_seconds: Self::elapsed_seconds(assessment, started_at, now),
        }
    }
}
