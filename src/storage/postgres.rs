use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use super::{Finalized, Store};
use crate::error::{Error, Result};
use crate::models::{
    answer::{AnswerUpsert, AttemptAnswer},
    assessment::{Assessment, AssessmentQuestion},
    attempt::{Attempt, AttemptStatus, Contribution, NewAttempt},
    coding_submission::{CodingSubmission, NewCodingSubmission},
    proctoring_event::{NewProctoringEvent, ProctoringEvent},
    session::{CheckState, Device, Session},
};
use crate::services::grading_service::GradingService;

const ASSESSMENT_COLUMNS: &str = r#"
    id, title, duration_minutes, start_time, end_time, shuffle_questions, shuffle_options,
    allow_backtrack, max_attempts, requires_camera, requires_microphone, show_correct_answers, is_active
"#;

const QUESTION_SELECT: &str = r#"
    SELECT aq.id, aq.assessment_id, aq.question_id, aq.points, aq.negative_points,
           aq.is_mandatory, aq.display_order, aq.section, q.prompt, q.content
    FROM assessment_questions aq
    JOIN questions q ON q.id = aq.question_id
"#;

/// Postgres-backed store. Compound writes run in one transaction that first
/// takes the attempt row lock, so writes for the same attempt serialize.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_attempt(conn: &mut PgConnection, attempt_id: i64) -> Result<Attempt> {
    sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1 FOR UPDATE"#)
        .bind(attempt_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
}

async fn lock_in_progress(conn: &mut PgConnection, attempt_id: i64) -> Result<Attempt> {
    let attempt = lock_attempt(conn, attempt_id).await?;
    if !attempt.status.accepts_answers() {
        return Err(Error::AttemptNotActive(format!("Attempt {} is {}", attempt_id, attempt.status)));
    }
    Ok(attempt)
}

async fn apply_delta(conn: &mut PgConnection, attempt_id: i64, delta: Contribution) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE attempts
        SET answered_questions = answered_questions + $2,
            correct_answers = correct_answers + $3,
            wrong_answers = wrong_answers + $4,
            score_obtained = score_obtained + $5
        WHERE id = $1
        "#,
    )
    .bind(attempt_id)
    .bind(delta.answered)
    .bind(delta.correct)
    .bind(delta.wrong)
    .bind(delta.score)
    .execute(conn)
    .await?;
    Ok(())
}

async fn close_sessions(conn: &mut PgConnection, attempt_ids: &[i64], now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"UPDATE attempt_sessions SET is_active = FALSE, ended_at = $2 WHERE attempt_id = ANY($1) AND is_active"#,
    )
    .bind(attempt_ids)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_submission(
    conn: &mut PgConnection,
    new: NewCodingSubmission,
    is_final: bool,
) -> Result<CodingSubmission> {
    let points = if is_final { new.points_earned } else { rust_decimal::Decimal::ZERO };
    let row = sqlx::query_as::<_, CodingSubmission>(
        r#"
        INSERT INTO coding_submissions (
            attempt_id, assessment_question_id, language, source_code, judge_status, judge_run_id,
            tests_passed, tests_total, points_earned, max_points, outputs, is_final_submission, submitted_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(new.attempt_id)
    .bind(new.assessment_question_id)
    .bind(new.language)
    .bind(new.source_code)
    .bind(new.judge_status)
    .bind(new.judge_run_id)
    .bind(new.tests_passed)
    .bind(new.tests_total)
    .bind(points)
    .bind(new.max_points)
    .bind(Json(new.outputs))
    .bind(is_final)
    .bind(new.submitted_at)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn get_assessment(&self, assessment_id: i64) -> Result<Option<Assessment>> {
        let row = sqlx::query_as::<_, Assessment>(&format!(
            "SELECT {} FROM assessments WHERE id = $1",
            ASSESSMENT_COLUMNS
        ))
        .bind(assessment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_assessment_questions(&self, assessment_id: i64) -> Result<Vec<AssessmentQuestion>> {
        let rows = sqlx::query_as::<_, AssessmentQuestion>(&format!(
            "{} WHERE aq.assessment_id = $1 ORDER BY aq.display_order, aq.id",
            QUESTION_SELECT
        ))
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_assessment_question(
        &self,
        assessment_id: i64,
        assessment_question_id: i64,
    ) -> Result<Option<AssessmentQuestion>> {
        let row = sqlx::query_as::<_, AssessmentQuestion>(&format!(
            "{} WHERE aq.assessment_id = $1 AND aq.id = $2",
            QUESTION_SELECT
        ))
        .bind(assessment_id)
        .bind(assessment_question_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn is_audience_member(&self, student_id: i64, assessment_id: i64) -> Result<bool> {
        let member: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM assessment_batches ab
                JOIN batch_members bm ON bm.batch_id = ab.batch_id
                WHERE ab.assessment_id = $1 AND bm.student_id = $2
            )
            "#,
        )
        .bind(assessment_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(member)
    }

    async fn find_open_attempt(&self, student_id: i64, assessment_id: i64) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM attempts
            WHERE student_id = $1 AND assessment_id = $2 AND status IN ('not_started', 'in_progress')
            "#,
        )
        .bind(student_id)
        .bind(assessment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn count_attempts(&self, student_id: i64, assessment_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM attempts WHERE student_id = $1 AND assessment_id = $2"#)
                .bind(student_id)
                .bind(assessment_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn open_attempt(&self, new: NewAttempt) -> Result<Attempt> {
        // The partial unique index on open attempts turns a concurrent
        // duplicate into a no-op; the loser reads the winner's row.
        let inserted = sqlx::query_as::<_, Attempt>(
            r#"
            INSERT INTO attempts (assessment_id, student_id, attempt_number, status, total_questions, total_score, created_at)
            SELECT $1, $2, COALESCE(MAX(attempt_number), 0) + 1, 'not_started', $3, $4, $5
            FROM attempts WHERE assessment_id = $1 AND student_id = $2
            ON CONFLICT (student_id, assessment_id) WHERE status IN ('not_started', 'in_progress') DO NOTHING
            RETURNING *
            "#,
        )
        .bind(new.assessment_id)
        .bind(new.student_id)
        .bind(new.total_questions)
        .bind(new.total_score)
        .bind(new.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(attempt) => Ok(attempt),
            None => self
                .find_open_attempt(new.student_id, new.assessment_id)
                .await?
                .ok_or_else(|| Error::Internal("Open attempt vanished after insert conflict".to_string())),
        }
    }

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn mark_attempt_started(&self, attempt_id: i64, now: DateTime<Utc>) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;
        let attempt = lock_attempt(&mut tx, attempt_id).await?;
        let attempt = match attempt.status {
            s if s.can_transition_to(AttemptStatus::InProgress) => {
                sqlx::query_as::<_, Attempt>(
                    r#"UPDATE attempts SET status = 'in_progress', started_at = $2 WHERE id = $1 RETURNING *"#,
                )
                .bind(attempt_id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
            AttemptStatus::InProgress => attempt,
            other => {
                return Err(Error::AttemptNotActive(format!("Attempt {} is {}", attempt_id, other)));
            }
        };
        tx.commit().await?;
        Ok(attempt)
    }

    async fn open_session(&self, attempt_id: i64, token: &str, now: DateTime<Utc>) -> Result<Session> {
        let mut tx = self.pool.begin().await?;
        lock_attempt(&mut tx, attempt_id).await?;

        let round: i32 = sqlx::query_scalar(
            r#"SELECT COALESCE(MAX(current_round), 0) FROM attempt_sessions WHERE attempt_id = $1"#,
        )
        .bind(attempt_id)
        .fetch_one(&mut *tx)
        .await?;

        close_sessions(&mut tx, &[attempt_id], now).await?;

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO attempt_sessions (attempt_id, token, current_round, heartbeat_at, is_active, created_at)
            VALUES ($1, $2, $3, $4, TRUE, $4)
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(token)
        .bind(round)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn find_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, Session>(r#"SELECT * FROM attempt_sessions WHERE token = $1"#)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_sessions(&self, attempt_id: i64) -> Result<Vec<Session>> {
        let rows =
            sqlx::query_as::<_, Session>(r#"SELECT * FROM attempt_sessions WHERE attempt_id = $1 ORDER BY id"#)
                .bind(attempt_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn update_device_check(&self, session_id: i64, device: Device, state: CheckState) -> Result<Session> {
        // jsonb_set touches one key, so checks for the two devices never
        // overwrite each other.
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE attempt_sessions
            SET device_checks = jsonb_set(device_checks, $2::text[], $3::jsonb, TRUE)
            WHERE id = $1 AND is_active
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(vec![device.as_str().to_string()])
        .bind(Json(state))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::SessionNotFound)
    }

    async fn touch_session(&self, session_id: i64, now: DateTime<Utc>, round: Option<i32>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE attempt_sessions
            SET heartbeat_at = $2,
                current_round = GREATEST(current_round, COALESCE($3, current_round))
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(session_id)
        .bind(now)
        .bind(round)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::SessionNotFound);
        }
        Ok(())
    }

    async fn record_proctoring_event(&self, event: NewProctoringEvent) -> Result<ProctoringEvent> {
        let row = sqlx::query_as::<_, ProctoringEvent>(
            r#"
            INSERT INTO proctoring_events (attempt_id, session_id, kind, details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(event.attempt_id)
        .bind(event.session_id)
        .bind(event.kind)
        .bind(event.details.map(Json))
        .bind(event.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_proctoring_events(&self, attempt_id: i64) -> Result<Vec<ProctoringEvent>> {
        let rows = sqlx::query_as::<_, ProctoringEvent>(
            r#"SELECT * FROM proctoring_events WHERE attempt_id = $1 ORDER BY created_at, id"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<AttemptAnswer>> {
        let rows = sqlx::query_as::<_, AttemptAnswer>(
            r#"SELECT * FROM attempt_answers WHERE attempt_id = $1 ORDER BY assessment_question_id"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_answer(&self, answer: AnswerUpsert) -> Result<AttemptAnswer> {
        let mut tx = self.pool.begin().await?;
        lock_in_progress(&mut tx, answer.attempt_id).await?;

        let previous = sqlx::query_as::<_, AttemptAnswer>(
            r#"SELECT * FROM attempt_answers WHERE attempt_id = $1 AND assessment_question_id = $2"#,
        )
        .bind(answer.attempt_id)
        .bind(answer.assessment_question_id)
        .fetch_optional(&mut *tx)
        .await?;

        let answered_at = (!answer.selected_option_ids.is_empty()).then_some(answer.answered_at);
        let row = sqlx::query_as::<_, AttemptAnswer>(
            r#"
            INSERT INTO attempt_answers (
                attempt_id, assessment_question_id, selected_option_ids, is_correct,
                points_earned, time_taken_seconds, answered_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (attempt_id, assessment_question_id) DO UPDATE
            SET selected_option_ids = EXCLUDED.selected_option_ids,
                is_correct = EXCLUDED.is_correct,
                points_earned = EXCLUDED.points_earned,
                time_taken_seconds = EXCLUDED.time_taken_seconds,
                answered_at = EXCLUDED.answered_at
            RETURNING *
            "#,
        )
        .bind(answer.attempt_id)
        .bind(answer.assessment_question_id)
        .bind(&answer.selected_option_ids)
        .bind(answer.is_correct)
        .bind(answer.points_earned)
        .bind(answer.time_taken_seconds)
        .bind(answered_at)
        .fetch_one(&mut *tx)
        .await?;

        let delta = GradingService::answer_contribution(Some(&row))
            .delta_from(GradingService::answer_contribution(previous.as_ref()));
        apply_delta(&mut tx, answer.attempt_id, delta).await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn set_answer_flag(
        &self,
        attempt_id: i64,
        assessment_question_id: i64,
        flagged: bool,
    ) -> Result<AttemptAnswer> {
        let row = sqlx::query_as::<_, AttemptAnswer>(
            r#"
            INSERT INTO attempt_answers (attempt_id, assessment_question_id, is_flagged)
            VALUES ($1, $2, $3)
            ON CONFLICT (attempt_id, assessment_question_id) DO UPDATE SET is_flagged = EXCLUDED.is_flagged
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(assessment_question_id)
        .bind(flagged)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_coding_run(&self, run: NewCodingSubmission) -> Result<CodingSubmission> {
        let mut conn = self.pool.acquire().await?;
        insert_submission(&mut conn, run, false).await
    }

    async fn record_final_submission(&self, submission: NewCodingSubmission) -> Result<CodingSubmission> {
        let mut tx = self.pool.begin().await?;
        let attempt_id = submission.attempt_id;
        lock_in_progress(&mut tx, attempt_id).await?;

        let previous = sqlx::query_as::<_, CodingSubmission>(
            r#"
            SELECT * FROM coding_submissions
            WHERE attempt_id = $1 AND assessment_question_id = $2 AND is_final_submission
            "#,
        )
        .bind(attempt_id)
        .bind(submission.assessment_question_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(prev) = &previous {
            sqlx::query(r#"UPDATE coding_submissions SET is_final_submission = FALSE WHERE id = $1"#)
                .bind(prev.id)
                .execute(&mut *tx)
                .await?;
        }

        let row = insert_submission(&mut tx, submission, true).await?;
        let delta = GradingService::submission_contribution(Some(&row))
            .delta_from(GradingService::submission_contribution(previous.as_ref()));
        apply_delta(&mut tx, attempt_id, delta).await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn list_final_submissions(&self, attempt_id: i64) -> Result<Vec<CodingSubmission>> {
        let rows = sqlx::query_as::<_, CodingSubmission>(
            r#"SELECT * FROM coding_submissions WHERE attempt_id = $1 AND is_final_submission ORDER BY assessment_question_id"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn finalize_attempt(&self, attempt_id: i64, now: DateTime<Utc>) -> Result<Finalized> {
        let mut tx = self.pool.begin().await?;
        let attempt = lock_attempt(&mut tx, attempt_id).await?;
        match attempt.status {
            AttemptStatus::Evaluated => {
                tx.rollback().await?;
                return Ok(Finalized { attempt, already_finalized: true });
            }
            s if s.can_transition_to(AttemptStatus::Evaluated) => {}
            other => {
                return Err(Error::AttemptNotActive(format!("Attempt {} is {}", attempt_id, other)));
            }
        }

        let assessment = sqlx::query_as::<_, Assessment>(&format!(
            "SELECT {} FROM assessments WHERE id = $1",
            ASSESSMENT_COLUMNS
        ))
        .bind(attempt.assessment_id)
        .fetch_one(&mut *tx)
        .await?;
        let questions = sqlx::query_as::<_, AssessmentQuestion>(&format!(
            "{} WHERE aq.assessment_id = $1 ORDER BY aq.display_order, aq.id",
            QUESTION_SELECT
        ))
        .bind(attempt.assessment_id)
        .fetch_all(&mut *tx)
        .await?;
        let answers = sqlx::query_as::<_, AttemptAnswer>(r#"SELECT * FROM attempt_answers WHERE attempt_id = $1"#)
            .bind(attempt_id)
            .fetch_all(&mut *tx)
            .await?;
        let finals = sqlx::query_as::<_, CodingSubmission>(
            r#"SELECT * FROM coding_submissions WHERE attempt_id = $1 AND is_final_submission"#,
        )
        .bind(attempt_id)
        .fetch_all(&mut *tx)
        .await?;

        let tally = GradingService::tally(&assessment, &questions, &answers, &finals, attempt.started_at, now);

        let attempt = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE attempts
            SET status = 'evaluated',
                submitted_at = $2,
                total_questions = $3,
                answered_questions = $4,
                correct_answers = $5,
                wrong_answers = $6,
                skipped_questions = $7,
                score_obtained = $8,
                total_score = $9,
                percentage = $10,
                time_taken_seconds = $11
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(now)
        .bind(questions.len() as i32)
        .bind(tally.answered)
        .bind(tally.correct)
        .bind(tally.wrong)
        .bind(tally.skipped)
        .bind(tally.score_obtained)
        .bind(tally.total_score)
        .bind(tally.percentage)
        .bind(tally.time_taken_seconds)
        .fetch_one(&mut *tx)
        .await?;

        close_sessions(&mut tx, &[attempt_id], now).await?;
        tx.commit().await?;
        Ok(Finalized { attempt, already_finalized: false })
    }

    async fn list_overdue_attempts(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT a.id FROM attempts a
            JOIN assessments s ON s.id = a.assessment_id
            WHERE a.status = 'in_progress'
              AND s.end_time > $1
              AND a.started_at + make_interval(mins => s.duration_minutes) <= $1
            ORDER BY a.id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn expire_attempts(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let expired: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE attempts a SET status = 'expired'
            FROM assessments s
            WHERE s.id = a.assessment_id
              AND a.status IN ('not_started', 'in_progress')
              AND s.end_time <= $1
            RETURNING a.id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        if !expired.is_empty() {
            close_sessions(&mut tx, &expired, now).await?;
        }
        tx.commit().await?;
        Ok(expired.len() as u64)
    }
}
