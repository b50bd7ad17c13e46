//! Postgres store tests. They run against `DATABASE_URL` and are skipped
//! when it is not set.

mod common;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use assessment_engine::error::Error;
use assessment_engine::models::answer::AnswerUpsert;
use assessment_engine::models::session::{CheckState, CheckStatus, Device};
use assessment_engine::storage::{PgStore, Store};
use assessment_engine::AppState;
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_test::{assert_err, assert_ok};

struct Seeded {
    pool: PgPool,
    store: Arc<PgStore>,
    state: AppState,
    assessment_id: i64,
    student_id: i64,
    /// `assessment_questions.id` of the two MCQs.
    first: i64,
    second: i64,
}

async fn seed(penalty: i64) -> Option<Seeded> {
    dotenvy::dotenv().ok();
    let Ok(url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("connect");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");

    let now = Utc::now();
    let assessment_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO assessments (title, duration_minutes, start_time, end_time)
           VALUES ($1, 30, $2, $3) RETURNING id"#,
    )
    .bind("Store test")
    .bind(now - ChronoDuration::hours(1))
    .bind(now + ChronoDuration::hours(2))
    .fetch_one(&pool)
    .await
    .expect("seed assessment");

    let mut linked = Vec::new();
    for (order, template) in [mcq(Q1, 1, 4, penalty), mcq(Q2, 2, 4, penalty)].into_iter().enumerate() {
        let question_id: i64 =
            sqlx::query_scalar(r#"INSERT INTO questions (prompt, content) VALUES ($1, $2) RETURNING id"#)
                .bind(&template.prompt)
                .bind(template.content)
                .fetch_one(&pool)
                .await
                .expect("seed question");
        let aq_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO assessment_questions
                   (assessment_id, question_id, points, negative_points, is_mandatory, display_order, section)
               VALUES ($1, $2, $3, $4, TRUE, $5, 'theory') RETURNING id"#,
        )
        .bind(assessment_id)
        .bind(question_id)
        .bind(template.points)
        .bind(template.negative_points)
        .bind(order as i32)
        .fetch_one(&pool)
        .await
        .expect("seed assessment question");
        linked.push(aq_id);
    }

    let (student_id, batch_id) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(1_000_000..i64::MAX / 2), rng.gen_range(1_000_000..i64::MAX / 2))
    };
    sqlx::query(r#"INSERT INTO assessment_batches (assessment_id, batch_id) VALUES ($1, $2)"#)
        .bind(assessment_id)
        .bind(batch_id)
        .execute(&pool)
        .await
        .expect("seed batch");
    sqlx::query(r#"INSERT INTO batch_members (batch_id, student_id) VALUES ($1, $2)"#)
        .bind(batch_id)
        .bind(student_id)
        .execute(&pool)
        .await
        .expect("seed member");

    let store = Arc::new(PgStore::new(pool.clone()));
    let dyn_store: Arc<dyn Store> = store.clone();
    let state = AppState::new(dyn_store, Arc::new(judge_passing(0)), Duration::from_secs(2));
    Some(Seeded { pool, store, state, assessment_id, student_id, first: linked[0], second: linked[1] })
}

impl Seeded {
    async fn started(&self) -> (i64, String) {
        let begun = self.state.session_service.begin(self.student_id, self.assessment_id).await.expect("begin");
        self.state
            .session_service
            .start(&begun.session_token, self.student_id)
            .await
            .expect("start");
        (begun.attempt_id, begun.session_token)
    }
}

#[tokio::test]
async fn begin_reuses_open_attempt_with_one_active_session() {
    let Some(db) = seed(0).await else { return };
    let sessions = &db.state.session_service;

    let first = assert_ok!(sessions.begin(db.student_id, db.assessment_id).await);
    let second = assert_ok!(sessions.begin(db.student_id, db.assessment_id).await);
    assert_eq!(first.attempt_id, second.attempt_id);
    assert_eq!(second.attempt_number, 1);
    assert!(second.resumed);

    let all = db.store.list_sessions(first.attempt_id).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|s| s.is_active).count(), 1);

    let old = db.store.find_session_by_token(&first.session_token).await.unwrap().unwrap();
    assert!(!old.is_active);
    assert!(old.ended_at.is_some());
    let err = assert_err!(sessions.heartbeat(&first.session_token, db.student_id).await);
    assert!(matches!(err, Error::SessionNotFound));
}

#[tokio::test]
async fn device_checks_merge_per_device() {
    let Some(db) = seed(0).await else { return };
    let begun = db.state.session_service.begin(db.student_id, db.assessment_id).await.unwrap();
    let session = db.store.find_session_by_token(&begun.session_token).await.unwrap().unwrap();

    let at = Some(Utc::now());
    assert_ok!(
        db.store
            .update_device_check(session.id, Device::Camera, CheckState { status: CheckStatus::Success, at })
            .await
    );
    let merged = assert_ok!(
        db.store
            .update_device_check(session.id, Device::Microphone, CheckState { status: CheckStatus::Failed, at })
            .await
    );
    assert!(merged.device_checks.passed(Device::Camera));
    assert_eq!(merged.device_checks.microphone.status, CheckStatus::Failed);
}

#[tokio::test]
async fn reanswer_moves_counters_by_the_difference() {
    let Some(db) = seed(1).await else { return };
    let (attempt_id, _) = db.started().await;
    let answers = &db.state.answer_service;

    assert_ok!(answers.save_mcq_answer(attempt_id, db.first, vec![RIGHT], 5).await);
    assert_ok!(answers.save_mcq_answer(attempt_id, db.second, vec![RIGHT], 5).await);
    assert_ok!(answers.save_mcq_answer(attempt_id, db.first, vec![WRONG], 7).await);

    let attempt = db.store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.answered_questions, 2);
    assert_eq!(attempt.correct_answers, 1);
    assert_eq!(attempt.wrong_answers, 1);
    assert_eq!(attempt.score_obtained, Decimal::from(3));

    assert_ok!(answers.save_mcq_answer(attempt_id, db.second, vec![], 9).await);
    let attempt = db.store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.answered_questions, 1);
    assert_eq!(attempt.score_obtained, Decimal::from(-1));
}

#[tokio::test]
async fn finalize_is_idempotent_and_frees_the_next_attempt() {
    let Some(db) = seed(0).await else { return };
    let (attempt_id, token) = db.started().await;
    assert_ok!(db.state.answer_service.save_mcq_answer(attempt_id, db.first, vec![RIGHT], 5).await);

    let finalize = &db.state.finalize_service;
    let first = assert_ok!(finalize.submit(attempt_id, db.student_id).await);
    assert!(!first.already_finalized);
    assert_eq!(first.score_obtained, Decimal::from(4));
    assert_eq!(first.percentage, Decimal::from(50));

    let again = assert_ok!(finalize.submit(attempt_id, db.student_id).await);
    assert!(again.already_finalized);
    assert_eq!(again.score_obtained, first.score_obtained);
    assert_eq!(again.submitted_at, first.submitted_at);

    let err = assert_err!(db.state.session_service.resolve(&token, db.student_id).await);
    assert!(matches!(err, Error::AttemptNotActive(_)));

    let next = assert_ok!(db.state.session_service.begin(db.student_id, db.assessment_id).await);
    assert_ne!(next.attempt_id, attempt_id);
    assert_eq!(next.attempt_number, 2);
    assert!(!next.resumed);
}

#[tokio::test]
async fn heavy_penalties_fit_the_percentage_column() {
    let Some(db) = seed(1000).await else { return };
    let (attempt_id, _) = db.started().await;
    for question in [db.first, db.second] {
        assert_ok!(db.state.answer_service.save_mcq_answer(attempt_id, question, vec![WRONG], 1).await);
    }

    let summary = assert_ok!(db.state.finalize_service.submit(attempt_id, db.student_id).await);
    assert_eq!(summary.score_obtained, Decimal::from(-2000));
    assert_eq!(summary.percentage, Decimal::from(-25000));
    let stored = db.store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(stored.percentage, Decimal::from(-25000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_to_one_answer_count_once() {
    let Some(db) = seed(1).await else { return };
    let (attempt_id, _) = db.started().await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = db.store.clone();
        let question = db.first;
        let correct = i % 2 == 0;
        handles.push(tokio::spawn(async move {
            store
                .record_answer(AnswerUpsert {
                    attempt_id,
                    assessment_question_id: question,
                    selected_option_ids: vec![if correct { RIGHT } else { WRONG }],
                    is_correct: correct,
                    points_earned: Decimal::from(if correct { 4 } else { -1 }),
                    time_taken_seconds: 1,
                    answered_at: Utc::now(),
                })
                .await
        }));
    }
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    let stored = db.store.list_answers(attempt_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    let attempt = db.store.get_attempt(attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.answered_questions, 1);
    assert_eq!(attempt.correct_answers + attempt.wrong_answers, 1);
    assert_eq!(attempt.score_obtained, stored[0].points_earned);

    let rows: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM attempt_answers WHERE attempt_id = $1"#)
        .bind(attempt_id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}
