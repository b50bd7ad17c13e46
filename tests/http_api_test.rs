mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::*;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

async fn call(app: &Router, method: &str, uri: &str, student: Option<i64>, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = student {
        builder = builder.header("x-student-id", id.to_string());
    }
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_needs_no_identity() {
    let fx = fixture(judge_passing(0)).await;
    let app = assessment_engine::routes::router(fx.state, 1000);

    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn exam_routes_require_student_header() {
    let fx = fixture(judge_passing(0)).await;
    let app = assessment_engine::routes::router(fx.state, 1000);

    let (status, body) = call(&app, "POST", "/api/assessments/1/begin", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let req = Request::builder()
        .method("POST")
        .uri("/api/assessments/1/begin")
        .header("x-student-id", "nobody")
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn attempt_flow_over_http() {
    let fx = fixture(judge_passing(2)).await;
    let app = assessment_engine::routes::router(fx.state, 1000);
    let me = Some(STUDENT);

    let (status, begun) = call(&app, "POST", "/api/assessments/1/begin", me, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(begun["status"], "not_started");
    let token = begun["session_token"].as_str().unwrap().to_string();
    let attempt_id = begun["attempt_id"].as_i64().unwrap();

    let (status, _) = call(&app, "POST", &format!("/api/sessions/{}/start", token), Some(OUTSIDER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, started) = call(&app, "POST", &format!("/api/sessions/{}/start", token), me, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "in_progress");

    let (status, question) = call(&app, "GET", &format!("/api/sessions/{}/questions/0", token), me, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(question["assessment_question_id"], Q1);
    assert_eq!(question["body"]["type"], "mcq");
    assert_eq!(question["body"]["options"].as_array().unwrap().len(), 4);
    assert!(!question.to_string().contains("is_correct"));

    let (status, saved) = call(
        &app,
        "PUT",
        &format!("/api/sessions/{}/answers", token),
        me,
        Some(json!({"assessment_question_id": Q1, "selected_option_ids": [RIGHT], "time_taken_seconds": 12})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["is_correct"], true);
    assert!(saved.get("correct_option_ids").is_none());

    let (status, code) = call(
        &app,
        "POST",
        &format!("/api/sessions/{}/code-submissions", token),
        me,
        Some(json!({"assessment_question_id": CODING, "language": "python", "source_code": "def solve(a, b): return a + b"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(code["status"], "accepted");

    let (status, preview) = call(&app, "GET", &format!("/api/attempts/{}/submit-preview", attempt_id), me, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["attended"], 2);
    assert_eq!(preview["unanswered"], 1);

    let (status, summary) = call(&app, "POST", &format!("/api/attempts/{}/submit", attempt_id), me, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["status"], "evaluated");
    assert_eq!(summary["already_finalized"], false);

    let (status, again) = call(&app, "POST", &format!("/api/attempts/{}/submit", attempt_id), me, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["already_finalized"], true);
    assert_eq!(again["score_obtained"], summary["score_obtained"]);

    // The session closed with the submit; writes through it are rejected as
    // writes to a finished attempt.
    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/sessions/{}/answers", token),
        me,
        Some(json!({"assessment_question_id": Q2, "selected_option_ids": [RIGHT]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "attempt_not_active");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/sessions/{}/code-submissions", token),
        me,
        Some(json!({"assessment_question_id": CODING, "language": "python", "source_code": "def solve(a, b): return 0"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "attempt_not_active");

    // Someone else holding the token still learns nothing about the attempt.
    let (status, body) = call(&app, "POST", &format!("/api/sessions/{}/heartbeat", token), Some(OUTSIDER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "session_not_found");
}

#[tokio::test]
async fn superseded_token_is_not_found() {
    let fx = fixture(judge_passing(0)).await;
    let app = assessment_engine::routes::router(fx.state, 1000);
    let me = Some(STUDENT);

    let (_, first) = call(&app, "POST", "/api/assessments/1/begin", me, None).await;
    let (_, second) = call(&app, "POST", "/api/assessments/1/begin", me, None).await;
    assert_eq!(first["attempt_id"], second["attempt_id"]);

    let old = first["session_token"].as_str().unwrap();
    let (status, body) = call(&app, "POST", &format!("/api/sessions/{}/start", old), me, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "session_not_found");

    let (status, _) = call(&app, "POST", "/api/sessions/not-a-token/heartbeat", me, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn writes_after_time_is_up_conflict() {
    let fx = fixture(judge_passing(0)).await;
    let app = assessment_engine::routes::router(fx.state.clone(), 1000);
    let (_, token) = fx.started().await;

    // Same attempt, but the assessment is shortened to zero minutes.
    let mut short = assessment();
    short.duration_minutes = 0;
    fx.store.insert_assessment(short).await;

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/sessions/{}/answers", token),
        Some(STUDENT),
        Some(json!({"assessment_question_id": Q1, "selected_option_ids": [RIGHT]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "attempt_not_active");
}

#[tokio::test]
async fn invalid_payloads_are_rejected() {
    let fx = fixture(judge_passing(0)).await;
    let app = assessment_engine::routes::router(fx.state.clone(), 1000);
    let (_, token) = fx.started().await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/sessions/{}/run", token),
        Some(STUDENT),
        Some(json!({"assessment_question_id": CODING, "language": "python", "source_code": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/sessions/{}/questions/9", token),
        Some(STUDENT),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_over_budget_are_throttled() {
    let fx = fixture(judge_passing(0)).await;
    let app = assessment_engine::routes::router(fx.state, 1);

    let (first, _) = call(&app, "POST", "/api/assessments/1/begin", Some(STUDENT), None).await;
    assert_eq!(first, StatusCode::OK);
    let (second, body) = call(&app, "POST", "/api/assessments/1/begin", Some(STUDENT), None).await;
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limit_exceeded");

    let (other, _) = call(&app, "POST", "/api/assessments/1/begin", Some(OUTSIDER), None).await;
    assert_eq!(other, StatusCode::FORBIDDEN);
}
