use axum::{
    extract::{Path, State},
    Extension, Json,
};
use validator::Validate;

use crate::dto::attempt_dto::{
    BeginResponse, CodeRequest, CodeSubmissionResponse, DeviceCheckRequest, DeviceCheckResponse, FlagRequest,
    FlagResponse, HeartbeatResponse, QuestionView, RunResponse, SaveAnswerRequest, SaveAnswerResponse,
    StartResponse, ViolationRequest, ViolationResponse,
};
use crate::error::Result;
use crate::middleware::auth::StudentId;
use crate::AppState;

#[axum::debug_handler]
pub async fn begin(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(assessment_id): Path<i64>,
) -> Result<Json<BeginResponse>> {
    let response = state.session_service.begin(student.0, assessment_id).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn record_device_check(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
    Json(req): Json<DeviceCheckRequest>,
) -> Result<Json<DeviceCheckResponse>> {
    req.validate()?;
    let response = state
        .session_service
        .record_device_check(&token, student.0, req.device, req.outcome)
        .await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn start(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
) -> Result<Json<StartResponse>> {
    let response = state.session_service.start(&token, student.0).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
) -> Result<Json<HeartbeatResponse>> {
    let response = state.session_service.heartbeat(&token, student.0).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn report_violation(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
    Json(req): Json<ViolationRequest>,
) -> Result<Json<ViolationResponse>> {
    req.validate()?;
    let response = state
        .session_service
        .report_violation(&token, student.0, req.kind, req.details)
        .await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn get_question(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path((token, index)): Path<(String, usize)>,
) -> Result<Json<QuestionView>> {
    let (session, attempt) = state.session_service.resolve(&token, student.0).await?;
    let view = state.attempt_service.get_question(&session, &attempt, index).await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
    Json(req): Json<SaveAnswerRequest>,
) -> Result<Json<SaveAnswerResponse>> {
    req.validate()?;
    let (_, attempt) = state.session_service.resolve(&token, student.0).await?;
    let response = state
        .answer_service
        .save_mcq_answer(attempt.id, req.assessment_question_id, req.selected_option_ids, req.time_taken_seconds)
        .await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn flag_question(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
    Json(req): Json<FlagRequest>,
) -> Result<Json<FlagResponse>> {
    req.validate()?;
    let (_, attempt) = state.session_service.resolve(&token, student.0).await?;
    let response = state
        .answer_service
        .flag_question(attempt.id, req.assessment_question_id, req.flagged)
        .await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn try_run(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
    Json(req): Json<CodeRequest>,
) -> Result<Json<RunResponse>> {
    req.validate()?;
    let (_, attempt) = state.session_service.resolve(&token, student.0).await?;
    let response = state
        .judge_service
        .try_run(&attempt, req.assessment_question_id, req.language, req.source_code)
        .await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn final_submit(
    State(state): State<AppState>,
    Extension(student): Extension<StudentId>,
    Path(token): Path<String>,
    Json(req): Json<CodeRequest>,
) -> Result<Json<CodeSubmissionResponse>> {
    req.validate()?;
    let (_, attempt) = state.session_service.resolve(&token, student.0).await?;
    let response = state
        .judge_service
        .final_submit(attempt.id, req.assessment_question_id, req.language, req.source_code)
        .await?;
    Ok(Json(response))
}
